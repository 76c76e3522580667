use std::collections::VecDeque;

use crate::error::{TrackerError, TrackerResult};

/// Linearly weighted moving average over the angle-cosine signal.
///
/// The window always holds exactly `capacity` values. Weights run 1..=capacity
/// from oldest to newest, so the most recent sample counts the most while a
/// single spike is still damped by the rest of the window.
#[derive(Clone, Debug)]
pub struct WeightedMovingAverage {
    window: VecDeque<f64>,
    fill_value: f64,
    weight_sum: f64,
}

impl WeightedMovingAverage {
    /// Create a filter pre-filled with `fill_value`
    pub fn new(capacity: usize, fill_value: f64) -> TrackerResult<Self> {
        if capacity == 0 {
            return Err(TrackerError::InvalidConfig(
                "WMA window capacity must be at least 1".to_string(),
            ));
        }

        let mut window = VecDeque::with_capacity(capacity);
        window.resize(capacity, fill_value);

        Ok(WeightedMovingAverage {
            window,
            fill_value,
            weight_sum: (capacity * (capacity + 1)) as f64 / 2.0,
        })
    }

    /// Evict the oldest value, append `value`, and return the new average
    pub fn push(&mut self, value: f64) -> f64 {
        self.window.pop_front();
        self.window.push_back(value);
        self.value()
    }

    /// Current weighted average
    pub fn value(&self) -> f64 {
        let weighted: f64 = self
            .window
            .iter()
            .enumerate()
            .map(|(i, v)| (i + 1) as f64 * v)
            .sum();
        weighted / self.weight_sum
    }

    /// Refill the whole window with the neutral fill value
    pub fn reset(&mut self) {
        self.window.iter_mut().for_each(|v| *v = self.fill_value);
    }

    /// Values from oldest to newest
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            WeightedMovingAverage::new(0, 0.0),
            Err(TrackerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_fill() {
        let wma = WeightedMovingAverage::new(50, 0.5).unwrap();
        assert_eq!(wma.values().count(), 50);
        assert_eq!(wma.value(), 0.5);
    }

    #[test]
    fn test_constant_window_returns_constant() {
        for capacity in [1usize, 2, 7, 50, 100] {
            let mut wma = WeightedMovingAverage::new(capacity, 0.0).unwrap();
            for _ in 0..capacity {
                wma.push(0.83);
            }
            assert_abs_diff_eq!(wma.value(), 0.83, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_known_weights() {
        let mut wma = WeightedMovingAverage::new(3, 0.0).unwrap();
        wma.push(1.0);
        wma.push(2.0);
        let result = wma.push(3.0);
        // (1*1 + 2*2 + 3*3) / 6
        assert_abs_diff_eq!(result, 14.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut wma = WeightedMovingAverage::new(2, 0.0).unwrap();
        wma.push(1.0);
        wma.push(2.0);
        wma.push(3.0);
        let values: Vec<f64> = wma.values().collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn test_recent_spike_outweighs_old_spike() {
        let capacity = 10;

        // Spike in the newest slot
        let mut recent = WeightedMovingAverage::new(capacity, 0.0).unwrap();
        let recent_value = recent.push(1.0);

        // Same spike aged into the oldest slot
        let mut old = WeightedMovingAverage::new(capacity, 0.0).unwrap();
        old.push(1.0);
        for _ in 1..capacity {
            old.push(0.0);
        }
        let old_value = old.value();

        let denom = (capacity * (capacity + 1)) as f64 / 2.0;
        assert_abs_diff_eq!(recent_value, capacity as f64 / denom, epsilon = 1e-12);
        assert_abs_diff_eq!(old_value, 1.0 / denom, epsilon = 1e-12);
        assert!(recent_value > old_value);
    }

    #[test]
    fn test_reset_restores_fill() {
        let mut wma = WeightedMovingAverage::new(5, 1.0).unwrap();
        for _ in 0..5 {
            wma.push(0.0);
        }
        assert_eq!(wma.value(), 0.0);
        wma.reset();
        assert_eq!(wma.value(), 1.0);
    }
}
