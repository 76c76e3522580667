//! Walking-speed calibration
//!
//! The user walks a known reference distance a few times. Each timed walk
//! yields one velocity; the session result is the mean over all walks, plus
//! the mean WMA level seen in a fixed sub-window of each walk and the mean
//! acceleration magnitude.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::types::AccelerationSample;

/// Outcome of a completed calibration session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Mean walking velocity (m/s)
    pub average_velocity: f64,
    /// Mean WMA level while walking, if any interval covered the sub-window
    pub average_wma_baseline: Option<f64>,
    /// Mean acceleration magnitude while walking (m/s²)
    pub average_acceleration: f64,
    /// Number of intervals that went into the averages
    pub sample_count: usize,
}

impl CalibrationResult {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> TrackerResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> TrackerResult<Self> {
        let text = fs::read_to_string(path)?;
        let result: CalibrationResult = serde_json::from_str(&text)?;
        if !(result.average_velocity > 0.0 && result.average_velocity.is_finite()) {
            return Err(TrackerError::InvalidConfig(format!(
                "calibration velocity must be positive, got {}",
                result.average_velocity
            )));
        }
        Ok(result)
    }
}

/// Measurements of one timed walk
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntervalMeasurement {
    pub elapsed_secs: f64,
    pub wma_average: Option<f64>,
    pub acceleration_average: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct IntervalAccumulator {
    elapsed_secs: f64,
    accel_sum: f64,
    accel_count: u32,
    wma_sum: f64,
    wma_count: u32,
}

impl IntervalAccumulator {
    fn measurement(&self) -> IntervalMeasurement {
        IntervalMeasurement {
            elapsed_secs: self.elapsed_secs,
            wma_average: (self.wma_count > 0).then(|| self.wma_sum / self.wma_count as f64),
            acceleration_average: (self.accel_count > 0)
                .then(|| self.accel_sum / self.accel_count as f64),
        }
    }
}

/// Accumulates timed calibration walks until the configured count is reached
#[derive(Debug, Clone)]
pub struct CalibrationEstimator {
    interval_count: usize,
    reference_distance_m: f64,
    wma_window_secs: (f64, f64),
    velocities: Vec<f64>,
    wma_averages: Vec<f64>,
    accel_averages: Vec<f64>,
    active: Option<IntervalAccumulator>,
}

impl CalibrationEstimator {
    pub fn new(interval_count: usize, reference_distance_m: f64, wma_window_secs: (f64, f64)) -> Self {
        Self {
            interval_count: interval_count.max(1),
            reference_distance_m,
            wma_window_secs,
            velocities: Vec::with_capacity(interval_count),
            wma_averages: Vec::with_capacity(interval_count),
            accel_averages: Vec::with_capacity(interval_count),
            active: None,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(
            config.calibration_interval_count,
            config.reference_distance_m,
            config.calibration_wma_window_secs,
        )
    }

    /// Start timing a walk
    pub fn begin_interval(&mut self) -> TrackerResult<()> {
        if self.is_complete() {
            return Err(TrackerError::InvalidState(
                "Calibration already complete".to_string(),
            ));
        }
        if self.active.is_some() {
            return Err(TrackerError::AlreadyRunning);
        }
        self.active = Some(IntervalAccumulator::default());
        Ok(())
    }

    pub fn is_interval_active(&self) -> bool {
        self.active.is_some()
    }

    /// Advance the running walk by one tick of `dt_secs`.
    ///
    /// A missing sample still advances the clock; it just contributes nothing
    /// to the averages.
    pub fn record_tick(
        &mut self,
        dt_secs: f64,
        sample: Option<&AccelerationSample>,
        wma: Option<f64>,
    ) -> TrackerResult<()> {
        let (window_start, window_end) = self.wma_window_secs;
        let acc = self.active.as_mut().ok_or(TrackerError::NotRunning)?;

        let tick_start = acc.elapsed_secs;
        acc.elapsed_secs += dt_secs;

        if let Some(sample) = sample {
            acc.accel_sum += sample.magnitude_ms2();
            acc.accel_count += 1;
        }
        if let Some(wma) = wma {
            if tick_start >= window_start && tick_start < window_end {
                acc.wma_sum += wma.abs();
                acc.wma_count += 1;
            }
        }
        Ok(())
    }

    /// Close the running walk and record it.
    ///
    /// On `InvalidCalibrationInterval` the walk is discarded and has to be
    /// repeated; earlier walks are kept.
    pub fn end_interval(&mut self) -> TrackerResult<f64> {
        let acc = self.active.take().ok_or(TrackerError::NotRunning)?;
        self.record_interval(acc.measurement())
    }

    /// Drop the running walk without recording it
    pub fn cancel_interval(&mut self) {
        self.active = None;
    }

    /// Record an externally timed walk; returns its velocity
    pub fn record_interval(&mut self, measurement: IntervalMeasurement) -> TrackerResult<f64> {
        if self.is_complete() {
            return Err(TrackerError::InvalidState(
                "Calibration already complete".to_string(),
            ));
        }

        let elapsed = measurement.elapsed_secs;
        if !(elapsed > 0.0 && elapsed.is_finite()) {
            log::warn!("Rejected calibration interval with elapsed {:.3}s", elapsed);
            return Err(TrackerError::InvalidCalibrationInterval(elapsed));
        }

        let velocity = self.reference_distance_m / elapsed;
        self.velocities.push(velocity);
        if let Some(wma) = measurement.wma_average {
            self.wma_averages.push(wma);
        }
        if let Some(accel) = measurement.acceleration_average {
            self.accel_averages.push(accel);
        }

        log::info!(
            "Calibration interval {}/{}: {:.2}m in {:.2}s = {:.3} m/s",
            self.velocities.len(),
            self.interval_count,
            self.reference_distance_m,
            elapsed,
            velocity
        );

        if let Some(result) = self.result() {
            log::info!(
                "Calibration complete: avg velocity {:.3} m/s, wma baseline {:?}, avg accel {:.3} m/s²",
                result.average_velocity,
                result.average_wma_baseline,
                result.average_acceleration
            );
        }

        Ok(velocity)
    }

    pub fn completed_intervals(&self) -> usize {
        self.velocities.len()
    }

    pub fn interval_count(&self) -> usize {
        self.interval_count
    }

    pub fn is_complete(&self) -> bool {
        self.velocities.len() >= self.interval_count
    }

    /// Final result, once every interval has been recorded
    pub fn result(&self) -> Option<CalibrationResult> {
        if !self.is_complete() {
            return None;
        }
        Some(CalibrationResult {
            average_velocity: mean(&self.velocities)?,
            average_wma_baseline: mean(&self.wma_averages),
            average_acceleration: mean(&self.accel_averages).unwrap_or(0.0),
            sample_count: self.velocities.len(),
        })
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn timed(elapsed_secs: f64) -> IntervalMeasurement {
        IntervalMeasurement {
            elapsed_secs,
            ..IntervalMeasurement::default()
        }
    }

    #[test]
    fn test_three_interval_average() {
        let mut estimator = CalibrationEstimator::new(3, 4.0, (1.0, 2.0));
        for t in [3.2, 3.5, 3.8] {
            estimator.record_interval(timed(t)).unwrap();
        }
        let result = estimator.result().unwrap();
        let expected = (4.0 / 3.2 + 4.0 / 3.5 + 4.0 / 3.8) / 3.0;
        assert_abs_diff_eq!(result.average_velocity, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(result.average_velocity, 1.1485, epsilon = 1e-3);
        assert_eq!(result.sample_count, 3);
        assert_eq!(result.average_wma_baseline, None);
    }

    #[test]
    fn test_zero_elapsed_rejected() {
        let mut estimator = CalibrationEstimator::new(3, 4.0, (1.0, 2.0));
        assert_eq!(
            estimator.record_interval(timed(0.0)),
            Err(TrackerError::InvalidCalibrationInterval(0.0))
        );
        assert!(estimator.record_interval(timed(-1.0)).is_err());
        assert_eq!(estimator.completed_intervals(), 0);
        assert!(estimator.result().is_none());
    }

    #[test]
    fn test_begin_end_without_ticks_rejected() {
        // Button pressed twice instantly
        let mut estimator = CalibrationEstimator::new(1, 4.0, (1.0, 2.0));
        estimator.begin_interval().unwrap();
        assert!(matches!(
            estimator.end_interval(),
            Err(TrackerError::InvalidCalibrationInterval(_))
        ));
        // The walk can be repeated
        estimator.begin_interval().unwrap();
        for _ in 0..40 {
            estimator.record_tick(0.1, None, None).unwrap();
        }
        let velocity = estimator.end_interval().unwrap();
        assert_abs_diff_eq!(velocity, 1.0, epsilon = 1e-9);
        assert!(estimator.is_complete());
    }

    #[test]
    fn test_tick_accumulation_and_wma_sub_window() {
        let mut estimator = CalibrationEstimator::new(1, 4.0, (1.0, 2.0));
        estimator.begin_interval().unwrap();
        let sample = AccelerationSample::new(0.0, 0.1, 0.0);
        // 0.125s ticks keep the elapsed clock exact
        for i in 0..24 {
            // WMA is 0.9 inside seconds 1-2 and 0.2 elsewhere
            let t = i as f64 * 0.125;
            let wma = if (1.0..2.0).contains(&t) { 0.9 } else { 0.2 };
            estimator.record_tick(0.125, Some(&sample), Some(wma)).unwrap();
        }
        estimator.end_interval().unwrap();

        let result = estimator.result().unwrap();
        assert_abs_diff_eq!(result.average_velocity, 4.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(result.average_wma_baseline.unwrap(), 0.9, epsilon = 1e-9);
        assert_abs_diff_eq!(result.average_acceleration, 0.981, epsilon = 1e-9);
    }

    #[test]
    fn test_state_errors() {
        let mut estimator = CalibrationEstimator::new(1, 4.0, (1.0, 2.0));
        assert_eq!(
            estimator.record_tick(0.1, None, None),
            Err(TrackerError::NotRunning)
        );
        assert_eq!(estimator.end_interval(), Err(TrackerError::NotRunning));
        estimator.begin_interval().unwrap();
        assert_eq!(estimator.begin_interval(), Err(TrackerError::AlreadyRunning));
        estimator.cancel_interval();
        assert!(!estimator.is_interval_active());

        estimator.record_interval(timed(4.0)).unwrap();
        assert!(matches!(
            estimator.begin_interval(),
            Err(TrackerError::InvalidState(_))
        ));
    }

    #[test]
    fn test_result_file_round_trip() {
        let result = CalibrationResult {
            average_velocity: 1.2,
            average_wma_baseline: Some(0.85),
            average_acceleration: 1.4,
            sample_count: 3,
        };
        let path = std::env::temp_dir().join(format!(
            "stride_calibration_{}.json",
            std::process::id()
        ));
        result.save(&path).unwrap();
        let loaded = CalibrationResult::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, result);
    }
}
