//! Vector math for the angle signal
//!
//! Acceleration vectors are plain `nalgebra` 3-vectors in m/s². The only
//! derived quantity the tracker needs is the cosine of the angle between
//! two consecutive vectors.

use nalgebra::SVector;

use crate::error::{TrackerError, TrackerResult};

// ===== Dimensions =====
pub const ACCEL_DIM: usize = 3;

/// Standard gravity, used to convert g to m/s²
pub const GRAVITY: f64 = 9.81;

/// Acceleration vector in m/s²
pub type Vector3 = SVector<f64, ACCEL_DIM>;

/// Cosine of the angle between `a` and `b`: `(a·b) / (|a| |b|)`.
///
/// Fails with `DegenerateVector` when either magnitude is zero so callers skip
/// the tick instead of carrying a NaN into the filter.
pub fn angle_cosine(a: &Vector3, b: &Vector3) -> TrackerResult<f64> {
    let denominator = a.norm() * b.norm();
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(TrackerError::DegenerateVector);
    }
    // Rounding can push the ratio a hair outside [-1, 1]
    Ok((a.dot(b) / denominator).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_parallel_vectors() {
        let a = Vector3::new(1.0, 2.0, 3.0);
        let b = a * 4.5;
        assert_abs_diff_eq!(angle_cosine(&a, &b).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        let x = Vector3::new(1.0, 0.0, 0.0);
        let y = Vector3::new(0.0, 3.0, 0.0);
        assert_abs_diff_eq!(angle_cosine(&x, &y).unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angle_cosine(&x, &(-x)).unwrap(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_magnitude_is_degenerate() {
        let zero = Vector3::zeros();
        let a = Vector3::new(0.1, 0.2, 0.3);
        assert_eq!(angle_cosine(&zero, &a), Err(TrackerError::DegenerateVector));
        assert_eq!(angle_cosine(&a, &zero), Err(TrackerError::DegenerateVector));
    }

    #[test]
    fn test_range_over_many_pairs() {
        // Deterministic spread of directions and magnitudes
        for i in 1..200 {
            let t = i as f64 * 0.37;
            let a = Vector3::new(t.sin() * 3.0, (t * 1.7).cos(), (t * 0.3).sin() + 0.01 * t);
            let b = Vector3::new((t * 2.1).cos(), t.sin() * -5.0, 1e-3 * t);
            let c = angle_cosine(&a, &b).unwrap();
            assert!((-1.0..=1.0).contains(&c), "cosine {} out of range", c);
        }
    }
}
