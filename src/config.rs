//! Tracker configuration
//!
//! Every tunable of the pipeline lives here. The defaults are starting points
//! that were tuned by hand on one phone; re-derive them for other devices.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::detector::LogisticWeights;
use crate::error::{TrackerError, TrackerResult};

/// Which side of the threshold means "walking".
///
/// Raw accelerometer streams include gravity, so consecutive vectors are
/// nearly parallel at rest (cosine near 1) and walking pulls the cosine down.
/// Gravity-removed streams are uncorrelated noise at rest (cosine near 0) and
/// walking makes consecutive vectors line up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPolarity {
    /// Walking when |WMA| rises above the threshold (gravity-removed input)
    #[default]
    WalkingAbove,
    /// Walking when |WMA| falls below the threshold (raw input with gravity)
    WalkingBelow,
}

impl SignalPolarity {
    /// Signal is on the walking side of `threshold`
    pub fn is_active(&self, wma: f64, threshold: f64) -> bool {
        match self {
            SignalPolarity::WalkingAbove => wma.abs() > threshold,
            SignalPolarity::WalkingBelow => wma.abs() < threshold,
        }
    }

    /// Signal is on the stationary side of `threshold`
    pub fn is_quiet(&self, wma: f64, threshold: f64) -> bool {
        match self {
            SignalPolarity::WalkingAbove => wma.abs() < threshold,
            SignalPolarity::WalkingBelow => wma.abs() > threshold,
        }
    }
}

/// Detector thresholds, either fixed or anchored on the calibration baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdConfig {
    Static { enter: f64, exit: f64 },
    /// `baseline ∓ margin`, moved towards the stationary side
    Calibrated { enter_margin: f64, exit_margin: f64 },
}

/// Resolved enter/exit thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub enter: f64,
    pub exit: f64,
}

impl ThresholdConfig {
    pub fn resolve(
        &self,
        polarity: SignalPolarity,
        wma_baseline: Option<f64>,
    ) -> TrackerResult<Thresholds> {
        match *self {
            ThresholdConfig::Static { enter, exit } => Ok(Thresholds { enter, exit }),
            ThresholdConfig::Calibrated {
                enter_margin,
                exit_margin,
            } => {
                let baseline = wma_baseline.ok_or(TrackerError::NotCalibrated)?.abs();
                Ok(match polarity {
                    SignalPolarity::WalkingAbove => Thresholds {
                        enter: baseline - enter_margin,
                        exit: baseline - exit_margin,
                    },
                    SignalPolarity::WalkingBelow => Thresholds {
                        enter: baseline + enter_margin,
                        exit: baseline + exit_margin,
                    },
                })
            }
        }
    }
}

/// Walking-state detector strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorKind {
    Threshold,
    Classifier { weights: LogisticWeights },
}

/// Displacement accumulation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplacementPolicyKind {
    ConstantVelocity,
    Kinematic,
}

/// When a kinematic averaging block closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockClose {
    /// After `kinematic_block_ticks` ticks
    FixedTicks,
    /// When acceleration drops below the noise floor for two consecutive samples
    /// (or the block reaches `kinematic_block_ticks`)
    QuietSamples,
}

/// Acceleration magnitude below which a sample is junk
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NoiseFloor {
    /// Fixed floor in m/s²
    Absolute(f64),
    /// Fraction of the mean acceleration seen during calibration
    FractionOfCalibrated(f64),
}

impl NoiseFloor {
    pub fn resolve(&self, calibrated_acceleration: Option<f64>) -> TrackerResult<f64> {
        match *self {
            NoiseFloor::Absolute(floor) => Ok(floor),
            NoiseFloor::FractionOfCalibrated(fraction) => calibrated_acceleration
                .map(|a| a * fraction)
                .ok_or(TrackerError::NotCalibrated),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Walk-tracking tick period (s)
    pub sample_interval_secs: f64,
    pub wma_window_capacity: usize,
    /// Initial and reset value of the WMA window
    pub wma_fill_value: f64,
    pub signal_polarity: SignalPolarity,
    pub thresholds: ThresholdConfig,
    pub enter_debounce_ticks: u32,
    pub exit_debounce_ticks: u32,
    /// Seconds of walking credited when the walking edge fires
    pub detection_latency_compensation_secs: f64,
    pub detector: DetectorKind,
    pub displacement_policy: DisplacementPolicyKind,
    /// Constant-velocity pulse period; `None` credits every tick
    pub pulse_interval_secs: Option<f64>,
    pub noise_floor: NoiseFloor,
    pub kinematic_block_ticks: usize,
    pub kinematic_block_close: BlockClose,
    /// Heading change (deg per tick) that resets the WMA window while stationary
    pub heading_filter_degrees: Option<f64>,
    pub calibration_interval_count: usize,
    pub reference_distance_m: f64,
    /// Calibration tick period (s)
    pub calibration_interval_secs: f64,
    /// Sub-window of each calibration walk whose WMA feeds the baseline
    pub calibration_wma_window_secs: (f64, f64),
    /// Velocity used for tracking when no calibration has been run (m/s)
    pub fallback_velocity: Option<f64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 0.01,
            wma_window_capacity: 100,
            wma_fill_value: 0.0,
            signal_polarity: SignalPolarity::WalkingAbove,
            thresholds: ThresholdConfig::Static {
                enter: 0.8,
                exit: 0.8,
            },
            enter_debounce_ticks: 25,
            exit_debounce_ticks: 5,
            detection_latency_compensation_secs: 1.0,
            detector: DetectorKind::Threshold,
            displacement_policy: DisplacementPolicyKind::ConstantVelocity,
            pulse_interval_secs: Some(1.0),
            noise_floor: NoiseFloor::Absolute(0.3),
            kinematic_block_ticks: 10,
            kinematic_block_close: BlockClose::FixedTicks,
            heading_filter_degrees: None,
            calibration_interval_count: 3,
            reference_distance_m: 4.0,
            calibration_interval_secs: 0.1,
            calibration_wma_window_secs: (1.0, 2.0),
            fallback_velocity: None,
        }
    }
}

impl TrackerConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> TrackerResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_interval_secs)
    }

    pub fn calibration_interval(&self) -> Duration {
        Duration::from_secs_f64(self.calibration_interval_secs)
    }

    /// Reject configurations that cannot run a session
    pub fn validate(&self) -> TrackerResult<()> {
        fn positive(name: &str, value: f64) -> TrackerResult<()> {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(TrackerError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )))
            }
        }

        positive("sample_interval_secs", self.sample_interval_secs)?;
        positive("calibration_interval_secs", self.calibration_interval_secs)?;
        positive("reference_distance_m", self.reference_distance_m)?;

        if self.wma_window_capacity == 0 {
            return Err(TrackerError::InvalidConfig(
                "wma_window_capacity must be at least 1".to_string(),
            ));
        }
        if self.enter_debounce_ticks == 0 || self.exit_debounce_ticks == 0 {
            return Err(TrackerError::InvalidConfig(
                "debounce tick counts must be at least 1".to_string(),
            ));
        }
        if self.calibration_interval_count == 0 {
            return Err(TrackerError::InvalidConfig(
                "calibration_interval_count must be at least 1".to_string(),
            ));
        }
        if self.kinematic_block_ticks == 0 {
            return Err(TrackerError::InvalidConfig(
                "kinematic_block_ticks must be at least 1".to_string(),
            ));
        }
        if !(self.detection_latency_compensation_secs >= 0.0) {
            return Err(TrackerError::InvalidConfig(
                "detection_latency_compensation_secs must not be negative".to_string(),
            ));
        }
        if let Some(pulse) = self.pulse_interval_secs {
            positive("pulse_interval_secs", pulse)?;
        }
        if let Some(filter) = self.heading_filter_degrees {
            positive("heading_filter_degrees", filter)?;
        }
        if let Some(velocity) = self.fallback_velocity {
            positive("fallback_velocity", velocity)?;
        }

        let (start, end) = self.calibration_wma_window_secs;
        if !(start >= 0.0 && end > start) {
            return Err(TrackerError::InvalidConfig(format!(
                "calibration_wma_window_secs must satisfy 0 <= start < end, got ({}, {})",
                start, end
            )));
        }

        let floor = match self.noise_floor {
            NoiseFloor::Absolute(v) | NoiseFloor::FractionOfCalibrated(v) => v,
        };
        if !(floor >= 0.0) {
            return Err(TrackerError::InvalidConfig(
                "noise_floor must not be negative".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_fatal() {
        let config = TrackerConfig {
            wma_window_capacity: 0,
            ..TrackerConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrackerError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_values_rejected() {
        let cases = [
            TrackerConfig {
                sample_interval_secs: 0.0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                exit_debounce_ticks: 0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                calibration_interval_count: 0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                calibration_wma_window_secs: (2.0, 1.0),
                ..TrackerConfig::default()
            },
            TrackerConfig {
                pulse_interval_secs: Some(-1.0),
                ..TrackerConfig::default()
            },
        ];
        for config in cases.iter() {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "wma_window_capacity": 50,
            "signal_polarity": "walking_below",
            "thresholds": { "kind": "static", "enter": 0.775, "exit": 0.825 },
            "noise_floor": { "kind": "fraction_of_calibrated", "value": 0.25 },
            "heading_filter_degrees": 45.0
        }"#;
        let config: TrackerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.wma_window_capacity, 50);
        assert_eq!(config.signal_polarity, SignalPolarity::WalkingBelow);
        assert_eq!(config.noise_floor, NoiseFloor::FractionOfCalibrated(0.25));
        assert_eq!(config.enter_debounce_ticks, 25);
        assert_eq!(config.heading_filter_degrees, Some(45.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_calibrated_thresholds() {
        let cfg = ThresholdConfig::Calibrated {
            enter_margin: 0.05,
            exit_margin: 0.15,
        };
        let above = cfg.resolve(SignalPolarity::WalkingAbove, Some(0.9)).unwrap();
        assert!((above.enter - 0.85).abs() < 1e-12);
        assert!((above.exit - 0.75).abs() < 1e-12);

        let below = cfg.resolve(SignalPolarity::WalkingBelow, Some(0.4)).unwrap();
        assert!((below.enter - 0.45).abs() < 1e-12);
        assert!((below.exit - 0.55).abs() < 1e-12);

        assert_eq!(
            cfg.resolve(SignalPolarity::WalkingAbove, None),
            Err(TrackerError::NotCalibrated)
        );
    }

    #[test]
    fn test_polarity() {
        assert!(SignalPolarity::WalkingAbove.is_active(-0.9, 0.8));
        assert!(SignalPolarity::WalkingAbove.is_quiet(0.5, 0.8));
        assert!(SignalPolarity::WalkingBelow.is_active(0.1, 0.8));
        assert!(SignalPolarity::WalkingBelow.is_quiet(0.95, 0.8));
        // Exactly on the threshold is neither
        assert!(!SignalPolarity::WalkingAbove.is_active(0.8, 0.8));
        assert!(!SignalPolarity::WalkingAbove.is_quiet(0.8, 0.8));
    }

    #[test]
    fn test_noise_floor_resolution() {
        assert_eq!(NoiseFloor::Absolute(0.4).resolve(None), Ok(0.4));
        assert_eq!(
            NoiseFloor::FractionOfCalibrated(0.25).resolve(Some(2.0)),
            Ok(0.5)
        );
        assert_eq!(
            NoiseFloor::FractionOfCalibrated(0.25).resolve(None),
            Err(TrackerError::NotCalibrated)
        );
    }
}
