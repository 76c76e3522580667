//! Walking-state detection
//!
//! Detectors turn the smoothed angle signal into debounced walking edges.
//! Two strategies share the `WalkingDetector` trait:
//! - `ThresholdDetector`: hysteresis with separate enter/exit thresholds and
//!   consecutive-tick debounce counters
//! - `ClassifierDetector`: feeds {wma, time above threshold, one-second flag}
//!   to an injected predictor
//!
//! Detectors emit transitions, never raw state, so the integrator only reacts
//! on edges.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationResult;
use crate::config::{DetectorKind, SignalPolarity, Thresholds, TrackerConfig};
use crate::error::{TrackerError, TrackerResult};
use crate::types::{StateTransition, WalkingState};

/// Converts the WMA signal into walking edges
pub trait WalkingDetector {
    /// Feed one WMA value.
    ///
    /// An error means the tick was inconclusive; the detector keeps its
    /// previous state.
    fn step(&mut self, wma: f64) -> TrackerResult<Option<StateTransition>>;

    fn state(&self) -> WalkingState;

    /// Back to session-start values: Stationary, counters zeroed
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

/// Debounce counters of the hysteresis detector.
///
/// "Above" and "below" are relative to the configured polarity: above means
/// on the walking side of the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HysteresisCounters {
    pub ticks_above_threshold: u32,
    pub ticks_below_threshold: u32,
}

/// Hysteresis detector with enter/exit debounce
#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    polarity: SignalPolarity,
    thresholds: Thresholds,
    enter_debounce_ticks: u32,
    exit_debounce_ticks: u32,
    latency_credit_m: f64,
    state: WalkingState,
    counters: HysteresisCounters,
}

impl ThresholdDetector {
    pub fn new(
        polarity: SignalPolarity,
        thresholds: Thresholds,
        enter_debounce_ticks: u32,
        exit_debounce_ticks: u32,
        latency_credit_m: f64,
    ) -> Self {
        Self {
            polarity,
            thresholds,
            enter_debounce_ticks: enter_debounce_ticks.max(1),
            exit_debounce_ticks: exit_debounce_ticks.max(1),
            latency_credit_m: latency_credit_m.max(0.0),
            state: WalkingState::Stationary,
            counters: HysteresisCounters::default(),
        }
    }

    pub fn counters(&self) -> HysteresisCounters {
        self.counters
    }
}

impl WalkingDetector for ThresholdDetector {
    fn step(&mut self, wma: f64) -> TrackerResult<Option<StateTransition>> {
        match self.state {
            WalkingState::Stationary => {
                if self.polarity.is_active(wma, self.thresholds.enter) {
                    self.counters.ticks_above_threshold += 1;
                } else {
                    self.counters.ticks_above_threshold = 0;
                }

                if self.counters.ticks_above_threshold >= self.enter_debounce_ticks {
                    self.state = WalkingState::Walking;
                    self.counters = HysteresisCounters::default();
                    return Ok(Some(StateTransition::Started {
                        latency_credit_m: self.latency_credit_m,
                    }));
                }
            }
            WalkingState::Walking => {
                if self.polarity.is_quiet(wma, self.thresholds.exit) {
                    self.counters.ticks_below_threshold += 1;
                } else {
                    self.counters.ticks_below_threshold = 0;
                }

                if self.counters.ticks_below_threshold >= self.exit_debounce_ticks {
                    self.state = WalkingState::Stationary;
                    self.counters = HysteresisCounters::default();
                    return Ok(Some(StateTransition::Stopped));
                }
            }
        }
        Ok(None)
    }

    fn state(&self) -> WalkingState {
        self.state
    }

    fn reset(&mut self) {
        self.state = WalkingState::Stationary;
        self.counters = HysteresisCounters::default();
    }

    fn name(&self) -> &'static str {
        "threshold"
    }
}

/// Inputs of the walking classifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierFeatures {
    pub wma: f64,
    /// Seconds the signal has stayed on the walking side of the threshold
    pub time_above_threshold: f64,
    /// `time_above_threshold >= 1.0`
    pub time_above_threshold_for_one_second: bool,
}

/// Binary walking predictor
pub trait WalkingPredictor {
    fn predict(&mut self, features: &ClassifierFeatures) -> TrackerResult<bool>;
}

impl<F> WalkingPredictor for F
where
    F: FnMut(&ClassifierFeatures) -> TrackerResult<bool>,
{
    fn predict(&mut self, features: &ClassifierFeatures) -> TrackerResult<bool> {
        self(features)
    }
}

/// Logistic-regression weights over the three classifier features
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticWeights {
    pub wma: f64,
    pub time_above: f64,
    pub time_above_one_second: f64,
    pub intercept: f64,
}

impl Default for LogisticWeights {
    /// Hand-set weights: walking once the signal has held for about a second.
    /// Replace with trained coefficients for a specific device.
    fn default() -> Self {
        Self {
            wma: 6.0,
            time_above: 2.0,
            time_above_one_second: 4.0,
            intercept: -8.0,
        }
    }
}

/// Logistic-regression predictor, walking when p >= 0.5
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticPredictor {
    weights: LogisticWeights,
}

impl LogisticPredictor {
    pub fn new(weights: LogisticWeights) -> Self {
        Self { weights }
    }

    /// Probability of walking
    pub fn probability(&self, features: &ClassifierFeatures) -> f64 {
        let w = &self.weights;
        let one_second = if features.time_above_threshold_for_one_second {
            1.0
        } else {
            0.0
        };
        let z = w.intercept
            + w.wma * features.wma
            + w.time_above * features.time_above_threshold
            + w.time_above_one_second * one_second;
        1.0 / (1.0 + (-z).exp())
    }
}

impl WalkingPredictor for LogisticPredictor {
    fn predict(&mut self, features: &ClassifierFeatures) -> TrackerResult<bool> {
        let p = self.probability(features);
        if !p.is_finite() {
            return Err(TrackerError::ClassifierUnavailable(format!(
                "non-finite probability for {:?}",
                features
            )));
        }
        Ok(p >= 0.5)
    }
}

/// Detector that delegates the walking decision to a predictor
pub struct ClassifierDetector {
    predictor: Box<dyn WalkingPredictor>,
    polarity: SignalPolarity,
    threshold: f64,
    tick_secs: f64,
    latency_credit_m: f64,
    time_above_threshold: f64,
    state: WalkingState,
}

impl ClassifierDetector {
    pub fn new(
        predictor: Box<dyn WalkingPredictor>,
        polarity: SignalPolarity,
        threshold: f64,
        tick_secs: f64,
        latency_credit_m: f64,
    ) -> Self {
        Self {
            predictor,
            polarity,
            threshold,
            tick_secs,
            latency_credit_m: latency_credit_m.max(0.0),
            time_above_threshold: 0.0,
            state: WalkingState::Stationary,
        }
    }

    pub fn time_above_threshold(&self) -> f64 {
        self.time_above_threshold
    }
}

impl WalkingDetector for ClassifierDetector {
    fn step(&mut self, wma: f64) -> TrackerResult<Option<StateTransition>> {
        if self.polarity.is_active(wma, self.threshold) {
            self.time_above_threshold += self.tick_secs;
        } else {
            self.time_above_threshold = 0.0;
        }

        let features = ClassifierFeatures {
            wma,
            time_above_threshold: self.time_above_threshold,
            time_above_threshold_for_one_second: self.time_above_threshold >= 1.0,
        };

        let walking = self.predictor.predict(&features)?;

        let transition = match (self.state, walking) {
            (WalkingState::Stationary, true) => Some(StateTransition::Started {
                latency_credit_m: self.latency_credit_m,
            }),
            (WalkingState::Walking, false) => Some(StateTransition::Stopped),
            _ => None,
        };
        if let Some(t) = transition {
            self.state = t.target();
        }
        Ok(transition)
    }

    fn state(&self) -> WalkingState {
        self.state
    }

    fn reset(&mut self) {
        self.state = WalkingState::Stationary;
        self.time_above_threshold = 0.0;
    }

    fn name(&self) -> &'static str {
        "classifier"
    }
}

/// Resets the WMA window when the user turns in place.
///
/// A turn swings the acceleration vector and looks like the start of walking,
/// so a heading jump above the filter while stationary discards the window.
/// Headings are recorded on every tick; a jump seen on a tick that produced
/// no signal stays latched until the next signal tick takes it.
#[derive(Debug, Clone)]
pub struct HeadingGate {
    filter_degrees: f64,
    last_heading: Option<f64>,
    pending_jump: bool,
}

impl HeadingGate {
    pub fn new(filter_degrees: f64) -> Self {
        Self {
            filter_degrees,
            last_heading: None,
            pending_jump: false,
        }
    }

    /// Record `heading`, latching a jump past the filter
    pub fn observe(&mut self, heading: Option<f64>) {
        let Some(heading) = heading else {
            return;
        };
        if let Some(last) = self.last_heading {
            if heading_delta(last, heading) > self.filter_degrees {
                self.pending_jump = true;
            }
        }
        self.last_heading = Some(heading);
    }

    /// Consume the latched jump
    pub fn take_jump(&mut self) -> bool {
        std::mem::take(&mut self.pending_jump)
    }

    /// Record `heading` and report whether a jump is pending
    pub fn check(&mut self, heading: Option<f64>) -> bool {
        self.observe(heading);
        self.take_jump()
    }

    pub fn reset(&mut self) {
        self.last_heading = None;
        self.pending_jump = false;
    }
}

/// Smallest absolute difference between two compass headings, in [0, 180]
pub fn heading_delta(a: f64, b: f64) -> f64 {
    let d = (b - a).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Build the configured detector.
///
/// The latency credit is `average_velocity × detection_latency_compensation_secs`.
pub fn build_detector(
    config: &TrackerConfig,
    calibration: Option<&CalibrationResult>,
    average_velocity: f64,
) -> TrackerResult<Box<dyn WalkingDetector>> {
    let thresholds = config
        .thresholds
        .resolve(config.signal_polarity, calibration.and_then(|c| c.average_wma_baseline))?;
    let latency_credit_m = average_velocity * config.detection_latency_compensation_secs;

    Ok(match &config.detector {
        DetectorKind::Threshold => Box::new(ThresholdDetector::new(
            config.signal_polarity,
            thresholds,
            config.enter_debounce_ticks,
            config.exit_debounce_ticks,
            latency_credit_m,
        )),
        DetectorKind::Classifier { weights } => Box::new(ClassifierDetector::new(
            Box::new(LogisticPredictor::new(*weights)),
            config.signal_polarity,
            thresholds.enter,
            config.sample_interval_secs,
            latency_credit_m,
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn hysteresis(enter_ticks: u32, exit_ticks: u32) -> ThresholdDetector {
        ThresholdDetector::new(
            SignalPolarity::WalkingAbove,
            Thresholds {
                enter: 0.8,
                exit: 0.8,
            },
            enter_ticks,
            exit_ticks,
            1.2,
        )
    }

    #[test]
    fn test_enter_requires_consecutive_ticks() {
        let mut detector = hysteresis(3, 2);
        assert_eq!(detector.step(0.9).unwrap(), None);
        assert_eq!(detector.step(0.9).unwrap(), None);
        // Interruption restarts the count
        assert_eq!(detector.step(0.1).unwrap(), None);
        assert_eq!(detector.counters().ticks_above_threshold, 0);
        assert_eq!(detector.step(0.9).unwrap(), None);
        assert_eq!(detector.step(0.9).unwrap(), None);
        assert_eq!(
            detector.step(0.9).unwrap(),
            Some(StateTransition::Started {
                latency_credit_m: 1.2
            })
        );
        assert_eq!(detector.state(), WalkingState::Walking);
        assert_eq!(detector.counters(), HysteresisCounters::default());
    }

    #[test]
    fn test_single_low_tick_does_not_stop() {
        let mut detector = hysteresis(1, 5);
        detector.step(0.95).unwrap();
        assert_eq!(detector.state(), WalkingState::Walking);

        assert_eq!(detector.step(0.1).unwrap(), None);
        assert_eq!(detector.state(), WalkingState::Walking);
        detector.step(0.95).unwrap();

        for _ in 0..4 {
            assert_eq!(detector.step(0.1).unwrap(), None);
        }
        assert_eq!(detector.step(0.1).unwrap(), Some(StateTransition::Stopped));
        assert_eq!(detector.state(), WalkingState::Stationary);
    }

    #[test]
    fn test_negative_wma_uses_magnitude() {
        let mut detector = hysteresis(2, 2);
        detector.step(-0.9).unwrap();
        assert!(matches!(
            detector.step(-0.9).unwrap(),
            Some(StateTransition::Started { .. })
        ));
    }

    #[test]
    fn test_walking_below_polarity() {
        let mut detector = ThresholdDetector::new(
            SignalPolarity::WalkingBelow,
            Thresholds {
                enter: 0.8,
                exit: 0.8,
            },
            2,
            2,
            0.0,
        );
        assert_eq!(detector.step(0.99).unwrap(), None);
        detector.step(0.2).unwrap();
        assert!(detector.step(0.2).unwrap().is_some());
        detector.step(0.99).unwrap();
        assert_eq!(detector.step(0.99).unwrap(), Some(StateTransition::Stopped));
    }

    #[test]
    fn test_reset_clears_state_and_counters() {
        let mut detector = hysteresis(1, 3);
        detector.step(0.9).unwrap();
        detector.step(0.1).unwrap();
        detector.reset();
        assert_eq!(detector.state(), WalkingState::Stationary);
        assert_eq!(detector.counters(), HysteresisCounters::default());
    }

    #[test]
    fn test_classifier_features_and_edges() {
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let log = seen.clone();
        let predictor = move |f: &ClassifierFeatures| -> TrackerResult<bool> {
            log.borrow_mut().push(*f);
            Ok(f.time_above_threshold_for_one_second)
        };
        let mut detector = ClassifierDetector::new(
            Box::new(predictor),
            SignalPolarity::WalkingAbove,
            0.8,
            0.25,
            0.5,
        );

        assert_eq!(detector.step(0.9).unwrap(), None); // 0.25s
        assert_eq!(detector.step(0.9).unwrap(), None); // 0.5s
        assert_eq!(detector.step(0.9).unwrap(), None); // 0.75s
        assert_eq!(
            detector.step(0.9).unwrap(),
            Some(StateTransition::Started {
                latency_credit_m: 0.5
            })
        );
        assert_eq!(detector.step(0.9).unwrap(), None);
        assert_eq!(detector.step(0.3).unwrap(), Some(StateTransition::Stopped));
        assert_eq!(detector.time_above_threshold(), 0.0);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 6);
        assert_abs_diff_eq!(seen[3].time_above_threshold, 1.0, epsilon = 1e-12);
        assert!(!seen[2].time_above_threshold_for_one_second);
    }

    #[test]
    fn test_classifier_failure_keeps_state() {
        let mut calls = 0;
        let predictor = move |_: &ClassifierFeatures| -> TrackerResult<bool> {
            calls += 1;
            if calls == 1 {
                Ok(true)
            } else {
                Err(TrackerError::ClassifierUnavailable("model offline".into()))
            }
        };
        let mut detector =
            ClassifierDetector::new(Box::new(predictor), SignalPolarity::WalkingAbove, 0.8, 0.01, 0.0);
        assert!(detector.step(0.9).unwrap().is_some());
        assert!(matches!(
            detector.step(0.1),
            Err(TrackerError::ClassifierUnavailable(_))
        ));
        assert_eq!(detector.state(), WalkingState::Walking);
    }

    #[test]
    fn test_logistic_predictor() {
        let mut predictor = LogisticPredictor::new(LogisticWeights::default());
        let idle = ClassifierFeatures {
            wma: 0.2,
            time_above_threshold: 0.0,
            time_above_threshold_for_one_second: false,
        };
        let walking = ClassifierFeatures {
            wma: 0.9,
            time_above_threshold: 1.2,
            time_above_threshold_for_one_second: true,
        };
        assert!(!predictor.predict(&idle).unwrap());
        assert!(predictor.predict(&walking).unwrap());

        let broken = ClassifierFeatures {
            wma: f64::NAN,
            ..idle
        };
        assert!(matches!(
            predictor.predict(&broken),
            Err(TrackerError::ClassifierUnavailable(_))
        ));
    }

    #[test]
    fn test_heading_gate() {
        let mut gate = HeadingGate::new(45.0);
        assert!(!gate.check(Some(10.0)));
        assert!(!gate.check(None));
        assert!(!gate.check(Some(40.0)));
        assert!(gate.check(Some(100.0)));
        // Wrap-around: 350 -> 20 is a 30 degree turn
        let mut wrap = HeadingGate::new(45.0);
        wrap.check(Some(350.0));
        assert!(!wrap.check(Some(20.0)));
        assert_abs_diff_eq!(heading_delta(350.0, 20.0), 30.0, epsilon = 1e-12);
        assert_abs_diff_eq!(heading_delta(0.0, 180.0), 180.0, epsilon = 1e-12);
    }

    #[test]
    fn test_heading_jump_latches_until_taken() {
        let mut gate = HeadingGate::new(45.0);
        gate.observe(Some(0.0));
        gate.observe(Some(90.0));
        // Turning back does not clear a jump nobody consumed yet
        gate.observe(Some(80.0));
        assert!(gate.take_jump());
        assert!(!gate.take_jump());

        gate.observe(Some(180.0));
        gate.reset();
        assert!(!gate.take_jump());
    }

    #[test]
    fn test_build_detector_from_config() {
        let config = TrackerConfig::default();
        let detector = build_detector(&config, None, 1.2).unwrap();
        assert_eq!(detector.name(), "threshold");

        let classifier = TrackerConfig {
            detector: DetectorKind::Classifier {
                weights: LogisticWeights::default(),
            },
            ..TrackerConfig::default()
        };
        assert_eq!(build_detector(&classifier, None, 1.2).unwrap().name(), "classifier");

        let calibrated = TrackerConfig {
            thresholds: crate::config::ThresholdConfig::Calibrated {
                enter_margin: 0.05,
                exit_margin: 0.1,
            },
            ..TrackerConfig::default()
        };
        assert!(matches!(
            build_detector(&calibrated, None, 1.2),
            Err(TrackerError::NotCalibrated)
        ));
    }
}
