//! Per-tick processing
//!
//! raw sample → m/s² vector → cosine vs previous vector → WMA window →
//! detector → integrator. All state of one walk lives in `WalkPipeline`,
//! which the session owns and hands a mutable borrow of to each tick.

use crate::calibration::CalibrationResult;
use crate::config::TrackerConfig;
use crate::detector::{build_detector, HeadingGate, WalkingDetector};
use crate::error::{TrackerError, TrackerResult};
use crate::integrator::{build_integrator, DisplacementIntegrator, IntegratorTick};
use crate::smoothing::WeightedMovingAverage;
use crate::types::{angle_cosine, AccelerationSample, StateTransition, Vector3, WalkingState};

/// Angle-cosine signal smoothed by the WMA window
#[derive(Debug, Clone)]
pub struct AngleSignal {
    previous_vector: Option<Vector3>,
    wma: WeightedMovingAverage,
}

impl AngleSignal {
    pub fn new(capacity: usize, fill_value: f64) -> TrackerResult<Self> {
        Ok(Self {
            previous_vector: None,
            wma: WeightedMovingAverage::new(capacity, fill_value)?,
        })
    }

    /// Feed one vector and return the new WMA.
    ///
    /// `Ok(None)` while there is no previous vector yet. A degenerate vector
    /// still becomes the previous vector for the next tick.
    pub fn update(&mut self, vector: Vector3) -> TrackerResult<Option<f64>> {
        let Some(previous) = self.previous_vector.replace(vector) else {
            return Ok(None);
        };
        let cosine = angle_cosine(&previous, &vector)?;
        Ok(Some(self.wma.push(cosine)))
    }

    pub fn wma(&self) -> f64 {
        self.wma.value()
    }

    /// Refill the window with its neutral value, keeping the previous vector
    pub fn reset_window(&mut self) {
        self.wma.reset();
    }

    pub fn reset(&mut self) {
        self.previous_vector = None;
        self.wma.reset();
    }
}

/// How a tick was handled
#[derive(Debug, Clone, PartialEq)]
pub enum TickStatus {
    Processed,
    /// Nothing advanced; the error says why
    Skipped(TrackerError),
    /// Signal and integrator advanced but the detector could not decide
    Inconclusive(TrackerError),
}

/// Result of one walk-tracking tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub tick: u64,
    pub status: TickStatus,
    pub wma: Option<f64>,
    pub state: WalkingState,
    pub transition: Option<StateTransition>,
    pub heading_reset: bool,
    pub displacement_m: f64,
}

impl TickOutcome {
    /// One-line diagnostic for the presentation layer
    pub fn diagnostic(&self) -> String {
        let wma = self
            .wma
            .map(|w| format!("{:.3}", w))
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!(
            "tick {} wma {} {:?} {:.2}m",
            self.tick, wma, self.state, self.displacement_m
        );
        match &self.status {
            TickStatus::Processed => {}
            TickStatus::Skipped(err) => line.push_str(&format!(" skipped: {}", err)),
            TickStatus::Inconclusive(err) => line.push_str(&format!(" inconclusive: {}", err)),
        }
        match self.transition {
            Some(StateTransition::Started { .. }) => line.push_str(" | now walking"),
            Some(StateTransition::Stopped) => line.push_str(" | no longer walking"),
            None => {}
        }
        if self.heading_reset {
            line.push_str(" | heading jump, window reset");
        }
        line
    }
}

/// Session-scoped state of one walk
pub struct WalkPipeline {
    dt_secs: f64,
    signal: AngleSignal,
    detector: Box<dyn WalkingDetector>,
    integrator: Box<dyn DisplacementIntegrator>,
    heading_gate: Option<HeadingGate>,
    tick: u64,
}

impl WalkPipeline {
    pub fn new(
        config: &TrackerConfig,
        calibration: Option<&CalibrationResult>,
        average_velocity: f64,
    ) -> TrackerResult<Self> {
        Self::with_parts(
            config,
            build_detector(config, calibration, average_velocity)?,
            build_integrator(config, calibration, average_velocity)?,
        )
    }

    /// Assemble a pipeline around an explicit detector and integrator
    pub fn with_parts(
        config: &TrackerConfig,
        detector: Box<dyn WalkingDetector>,
        integrator: Box<dyn DisplacementIntegrator>,
    ) -> TrackerResult<Self> {
        Ok(Self {
            dt_secs: config.sample_interval_secs,
            signal: AngleSignal::new(config.wma_window_capacity, config.wma_fill_value)?,
            detector,
            integrator,
            heading_gate: config.heading_filter_degrees.map(HeadingGate::new),
            tick: 0,
        })
    }

    /// Run one tick. Per-tick errors never escape; they are reported in the outcome.
    pub fn process(
        &mut self,
        sample: Option<AccelerationSample>,
        heading: Option<f64>,
    ) -> TickOutcome {
        let tick = self.tick;
        self.tick += 1;

        if let Some(gate) = self.heading_gate.as_mut() {
            gate.observe(heading);
        }

        let Some(sample) = sample else {
            return self.skipped(tick, TrackerError::SensorUnavailable);
        };
        let vector = sample.to_vector();

        let wma = match self.signal.update(vector) {
            Ok(Some(wma)) => wma,
            Ok(None) => return self.outcome(tick, TickStatus::Processed, None, None, false),
            Err(err) => return self.skipped(tick, err),
        };

        let mut wma_value = wma;
        let mut heading_reset = false;
        if let Some(gate) = self.heading_gate.as_mut() {
            if gate.take_jump() && self.detector.state() == WalkingState::Stationary {
                self.signal.reset_window();
                self.detector.reset();
                wma_value = self.signal.wma();
                heading_reset = true;
                log::debug!("Heading jump at tick {}, WMA window reset", tick);
            }
        }

        let (transition, status) = match self.detector.step(wma_value) {
            Ok(transition) => (transition, TickStatus::Processed),
            Err(err) => {
                log::warn!("Tick {} inconclusive: {}", tick, err);
                (None, TickStatus::Inconclusive(err))
            }
        };

        if let Some(t) = transition.as_ref() {
            self.integrator.on_transition(t);
            match t {
                StateTransition::Started { latency_credit_m } => log::info!(
                    "Now walking at tick {} (wma {:.3}, credit {:.2}m)",
                    tick,
                    wma_value,
                    latency_credit_m
                ),
                StateTransition::Stopped => log::info!(
                    "No longer walking at tick {} (wma {:.3}, {:.2}m)",
                    tick,
                    wma_value,
                    self.integrator.total_meters()
                ),
            }
        }

        self.integrator.on_tick(&IntegratorTick {
            dt_secs: self.dt_secs,
            state: self.detector.state(),
            acceleration: Some(&vector),
        });

        self.outcome(tick, status, Some(wma_value), transition, heading_reset)
    }

    fn skipped(&self, tick: u64, err: TrackerError) -> TickOutcome {
        log::debug!("Tick {} skipped: {}", tick, err);
        self.outcome(tick, TickStatus::Skipped(err), None, None, false)
    }

    fn outcome(
        &self,
        tick: u64,
        status: TickStatus,
        wma: Option<f64>,
        transition: Option<StateTransition>,
        heading_reset: bool,
    ) -> TickOutcome {
        TickOutcome {
            tick,
            status,
            wma,
            state: self.detector.state(),
            transition,
            heading_reset,
            displacement_m: self.integrator.total_meters(),
        }
    }

    pub fn state(&self) -> WalkingState {
        self.detector.state()
    }

    pub fn displacement_m(&self) -> f64 {
        self.integrator.total_meters()
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Back to session-start values
    pub fn reset(&mut self) {
        self.signal.reset();
        self.detector.reset();
        self.integrator.reset();
        if let Some(gate) = self.heading_gate.as_mut() {
            gate.reset();
        }
        self.tick = 0;
    }
}
