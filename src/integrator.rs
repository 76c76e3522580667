//! Displacement integration
//!
//! Two policies share the `DisplacementIntegrator` trait. Both only ever add
//! non-negative increments, so the reported displacement never decreases
//! within a walk.

use crate::calibration::CalibrationResult;
use crate::config::{BlockClose, DisplacementPolicyKind, TrackerConfig};
use crate::error::TrackerResult;
use crate::types::{StateTransition, Vector3, WalkingState};

/// Running displacement total; rejects negative and non-finite increments
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplacementAccumulator {
    total_meters: f64,
}

impl DisplacementAccumulator {
    pub fn add(&mut self, meters: f64) {
        if meters > 0.0 && meters.is_finite() {
            self.total_meters += meters;
        }
    }

    pub fn total_meters(&self) -> f64 {
        self.total_meters
    }

    pub fn reset(&mut self) {
        self.total_meters = 0.0;
    }
}

/// Per-tick input of an integrator
#[derive(Debug, Clone, Copy)]
pub struct IntegratorTick<'a> {
    pub dt_secs: f64,
    /// Detector state after this tick's transition, if any
    pub state: WalkingState,
    /// Acceleration vector (m/s²) of this tick, if a sample arrived
    pub acceleration: Option<&'a Vector3>,
}

pub trait DisplacementIntegrator {
    fn on_transition(&mut self, transition: &StateTransition);

    fn on_tick(&mut self, tick: &IntegratorTick);

    fn total_meters(&self) -> f64;

    /// Zero the displacement and all carried state
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

/// Adds the calibrated velocity over time while walking.
///
/// The walking edge adds the detector's latency credit. After that, every
/// full pulse of walking time adds `velocity × pulse`. With no pulse interval
/// every tick adds `velocity × dt`. Stopping drops the partial pulse.
#[derive(Debug, Clone)]
pub struct ConstantVelocityIntegrator {
    velocity: f64,
    pulse_interval_secs: Option<f64>,
    since_pulse_secs: f64,
    accumulator: DisplacementAccumulator,
}

impl ConstantVelocityIntegrator {
    pub fn new(velocity: f64, pulse_interval_secs: Option<f64>) -> Self {
        Self {
            velocity: velocity.max(0.0),
            pulse_interval_secs,
            since_pulse_secs: 0.0,
            accumulator: DisplacementAccumulator::default(),
        }
    }
}

impl DisplacementIntegrator for ConstantVelocityIntegrator {
    fn on_transition(&mut self, transition: &StateTransition) {
        match transition {
            StateTransition::Started { latency_credit_m } => {
                self.accumulator.add(*latency_credit_m);
                self.since_pulse_secs = 0.0;
            }
            StateTransition::Stopped => {
                self.since_pulse_secs = 0.0;
            }
        }
    }

    fn on_tick(&mut self, tick: &IntegratorTick) {
        if tick.state != WalkingState::Walking {
            return;
        }

        match self.pulse_interval_secs {
            None => self.accumulator.add(self.velocity * tick.dt_secs),
            Some(pulse) => {
                self.since_pulse_secs += tick.dt_secs;
                // Tolerance absorbs the drift of summing 0.01s ticks
                while self.since_pulse_secs + 1e-9 >= pulse {
                    self.accumulator.add(self.velocity * pulse);
                    self.since_pulse_secs -= pulse;
                }
            }
        }
    }

    fn total_meters(&self) -> f64 {
        self.accumulator.total_meters()
    }

    fn reset(&mut self) {
        self.since_pulse_secs = 0.0;
        self.accumulator.reset();
    }

    fn name(&self) -> &'static str {
        "constant_velocity"
    }
}

/// Integrates `d += v_prev·t + ½·a·t²` per tick.
///
/// `a` is the mean acceleration magnitude of the previous block of ticks,
/// excluding junk samples below the noise floor. `v_prev` is carried from
/// block to block. The block sum is reset every time a block closes. A block
/// with no usable sample, or a stop edge, zeroes the velocity.
#[derive(Debug, Clone)]
pub struct KinematicIntegrator {
    noise_floor: f64,
    block_ticks: usize,
    block_close: BlockClose,
    max_velocity: Option<f64>,
    previous_velocity: f64,
    current_acceleration: f64,
    block_sum: f64,
    block_samples: usize,
    block_ticks_seen: usize,
    block_secs: f64,
    quiet_streak: u32,
    accumulator: DisplacementAccumulator,
}

impl KinematicIntegrator {
    pub fn new(
        noise_floor: f64,
        block_ticks: usize,
        block_close: BlockClose,
        max_velocity: Option<f64>,
    ) -> Self {
        Self {
            noise_floor,
            block_ticks: block_ticks.max(1),
            block_close,
            max_velocity,
            previous_velocity: 0.0,
            current_acceleration: 0.0,
            block_sum: 0.0,
            block_samples: 0,
            block_ticks_seen: 0,
            block_secs: 0.0,
            quiet_streak: 0,
            accumulator: DisplacementAccumulator::default(),
        }
    }

    pub fn velocity(&self) -> f64 {
        self.previous_velocity
    }

    pub fn acceleration(&self) -> f64 {
        self.current_acceleration
    }

    fn clear_block(&mut self) {
        self.block_sum = 0.0;
        self.block_samples = 0;
        self.block_ticks_seen = 0;
        self.block_secs = 0.0;
        self.quiet_streak = 0;
    }

    fn zero_velocity(&mut self) {
        self.previous_velocity = 0.0;
        self.current_acceleration = 0.0;
        self.clear_block();
    }

    fn close_block(&mut self) {
        if self.block_samples == 0 {
            self.zero_velocity();
            return;
        }

        self.current_acceleration = self.block_sum / self.block_samples as f64;
        let mut velocity = self.previous_velocity + self.current_acceleration * self.block_secs;
        if let Some(max) = self.max_velocity {
            velocity = velocity.min(max);
        }
        self.previous_velocity = velocity.max(0.0);
        self.clear_block();
    }
}

impl DisplacementIntegrator for KinematicIntegrator {
    fn on_transition(&mut self, transition: &StateTransition) {
        if let StateTransition::Stopped = transition {
            self.zero_velocity();
        }
    }

    fn on_tick(&mut self, tick: &IntegratorTick) {
        if tick.state != WalkingState::Walking {
            self.zero_velocity();
            return;
        }

        let magnitude = tick.acceleration.map(|a| a.norm());
        match magnitude {
            Some(m) if m >= self.noise_floor => {
                self.block_sum += m;
                self.block_samples += 1;
                self.quiet_streak = 0;
            }
            _ => self.quiet_streak += 1,
        }
        self.block_ticks_seen += 1;
        self.block_secs += tick.dt_secs;

        let t = tick.dt_secs;
        self.accumulator
            .add(self.previous_velocity * t + 0.5 * self.current_acceleration * t * t);

        let full = self.block_ticks_seen >= self.block_ticks;
        let quiet = self.block_close == BlockClose::QuietSamples && self.quiet_streak >= 2;
        if full || quiet {
            self.close_block();
        }
    }

    fn total_meters(&self) -> f64 {
        self.accumulator.total_meters()
    }

    fn reset(&mut self) {
        self.zero_velocity();
        self.accumulator.reset();
    }

    fn name(&self) -> &'static str {
        "kinematic"
    }
}

/// Build the configured integrator for a walk at `average_velocity`.
///
/// The kinematic policy caps its velocity at twice the calibrated walking
/// speed.
pub fn build_integrator(
    config: &TrackerConfig,
    calibration: Option<&CalibrationResult>,
    average_velocity: f64,
) -> TrackerResult<Box<dyn DisplacementIntegrator>> {
    Ok(match config.displacement_policy {
        DisplacementPolicyKind::ConstantVelocity => Box::new(ConstantVelocityIntegrator::new(
            average_velocity,
            config.pulse_interval_secs,
        )),
        DisplacementPolicyKind::Kinematic => {
            let noise_floor = config
                .noise_floor
                .resolve(calibration.map(|c| c.average_acceleration))?;
            Box::new(KinematicIntegrator::new(
                noise_floor,
                config.kinematic_block_ticks,
                config.kinematic_block_close,
                Some(2.0 * average_velocity),
            ))
        }
    })
}
