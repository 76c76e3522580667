use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::calibration::{CalibrationEstimator, CalibrationResult};
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::pipeline::{AngleSignal, TickOutcome, TickStatus, WalkPipeline};
use crate::presentation::{current_timestamp, PresentationSink, StatusSnapshot};
use crate::sensors::SensorSource;
use crate::types::{StateTransition, WalkingState};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    /// Nothing running
    Idle,
    /// Timing one calibration walk
    Calibrating,
    /// Tracking displacement
    WalkTracking,
}

/// Identity of one running mode.
///
/// Every start issues a token with a fresh generation. Ticks presented with
/// any other token are ignored, so a timer that fires after its mode was
/// stopped cannot touch the new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken {
    mode: SessionMode,
    generation: u64,
}

impl SessionToken {
    pub fn mode(&self) -> SessionMode {
        self.mode
    }
}

/// What a tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// Stale token; nothing happened
    Inert,
    Calibration {
        elapsed_secs: f64,
        wma: Option<f64>,
        sample_missing: bool,
    },
    Walk(TickOutcome),
}

#[derive(Debug, Clone, Copy, Default)]
struct SessionStats {
    ticks: u64,
    skipped: u64,
    inconclusive: u64,
    walking_transitions: u64,
    /// Displacement of the last stopped walk
    final_displacement_m: Option<f64>,
}

/// Drives calibration and walk tracking over one sensor source.
///
/// Idle → Calibrating → Idle → WalkTracking → Idle, with walk tracking
/// re-entrant. Modes are mutually exclusive.
pub struct Orchestrator<S: SensorSource, P: PresentationSink> {
    config: TrackerConfig,
    source: S,
    sink: P,
    mode: SessionMode,
    generation: u64,
    active_token: Option<SessionToken>,
    calibration: CalibrationEstimator,
    calibration_signal: AngleSignal,
    calibration_elapsed_secs: f64,
    calibration_result: Option<CalibrationResult>,
    walk: Option<WalkPipeline>,
    stats: SessionStats,
}

impl<S: SensorSource, P: PresentationSink> Orchestrator<S, P> {
    /// Create an idle orchestrator. Invalid configuration is fatal here.
    pub fn new(config: TrackerConfig, source: S, sink: P) -> TrackerResult<Self> {
        config.validate()?;
        let calibration_signal =
            AngleSignal::new(config.wma_window_capacity, config.wma_fill_value)?;
        Ok(Self {
            calibration: CalibrationEstimator::from_config(&config),
            calibration_signal,
            calibration_elapsed_secs: 0.0,
            calibration_result: None,
            config,
            source,
            sink,
            mode: SessionMode::Idle,
            generation: 0,
            active_token: None,
            walk: None,
            stats: SessionStats::default(),
        })
    }

    /// Use a calibration from an earlier session
    pub fn with_calibration(mut self, result: CalibrationResult) -> Self {
        self.calibration_result = Some(result);
        self
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn active_token(&self) -> Option<SessionToken> {
        self.active_token
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn calibration_result(&self) -> Option<&CalibrationResult> {
        self.calibration_result.as_ref()
    }

    pub fn calibration_progress(&self) -> (usize, usize) {
        (
            self.calibration.completed_intervals(),
            self.calibration.interval_count(),
        )
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn walking_state(&self) -> WalkingState {
        self.walk
            .as_ref()
            .map(|w| w.state())
            .unwrap_or(WalkingState::Stationary)
    }

    pub fn displacement_m(&self) -> f64 {
        self.walk.as_ref().map(|w| w.displacement_m()).unwrap_or(0.0)
    }

    /// Timer period of a mode
    pub fn tick_period(&self, mode: SessionMode) -> Duration {
        match mode {
            SessionMode::Calibrating => self.config.calibration_interval(),
            _ => self.config.sample_interval(),
        }
    }

    fn issue_token(&mut self, mode: SessionMode) -> SessionToken {
        self.generation += 1;
        let token = SessionToken {
            mode,
            generation: self.generation,
        };
        self.mode = mode;
        self.active_token = Some(token);
        token
    }

    fn end_mode(&mut self) {
        self.mode = SessionMode::Idle;
        self.active_token = None;
    }

    fn require_idle(&self) -> TrackerResult<()> {
        match self.mode {
            SessionMode::Idle => Ok(()),
            SessionMode::Calibrating | SessionMode::WalkTracking => {
                Err(TrackerError::AlreadyRunning)
            }
        }
    }

    /// Idle → Calibrating: start timing one walk over the reference distance.
    ///
    /// Starting after a completed calibration begins a fresh one.
    pub fn start_calibration_interval(&mut self) -> TrackerResult<SessionToken> {
        self.require_idle()?;

        if self.calibration.is_complete() {
            self.calibration = CalibrationEstimator::from_config(&self.config);
        }
        self.calibration.begin_interval()?;
        self.calibration_signal.reset();
        self.calibration_elapsed_secs = 0.0;

        let token = self.issue_token(SessionMode::Calibrating);
        let (done, total) = self.calibration_progress();
        self.sink.on_log_line(&format!(
            "Walk {:.1} meters, then stop calibration ({}/{})",
            self.config.reference_distance_m,
            done + 1,
            total
        ));
        Ok(token)
    }

    /// Calibrating → Idle: record the walk and return its velocity.
    ///
    /// A rejected walk leaves earlier walks intact and must be repeated.
    pub fn finish_calibration_interval(&mut self) -> TrackerResult<f64> {
        if self.mode != SessionMode::Calibrating {
            return Err(TrackerError::NotRunning);
        }
        self.end_mode();

        let velocity = match self.calibration.end_interval() {
            Ok(v) => v,
            Err(err) => {
                self.sink
                    .on_log_line(&format!("Calibration walk rejected ({}), repeat it", err));
                return Err(err);
            }
        };
        self.sink.on_log_line(&format!("You walked {:.3}m/s!", velocity));

        if let Some(result) = self.calibration.result() {
            self.sink.on_log_line(&format!(
                "Finished calibration with avg velocity: {:.3}m/s",
                result.average_velocity
            ));
            self.calibration_result = Some(result);
        }
        Ok(velocity)
    }

    /// Calibrating → Idle without recording anything
    pub fn cancel_calibration_interval(&mut self) -> TrackerResult<()> {
        if self.mode != SessionMode::Calibrating {
            return Err(TrackerError::NotRunning);
        }
        self.end_mode();
        self.calibration.cancel_interval();
        Ok(())
    }

    /// Idle → WalkTracking with a fresh pipeline and zero displacement
    pub fn start_walk(&mut self) -> TrackerResult<SessionToken> {
        self.require_idle()?;

        let velocity = self
            .calibration_result
            .map(|c| c.average_velocity)
            .or(self.config.fallback_velocity)
            .ok_or(TrackerError::NotCalibrated)?;

        let pipeline = WalkPipeline::new(&self.config, self.calibration_result.as_ref(), velocity)?;
        self.walk = Some(pipeline);
        self.stats = SessionStats::default();

        let token = self.issue_token(SessionMode::WalkTracking);
        log::info!("Walk tracking started at {:.3} m/s", velocity);
        self.sink.on_log_line("Tracking walk");
        self.sink.on_displacement_update(0.0);
        Ok(token)
    }

    /// WalkTracking → Idle. Returns the final displacement and drops the walk state.
    pub fn stop_walk(&mut self) -> TrackerResult<f64> {
        if self.mode != SessionMode::WalkTracking {
            return Err(TrackerError::NotRunning);
        }
        self.end_mode();

        let total = self
            .walk
            .take()
            .map(|w| w.displacement_m())
            .unwrap_or(0.0);
        self.stats.final_displacement_m = Some(total);
        log::info!(
            "Walk tracking stopped: {:.2}m over {} ticks ({} skipped)",
            total,
            self.stats.ticks,
            self.stats.skipped
        );
        self.sink
            .on_log_line(&format!("Stopped tracking after {:.2}m", total));
        Ok(total)
    }

    /// Run one tick of the mode identified by `token`
    pub fn tick(&mut self, token: SessionToken) -> TickReport {
        if self.active_token != Some(token) {
            return TickReport::Inert;
        }

        match token.mode {
            SessionMode::Calibrating => self.calibration_tick(),
            SessionMode::WalkTracking => self.walk_tick(),
            SessionMode::Idle => TickReport::Inert,
        }
    }

    fn calibration_tick(&mut self) -> TickReport {
        let dt = self.config.calibration_interval_secs;
        let sample = self.source.next_sample();

        let wma = match sample.as_ref() {
            Some(s) => match self.calibration_signal.update(s.to_vector()) {
                Ok(wma) => wma,
                Err(err) => {
                    log::debug!("Calibration tick: {}", err);
                    None
                }
            },
            None => None,
        };

        if let Err(err) = self.calibration.record_tick(dt, sample.as_ref(), wma) {
            log::warn!("Calibration tick dropped: {}", err);
        }
        self.calibration_elapsed_secs += dt;

        TickReport::Calibration {
            elapsed_secs: self.calibration_elapsed_secs,
            wma,
            sample_missing: sample.is_none(),
        }
    }

    fn walk_tick(&mut self) -> TickReport {
        let Some(walk) = self.walk.as_mut() else {
            return TickReport::Inert;
        };

        let sample = self.source.next_sample();
        let heading = self.source.current_heading();
        let outcome = walk.process(sample, heading);

        self.stats.ticks += 1;
        match outcome.status {
            TickStatus::Processed => {}
            TickStatus::Skipped(_) => self.stats.skipped += 1,
            TickStatus::Inconclusive(_) => self.stats.inconclusive += 1,
        }
        if let Some(StateTransition::Started { .. }) = outcome.transition {
            self.stats.walking_transitions += 1;
        }

        self.sink.on_displacement_update(outcome.displacement_m);
        self.sink.on_log_line(&outcome.diagnostic());
        TickReport::Walk(outcome)
    }

    /// Snapshot of the running walk, or of the last stopped one while idle
    pub fn status(&self) -> StatusSnapshot {
        let displacement_m = match self.walk.as_ref() {
            Some(walk) => walk.displacement_m(),
            None => self.stats.final_displacement_m.unwrap_or(0.0),
        };
        StatusSnapshot {
            timestamp: current_timestamp(),
            mode: format!("{:?}", self.mode),
            walking: self.walking_state() == WalkingState::Walking,
            displacement_m,
            ticks: self.stats.ticks,
            skipped_ticks: self.stats.skipped,
            inconclusive_ticks: self.stats.inconclusive,
            walking_transitions: self.stats.walking_transitions,
            calibration_intervals: self.calibration.completed_intervals(),
            calibration_complete: self.calibration_result.is_some(),
            average_velocity: self.calibration_result.map(|c| c.average_velocity),
            average_wma_baseline: self.calibration_result.and_then(|c| c.average_wma_baseline),
        }
    }
}
