//! Timer-driven tick loop

use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::calibration::CalibrationResult;
use crate::error::{TrackerError, TrackerResult};
use crate::presentation::PresentationSink;
use crate::sensors::SensorSource;
use crate::session::{Orchestrator, SessionMode, SessionToken, TickReport};

/// Why a run loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The token was superseded or its mode stopped
    Stale,
    SourceExhausted,
    TickLimit,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub end: RunEnd,
}

/// Bounds of a scaled tick period
pub const MIN_TICK_PERIOD: Duration = Duration::from_micros(1);
pub const MAX_TICK_PERIOD: Duration = Duration::from_secs(3600);

/// Tick period scaled by a replay speedup factor, clamped to
/// [`MIN_TICK_PERIOD`, `MAX_TICK_PERIOD`]
pub fn scaled_period(period: Duration, speedup: f64) -> Duration {
    if !(speedup > 0.0 && speedup.is_finite()) {
        return period;
    }
    Duration::try_from_secs_f64(period.as_secs_f64() / speedup)
        .unwrap_or(MAX_TICK_PERIOD)
        .clamp(MIN_TICK_PERIOD, MAX_TICK_PERIOD)
}

/// Tick the mode behind `token` on a fixed-period timer.
///
/// Returns when the token goes stale, the source runs dry, `max_ticks` is
/// reached or `shutdown` resolves. Late timer ticks are delayed rather than
/// bursted so a slow tick never runs the pipeline twice in a row.
pub async fn run_mode<S, P, F>(
    orchestrator: &mut Orchestrator<S, P>,
    token: SessionToken,
    period: Duration,
    max_ticks: Option<u64>,
    shutdown: F,
) -> RunSummary
where
    S: SensorSource,
    P: PresentationSink,
    F: Future<Output = ()>,
{
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut ticks = 0u64;
    loop {
        if max_ticks.map(|limit| ticks >= limit).unwrap_or(false) {
            return RunSummary {
                ticks,
                end: RunEnd::TickLimit,
            };
        }
        if orchestrator.source().is_exhausted() {
            return RunSummary {
                ticks,
                end: RunEnd::SourceExhausted,
            };
        }

        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutdown requested after {} ticks", ticks);
                return RunSummary { ticks, end: RunEnd::Shutdown };
            }
            _ = timer.tick() => {
                if orchestrator.tick(token) == TickReport::Inert {
                    return RunSummary { ticks, end: RunEnd::Stale };
                }
                ticks += 1;
            }
        }
    }
}

/// How a scripted calibration run ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationRun {
    Complete(CalibrationResult),
    /// Shutdown arrived mid-walk; that walk was cancelled
    Interrupted { completed_walks: usize },
}

/// Time one calibration walk per entry of `walk_secs` (seconds per walk).
///
/// One shutdown future covers the whole run, so a shutdown during any walk
/// cancels that walk and ends the run.
pub async fn run_calibration<S, P, F>(
    orchestrator: &mut Orchestrator<S, P>,
    walk_secs: &[f64],
    speedup: f64,
    shutdown: F,
) -> TrackerResult<CalibrationRun>
where
    S: SensorSource,
    P: PresentationSink,
    F: Future<Output = ()>,
{
    let (_, needed) = orchestrator.calibration_progress();
    if walk_secs.len() < needed {
        return Err(TrackerError::InvalidState(format!(
            "{} calibration walks given, {} needed",
            walk_secs.len(),
            needed
        )));
    }

    let tick_secs = orchestrator.config().calibration_interval_secs;
    let period = scaled_period(orchestrator.tick_period(SessionMode::Calibrating), speedup);
    tokio::pin!(shutdown);

    for (walk, secs) in walk_secs.iter().take(needed).enumerate() {
        let token = orchestrator.start_calibration_interval()?;
        let ticks = (secs / tick_secs).round() as u64;
        let summary = run_mode(orchestrator, token, period, Some(ticks), &mut shutdown).await;
        if summary.end == RunEnd::Shutdown {
            orchestrator.cancel_calibration_interval()?;
            return Ok(CalibrationRun::Interrupted {
                completed_walks: walk,
            });
        }
        orchestrator.finish_calibration_interval()?;
    }

    orchestrator
        .calibration_result()
        .copied()
        .map(CalibrationRun::Complete)
        .ok_or(TrackerError::NotCalibrated)
}
