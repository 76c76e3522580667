//! Dead-reckoning pedometer.
//!
//! Acceleration samples are turned into an angle-cosine signal between
//! consecutive vectors, smoothed by a weighted moving average, classified as
//! walking or stationary, and integrated into a displacement estimate.
//! A short calibration (a few timed walks over a known distance) supplies the
//! walking velocity and the signal baseline.

pub mod calibration;
pub mod config;
pub mod detector;
pub mod error;
pub mod integrator;
pub mod pipeline;
pub mod presentation;
pub mod runner;
pub mod sensors;
pub mod session;
pub mod smoothing;
pub mod types;

pub use calibration::{CalibrationEstimator, CalibrationResult};
pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use pipeline::{TickOutcome, TickStatus, WalkPipeline};
pub use session::{Orchestrator, SessionMode, SessionToken, TickReport};
pub use types::{AccelerationSample, StateTransition, WalkingState};
