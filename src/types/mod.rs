pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Raw accelerometer sample in g, as delivered by the sensor source
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerationSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Convert g to an m/s² vector
    pub fn to_vector(&self) -> Vector3 {
        Vector3::new(self.x, self.y, self.z) * GRAVITY
    }

    /// Magnitude in m/s²
    pub fn magnitude_ms2(&self) -> f64 {
        self.to_vector().norm()
    }
}

/// Binary walking decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WalkingState {
    #[default]
    Stationary,
    Walking,
}

/// Edge emitted by a walking detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StateTransition {
    /// Walking detected. `latency_credit_m` covers the distance walked while
    /// the detector was still debouncing.
    Started { latency_credit_m: f64 },
    Stopped,
}

impl StateTransition {
    /// State entered by this transition
    pub fn target(&self) -> WalkingState {
        match self {
            StateTransition::Started { .. } => WalkingState::Walking,
            StateTransition::Stopped => WalkingState::Stationary,
        }
    }
}

/// One recorded sensor tick (replay log format)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: f64,
    pub accel: Option<AccelerationSample>,
    #[serde(default)]
    pub heading: Option<f64>,
}
