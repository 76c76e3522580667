use thiserror::Error;

/// Stride tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Degenerate vector: zero magnitude")]
    DegenerateVector,

    #[error("Invalid calibration interval: elapsed {0:.3}s")]
    InvalidCalibrationInterval(f64),

    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("Sensor unavailable")]
    SensorUnavailable,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("No calibration available")]
    NotCalibrated,

    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,

    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

impl TrackerError {
    /// Per-tick errors are absorbed by the pipeline; everything else aborts the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrackerError::DegenerateVector
                | TrackerError::ClassifierUnavailable(_)
                | TrackerError::SensorUnavailable
                | TrackerError::InvalidCalibrationInterval(_)
        )
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::StorageError(err.to_string())
    }
}
