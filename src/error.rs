use thiserror::Error;

/// Telemetry unit error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Command `{0}` timed out")]
    CommandTimeout(String),

    #[error("Command `{command}` rejected: {response}")]
    CommandRejected { command: String, response: String },

    #[error("Modem busy with `{0}`")]
    ModemBusy(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No satellite fix")]
    NoFix,

    #[error("Serial I/O error: {0}")]
    Io(String),

    #[error("Calibration collected {collected} samples, need at least {required}")]
    InsufficientCalibrationSamples { collected: usize, required: usize },

    #[error("Sensor failed: {0}")]
    SensorFailed(String),

    #[error("Startup failed: {0}")]
    StartupFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Telemetry frame truncated: expected {expected} bytes, got {actual}")]
    FrameTruncated { expected: usize, actual: usize },
}

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::Io(err.to_string())
    }
}
