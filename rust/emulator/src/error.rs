use crate::sensor::SensorType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Invalid sensor configuration: {0}")]
    Validation(String),
    #[error("Emulator is already running")]
    AlreadyRunning,
    #[error("Emulator is not running")]
    NotRunning,
    #[error("No sensors configured. Add sensors before starting.")]
    NoSensorsConfigured,
    #[error("Sensor {0} not found")]
    SensorNotFound(String),
    #[error("Sink resource error: {0}")]
    Resource(String),
    #[error("Worker error: {0}")]
    Worker(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Zenoh error: {0}")]
    ZenohError(#[from] zenoh::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Other error: {0}")]
    Other(String),
}

/// Failure to hand a single reading to a sink. Workers log these and keep
/// going; they never reach the engine's callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("No topic configured for sensor type: {0}")]
    NoTopic(SensorType),
    #[error("Transport failure: {0}")]
    TransportFailure(String),
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
