mod service;
pub use service::EmulatorControl;

use crate::store::{StoredConfig, StoredReading};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub message: String,
}

impl Acknowledgement {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorList {
    pub total: usize,
    pub sensors: Vec<StoredConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadingsPage {
    pub total: usize,
    pub readings: Vec<StoredReading>,
}
