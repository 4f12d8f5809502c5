use crate::error::{EmulatorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Humidity,
    Light,
}

impl SensorType {
    pub const ALL: [SensorType; 3] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Light,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Light => "light",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorType::Temperature => "°C",
            SensorType::Humidity => "%",
            SensorType::Light => "lux",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = EmulatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "temperature" => Ok(SensorType::Temperature),
            "humidity" => Ok(SensorType::Humidity),
            "light" => Ok(SensorType::Light),
            other => Err(EmulatorError::Validation(format!(
                "unknown sensor type: {}",
                other
            ))),
        }
    }
}

/// Unit for a sensor type given by name; unrecognised names get `"unit"`.
pub fn unit_for_name(name: &str) -> &'static str {
    name.parse::<SensorType>()
        .map(|sensor_type| sensor_type.unit())
        .unwrap_or("unit")
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub sensor_id: String,
    pub sensor_type: SensorType,
    pub interval_ms: u64,
    pub min_value: f64,
    pub max_value: f64,
    pub location: Location,
    #[serde(alias = "target_url")]
    pub destination: String,
}

impl SensorConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sensor_id.trim().is_empty() {
            return Err(EmulatorError::Validation(
                "sensor_id must not be empty".to_string(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(EmulatorError::Validation(format!(
                "sensor {}: interval_ms must be positive",
                self.sensor_id
            )));
        }
        if !self.min_value.is_finite() || !self.max_value.is_finite() {
            return Err(EmulatorError::Validation(format!(
                "sensor {}: value range must be finite",
                self.sensor_id
            )));
        }
        if self.min_value > self.max_value {
            return Err(EmulatorError::Validation(format!(
                "sensor {}: min_value {} exceeds max_value {}",
                self.sensor_id, self.min_value, self.max_value
            )));
        }
        let Location {
            latitude,
            longitude,
        } = self.location;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(EmulatorError::Validation(format!(
                "sensor {}: location ({}, {}) is out of range",
                self.sensor_id, latitude, longitude
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: String,
    pub sensor_type: SensorType,
    pub value: f64,
    pub unit: String,
    pub location: Location,
    pub timestamp_ms: u64,
}
