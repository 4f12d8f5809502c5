use crate::engine::{DuplicatePolicy, EngineOptions};
use crate::error::{EmulatorError, Result};
use crate::sensor::{SensorConfig, SensorType};
use crate::sink::{BrokerOptions, HttpOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    #[default]
    Client,
    Peer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub mode: BrokerMode,
    pub connect: Vec<String>,
    pub key_prefix: String,
    pub topics: HashMap<SensorType, String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        let BrokerOptions { key_prefix, topics } = BrokerOptions::default();
        Self {
            mode: BrokerMode::Client,
            connect: vec!["tcp/localhost:7447".to_string()],
            key_prefix,
            topics,
        }
    }
}

impl BrokerSettings {
    pub fn options(&self) -> BrokerOptions {
        BrokerOptions {
            key_prefix: self.key_prefix.clone(),
            topics: self.topics.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_ms: u64,
    pub delivery_timeout_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_ms: HttpOptions::default().timeout_ms,
            delivery_timeout_ms: 5_000,
        }
    }
}

impl HttpSettings {
    pub fn options(&self) -> HttpOptions {
        HttpOptions {
            timeout_ms: self.timeout_ms,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverSettings {
    /// Address for the built-in receiving endpoint; disabled when unset.
    pub listen: Option<String>,
}

/// Emulator node settings, normally read from a YAML file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub use_broker: bool,
    pub duplicate_policy: DuplicatePolicy,
    pub broker: BrokerSettings,
    pub http: HttpSettings,
    pub receiver: ReceiverSettings,
    pub sensors: Vec<SensorConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            use_broker: true,
            duplicate_policy: DuplicatePolicy::Replace,
            broker: BrokerSettings::default(),
            http: HttpSettings::default(),
            receiver: ReceiverSettings::default(),
            sensors: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EmulatorError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for sensor in &self.sensors {
            sensor.validate()?;
        }
        if self.http.timeout_ms == 0 || self.http.delivery_timeout_ms == 0 {
            return Err(EmulatorError::Config(
                "HTTP timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies `ZENOH_PEER` and `EMULATOR_USE_BROKER` when set.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("ZENOH_PEER").ok(),
            std::env::var("EMULATOR_USE_BROKER").ok(),
        );
    }

    fn apply_overrides(&mut self, peer: Option<String>, use_broker: Option<String>) {
        if let Some(peer) = peer.filter(|p| !p.trim().is_empty()) {
            self.broker.connect = vec![peer];
        }
        if let Some(flag) = use_broker {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.use_broker = true,
                "0" | "false" | "no" => self.use_broker = false,
                _ => {}
            }
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            duplicate_policy: self.duplicate_policy,
            delivery_timeout: Duration::from_millis(self.http.delivery_timeout_ms),
        }
    }
}
