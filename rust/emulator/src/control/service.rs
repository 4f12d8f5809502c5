use super::{Acknowledgement, ReadingsPage, SensorList};
use crate::engine::{DuplicatePolicy, Engine, EngineStatus};
use crate::error::{EmulatorError, Result};
use crate::sensor::{Reading, SensorConfig};
use crate::store::{ConfigStore, ReadingStore, StoredConfig};
use log::info;
use std::sync::Arc;

/// Request-layer operations over an engine and its stores. Transport code
/// (HTTP routes, RPC handlers) calls into this and maps the errors.
pub struct EmulatorControl {
    engine: Arc<Engine>,
    configs: Arc<dyn ConfigStore>,
    readings: Arc<dyn ReadingStore>,
}

impl EmulatorControl {
    pub fn new(
        engine: Arc<Engine>,
        configs: Arc<dyn ConfigStore>,
        readings: Arc<dyn ReadingStore>,
    ) -> Self {
        Self {
            engine,
            configs,
            readings,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Registers `config` with the engine, then persists it. A rejected
    /// configuration leaves both the engine and the store unchanged.
    pub async fn add_sensor(&self, config: SensorConfig) -> Result<StoredConfig> {
        config.validate()?;
        if self.engine.options().duplicate_policy == DuplicatePolicy::Reject
            && self.configs.get(&config.sensor_id).await?.is_some()
        {
            return Err(EmulatorError::Validation(format!(
                "sensor {} is already registered",
                config.sensor_id
            )));
        }
        self.engine.add_sensor(config.clone()).await?;
        self.configs.upsert(config).await
    }

    pub async fn remove_sensor(&self, sensor_id: &str) -> Result<Acknowledgement> {
        if !self.configs.delete(sensor_id).await? {
            return Err(EmulatorError::SensorNotFound(sensor_id.to_string()));
        }
        self.engine.remove_sensor(sensor_id).await?;
        Ok(Acknowledgement::new(format!(
            "Sensor {} removed successfully",
            sensor_id
        )))
    }

    pub async fn list_sensors(&self) -> Result<SensorList> {
        let sensors = self.configs.list(false).await?;
        Ok(SensorList {
            total: sensors.len(),
            sensors,
        })
    }

    pub async fn get_sensor(&self, sensor_id: &str) -> Result<StoredConfig> {
        self.configs
            .get(sensor_id)
            .await?
            .ok_or_else(|| EmulatorError::SensorNotFound(sensor_id.to_string()))
    }

    /// Reloads the engine from the active stored configurations, then starts
    /// it.
    pub async fn start(&self, use_broker: bool) -> Result<EngineStatus> {
        if self.engine.is_running().await {
            return Err(EmulatorError::AlreadyRunning);
        }

        let active: Vec<_> = self
            .configs
            .list(true)
            .await?
            .into_iter()
            .map(|row| row.config)
            .collect();
        if active.is_empty() {
            return Err(EmulatorError::NoSensorsConfigured);
        }

        self.engine.replace_sensors(active).await?;
        self.engine.start(use_broker).await?;
        Ok(self.engine.status().await)
    }

    pub async fn stop(&self) -> Result<Acknowledgement> {
        if !self.engine.is_running().await {
            return Err(EmulatorError::NotRunning);
        }
        self.engine.stop().await?;
        Ok(Acknowledgement::new("Emulator stopped"))
    }

    pub async fn status(&self) -> EngineStatus {
        self.engine.status().await
    }

    /// Stores a reading arriving from an HTTP sink.
    pub async fn receive_reading(&self, reading: Reading) -> Result<u64> {
        let sensor_id = reading.sensor_id.clone();
        let value = reading.value;
        let unit = reading.unit.clone();
        let id = self.readings.save(reading).await?;
        info!("Received data from {}: {} {}", sensor_id, value, unit);
        Ok(id)
    }

    pub async fn readings(&self, sensor_id: Option<&str>, limit: usize) -> Result<ReadingsPage> {
        let readings = self.readings.recent(sensor_id, limit).await?;
        Ok(ReadingsPage {
            total: readings.len(),
            readings,
        })
    }
}
