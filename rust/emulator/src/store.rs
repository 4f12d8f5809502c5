//! Persistence boundaries for sensor configurations and received readings,
//! with in-memory implementations.

use crate::error::Result;
use crate::sensor::generator::now_millis;
use crate::sensor::{Reading, SensorConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredConfig {
    pub id: u64,
    pub config: SensorConfig,
    pub active: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: u64,
    pub reading: Reading,
    pub received_at_ms: u64,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Inserts or updates by `sensor_id`. Updating reactivates the record.
    async fn upsert(&self, config: SensorConfig) -> Result<StoredConfig>;
    async fn get(&self, sensor_id: &str) -> Result<Option<StoredConfig>>;
    async fn list(&self, active_only: bool) -> Result<Vec<StoredConfig>>;
    async fn delete(&self, sensor_id: &str) -> Result<bool>;
    async fn deactivate(&self, sensor_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn save(&self, reading: Reading) -> Result<u64>;
    /// Newest first by reading timestamp, optionally for one sensor.
    async fn recent(&self, sensor_id: Option<&str>, limit: usize) -> Result<Vec<StoredReading>>;
}

#[derive(Default)]
struct ConfigTable {
    next_id: u64,
    rows: BTreeMap<String, StoredConfig>,
}

#[derive(Default)]
pub struct MemoryConfigStore {
    table: Mutex<ConfigTable>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn upsert(&self, config: SensorConfig) -> Result<StoredConfig> {
        let mut table = self.table.lock().await;
        let now = now_millis();
        if let Some(row) = table.rows.get_mut(&config.sensor_id) {
            row.config = config;
            row.active = true;
            row.updated_at_ms = now;
            return Ok(row.clone());
        }

        table.next_id += 1;
        let row = StoredConfig {
            id: table.next_id,
            config,
            active: true,
            created_at_ms: now,
            updated_at_ms: now,
        };
        table
            .rows
            .insert(row.config.sensor_id.clone(), row.clone());
        Ok(row)
    }

    async fn get(&self, sensor_id: &str) -> Result<Option<StoredConfig>> {
        Ok(self.table.lock().await.rows.get(sensor_id).cloned())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<StoredConfig>> {
        Ok(self
            .table
            .lock()
            .await
            .rows
            .values()
            .filter(|row| row.active || !active_only)
            .cloned()
            .collect())
    }

    async fn delete(&self, sensor_id: &str) -> Result<bool> {
        Ok(self.table.lock().await.rows.remove(sensor_id).is_some())
    }

    async fn deactivate(&self, sensor_id: &str) -> Result<bool> {
        let mut table = self.table.lock().await;
        match table.rows.get_mut(sensor_id) {
            Some(row) => {
                row.active = false;
                row.updated_at_ms = now_millis();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryReadingStore {
    rows: Mutex<Vec<StoredReading>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn save(&self, reading: Reading) -> Result<u64> {
        let mut rows = self.rows.lock().await;
        let id = rows.len() as u64 + 1;
        rows.push(StoredReading {
            id,
            reading,
            received_at_ms: now_millis(),
        });
        Ok(id)
    }

    async fn recent(&self, sensor_id: Option<&str>, limit: usize) -> Result<Vec<StoredReading>> {
        let rows = self.rows.lock().await;
        let mut matching: Vec<_> = rows
            .iter()
            .filter(|row| sensor_id.map_or(true, |id| row.reading.sensor_id == id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.reading
                .timestamp_ms
                .cmp(&a.reading.timestamp_ms)
                .then(b.id.cmp(&a.id))
        });
        matching.truncate(limit);
        Ok(matching)
    }
}
