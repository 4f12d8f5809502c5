use super::{MessageId, Sink, SinkMode};
use crate::error::{DeliveryError, EmulatorError, Result};
use crate::sensor::{Reading, SensorType};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use zenoh::prelude::r#async::*;
use zenoh::publication::Publisher;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerOptions {
    pub key_prefix: String,
    pub topics: HashMap<SensorType, String>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        let topics = SensorType::ALL
            .iter()
            .map(|sensor_type| (*sensor_type, format!("sensor-{}", sensor_type)))
            .collect();
        Self {
            key_prefix: "emulator".to_string(),
            topics,
        }
    }
}

impl BrokerOptions {
    pub fn key_for(&self, topic: &str) -> String {
        if self.key_prefix.is_empty() {
            topic.to_string()
        } else {
            format!("{}/{}", self.key_prefix, topic)
        }
    }
}

struct TopicPublisher {
    topic: String,
    publisher: Publisher<'static>,
}

/// Publishes readings to one zenoh key per sensor type. The topic table is
/// resolved once in [`BrokerSink::open`] and never changes afterwards.
pub struct BrokerSink {
    publishers: RwLock<HashMap<SensorType, TopicPublisher>>,
    sequence: AtomicU64,
}

impl BrokerSink {
    pub async fn open(session: Arc<Session>, options: &BrokerOptions) -> Result<Self> {
        let mut publishers = HashMap::new();
        for (sensor_type, topic) in &options.topics {
            let key = options.key_for(topic);
            let publisher = session
                .declare_publisher(key.clone())
                .res()
                .await
                .map_err(|e| {
                    EmulatorError::Resource(format!("failed to declare publisher {}: {}", key, e))
                })?;
            info!("Declared {} publisher on {}", sensor_type, key);
            publishers.insert(
                *sensor_type,
                TopicPublisher {
                    topic: topic.clone(),
                    publisher,
                },
            );
        }

        Ok(Self {
            publishers: RwLock::new(publishers),
            sequence: AtomicU64::new(0),
        })
    }

    pub async fn topics(&self) -> HashMap<SensorType, String> {
        self.publishers
            .read()
            .await
            .iter()
            .map(|(sensor_type, entry)| (*sensor_type, entry.topic.clone()))
            .collect()
    }
}

#[async_trait]
impl Sink for BrokerSink {
    fn mode(&self) -> SinkMode {
        SinkMode::Broker
    }

    async fn deliver(
        &self,
        _destination: &str,
        reading: &Reading,
    ) -> std::result::Result<MessageId, DeliveryError> {
        let publishers = self.publishers.read().await;
        let entry = publishers
            .get(&reading.sensor_type)
            .ok_or(DeliveryError::NoTopic(reading.sensor_type))?;

        let payload = serde_json::to_string(reading)
            .map_err(|e| DeliveryError::TransportFailure(e.to_string()))?;
        entry
            .publisher
            .put(payload)
            .res()
            .await
            .map_err(|e| DeliveryError::TransportFailure(e.to_string()))?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let message_id = MessageId(format!("{}:{}", entry.topic, sequence));
        debug!(
            "Published reading from {} to {} ({})",
            reading.sensor_id, entry.topic, message_id
        );
        Ok(message_id)
    }

    async fn close(&self) -> Result<()> {
        let drained: Vec<_> = self.publishers.write().await.drain().collect();
        let mut failures = Vec::new();
        for (sensor_type, entry) in drained {
            if let Err(e) = entry.publisher.undeclare().res().await {
                warn!("Failed to undeclare {} publisher: {}", sensor_type, e);
                failures.push(format!("{}: {}", entry.topic, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EmulatorError::Resource(format!(
                "failed to release publishers: {}",
                failures.join(", ")
            )))
        }
    }
}
