use super::{MessageId, Sink, SinkMode};
use crate::error::{DeliveryError, EmulatorError, Result};
use crate::sensor::Reading;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub timeout_ms: u64,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

/// Acknowledgement returned by the receiving endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiveAck {
    pub message: String,
    pub db_id: u64,
}

/// POSTs each reading as JSON to the sensor's destination URL over a client
/// that lives for exactly one run.
pub struct HttpSink {
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpSink {
    pub fn open(options: &HttpOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()
            .map_err(|e| EmulatorError::Resource(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }

    pub async fn is_open(&self) -> bool {
        self.client.read().await.is_some()
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn mode(&self) -> SinkMode {
        SinkMode::Http
    }

    async fn deliver(
        &self,
        destination: &str,
        reading: &Reading,
    ) -> std::result::Result<MessageId, DeliveryError> {
        // Clone out of the lock so a slow request never holds up close().
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or_else(|| DeliveryError::TransportFailure("HTTP sink is closed".to_string()))?;

        let response = client
            .post(destination)
            .json(reading)
            .send()
            .await
            .map_err(|e| DeliveryError::TransportFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::TransportFailure(format!(
                "{} responded with {}",
                destination, status
            )));
        }

        let message_id = match response.json::<ReceiveAck>().await {
            Ok(ack) => MessageId(ack.db_id.to_string()),
            Err(_) => MessageId(format!("http:{}", status.as_u16())),
        };
        debug!(
            "Sent reading from {} to {} ({})",
            reading.sensor_id, destination, message_id
        );
        Ok(message_id)
    }

    async fn close(&self) -> Result<()> {
        self.client.write().await.take();
        Ok(())
    }
}
