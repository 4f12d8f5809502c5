mod broker;
mod http;

pub use broker::{BrokerOptions, BrokerSink};
pub use http::{HttpOptions, HttpSink, ReceiveAck};

use crate::error::{DeliveryError, EmulatorError, Result};
use crate::sensor::Reading;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zenoh::Session;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkMode {
    Broker,
    Http,
}

impl SinkMode {
    pub fn from_flag(use_broker: bool) -> Self {
        if use_broker {
            SinkMode::Broker
        } else {
            SinkMode::Http
        }
    }
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkMode::Broker => f.write_str("broker"),
            SinkMode::Http => f.write_str("http"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Destination for readings. One sink is shared by every worker of a run and
/// closed exactly once by the engine when the run ends.
#[async_trait]
pub trait Sink: Send + Sync {
    fn mode(&self) -> SinkMode;

    /// `destination` is the sensor's opaque address; sinks that route by
    /// sensor type are free to ignore it.
    async fn deliver(
        &self,
        destination: &str,
        reading: &Reading,
    ) -> std::result::Result<MessageId, DeliveryError>;

    async fn close(&self) -> Result<()>;
}

/// Opens the sink for a run. The engine never constructs sinks itself.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self, mode: SinkMode) -> Result<Arc<dyn Sink>>;
}

/// Factory for the real transports: zenoh for broker runs, reqwest for HTTP
/// runs.
pub struct TransportFactory {
    session: Option<Arc<Session>>,
    broker: BrokerOptions,
    http: HttpOptions,
}

impl TransportFactory {
    pub fn new(session: Option<Arc<Session>>, broker: BrokerOptions, http: HttpOptions) -> Self {
        Self {
            session,
            broker,
            http,
        }
    }

    /// HTTP-only factory; broker runs fail to start.
    pub fn http_only(http: HttpOptions) -> Self {
        Self::new(None, BrokerOptions::default(), http)
    }
}

#[async_trait]
impl SinkFactory for TransportFactory {
    async fn open(&self, mode: SinkMode) -> Result<Arc<dyn Sink>> {
        match mode {
            SinkMode::Broker => {
                let session = self.session.clone().ok_or_else(|| {
                    EmulatorError::Resource("no broker session configured".to_string())
                })?;
                let sink = BrokerSink::open(session, &self.broker).await?;
                Ok(Arc::new(sink))
            }
            SinkMode::Http => Ok(Arc::new(HttpSink::open(&self.http)?)),
        }
    }
}
