use crate::error::{EmulatorError, Result};
use crate::sensor::{generate, SensorConfig};
use crate::sink::Sink;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct DeliveryStats {
    attempts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl DeliveryStats {
    fn record_success(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, error: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub sensor_id: String,
    pub alive: bool,
    pub attempts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

/// A running emission task for one sensor, with its cancellation control and
/// join primitive.
pub struct WorkerHandle {
    sensor_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<DeliveryStats>,
}

impl WorkerHandle {
    /// Spawns the worker onto the current tokio runtime. `config` is the
    /// worker's private snapshot; later engine updates do not reach it.
    pub fn spawn(
        config: SensorConfig,
        sink: Arc<dyn Sink>,
        cancel: CancellationToken,
        delivery_timeout: Duration,
    ) -> Self {
        let sensor_id = config.sensor_id.clone();
        let stats = Arc::new(DeliveryStats::default());
        let task = tokio::spawn(run(
            config,
            sink,
            cancel.clone(),
            stats.clone(),
            delivery_timeout,
        ));

        Self {
            sensor_id,
            cancel,
            task,
            stats,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        self.stats.clone()
    }

    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            sensor_id: self.sensor_id.clone(),
            alive: !self.task.is_finished(),
            attempts: self.stats.attempts(),
            delivered: self.stats.delivered(),
            failed: self.stats.failed(),
            last_error: self.stats.last_error(),
        }
    }

    /// Cancels the worker and waits until it has fully stopped. No reading is
    /// delivered by this worker once this returns.
    pub async fn join(self) -> Result<()> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| EmulatorError::Worker(format!("sensor {}: {}", self.sensor_id, e)))
    }
}

async fn run(
    config: SensorConfig,
    sink: Arc<dyn Sink>,
    cancel: CancellationToken,
    stats: Arc<DeliveryStats>,
    delivery_timeout: Duration,
) {
    let interval = config.interval();
    info!(
        "[{}] Emulation started ({} every {:?} via {})",
        config.sensor_id,
        config.sensor_type,
        interval,
        sink.mode()
    );

    while !cancel.is_cancelled() {
        let reading = generate(&config);
        stats.attempts.fetch_add(1, Ordering::Relaxed);

        // An in-flight delivery is never interrupted by cancellation; only
        // its own timeout bounds it.
        match tokio::time::timeout(
            delivery_timeout,
            sink.deliver(&config.destination, &reading),
        )
        .await
        {
            Ok(Ok(message_id)) => {
                stats.record_success();
                debug!(
                    "[{}] Sent {:.2} {} -> {}",
                    config.sensor_id, reading.value, reading.unit, message_id
                );
            }
            Ok(Err(e)) => {
                warn!("[{}] Delivery failed: {}", config.sensor_id, e);
                stats.record_failure(e.to_string());
            }
            Err(_) => {
                warn!(
                    "[{}] Delivery timed out after {:?}",
                    config.sensor_id, delivery_timeout
                );
                stats.record_failure(format!("timed out after {:?}", delivery_timeout));
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                break;
            }
        }
    }

    info!("[{}] Emulation stopped", config.sensor_id);
}
