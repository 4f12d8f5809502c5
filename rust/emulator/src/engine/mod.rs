#[allow(clippy::module_inception)]
mod engine;
pub mod worker;

pub use engine::Engine;
pub use worker::{DeliveryStats, WorkerHandle, WorkerReport};

use crate::sensor::SensorConfig;
use crate::sink::SinkMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What `add_sensor` does with an id that is already registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Replace,
    Reject,
}

#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub duplicate_policy: DuplicatePolicy,
    pub delivery_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Replace,
            delivery_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub active_sensor_count: usize,
    pub sink_mode: Option<SinkMode>,
    pub sensors: Vec<SensorConfig>,
    pub workers: Vec<WorkerReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeliveryError, EmulatorError, Result};
    use crate::sensor::{Location, Reading, SensorType};
    use crate::sink::{MessageId, Sink, SinkFactory};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::{sleep, Instant};

    #[derive(Default)]
    struct RecordingSink {
        fail_deliveries: bool,
        fail_close: bool,
        delay: Option<Duration>,
        deliveries: AtomicUsize,
        completed: AtomicUsize,
        closes: AtomicUsize,
        per_sensor: Mutex<HashMap<String, usize>>,
    }

    impl RecordingSink {
        fn total(&self) -> usize {
            self.deliveries.load(Ordering::SeqCst)
        }

        fn completed(&self) -> usize {
            self.completed.load(Ordering::SeqCst)
        }

        fn count_for(&self, sensor_id: &str) -> usize {
            self.per_sensor
                .lock()
                .unwrap()
                .get(sensor_id)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn mode(&self) -> SinkMode {
            SinkMode::Http
        }

        async fn deliver(
            &self,
            _destination: &str,
            reading: &Reading,
        ) -> std::result::Result<MessageId, DeliveryError> {
            self.deliveries.fetch_add(1, Ordering::SeqCst);
            *self
                .per_sensor
                .lock()
                .unwrap()
                .entry(reading.sensor_id.clone())
                .or_default() += 1;
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            if self.fail_deliveries {
                Err(DeliveryError::TransportFailure("injected".to_string()))
            } else {
                Ok(MessageId(format!("{}", self.total())))
            }
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(EmulatorError::Resource("close failed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct RecordingFactory {
        sink: Arc<RecordingSink>,
        fail_open: bool,
        opened: Mutex<Vec<SinkMode>>,
    }

    impl RecordingFactory {
        fn new(sink: RecordingSink) -> Arc<Self> {
            Arc::new(Self {
                sink: Arc::new(sink),
                fail_open: false,
                opened: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                sink: Arc::new(RecordingSink::default()),
                fail_open: true,
                opened: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SinkFactory for RecordingFactory {
        async fn open(&self, mode: SinkMode) -> Result<Arc<dyn Sink>> {
            if self.fail_open {
                return Err(EmulatorError::Resource("broker unavailable".to_string()));
            }
            self.opened.lock().unwrap().push(mode);
            Ok(self.sink.clone())
        }
    }

    fn sensor(id: &str, interval_ms: u64) -> SensorConfig {
        SensorConfig {
            sensor_id: id.to_string(),
            sensor_type: SensorType::Temperature,
            interval_ms,
            min_value: 10.0,
            max_value: 40.0,
            location: Location {
                latitude: 50.0,
                longitude: 30.0,
            },
            destination: "http://localhost/data/receive".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_sensors_fails() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory.clone());

        let result = engine.start(false).await;
        assert!(matches!(result, Err(EmulatorError::NoSensorsConfigured)));
        assert!(!engine.status().await.running);
        assert!(factory.opened.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_fails_and_first_run_continues() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory.clone());
        engine.add_sensor(sensor("temp-1", 10)).await.unwrap();

        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(35)).await;
        let result = engine.start(true).await;
        assert!(matches!(result, Err(EmulatorError::AlreadyRunning)));

        let before = factory.sink.total();
        sleep(Duration::from_millis(35)).await;
        assert!(factory.sink.total() > before);

        let status = engine.status().await;
        assert!(status.running);
        assert_eq!(status.active_sensor_count, 1);
        assert_eq!(status.sink_mode, Some(SinkMode::Http));
        assert_eq!(*factory.opened.lock().unwrap(), vec![SinkMode::Http]);

        engine.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delivery_after_stop() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory.clone());
        engine.add_sensor(sensor("temp-1", 20)).await.unwrap();
        engine.add_sensor(sensor("temp-2", 30)).await.unwrap();

        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        engine.stop().await.unwrap();

        let after_stop = factory.sink.total();
        assert!(after_stop > 0);
        sleep(Duration::from_millis(60)).await;
        assert_eq!(factory.sink.total(), after_stop);
        assert_eq!(factory.sink.closes.load(Ordering::SeqCst), 1);

        let status = engine.status().await;
        assert!(!status.running);
        assert_eq!(status.active_sensor_count, 0);
        assert!(status.workers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_stopped_is_noop() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory.clone());
        engine.stop().await.unwrap();
        assert_eq!(factory.sink.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_while_running_stops_only_that_worker() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory.clone());
        engine.add_sensor(sensor("a", 10)).await.unwrap();
        engine.add_sensor(sensor("b", 10)).await.unwrap();

        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.status().await.active_sensor_count, 2);

        let removed = engine.remove_sensor("a").await.unwrap();
        assert_eq!(removed.map(|c| c.sensor_id), Some("a".to_string()));
        let status = engine.status().await;
        assert_eq!(status.active_sensor_count, 1);
        assert_eq!(status.sensors.len(), 1);

        let a_count = factory.sink.count_for("a");
        let b_count = factory.sink.count_for("b");
        sleep(Duration::from_millis(50)).await;
        assert_eq!(factory.sink.count_for("a"), a_count);
        assert!(factory.sink.count_for("b") > b_count);

        engine.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_unknown_sensor_returns_none() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory);
        assert!(engine.remove_sensor("missing").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_sink_keeps_worker_alive() {
        let factory = RecordingFactory::new(RecordingSink {
            fail_deliveries: true,
            ..RecordingSink::default()
        });
        let engine = Engine::new(factory.clone());
        engine.add_sensor(sensor("flaky", 10)).await.unwrap();

        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let status = engine.status().await;
        assert!(status.running);
        let report = &status.workers[0];
        assert!(report.alive);
        assert!(report.attempts >= 10);
        assert_eq!(report.failed, report.attempts);
        assert_eq!(report.delivered, 0);
        assert!(report
            .last_error
            .as_deref()
            .unwrap()
            .contains("injected"));
        assert_eq!(factory.sink.total() as u64, report.attempts);

        engine.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_while_running_waits_for_next_start() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory.clone());
        engine.add_sensor(sensor("first", 10)).await.unwrap();
        engine.start(false).await.unwrap();

        engine.add_sensor(sensor("late", 10)).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let status = engine.status().await;
        assert_eq!(status.sensors.len(), 2);
        assert_eq!(status.active_sensor_count, 1);
        assert_eq!(factory.sink.count_for("late"), 0);

        engine.stop().await.unwrap();
        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.status().await.active_sensor_count, 2);
        assert!(factory.sink.count_for("late") > 0);
        engine.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_replaces_without_second_worker() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory);
        engine.add_sensor(sensor("temp-1", 10)).await.unwrap();
        engine.start(false).await.unwrap();

        let mut updated = sensor("temp-1", 10);
        updated.max_value = 20.0;
        engine.add_sensor(updated.clone()).await.unwrap();

        let status = engine.status().await;
        assert_eq!(status.sensors, vec![updated]);
        assert_eq!(status.active_sensor_count, 1);
        engine.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_policy_refuses_duplicates() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::with_options(
            factory,
            EngineOptions {
                duplicate_policy: DuplicatePolicy::Reject,
                ..EngineOptions::default()
            },
        );
        engine.add_sensor(sensor("temp-1", 10)).await.unwrap();

        let mut updated = sensor("temp-1", 10);
        updated.max_value = 20.0;
        let result = engine.add_sensor(updated).await;
        assert!(matches!(result, Err(EmulatorError::Validation(_))));
        assert_eq!(engine.list_sensors().await, vec![sensor("temp-1", 10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_leaves_state_untouched() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory);
        let mut bad = sensor("bad", 10);
        bad.min_value = 50.0;

        let result = engine.add_sensor(bad).await;
        assert!(matches!(result, Err(EmulatorError::Validation(_))));
        assert!(engine.list_sensors().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_leaves_engine_stopped() {
        let factory = RecordingFactory::failing();
        let engine = Engine::new(factory);
        engine.add_sensor(sensor("temp-1", 10)).await.unwrap();

        let result = engine.start(true).await;
        assert!(matches!(result, Err(EmulatorError::Resource(_))));
        let status = engine.status().await;
        assert!(!status.running);
        assert_eq!(status.active_sensor_count, 0);
        assert_eq!(status.sink_mode, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_close_still_stops_workers() {
        let factory = RecordingFactory::new(RecordingSink {
            fail_close: true,
            ..RecordingSink::default()
        });
        let engine = Engine::new(factory.clone());
        engine.add_sensor(sensor("temp-1", 10)).await.unwrap();
        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(30)).await;

        let result = engine.stop().await;
        assert!(matches!(result, Err(EmulatorError::Resource(_))));
        let status = engine.status().await;
        assert!(!status.running);
        assert_eq!(status.active_sensor_count, 0);

        let after_stop = factory.sink.total();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(factory.sink.total(), after_stop);

        engine.start(false).await.unwrap();
        engine.stop().await.unwrap_err();
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_sensors_only_while_stopped() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory);
        engine
            .replace_sensors(vec![sensor("x", 10), sensor("y", 10)])
            .await
            .unwrap();
        assert_eq!(engine.list_sensors().await.len(), 2);

        engine.start(false).await.unwrap();
        let result = engine.replace_sensors(vec![sensor("z", 10)]).await;
        assert!(matches!(result, Err(EmulatorError::AlreadyRunning)));
        engine.stop().await.unwrap();

        engine.replace_sensors(vec![sensor("z", 10)]).await.unwrap();
        let ids: Vec<_> = engine
            .list_sensors()
            .await
            .into_iter()
            .map(|c| c.sensor_id)
            .collect();
        assert_eq!(ids, vec!["z".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_running_engine_cancels_workers() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory.clone());
        engine.add_sensor(sensor("temp-1", 10)).await.unwrap();
        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(30)).await;

        drop(engine);
        sleep(Duration::from_millis(5)).await;
        let after_drop = factory.sink.total();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(factory.sink.total(), after_drop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_delivery() {
        let factory = RecordingFactory::new(RecordingSink {
            delay: Some(Duration::from_millis(40)),
            ..RecordingSink::default()
        });
        let engine = Engine::new(factory.clone());
        engine.add_sensor(sensor("slow", 10)).await.unwrap();

        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(factory.sink.total(), 1);
        assert_eq!(factory.sink.completed(), 0);

        let begun = Instant::now();
        engine.stop().await.unwrap();
        let waited = begun.elapsed();
        assert!(waited >= Duration::from_millis(15), "stop returned after {:?}", waited);
        assert!(waited <= Duration::from_millis(25), "stop returned after {:?}", waited);
        assert_eq!(factory.sink.completed(), 1);
        assert_eq!(factory.sink.closes.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(factory.sink.total(), 1);
        assert_eq!(factory.sink.completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_delivery_is_cut_off_by_timeout() {
        let factory = RecordingFactory::new(RecordingSink {
            delay: Some(Duration::from_secs(3600)),
            ..RecordingSink::default()
        });
        let delivery_timeout = Duration::from_millis(100);
        let engine = Engine::with_options(
            factory.clone(),
            EngineOptions {
                delivery_timeout,
                ..EngineOptions::default()
            },
        );
        engine.add_sensor(sensor("stuck", 10)).await.unwrap();

        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(150)).await;

        let status = engine.status().await;
        let report = &status.workers[0];
        assert!(report.alive);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 0);
        assert!(report
            .last_error
            .as_deref()
            .unwrap()
            .contains("timed out"));

        let begun = Instant::now();
        engine.stop().await.unwrap();
        let waited = begun.elapsed();
        assert!(waited <= delivery_timeout, "stop returned after {:?}", waited);
        assert_eq!(factory.sink.completed(), 0);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(factory.sink.total(), 2);
        assert_eq!(factory.sink.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_value_range_keeps_worker_alive() {
        let factory = RecordingFactory::new(RecordingSink::default());
        let engine = Engine::new(factory.clone());
        let mut wide = sensor("wide", 10);
        wide.min_value = -1e308;
        wide.max_value = 1e308;
        engine.add_sensor(wide).await.unwrap();

        engine.start(false).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        let status = engine.status().await;
        assert!(status.workers[0].alive);
        assert!(status.workers[0].delivered > 0);

        engine.stop().await.unwrap();
    }
}
