use super::worker::WorkerHandle;
use super::{DuplicatePolicy, EngineOptions, EngineStatus};
use crate::error::{EmulatorError, Result};
use crate::sensor::SensorConfig;
use crate::sink::{Sink, SinkFactory, SinkMode};
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct EngineState {
    running: bool,
    configurations: HashMap<String, SensorConfig>,
    workers: HashMap<String, WorkerHandle>,
    sink_mode: Option<SinkMode>,
    sink: Option<Arc<dyn Sink>>,
    run_token: Option<CancellationToken>,
}

/// Owns the registered sensor configurations and the workers emitting for
/// them.
///
/// Mutating calls are serialized through `commands`, which may be held across
/// awaits (opening sinks, joining workers). `state` is only ever locked for
/// short sections that do not await, so [`Engine::status`] never waits on a
/// worker.
pub struct Engine {
    factory: Arc<dyn SinkFactory>,
    options: EngineOptions,
    commands: Mutex<()>,
    state: Mutex<EngineState>,
}

impl Engine {
    pub fn new(factory: Arc<dyn SinkFactory>) -> Self {
        Self::with_options(factory, EngineOptions::default())
    }

    pub fn with_options(factory: Arc<dyn SinkFactory>, options: EngineOptions) -> Self {
        Self {
            factory,
            options,
            commands: Mutex::new(()),
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Registers or replaces a configuration. A running engine does not spawn
    /// a worker for it until the next `start`, and a replaced configuration
    /// does not reach a worker that is already running.
    pub async fn add_sensor(&self, config: SensorConfig) -> Result<()> {
        config.validate()?;
        let _guard = self.commands.lock().await;
        let mut state = self.state.lock().await;

        let exists = state.configurations.contains_key(&config.sensor_id);
        if exists && self.options.duplicate_policy == DuplicatePolicy::Reject {
            return Err(EmulatorError::Validation(format!(
                "sensor {} is already registered",
                config.sensor_id
            )));
        }
        if exists && state.workers.contains_key(&config.sensor_id) {
            debug!(
                "Sensor {} replaced; its running worker keeps the previous configuration",
                config.sensor_id
            );
        }

        info!(
            "Sensor {} {} ({})",
            config.sensor_id,
            if exists { "updated" } else { "added" },
            config.sensor_type
        );
        state
            .configurations
            .insert(config.sensor_id.clone(), config);
        Ok(())
    }

    /// Removes a configuration. Its worker, if any, has stopped producing by
    /// the time this returns.
    pub async fn remove_sensor(&self, sensor_id: &str) -> Result<Option<SensorConfig>> {
        let _guard = self.commands.lock().await;
        let (removed, worker) = {
            let mut state = self.state.lock().await;
            (
                state.configurations.remove(sensor_id),
                state.workers.remove(sensor_id),
            )
        };

        if let Some(worker) = worker {
            worker.join().await?;
            info!("Sensor {} worker stopped", sensor_id);
        }
        if removed.is_some() {
            info!("Sensor {} removed", sensor_id);
        }
        Ok(removed)
    }

    /// Replaces the whole configuration set. Only allowed while stopped.
    pub async fn replace_sensors(&self, configs: Vec<SensorConfig>) -> Result<()> {
        let mut seen = HashSet::new();
        for config in &configs {
            config.validate()?;
            if !seen.insert(config.sensor_id.as_str())
                && self.options.duplicate_policy == DuplicatePolicy::Reject
            {
                return Err(EmulatorError::Validation(format!(
                    "sensor {} is listed more than once",
                    config.sensor_id
                )));
            }
        }

        let _guard = self.commands.lock().await;
        let mut state = self.state.lock().await;
        if state.running {
            return Err(EmulatorError::AlreadyRunning);
        }
        state.configurations = configs
            .into_iter()
            .map(|config| (config.sensor_id.clone(), config))
            .collect();
        info!("Loaded {} sensor configurations", state.configurations.len());
        Ok(())
    }

    pub async fn list_sensors(&self) -> Vec<SensorConfig> {
        let state = self.state.lock().await;
        let mut sensors: Vec<_> = state.configurations.values().cloned().collect();
        sensors.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        sensors
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Opens the sink selected by `use_broker` and spawns one worker per
    /// configuration registered at this moment.
    pub async fn start(&self, use_broker: bool) -> Result<()> {
        let _guard = self.commands.lock().await;
        {
            let state = self.state.lock().await;
            if state.running {
                return Err(EmulatorError::AlreadyRunning);
            }
            if state.configurations.is_empty() {
                return Err(EmulatorError::NoSensorsConfigured);
            }
        }

        let mode = SinkMode::from_flag(use_broker);
        let sink = self.factory.open(mode).await.map_err(into_resource)?;

        let run_token = CancellationToken::new();
        let mut state = self.state.lock().await;
        let workers: HashMap<_, _> = state
            .configurations
            .values()
            .map(|config| {
                let worker = WorkerHandle::spawn(
                    config.clone(),
                    sink.clone(),
                    run_token.child_token(),
                    self.options.delivery_timeout,
                );
                (config.sensor_id.clone(), worker)
            })
            .collect();

        info!(
            "Started emulation for {} sensors (mode: {})",
            workers.len(),
            mode
        );
        state.workers = workers;
        state.sink = Some(sink);
        state.sink_mode = Some(mode);
        state.run_token = Some(run_token);
        state.running = true;
        Ok(())
    }

    /// Cancels every worker, waits for all of them, then releases the sink.
    /// Calling this on a stopped engine does nothing.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.commands.lock().await;
        let (run_token, workers, sink) = {
            let mut state = self.state.lock().await;
            if !state.running {
                return Ok(());
            }
            state.running = false;
            (
                state.run_token.take(),
                std::mem::take(&mut state.workers),
                state.sink.take(),
            )
        };

        if let Some(token) = run_token {
            token.cancel();
        }

        let count = workers.len();
        let mut failures = Vec::new();
        for result in join_all(workers.into_values().map(WorkerHandle::join)).await {
            if let Err(e) = result {
                error!("{}", e);
                failures.push(e.to_string());
            }
        }

        // Workers are gone before the sink is touched, whatever happens next.
        let close_result = match sink {
            Some(sink) => sink.close().await,
            None => Ok(()),
        };
        info!("Stopped {} sensor emulations", count);

        if let Err(e) = close_result {
            warn!("Sink release failed after stop: {}", e);
            return Err(into_resource(e));
        }
        if !failures.is_empty() {
            return Err(EmulatorError::Worker(failures.join("; ")));
        }
        Ok(())
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state.lock().await;
        let mut sensors: Vec<_> = state.configurations.values().cloned().collect();
        sensors.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        let mut workers: Vec<_> = state.workers.values().map(WorkerHandle::report).collect();
        workers.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));

        EngineStatus {
            running: state.running,
            active_sensor_count: state.workers.len(),
            sink_mode: state.sink_mode,
            sensors,
            workers,
        }
    }
}

fn into_resource(e: EmulatorError) -> EmulatorError {
    match e {
        resource @ EmulatorError::Resource(_) => resource,
        other => EmulatorError::Resource(other.to_string()),
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(token) = self.state.get_mut().run_token.take() {
            token.cancel();
        }
    }
}
