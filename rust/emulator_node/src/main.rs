use backoff::ExponentialBackoff;
use emulator::config::{BrokerMode, BrokerSettings, Settings};
use emulator::control::EmulatorControl;
use emulator::logging::{init_logger, parse_level};
use emulator::receiver;
use emulator::sink::TransportFactory;
use emulator::store::{MemoryConfigStore, MemoryReadingStore};
use emulator::{EmulatorError, Engine, Result};
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zenoh::config::whatami::WhatAmI;
use zenoh::config::EndPoint;
use zenoh::prelude::r#async::*;

const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn load_settings() -> Result<Settings> {
    let mut settings = match env::var("EMULATOR_CONFIG") {
        Ok(path) => Settings::load(path)?,
        Err(_) => Settings::default(),
    };
    settings.apply_env();
    Ok(settings)
}

fn zenoh_config(broker: &BrokerSettings) -> Result<zenoh::config::Config> {
    let mut config = zenoh::config::Config::default();
    let mode = match broker.mode {
        BrokerMode::Client => WhatAmI::Client,
        BrokerMode::Peer => WhatAmI::Peer,
    };
    config
        .set_mode(Some(mode))
        .map_err(|_| EmulatorError::Config("failed to set zenoh mode".to_string()))?;
    for endpoint in &broker.connect {
        let parsed = endpoint.parse::<EndPoint>().map_err(|e| {
            EmulatorError::Config(format!("invalid zenoh endpoint {}: {}", endpoint, e))
        })?;
        config.connect.endpoints.push(parsed);
    }
    Ok(config)
}

async fn open_session(broker: &BrokerSettings) -> Result<Arc<Session>> {
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(BROKER_CONNECT_TIMEOUT),
        ..ExponentialBackoff::default()
    };

    let session = backoff::future::retry(policy, || async move {
        let config = zenoh_config(broker).map_err(backoff::Error::permanent)?;
        zenoh::open(config).res().await.map_err(|e| {
            warn!("Broker connection failed, retrying: {}", e);
            backoff::Error::transient(EmulatorError::from(e))
        })
    })
    .await?;

    info!("Connected to broker via {:?}", broker.connect);
    Ok(session.into_arc())
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = load_settings()?;
    let level = env::var("EMULATOR_LOG").unwrap_or_else(|_| settings.log_level.clone());
    init_logger(parse_level(&level));

    // Only the sink selected for this run gets a transport.
    let session = if settings.use_broker {
        Some(open_session(&settings.broker).await?)
    } else {
        None
    };
    let factory = TransportFactory::new(
        session,
        settings.broker.options(),
        settings.http.options(),
    );
    let engine = Arc::new(Engine::with_options(
        Arc::new(factory),
        settings.engine_options(),
    ));
    let control = Arc::new(EmulatorControl::new(
        engine,
        Arc::new(MemoryConfigStore::new()),
        Arc::new(MemoryReadingStore::new()),
    ));

    let cancel = CancellationToken::new();
    let receiver_task = match &settings.receiver.listen {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            Some(tokio::spawn(receiver::serve(
                listener,
                control.clone(),
                cancel.clone(),
            )))
        }
        None => None,
    };

    for sensor in settings.sensors.iter().cloned() {
        control.add_sensor(sensor).await?;
    }

    let status = control.start(settings.use_broker).await?;
    info!(
        "Emulating {} sensors; press Ctrl+C to stop",
        status.active_sensor_count
    );

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    let stopped = control.stop().await;
    cancel.cancel();
    if let Some(task) = receiver_task {
        match task.await {
            Ok(Err(e)) => error!("Receiver failed: {}", e),
            Err(e) => error!("Receiver task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }
    stopped.map(|_| ())
}
