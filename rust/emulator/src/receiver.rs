//! HTTP endpoint that accepts readings from an [`HttpSink`](crate::sink::HttpSink)
//! and stores them through the control facade.

use crate::control::{EmulatorControl, ReadingsPage};
use crate::error::{EmulatorError, Result};
use crate::sensor::Reading;
use crate::sink::ReceiveAck;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const DEFAULT_READINGS_LIMIT: usize = 100;

pub fn router(control: Arc<EmulatorControl>) -> Router {
    Router::new()
        .route("/data/receive", post(receive_reading))
        .route("/readings", get(list_readings))
        .with_state(control)
}

/// Serves [`router`] on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    control: Arc<EmulatorControl>,
    cancel: CancellationToken,
) -> Result<()> {
    info!("Receiver listening on {}", listener.local_addr()?);
    axum::serve(listener, router(control))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Receiver shut down");
    Ok(())
}

struct ApiError(EmulatorError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EmulatorError::Validation(_)
            | EmulatorError::AlreadyRunning
            | EmulatorError::NotRunning
            | EmulatorError::NoSensorsConfigured => StatusCode::BAD_REQUEST,
            EmulatorError::SensorNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "detail": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<EmulatorError> for ApiError {
    fn from(e: EmulatorError) -> Self {
        Self(e)
    }
}

async fn receive_reading(
    State(control): State<Arc<EmulatorControl>>,
    Json(reading): Json<Reading>,
) -> std::result::Result<Json<ReceiveAck>, ApiError> {
    let db_id = control.receive_reading(reading).await?;
    Ok(Json(ReceiveAck {
        message: "Data received and saved".to_string(),
        db_id,
    }))
}

#[derive(Debug, Deserialize)]
struct ReadingsQuery {
    sensor_id: Option<String>,
    limit: Option<usize>,
}

async fn list_readings(
    State(control): State<Arc<EmulatorControl>>,
    Query(query): Query<ReadingsQuery>,
) -> std::result::Result<Json<ReadingsPage>, ApiError> {
    let page = control
        .readings(
            query.sensor_id.as_deref(),
            query.limit.unwrap_or(DEFAULT_READINGS_LIMIT),
        )
        .await?;
    Ok(Json(page))
}
