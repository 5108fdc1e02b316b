//! HTTP front of the shared store: routes, envelopes and status mapping.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use server_api::ApiContext;
use shared::{
    domain::{ControlsId, ControlsPatch, ControlsRecord, NewSensorReading, SensorReading},
    error::{ApiError, ErrorCode},
    protocol::{
        CONTROLS_ROUTE_PATTERN, HEALTHZ_ROUTE, LATEST_SENSOR_READING_ROUTE, SENSOR_READINGS_ROUTE,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::error;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

pub const MAX_BODY_BYTES: usize = 16 * 1024;

type HttpResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn build_router(storage: Storage) -> Router {
    let state = Arc::new(AppState {
        api: ApiContext { storage },
    });
    Router::new()
        .route(HEALTHZ_ROUTE, get(healthz))
        .route(CONTROLS_ROUTE_PATTERN, get(get_controls).post(upsert_controls))
        .route(SENSOR_READINGS_ROUTE, post(append_sensor_reading))
        .route(LATEST_SENSOR_READING_ROUTE, get(latest_sensor_reading))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(message = %err.message, "store request failed");
    }
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> HttpResult<&'static str> {
    state.api.storage.health_check().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Internal, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn get_controls(
    State(state): State<Arc<AppState>>,
    Path(controls_id): Path<i64>,
) -> HttpResult<Json<ControlsRecord>> {
    server_api::read_controls(&state.api, ControlsId(controls_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn upsert_controls(
    State(state): State<Arc<AppState>>,
    Path(controls_id): Path<i64>,
    Json(patch): Json<ControlsPatch>,
) -> HttpResult<StatusCode> {
    server_api::upsert_controls(&state.api, ControlsId(controls_id), &patch)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn latest_sensor_reading(
    State(state): State<Arc<AppState>>,
) -> HttpResult<Json<SensorReading>> {
    server_api::latest_sensor_reading(&state.api)
        .await
        .map(Json)
        .map_err(reject)
}

async fn append_sensor_reading(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<NewSensorReading>,
) -> HttpResult<(StatusCode, Json<SensorReading>)> {
    let stored = server_api::append_sensor_reading(&state.api, &reading)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
