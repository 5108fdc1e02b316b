use shared::{
    domain::{
        ControlsId, ControlsPatch, ControlsRecord, NewSensorReading, SensorReading, ValuePolicy,
        CONTROLS_ID,
    },
    error::{ApiError, ErrorCode, ValidationError},
};
use storage::Storage;
use tracing::info;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn read_controls(
    ctx: &ApiContext,
    controls_id: ControlsId,
) -> Result<ControlsRecord, ApiError> {
    ensure_singleton(controls_id)?;
    ctx.storage
        .read_controls(controls_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "controls record not found"))
}

/// Applies a partial update to the singleton controls row. Every present field
/// is re-checked against its domain; the store never holds an out-of-range
/// value regardless of which client wrote it.
pub async fn upsert_controls(
    ctx: &ApiContext,
    controls_id: ControlsId,
    patch: &ControlsPatch,
) -> Result<(), ApiError> {
    ensure_singleton(controls_id)?;
    let entries = patch.entries();
    for (field, value) in &entries {
        field.admit(*value, ValuePolicy::Reject)?;
    }
    ctx.storage
        .upsert_controls(controls_id, patch)
        .await
        .map_err(internal)?;
    let fields: Vec<&str> = entries.iter().map(|(field, _)| field.as_str()).collect();
    info!(controls_id = controls_id.0, ?fields, "controls upserted");
    Ok(())
}

pub async fn latest_sensor_reading(ctx: &ApiContext) -> Result<SensorReading, ApiError> {
    ctx.storage
        .read_latest_sensor_reading()
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "no sensor readings recorded"))
}

pub async fn append_sensor_reading(
    ctx: &ApiContext,
    reading: &NewSensorReading,
) -> Result<SensorReading, ApiError> {
    reading.validate()?;
    ctx.storage
        .append_sensor_reading(reading)
        .await
        .map_err(internal)
}

fn ensure_singleton(controls_id: ControlsId) -> Result<(), ApiError> {
    if controls_id != CONTROLS_ID {
        return Err(ValidationError::UnknownIdentity(controls_id.0).into());
    }
    Ok(())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
