use anyhow::{anyhow, Result};
use async_trait::async_trait;
use server_api::ApiContext;
use shared::{
    domain::{ControlsId, ControlsPatch, ControlsRecord, NewSensorReading, SensorReading},
    error::{ApiError, ApiException, ErrorCode},
};
use storage::Storage;
use sync_core::SharedStore;

/// Talks to the database file directly, with the same checks as the service.
pub struct DirectStore {
    api: ApiContext,
}

impl DirectStore {
    pub async fn open(database_url: &str) -> Result<Self> {
        let storage = Storage::new(database_url).await?;
        Ok(Self {
            api: ApiContext { storage },
        })
    }
}

fn not_found_as_none<T>(result: Result<T, ApiError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.code == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(anyhow!(ApiException::from(err))),
    }
}

#[async_trait]
impl SharedStore for DirectStore {
    async fn read_latest_sensor_reading(&self) -> Result<Option<SensorReading>> {
        not_found_as_none(server_api::latest_sensor_reading(&self.api).await)
    }

    async fn read_controls(&self, controls_id: ControlsId) -> Result<Option<ControlsRecord>> {
        not_found_as_none(server_api::read_controls(&self.api, controls_id).await)
    }

    async fn upsert_controls(&self, controls_id: ControlsId, patch: &ControlsPatch) -> Result<()> {
        server_api::upsert_controls(&self.api, controls_id, patch)
            .await
            .map_err(|err| anyhow!(ApiException::from(err)))
    }

    async fn append_sensor_reading(&self, reading: &NewSensorReading) -> Result<SensorReading> {
        server_api::append_sensor_reading(&self.api, reading)
            .await
            .map_err(|err| anyhow!(ApiException::from(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::{ControlField, ControlValue, CONTROLS_ID};

    #[tokio::test]
    async fn missing_rows_read_as_none_and_checks_apply() {
        let store = DirectStore::open("sqlite::memory:").await.expect("open");
        assert!(store.read_controls(CONTROLS_ID).await.expect("read").is_none());
        assert!(store
            .read_latest_sensor_reading()
            .await
            .expect("read")
            .is_none());

        let patch = ControlsPatch::single(ControlField::Strip, ControlValue::Flag(true))
            .expect("patch");
        store.upsert_controls(CONTROLS_ID, &patch).await.expect("upsert");
        assert!(store
            .read_controls(CONTROLS_ID)
            .await
            .expect("read")
            .expect("record")
            .strip);

        assert!(store
            .upsert_controls(shared::domain::ControlsId(2), &patch)
            .await
            .is_err());
    }
}
