use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ControlsId, ControlsPatch, ControlsRecord, NewSensorReading, SensorReading},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{controls_route, LATEST_SENSOR_READING_ROUTE, SENSOR_READINGS_ROUTE},
};
use tracing::debug;
use url::Url;

use crate::store::SharedStore;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`SharedStore`] backed by the store service over HTTP.
#[derive(Clone)]
pub struct HttpSharedStore {
    http: Client,
    base_url: Url,
}

impl HttpSharedStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url.trim())
            .with_context(|| format!("invalid store url '{base_url}'"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> Result<Url> {
        self.base_url
            .join(route.trim_start_matches('/'))
            .with_context(|| format!("invalid store route '{route}'"))
    }
}

/// Turns a non-success response into an error carrying the store's message.
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<ApiError>().await {
        Ok(body) => Err(anyhow!(ApiException::from(body)).context(format!("store answered {status}"))),
        Err(_) => Err(anyhow!("store answered {status}")),
    }
}

/// A 404 carrying the store's not-found envelope means the row is absent.
/// Any other 404 (wrong base url, missing route) is an error.
async fn decode_optional<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
    if response.status() == StatusCode::NOT_FOUND {
        let body: ApiError = response
            .json()
            .await
            .context("store answered 404 without an error body")?;
        if body.code == ErrorCode::NotFound {
            return Ok(None);
        }
        return Err(anyhow!(ApiException::from(body)));
    }
    let value = ensure_success(response)
        .await?
        .json()
        .await
        .context("malformed store response")?;
    Ok(Some(value))
}

#[async_trait]
impl SharedStore for HttpSharedStore {
    async fn read_latest_sensor_reading(&self) -> Result<Option<SensorReading>> {
        let url = self.endpoint(LATEST_SENSOR_READING_ROUTE)?;
        let response = self.http.get(url).send().await?;
        decode_optional(response).await
    }

    async fn read_controls(&self, controls_id: ControlsId) -> Result<Option<ControlsRecord>> {
        let url = self.endpoint(&controls_route(controls_id))?;
        let response = self.http.get(url).send().await?;
        let record: Option<ControlsRecord> = decode_optional(response).await?;
        if let Some(record) = &record {
            record.validate().context("malformed store response")?;
        }
        Ok(record)
    }

    async fn upsert_controls(&self, controls_id: ControlsId, patch: &ControlsPatch) -> Result<()> {
        let url = self.endpoint(&controls_route(controls_id))?;
        debug!(%url, ?patch, "store: upsert controls");
        let response = self.http.post(url).json(patch).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn append_sensor_reading(&self, reading: &NewSensorReading) -> Result<SensorReading> {
        let url = self.endpoint(SENSOR_READINGS_ROUTE)?;
        let stored = ensure_success(self.http.post(url).json(reading).send().await?)
            .await?
            .json()
            .await
            .context("malformed store response")?;
        Ok(stored)
    }
}

#[cfg(test)]
#[path = "tests/http_store_tests.rs"]
mod tests;
