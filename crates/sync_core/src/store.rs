use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use shared::domain::{
    ControlField, ControlsId, ControlsPatch, ControlsRecord, NewSensorReading, ReadingId,
    SensorReading,
};
use tokio::sync::{watch, Mutex};

/// The hosted table store as seen by a dashboard session or a device.
///
/// Reads return `None` when the row does not exist yet. Upserts are partial:
/// fields absent from the patch keep their stored value.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn read_latest_sensor_reading(&self) -> Result<Option<SensorReading>>;

    async fn read_controls(&self, controls_id: ControlsId) -> Result<Option<ControlsRecord>>;

    async fn upsert_controls(&self, controls_id: ControlsId, patch: &ControlsPatch) -> Result<()>;

    async fn append_sensor_reading(&self, reading: &NewSensorReading) -> Result<SensorReading>;
}

#[derive(Default)]
struct MemoryState {
    controls: HashMap<ControlsId, ControlsRecord>,
    readings: Vec<SensorReading>,
    reads_failing: bool,
    failing_fields: HashSet<ControlField>,
    reads: u64,
    attempted: Vec<ControlsPatch>,
    landed: Vec<ControlsPatch>,
}

/// In-process store used for offline dashboards and tests.
///
/// Besides behaving like the hosted store it can be told to fail reads, to
/// fail upserts touching chosen fields, or to hold such upserts until they
/// are released.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    held: Arc<watch::Sender<HashSet<ControlField>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_state(MemoryState::default())
    }

    pub fn with_controls(record: ControlsRecord) -> Self {
        let mut state = MemoryState::default();
        state.controls.insert(record.id, record);
        Self::from_state(state)
    }

    fn from_state(state: MemoryState) -> Self {
        let (held, _) = watch::channel(HashSet::new());
        Self {
            state: Arc::new(Mutex::new(state)),
            held: Arc::new(held),
        }
    }

    /// Overwrites a whole record, as another writer would.
    pub async fn put_controls(&self, record: ControlsRecord) {
        self.state.lock().await.controls.insert(record.id, record);
    }

    pub async fn controls(&self, controls_id: ControlsId) -> Option<ControlsRecord> {
        self.state.lock().await.controls.get(&controls_id).cloned()
    }

    pub async fn set_reads_failing(&self, failing: bool) {
        self.state.lock().await.reads_failing = failing;
    }

    pub async fn fail_writes_for(&self, field: ControlField) {
        self.state.lock().await.failing_fields.insert(field);
    }

    pub async fn clear_write_failures(&self) {
        self.state.lock().await.failing_fields.clear();
    }

    /// Upserts touching `field` wait until [`MemoryStore::release`] is called.
    pub fn hold_writes_for(&self, field: ControlField) {
        self.held.send_modify(|held| {
            held.insert(field);
        });
    }

    pub fn release(&self, field: ControlField) {
        self.held.send_modify(|held| {
            held.remove(&field);
        });
    }

    /// Number of read calls served, failed ones included.
    pub async fn read_count(&self) -> u64 {
        self.state.lock().await.reads
    }

    /// Patches in the order their upserts were issued.
    pub async fn attempted_upserts(&self) -> Vec<ControlsPatch> {
        self.state.lock().await.attempted.clone()
    }

    /// Patches in the order they were applied.
    pub async fn landed_upserts(&self) -> Vec<ControlsPatch> {
        self.state.lock().await.landed.clone()
    }

    async fn begin_read(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.reads += 1;
        if state.reads_failing {
            return Err(anyhow!("store unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn read_latest_sensor_reading(&self) -> Result<Option<SensorReading>> {
        self.begin_read().await?;
        Ok(self.state.lock().await.readings.last().cloned())
    }

    async fn read_controls(&self, controls_id: ControlsId) -> Result<Option<ControlsRecord>> {
        self.begin_read().await?;
        Ok(self.state.lock().await.controls.get(&controls_id).cloned())
    }

    async fn upsert_controls(&self, controls_id: ControlsId, patch: &ControlsPatch) -> Result<()> {
        let fields: Vec<ControlField> = patch.entries().into_iter().map(|(field, _)| field).collect();
        self.state.lock().await.attempted.push(patch.clone());

        let mut held = self.held.subscribe();
        held.wait_for(|held| !fields.iter().any(|field| held.contains(field)))
            .await
            .map_err(|_| anyhow!("memory store dropped"))?;

        let mut state = self.state.lock().await;
        if let Some(field) = fields.iter().find(|field| state.failing_fields.contains(*field)) {
            return Err(anyhow!("simulated write failure for {field}"));
        }
        let record = state
            .controls
            .entry(controls_id)
            .or_insert_with(|| ControlsRecord {
                id: controls_id,
                ..ControlsRecord::default()
            });
        record.apply(patch)?;
        state.landed.push(patch.clone());
        Ok(())
    }

    async fn append_sensor_reading(&self, reading: &NewSensorReading) -> Result<SensorReading> {
        reading.validate()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let created_at = match state.readings.last() {
            Some(last) if last.created_at >= now => last.created_at + Duration::microseconds(1),
            _ => now,
        };
        let stored = SensorReading {
            id: ReadingId(state.readings.len() as i64 + 1),
            temperature: reading.temperature,
            humidity: reading.humidity,
            light: reading.light,
            created_at,
        };
        state.readings.push(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
