use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    domain::{ControlField, ControlValue, ControlsRecord, SensorReading},
    error::ValidationError,
};

/// Local bookkeeping for one control field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FieldSync {
    /// Sequence number of the latest local write to the field, or of the
    /// latest completion of one of its upserts.
    last_local_seq: u64,
    /// Upserts dispatched for the field that have not completed yet.
    in_flight: u32,
}

/// Position in the local write history at which a fetch was issued.
///
/// A fetched value is only allowed to replace a local one if no local write
/// to that field was made or completed at or after this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchMark(u64);

/// Result of reading the controls record, tagged with when the read began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedControls {
    pub mark: FetchMark,
    pub record: ControlsRecord,
}

/// Which fields a reconciliation changed and which it left to pending writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub updated: Vec<ControlField>,
    pub kept_local: Vec<ControlField>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.updated.is_empty() && self.kept_local.is_empty()
    }
}

/// Snapshot handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayState {
    pub sensors: Option<SensorReading>,
    pub controls: ControlsRecord,
    /// Fields with a local value the store has not confirmed yet.
    pub pending: Vec<ControlField>,
    /// True until the first complete fetch and after any failed one.
    pub stale: bool,
    pub consecutive_failures: u32,
    /// Error of the last failed fetch or write since the last complete fetch.
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// The session's view of the controls record and the latest sensor reading.
///
/// Local writes land here first. Fetched records are folded in by [`merge`],
/// which never lets a fetch issued before a local write undo that write.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCache {
    controls: ControlsRecord,
    sensors: Option<SensorReading>,
    sync: BTreeMap<ControlField, FieldSync>,
    write_seq: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_synced_at: Option<DateTime<Utc>>,
}

impl Default for ControlCache {
    fn default() -> Self {
        Self::new(ControlsRecord::default())
    }
}

impl ControlCache {
    pub fn new(controls: ControlsRecord) -> Self {
        Self {
            controls,
            sensors: None,
            sync: BTreeMap::new(),
            write_seq: 0,
            consecutive_failures: 0,
            last_error: None,
            last_synced_at: None,
        }
    }

    pub fn controls(&self) -> &ControlsRecord {
        &self.controls
    }

    pub fn sensors(&self) -> Option<&SensorReading> {
        self.sensors.as_ref()
    }

    pub fn mark(&self) -> FetchMark {
        FetchMark(self.write_seq)
    }

    /// Applies an already admitted value and marks the field as awaiting its
    /// upsert. Returns the sequence number of the write.
    pub fn apply_local(&mut self, field: ControlField, value: ControlValue) -> Result<u64, ValidationError> {
        self.controls.set(field, value)?;
        self.write_seq += 1;
        let entry = self.sync.entry(field).or_default();
        entry.last_local_seq = self.write_seq;
        entry.in_flight += 1;
        Ok(self.write_seq)
    }

    /// Applies several values as one step, or none of them.
    pub fn apply_local_all(
        &mut self,
        values: &[(ControlField, ControlValue)],
    ) -> Result<Vec<u64>, ValidationError> {
        let mut scratch = self.controls.clone();
        for (field, value) in values {
            scratch.set(*field, *value)?;
        }
        values
            .iter()
            .map(|(field, value)| self.apply_local(*field, *value))
            .collect()
    }

    /// Records that one upsert for `field` finished, whatever its outcome.
    /// The local value is kept either way.
    ///
    /// Completion counts as a local event: a fetch issued while the upsert was
    /// still in flight may have read the row before it landed.
    pub fn finish_write(&mut self, field: ControlField) {
        if let Some(entry) = self.sync.get_mut(&field) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            self.write_seq += 1;
            entry.last_local_seq = self.write_seq;
        }
    }

    pub fn is_in_flight(&self, field: ControlField) -> bool {
        self.sync.get(&field).is_some_and(|entry| entry.in_flight > 0)
    }

    /// Whether a fetch issued at `mark` must leave `field` alone.
    pub fn is_pending(&self, field: ControlField, mark: FetchMark) -> bool {
        self.sync
            .get(&field)
            .is_some_and(|entry| entry.in_flight > 0 || entry.last_local_seq > mark.0)
    }

    pub fn pending_fields(&self) -> Vec<ControlField> {
        ControlField::ALL
            .into_iter()
            .filter(|field| self.is_in_flight(*field))
            .collect()
    }

    /// Folds a fetched record into the cache in place.
    pub fn reconcile(&mut self, fetched: &FetchedControls) -> ReconcileReport {
        let (next, report) = merge(self, fetched);
        *self = next;
        report
    }

    /// Replaces the sensor view unless `reading` is older than what is shown.
    pub fn replace_sensors(&mut self, reading: SensorReading) -> bool {
        if let Some(current) = &self.sensors {
            if reading.created_at < current.created_at || *current == reading {
                return false;
            }
        }
        self.sensors = Some(reading);
        true
    }

    pub fn record_sync_success(&mut self, at: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_synced_at = Some(at);
    }

    pub fn record_sync_failure(&mut self, error: String) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
        self.consecutive_failures
    }

    pub fn record_write_failure(&mut self, error: String) {
        self.last_error = Some(error);
    }

    pub fn display_state(&self) -> DisplayState {
        DisplayState {
            sensors: self.sensors.clone(),
            controls: self.controls.clone(),
            pending: self.pending_fields(),
            stale: self.last_synced_at.is_none() || self.consecutive_failures > 0,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            last_synced_at: self.last_synced_at,
        }
    }
}

/// Field-level merge of a fetched record into `cache`.
///
/// A field takes the fetched value unless it is pending: an upsert for it is
/// still in flight, or a local write to it was made or completed after the
/// fetch was issued.
/// Everything besides the controls record is carried over unchanged.
pub fn merge(cache: &ControlCache, fetched: &FetchedControls) -> (ControlCache, ReconcileReport) {
    let mut next = cache.clone();
    let mut report = ReconcileReport::default();
    for field in ControlField::ALL {
        if fetched.record.get(field) == cache.controls.get(field) {
            continue;
        }
        if cache.is_pending(field, fetched.mark) {
            report.kept_local.push(field);
        } else {
            next.controls.copy_field_from(&fetched.record, field);
            report.updated.push(field);
        }
    }
    (next, report)
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
