use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use shared::domain::{ControlsRecord, SensorReading, CONTROLS_ID};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    cache::{FetchMark, FetchedControls, ReconcileReport},
    context::SessionContext,
    session::SessionEvent,
};

/// What a single poll changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollOutcome {
    pub sensors_updated: bool,
    /// `None` when the controls read failed or found no record.
    pub controls: Option<ReconcileReport>,
    pub errors: Vec<String>,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Background task polling the store at the session's interval.
///
/// Dropping the handle also stops the task, without waiting for it.
pub struct SyncLoop {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncLoop {
    pub(crate) fn spawn(ctx: Arc<SessionContext>) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            // interval() panics on a zero period.
            let mut ticker = interval(ctx.config.poll_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                session = %ctx.id,
                interval_ms = ctx.config.poll_interval.as_millis() as u64,
                "sync: loop started"
            );
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    // An in-flight fetch is abandoned; its result never reaches the cache.
                    _ = shutdown_rx.changed() => break,
                    _ = poll_once(&ctx) => {}
                }
            }
            info!(session = %ctx.id, "sync: loop stopped");
        });
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stops polling and waits for the task to finish. No fetch is started
    /// after this returns.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "sync: loop task ended abnormally");
            }
        }
    }
}

/// Reads sensors and controls concurrently and folds both into the cache.
///
/// Each read is applied on its own; one failing does not discard the other.
pub(crate) async fn poll_once(ctx: &SessionContext) -> PollOutcome {
    let mark = ctx.cache().mark();
    let (sensors, controls) = tokio::join!(
        ctx.store.read_latest_sensor_reading(),
        ctx.store.read_controls(CONTROLS_ID),
    );
    apply_poll(ctx, mark, sensors, controls)
}

fn apply_poll(
    ctx: &SessionContext,
    mark: FetchMark,
    sensors: Result<Option<SensorReading>>,
    controls: Result<Option<ControlsRecord>>,
) -> PollOutcome {
    let mut outcome = PollOutcome::default();
    let mut events = Vec::new();
    let mut cache = ctx.cache();

    match sensors {
        Ok(Some(reading)) => {
            if cache.replace_sensors(reading.clone()) {
                outcome.sensors_updated = true;
                events.push(SessionEvent::SensorsUpdated(reading));
            }
        }
        Ok(None) => debug!(session = %ctx.id, "sync: no sensor readings yet"),
        Err(err) => outcome.errors.push(format!("sensor read failed: {err:#}")),
    }

    // A record outside the field domains counts as a failed read.
    let controls = controls.and_then(|record| match record {
        Some(record) => record
            .validate()
            .map(|()| Some(record))
            .context("store returned an out-of-domain controls record"),
        None => Ok(None),
    });
    match controls {
        Ok(Some(record)) => {
            let report = cache.reconcile(&FetchedControls { mark, record });
            if !report.is_noop() {
                debug!(
                    session = %ctx.id,
                    updated = ?report.updated,
                    kept_local = ?report.kept_local,
                    "sync: controls reconciled"
                );
                events.push(SessionEvent::ControlsReconciled(report.clone()));
            }
            outcome.controls = Some(report);
        }
        Ok(None) => debug!(session = %ctx.id, "sync: controls record not created yet"),
        Err(err) => outcome.errors.push(format!("controls read failed: {err:#}")),
    }

    if outcome.errors.is_empty() {
        cache.record_sync_success(Utc::now());
    } else {
        let error = outcome.errors.join("; ");
        let consecutive_failures = cache.record_sync_failure(error.clone());
        warn!(session = %ctx.id, consecutive_failures, %error, "sync: fetch failed; keeping cached state");
        events.push(SessionEvent::FetchFailed {
            consecutive_failures,
            error,
        });
    }
    drop(cache);

    for event in events {
        ctx.emit(event);
    }
    outcome
}

#[cfg(test)]
#[path = "tests/sync_loop_tests.rs"]
mod tests;
