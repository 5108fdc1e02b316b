use std::{sync::Arc, time::Duration};

use shared::{
    domain::{ControlField, ControlValue, ControlsRecord, Rgb, SensorReading, ValuePolicy},
    error::ValidationError,
};
use tokio::sync::{broadcast, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::{
    cache::{DisplayState, ReconcileReport},
    composite::{CompositeOutcome, CompositeSequencer},
    context::SessionContext,
    error::WriteError,
    store::SharedStore,
    sync_loop::{self, PollOutcome, SyncLoop},
    writer::{WriteCoordinator, WriteReceipt, WriteTicket},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub value_policy: ValuePolicy,
    /// Shown until the first successful controls fetch.
    pub initial_controls: ControlsRecord,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            value_policy: ValuePolicy::default(),
            initial_controls: ControlsRecord::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    SensorsUpdated(SensorReading),
    ControlsReconciled(ReconcileReport),
    FetchFailed {
        consecutive_failures: u32,
        error: String,
    },
    WriteConfirmed {
        field: ControlField,
        value: ControlValue,
    },
    WriteFailed {
        field: ControlField,
        value: ControlValue,
        error: String,
    },
    Stopped,
}

/// One open dashboard: a control cache kept in sync with the shared store.
///
/// Several sessions (other browsers, other processes) may share a store; they
/// only ever see each other's writes through it.
pub struct DashboardSession {
    ctx: Arc<SessionContext>,
    writer: WriteCoordinator,
    composite: CompositeSequencer,
    sync_loop: Mutex<Option<SyncLoop>>,
}

impl DashboardSession {
    pub fn new(store: Arc<dyn SharedStore>, config: SessionConfig) -> Arc<Self> {
        let ctx = Arc::new(SessionContext::new(store, config));
        let writer = WriteCoordinator::new(Arc::clone(&ctx));
        let composite = CompositeSequencer::new(writer.clone());
        Arc::new(Self {
            ctx,
            writer,
            composite,
            sync_loop: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.ctx.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.ctx.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.ctx.events.subscribe()
    }

    pub fn writer(&self) -> &WriteCoordinator {
        &self.writer
    }

    pub fn composite(&self) -> &CompositeSequencer {
        &self.composite
    }

    /// Starts periodic polling. The first fetch happens immediately.
    /// Calling it on a running session does nothing.
    pub async fn start(&self) {
        let mut guard = self.sync_loop.lock().await;
        if guard.is_some() {
            return;
        }
        info!(session = %self.ctx.id, "sync: session started");
        *guard = Some(SyncLoop::spawn(Arc::clone(&self.ctx)));
    }

    /// Stops polling. Writes already dispatched still run to completion.
    pub async fn stop(&self) {
        let running = self.sync_loop.lock().await.take();
        if let Some(sync_loop) = running {
            sync_loop.stop().await;
            self.ctx.emit(SessionEvent::Stopped);
        }
    }

    pub async fn is_running(&self) -> bool {
        self.sync_loop.lock().await.is_some()
    }

    /// One fetch outside the periodic schedule.
    pub async fn poll_once(&self) -> PollOutcome {
        sync_loop::poll_once(&self.ctx).await
    }

    pub fn display_state(&self) -> DisplayState {
        self.ctx.cache().display_state()
    }

    pub fn dispatch_field(&self, field: ControlField, value: ControlValue) -> Result<WriteTicket, ValidationError> {
        self.writer.dispatch_field(field, value)
    }

    pub async fn set_field(&self, field: ControlField, value: ControlValue) -> Result<WriteReceipt, WriteError> {
        self.writer.set_field(field, value).await
    }

    pub async fn toggle(&self, field: ControlField) -> Result<WriteReceipt, WriteError> {
        self.writer.toggle(field).await
    }

    pub async fn set_color(&self, rgb: Rgb) -> Result<CompositeOutcome, ValidationError> {
        self.composite.set_color(rgb).await
    }

    pub async fn set_timer(&self, hours: i64, minutes: i64) -> Result<CompositeOutcome, ValidationError> {
        self.composite.set_timer(hours, minutes).await
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
