use std::sync::Arc;

use serde::Serialize;
use shared::{
    domain::{Admitted, ControlField, ControlValue, ControlsPatch, CONTROLS_ID},
    error::ValidationError,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{context::SessionContext, error::WriteError, session::SessionEvent};

/// What a dispatched write asked for and what was applied locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub field: ControlField,
    pub requested: ControlValue,
    pub applied: ControlValue,
}

impl WriteReceipt {
    pub fn was_clamped(&self) -> bool {
        self.requested != self.applied
    }
}

impl From<Admitted> for WriteReceipt {
    fn from(admitted: Admitted) -> Self {
        Self {
            field: admitted.field,
            requested: admitted.requested,
            applied: admitted.applied,
        }
    }
}

/// Handle on an upsert that is already running.
///
/// Dropping the ticket does not cancel the upsert; its outcome is still
/// recorded in the cache and broadcast to session subscribers.
#[derive(Debug)]
pub struct WriteTicket {
    receipt: WriteReceipt,
    handle: JoinHandle<Result<(), WriteError>>,
}

impl WriteTicket {
    pub fn receipt(&self) -> &WriteReceipt {
        &self.receipt
    }

    pub async fn wait(self) -> Result<WriteReceipt, WriteError> {
        match self.handle.await {
            Ok(Ok(())) => Ok(self.receipt),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(WriteError::Aborted {
                field: self.receipt.field,
                reason: join_err.to_string(),
            }),
        }
    }
}

/// Applies single-field changes locally and pushes them to the store.
#[derive(Clone)]
pub struct WriteCoordinator {
    ctx: Arc<SessionContext>,
}

impl WriteCoordinator {
    pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Validates `value`, shows it immediately and starts its upsert.
    ///
    /// Must be called from within a tokio runtime. Nothing is applied or sent
    /// when validation fails.
    pub fn dispatch_field(&self, field: ControlField, value: ControlValue) -> Result<WriteTicket, ValidationError> {
        let admitted = field.admit(value, self.ctx.config.value_policy)?;
        self.ctx.cache().apply_local(field, admitted.applied)?;
        if admitted.was_clamped() {
            info!(
                session = %self.ctx.id,
                %field,
                requested = %admitted.requested,
                applied = %admitted.applied,
                "sync: clamped out-of-range value"
            );
        }
        Ok(self.spawn_upsert(admitted))
    }

    /// [`WriteCoordinator::dispatch_field`] followed by waiting for the store.
    pub async fn set_field(&self, field: ControlField, value: ControlValue) -> Result<WriteReceipt, WriteError> {
        self.dispatch_field(field, value)?.wait().await
    }

    /// Flips a flag field based on the value currently shown.
    pub async fn toggle(&self, field: ControlField) -> Result<WriteReceipt, WriteError> {
        let current = self.ctx.cache().controls().get(field);
        let flag = current.as_flag().ok_or(ValidationError::TypeMismatch {
            field,
            expected: "boolean",
        })?;
        self.set_field(field, ControlValue::Flag(!flag)).await
    }

    /// Admits and applies a group of values under one cache lock, then starts
    /// one upsert per value in the given order without waiting in between.
    pub(crate) fn dispatch_group(
        &self,
        values: &[(ControlField, ControlValue)],
    ) -> Result<Vec<WriteTicket>, ValidationError> {
        let admitted = values
            .iter()
            .map(|(field, value)| field.admit(*value, self.ctx.config.value_policy))
            .collect::<Result<Vec<_>, _>>()?;
        let applied: Vec<(ControlField, ControlValue)> =
            admitted.iter().map(|a| (a.field, a.applied)).collect();
        self.ctx.cache().apply_local_all(&applied)?;
        Ok(admitted
            .into_iter()
            .map(|admitted| self.spawn_upsert(admitted))
            .collect())
    }

    fn spawn_upsert(&self, admitted: Admitted) -> WriteTicket {
        let ctx = Arc::clone(&self.ctx);
        let field = admitted.field;
        let value = admitted.applied;
        let handle = tokio::spawn(async move {
            let result = match ControlsPatch::single(field, value) {
                Ok(patch) => ctx.store.upsert_controls(CONTROLS_ID, &patch).await,
                Err(err) => Err(err.into()),
            };
            settle_write(&ctx, field, value, result)
        });
        WriteTicket {
            receipt: admitted.into(),
            handle,
        }
    }
}

fn settle_write(
    ctx: &SessionContext,
    field: ControlField,
    value: ControlValue,
    result: anyhow::Result<()>,
) -> Result<(), WriteError> {
    let mut cache = ctx.cache();
    cache.finish_write(field);
    match result {
        Ok(()) => {
            drop(cache);
            debug!(session = %ctx.id, %field, %value, "sync: upsert confirmed");
            ctx.emit(SessionEvent::WriteConfirmed { field, value });
            Ok(())
        }
        Err(source) => {
            let error = format!("upsert of {field} failed: {source:#}");
            cache.record_write_failure(error.clone());
            drop(cache);
            warn!(session = %ctx.id, %field, %value, error = %source, "sync: upsert failed; keeping local value");
            ctx.emit(SessionEvent::WriteFailed { field, value, error });
            Err(WriteError::Store { field, source })
        }
    }
}

#[cfg(test)]
#[path = "tests/writer_tests.rs"]
mod tests;
