use futures::future::join_all;
use serde::Serialize;
use shared::{
    domain::{ControlField, ControlValue, Rgb},
    error::ValidationError,
};

use crate::{
    error::WriteError,
    writer::{WriteCoordinator, WriteReceipt, WriteTicket},
};

/// Per-field results of a composite change, in dispatch order.
///
/// Composite changes are not atomic: some fields may have reached the store
/// while others did not.
#[derive(Debug)]
pub struct CompositeOutcome {
    pub results: Vec<Result<WriteReceipt, WriteError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositeSummary {
    pub confirmed: Vec<ControlField>,
    pub failed: Vec<ControlField>,
}

impl CompositeOutcome {
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }

    pub fn failed_fields(&self) -> Vec<ControlField> {
        self.results
            .iter()
            .filter_map(|result| result.as_ref().err().and_then(WriteError::field))
            .collect()
    }

    pub fn summary(&self) -> CompositeSummary {
        CompositeSummary {
            confirmed: self
                .results
                .iter()
                .filter_map(|result| result.as_ref().ok().map(|receipt| receipt.field))
                .collect(),
            failed: self.failed_fields(),
        }
    }
}

/// Splits multi-field changes into independent single-field writes.
#[derive(Clone)]
pub struct CompositeSequencer {
    writer: WriteCoordinator,
}

impl CompositeSequencer {
    pub(crate) fn new(writer: WriteCoordinator) -> Self {
        Self { writer }
    }

    /// Red, green and blue are shown together and upserted in that order.
    pub async fn set_color(&self, rgb: Rgb) -> Result<CompositeOutcome, ValidationError> {
        let tickets = self.writer.dispatch_group(&rgb.channels())?;
        Ok(collect(tickets).await)
    }

    /// Hours then minutes. Both are validated before either is applied.
    pub async fn set_timer(&self, hours: i64, minutes: i64) -> Result<CompositeOutcome, ValidationError> {
        let tickets = self.writer.dispatch_group(&[
            (ControlField::TimerHours, ControlValue::Int(hours)),
            (ControlField::TimerMinutes, ControlValue::Int(minutes)),
        ])?;
        Ok(collect(tickets).await)
    }
}

async fn collect(tickets: Vec<WriteTicket>) -> CompositeOutcome {
    CompositeOutcome {
        results: join_all(tickets.into_iter().map(WriteTicket::wait)).await,
    }
}

#[cfg(test)]
#[path = "tests/composite_tests.rs"]
mod tests;
