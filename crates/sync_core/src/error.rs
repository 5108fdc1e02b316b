use shared::{domain::ControlField, error::ValidationError};
use thiserror::Error;

/// Outcome of a single field write that did not reach the store.
///
/// The optimistic local value is never rolled back; this error only reports
/// that the store may not hold it.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("upsert of {field} failed: {source:#}")]
    Store {
        field: ControlField,
        #[source]
        source: anyhow::Error,
    },
    #[error("upsert of {field} did not complete: {reason}")]
    Aborted { field: ControlField, reason: String },
}

impl WriteError {
    pub fn field(&self) -> Option<ControlField> {
        match self {
            WriteError::Validation(_) => None,
            WriteError::Store { field, .. } | WriteError::Aborted { field, .. } => Some(*field),
        }
    }
}
