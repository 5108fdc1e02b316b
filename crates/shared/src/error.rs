use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ControlField;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Validation,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct ApiException {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ApiException> for ApiError {
    fn from(value: ApiException) -> Self {
        Self {
            code: value.code,
            message: value.message,
        }
    }
}

impl From<ApiError> for ApiException {
    fn from(value: ApiError) -> Self {
        Self {
            code: value.code,
            message: value.message,
        }
    }
}

/// Input rejected before any store interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown control field '{0}'")]
    UnknownField(String),
    #[error("cannot parse '{0}' as a control value")]
    UnparsableValue(String),
    #[error("unknown value policy '{0}', expected 'reject' or 'clamp'")]
    UnknownPolicy(String),
    #[error("{field} expects a {expected} value")]
    TypeMismatch {
        field: ControlField,
        expected: &'static str,
    },
    #[error("{field} value {value} is outside {min}..={max}")]
    OutOfRange {
        field: ControlField,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("invalid color '{0}', expected #rrggbb")]
    InvalidColor(String),
    #[error("invalid sensor reading: {0}")]
    InvalidReading(String),
    #[error("controls identity {0} is not the singleton record")]
    UnknownIdentity(i64),
}

impl From<ValidationError> for ApiError {
    fn from(value: ValidationError) -> Self {
        ApiError::new(ErrorCode::Validation, value.to_string())
    }
}
