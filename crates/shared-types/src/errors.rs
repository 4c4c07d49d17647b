//! Common error types used across all grid runtime crates
//! Provides one error taxonomy that every fault is normalised into

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Kind tag of the error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NetworkUnavailable,
    Timeout,
    Unauthorized,
    NotFound,
    Validation,
    Conflict,
    Cancelled,
    StorageUnavailable,
    StorageQuotaExceeded,
    BadRow,
    Internal,
}

impl ErrorKind {
    /// Only transport-level failures are retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::NetworkUnavailable | ErrorKind::Timeout)
    }

    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            ErrorKind::StorageUnavailable | ErrorKind::StorageQuotaExceeded
        )
    }

    /// Stable, user-presentable message for each kind
    pub fn stable_message(&self) -> &'static str {
        match self {
            ErrorKind::NetworkUnavailable => "The server could not be reached",
            ErrorKind::Timeout => "The server took too long to respond",
            ErrorKind::Unauthorized => "Your session is not authorised for this view",
            ErrorKind::NotFound => "The requested resource was not found",
            ErrorKind::Validation => "The server rejected the submitted data",
            ErrorKind::Conflict => "The record was modified by someone else",
            ErrorKind::Cancelled => "The request was cancelled",
            ErrorKind::StorageUnavailable => "Saved view preferences are unavailable",
            ErrorKind::StorageQuotaExceeded => "Not enough space to save view preferences",
            ErrorKind::BadRow => "Some rows have missing or duplicate identifiers",
            ErrorKind::Internal => "An internal error occurred",
        }
    }
}

/// Field-level validation messages keyed by field name
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Base error type for all grid runtime operations
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum GridError {
    #[error("Network unavailable: {message}")]
    NetworkUnavailable { message: String },

    #[error("Request timeout after {duration_ms}ms: {message}")]
    Timeout { message: String, duration_ms: u64 },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field_errors: FieldErrors,
    },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Preference storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Preference storage quota exceeded: {message}")]
    StorageQuotaExceeded { message: String },

    #[error("Bad row identity at positions {positions:?}")]
    BadRow { positions: Vec<usize> },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GridError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GridError::NetworkUnavailable { .. } => ErrorKind::NetworkUnavailable,
            GridError::Timeout { .. } => ErrorKind::Timeout,
            GridError::Unauthorized { .. } => ErrorKind::Unauthorized,
            GridError::NotFound { .. } => ErrorKind::NotFound,
            GridError::Validation { .. } => ErrorKind::Validation,
            GridError::Conflict { .. } => ErrorKind::Conflict,
            GridError::Cancelled => ErrorKind::Cancelled,
            GridError::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            GridError::StorageQuotaExceeded { .. } => ErrorKind::StorageQuotaExceeded,
            GridError::BadRow { .. } => ErrorKind::BadRow,
            GridError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GridError::Internal {
            message: message.into(),
        }
    }

    /// Build the report published through `errorChanged`
    pub fn report(&self) -> ErrorReport {
        let detail = match self {
            GridError::Validation { field_errors, .. } if !field_errors.is_empty() => {
                serde_json::to_value(field_errors).ok()
            }
            GridError::BadRow { positions } => Some(serde_json::json!({ "positions": positions })),
            _ => None,
        };

        ErrorReport {
            kind: self.kind(),
            message: self.kind().stable_message().to_string(),
            detail,
        }
    }
}

/// Result type alias for grid runtime operations
pub type GridResult<T> = Result<T, GridError>;

/// Error raised by a host data source
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct DataSourceError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_errors: FieldErrors,
}

impl DataSourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            field_errors: FieldErrors::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_field_error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }
}

impl From<DataSourceError> for GridError {
    fn from(err: DataSourceError) -> Self {
        let message = match err.cause {
            Some(cause) => format!("{} ({cause})", err.message),
            None => err.message,
        };

        match err.kind {
            ErrorKind::NetworkUnavailable => GridError::NetworkUnavailable { message },
            ErrorKind::Timeout => GridError::Timeout {
                message,
                duration_ms: 0,
            },
            ErrorKind::Unauthorized => GridError::Unauthorized { message },
            ErrorKind::NotFound => GridError::NotFound { message },
            ErrorKind::Validation => GridError::Validation {
                message,
                field_errors: err.field_errors,
            },
            ErrorKind::Conflict => GridError::Conflict { message },
            ErrorKind::Cancelled => GridError::Cancelled,
            ErrorKind::StorageUnavailable => GridError::StorageUnavailable { message },
            ErrorKind::StorageQuotaExceeded => GridError::StorageQuotaExceeded { message },
            // A data source cannot know row positions; treat as an invariant breach.
            ErrorKind::BadRow | ErrorKind::Internal => GridError::Internal { message },
        }
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Internal {
            message: format!("serialization failed: {err}"),
        }
    }
}

/// Payload of the `errorChanged` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::NetworkUnavailable.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Unauthorized.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
    }

    #[test]
    fn test_data_source_error_conversion_keeps_field_errors() {
        let err = DataSourceError::new(ErrorKind::Validation, "bad payload")
            .with_field_error("sku", "already exists");
        let grid: GridError = err.into();

        assert_eq!(grid.kind(), ErrorKind::Validation);
        let report = grid.report();
        assert_eq!(report.message, ErrorKind::Validation.stable_message());
        assert_eq!(
            report.detail,
            Some(serde_json::json!({"sku": ["already exists"]}))
        );
    }

    #[test]
    fn test_error_serialization() {
        let error = GridError::BadRow {
            positions: vec![1, 4],
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("BadRow"));
        assert!(json.contains("positions"));

        let back: GridError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, error);
    }

    #[test]
    fn test_cause_is_appended_to_message() {
        let err = DataSourceError::new(ErrorKind::NetworkUnavailable, "fetch failed")
            .with_cause("connection reset");
        match GridError::from(err) {
            GridError::NetworkUnavailable { message } => {
                assert_eq!(message, "fetch failed (connection reset)");
            }
            other => panic!("Wrong error variant: {other:?}"),
        }
    }
}
