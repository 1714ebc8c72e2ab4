//! Error types for the document store.

use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use sheetstore_lock::{LockError, LockMode};
use sheetstore_sheet::SheetError;
use std::time::Duration;
use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by document operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed request. Nothing was locked or touched.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The lock was not granted within the wait budget. Nothing was touched.
    #[error("Timed out after {}ms waiting for {mode} lock on '{resource}'", waited.as_millis())]
    LockTimeout {
        resource: String,
        mode: LockMode,
        waited: Duration,
    },

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Sheet '{sheet}' not found in document '{document}'")]
    SheetNotFound { document: String, sheet: String },

    /// Reading or writing the backing store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The stored document could not be decoded or encoded.
    #[error("Document codec error: {0}")]
    Codec(#[from] SheetError),

    /// The lock coordinator failed.
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Coarse error category, stable across releases for wire mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    LockTimeout,
    NotFound,
    Storage,
    Lock,
}

impl StoreError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::LockTimeout { .. } => ErrorKind::LockTimeout,
            StoreError::DocumentNotFound(_) | StoreError::SheetNotFound { .. } => {
                ErrorKind::NotFound
            }
            StoreError::Storage(_) | StoreError::Codec(_) => ErrorKind::Storage,
            StoreError::Lock(_) => ErrorKind::Lock,
        }
    }

    /// Only lock timeouts are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(StoreError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            StoreError::DocumentNotFound("a.xlsx".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StoreError::Codec(SheetError::Decode("bad zip".into())).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_only_timeouts_retry() {
        let timeout = StoreError::LockTimeout {
            resource: "a.xlsx".into(),
            mode: LockMode::Exclusive,
            waited: Duration::from_millis(250),
        };
        assert!(timeout.is_retryable());
        assert_eq!(
            timeout.to_string(),
            "Timed out after 250ms waiting for exclusive lock on 'a.xlsx'"
        );
        assert!(!StoreError::validation("x").is_retryable());
        assert!(!StoreError::Lock(LockError::Coordination("down".into())).is_retryable());
    }
}
