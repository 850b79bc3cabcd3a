//! Errors returned by key-value backends.

use thiserror::Error;

/// Errors returned by the key/value store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyValueStoreError {
    #[error("key '{key}' not found")]
    NotFound { key: String },
    #[error("operation failed: {reason}")]
    Failed { reason: String },
    #[error("key cannot be empty")]
    EmptyKey,
    #[error("key size {size} exceeds maximum of {max} bytes")]
    KeyTooLarge { size: u32, max: u32 },
    #[error("value size {size} exceeds maximum of {max} bytes")]
    ValueTooLarge { size: u32, max: u32 },
    #[error("scan limit {size} exceeds maximum of {max} keys")]
    ScanTooLarge { size: u32, max: u32 },
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("compare-and-swap failed for key '{key}': expected {expected:?}, found {actual:?}")]
    CompareAndSwapFailed {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },
}

impl KeyValueStoreError {
    /// True when the error is a lost CAS race rather than a backend failure.
    ///
    /// Callers retry CAS conflicts after re-reading; every other error is
    /// surfaced to the caller unchanged.
    pub fn is_cas_conflict(&self) -> bool {
        matches!(self, KeyValueStoreError::CompareAndSwapFailed { .. })
    }

    /// True when the request itself failed validation.
    ///
    /// The same request fails the same way on every attempt, so these are
    /// never worth retrying.
    pub fn is_request_rejected(&self) -> bool {
        matches!(
            self,
            KeyValueStoreError::EmptyKey
                | KeyValueStoreError::KeyTooLarge { .. }
                | KeyValueStoreError::ValueTooLarge { .. }
                | KeyValueStoreError::ScanTooLarge { .. }
        )
    }
}
