//! Error types for the idempotency coordinator.
//!
//! Three layers:
//!
//! - [`KeyError`]: a key failed validation before any store access
//! - [`StoreError`]: the record store could not complete a transition
//! - [`CoordinatorError`]: what `execute` returns, wrapping the operation's own error type

use std::fmt;

use idemkit_kv::KeyValueStoreError;
use snafu::Snafu;

use crate::config::ConfigError;

/// Errors from key validation.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum KeyError {
    /// Scope is empty or whitespace.
    #[snafu(display("idempotency scope must not be blank"))]
    BlankScope,

    /// Token is empty or whitespace.
    #[snafu(display("idempotency token must not be blank"))]
    BlankToken,

    /// Scope contains the NUL separator.
    #[snafu(display("idempotency scope must not contain NUL"))]
    ScopeContainsSeparator,

    /// Encoded key exceeds the store's key limit.
    #[snafu(display("idempotency key is {size} bytes, max {max}"))]
    TooLarge {
        /// Encoded size in bytes.
        size: u32,
        /// Maximum allowed size.
        max: u32,
    },

    /// A storage key could not be decoded.
    #[snafu(display("malformed storage key '{key}'"))]
    MalformedStorageKey {
        /// The offending key (separator shown escaped).
        key: String,
    },
}

/// Errors from [`IdempotencyStore`](crate::IdempotencyStore) operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The caller no longer owns the claim.
    #[snafu(display("lease lost on '{key}': owner '{owner_token}' no longer holds the claim"))]
    LeaseLost {
        /// Display form of the idempotency key.
        key: String,
        /// Owner token that attempted the transition.
        owner_token: String,
    },

    /// The underlying key-value store failed.
    #[snafu(display("store unavailable: {source}"))]
    Unavailable {
        /// The underlying error.
        source: KeyValueStoreError,
    },

    /// The key-value store refused the request itself, e.g. a value over its size limit.
    #[snafu(display("store rejected request: {source}"))]
    Rejected {
        /// The underlying error.
        source: KeyValueStoreError,
    },

    /// A stored record could not be parsed or violates record invariants.
    #[snafu(display("corrupted idempotency record at '{key}': {reason}"))]
    CorruptedRecord {
        /// Storage key of the record.
        key: String,
        /// Description of what went wrong.
        reason: String,
    },

    /// CAS retries exhausted under contention.
    #[snafu(display("too much contention on '{key}': gave up after {attempts} CAS attempts"))]
    Contention {
        /// Storage key under contention.
        key: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A record could not be serialized.
    #[snafu(display("serialization error: {source}"))]
    Serialization {
        /// The underlying error.
        source: serde_json::Error,
    },
}

impl From<KeyValueStoreError> for StoreError {
    fn from(source: KeyValueStoreError) -> Self {
        if source.is_request_rejected() {
            StoreError::Rejected { source }
        } else {
            StoreError::Unavailable { source }
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(source: serde_json::Error) -> Self {
        StoreError::Serialization { source }
    }
}

/// Errors from a [`ResultCodec`](crate::ResultCodec).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// A value could not be encoded.
    #[snafu(display("{codec} encode failed: {reason}"))]
    Encode {
        /// Codec name.
        codec: &'static str,
        /// Description of what went wrong.
        reason: String,
    },

    /// An encoded payload does not fit in a record.
    #[snafu(display("{codec} payload is {size} bytes, max {max}"))]
    PayloadTooLarge {
        /// Codec name.
        codec: &'static str,
        /// Encoded size in bytes.
        size: u64,
        /// Largest payload a record can hold.
        max: u64,
    },

    /// A payload could not be decoded into the requested type.
    #[snafu(display("{codec} decode failed: {reason}"))]
    Decode {
        /// Codec name.
        codec: &'static str,
        /// Description of what went wrong.
        reason: String,
    },
}

/// Error returned by [`Coordinator::execute`](crate::Coordinator::execute).
///
/// `E` is the operation's own error type. A cached failure replays as
/// [`CoordinatorError::Operation`] carrying the decoded original error.
#[derive(Debug)]
pub enum CoordinatorError<E> {
    /// The key failed validation.
    InvalidKey(KeyError),

    /// The execute options are inconsistent, e.g. a heartbeat slower than half the lease.
    InvalidOptions(ConfigError),

    /// Another caller holds a live claim on the key.
    Conflict {
        /// Display form of the idempotency key.
        key: String,
        /// Why the caller gave up.
        reason: &'static str,
    },

    /// Waiting for another caller's claim to resolve ran out of time.
    Timeout {
        /// Display form of the idempotency key.
        key: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The operation failed, or a cached failure was replayed.
    Operation(E),

    /// The operation finished after its claim was lost; the result was not cached.
    LeaseLost {
        /// Display form of the idempotency key.
        key: String,
        /// Owner token of the caller that lost the claim.
        owner_token: String,
    },

    /// The record store is unreachable.
    StoreUnavailable {
        /// The underlying store failure.
        source: StoreError,
    },

    /// The record store refused a request that will fail the same way on retry.
    StoreRejected {
        /// The underlying store failure.
        source: StoreError,
    },

    /// A stored record could not be interpreted.
    CorruptedRecord {
        /// Key of the record.
        key: String,
        /// Description of what went wrong.
        reason: String,
    },

    /// A result or error could not be encoded or decoded.
    Codec {
        /// Display form of the idempotency key.
        key: String,
        /// The underlying codec error.
        source: CodecError,
    },
}

impl<E> CoordinatorError<E> {
    /// Whether the same request may succeed if retried later with the same key.
    ///
    /// `LeaseLost` is not: the operation already ran and a retry replays
    /// whatever the reclaiming caller recorded. Neither is `StoreRejected`,
    /// which fails identically every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Conflict { .. } | CoordinatorError::Timeout { .. } | CoordinatorError::StoreUnavailable { .. }
        )
    }

    /// HTTP status code a server would usually answer with.
    ///
    /// `None` for operation errors, whose mapping belongs to the caller.
    pub fn status_hint(&self) -> Option<u16> {
        match self {
            CoordinatorError::InvalidKey(_) => Some(400),
            CoordinatorError::InvalidOptions(_) => Some(400),
            CoordinatorError::Conflict { .. } => Some(409),
            CoordinatorError::LeaseLost { .. } => Some(500),
            CoordinatorError::Timeout { .. } => Some(504),
            CoordinatorError::StoreUnavailable { .. } => Some(503),
            CoordinatorError::StoreRejected { .. } => Some(500),
            CoordinatorError::CorruptedRecord { .. } => Some(500),
            CoordinatorError::Codec { .. } => Some(500),
            CoordinatorError::Operation(_) => None,
        }
    }

    /// The operation's error, if this is one.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CoordinatorError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Map the operation error type.
    pub fn map_operation<F>(self, f: impl FnOnce(E) -> F) -> CoordinatorError<F> {
        match self {
            CoordinatorError::InvalidKey(e) => CoordinatorError::InvalidKey(e),
            CoordinatorError::InvalidOptions(e) => CoordinatorError::InvalidOptions(e),
            CoordinatorError::Conflict { key, reason } => CoordinatorError::Conflict { key, reason },
            CoordinatorError::Timeout { key, waited_ms } => CoordinatorError::Timeout { key, waited_ms },
            CoordinatorError::Operation(e) => CoordinatorError::Operation(f(e)),
            CoordinatorError::LeaseLost { key, owner_token } => CoordinatorError::LeaseLost { key, owner_token },
            CoordinatorError::StoreUnavailable { source } => CoordinatorError::StoreUnavailable { source },
            CoordinatorError::StoreRejected { source } => CoordinatorError::StoreRejected { source },
            CoordinatorError::CorruptedRecord { key, reason } => CoordinatorError::CorruptedRecord { key, reason },
            CoordinatorError::Codec { key, source } => CoordinatorError::Codec { key, source },
        }
    }
}

impl<E> From<KeyError> for CoordinatorError<E> {
    fn from(err: KeyError) -> Self {
        CoordinatorError::InvalidKey(err)
    }
}

impl<E> From<StoreError> for CoordinatorError<E> {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LeaseLost { key, owner_token } => CoordinatorError::LeaseLost { key, owner_token },
            err @ StoreError::Unavailable { .. } => CoordinatorError::StoreUnavailable { source: err },
            err @ StoreError::Rejected { .. } => CoordinatorError::StoreRejected { source: err },
            StoreError::CorruptedRecord { key, reason } => CoordinatorError::CorruptedRecord { key, reason },
            StoreError::Contention { key, .. } => CoordinatorError::Conflict {
                key,
                reason: "record under contention",
            },
            StoreError::Serialization { source } => CoordinatorError::CorruptedRecord {
                key: String::new(),
                reason: source.to_string(),
            },
        }
    }
}

impl<E: fmt::Display> fmt::Display for CoordinatorError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::InvalidKey(e) => write!(f, "invalid idempotency key: {e}"),
            CoordinatorError::InvalidOptions(e) => write!(f, "invalid execute options: {e}"),
            CoordinatorError::Conflict { key, reason } => write!(f, "conflict on '{key}': {reason}"),
            CoordinatorError::Timeout { key, waited_ms } => {
                write!(f, "timed out after {waited_ms}ms waiting for '{key}'")
            }
            CoordinatorError::Operation(e) => write!(f, "{e}"),
            CoordinatorError::LeaseLost { key, owner_token } => {
                write!(f, "lease on '{key}' lost by '{owner_token}' before the result was recorded")
            }
            CoordinatorError::StoreUnavailable { source } => write!(f, "idempotency {source}"),
            CoordinatorError::StoreRejected { source } => write!(f, "idempotency {source}"),
            CoordinatorError::CorruptedRecord { key, reason } => {
                write!(f, "corrupted idempotency record '{key}': {reason}")
            }
            CoordinatorError::Codec { key, source } => write!(f, "codec error on '{key}': {source}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CoordinatorError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoordinatorError::InvalidKey(e) => Some(e),
            CoordinatorError::InvalidOptions(e) => Some(e),
            CoordinatorError::StoreUnavailable { source } => Some(source),
            CoordinatorError::StoreRejected { source } => Some(source),
            CoordinatorError::Codec { source, .. } => Some(source),
            _ => None,
        }
    }
}
