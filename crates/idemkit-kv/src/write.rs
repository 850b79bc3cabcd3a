//! Write operation types for modifying key-value state.

use serde::Deserialize;
use serde::Serialize;

/// Commands for modifying key-value state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteCommand {
    /// Set a single key-value pair.
    Set { key: String, value: String },
    /// Delete a single key.
    Delete { key: String },
    /// Compare-and-swap: atomically update value if current value matches expected.
    ///
    /// `expected: None` means "only if the key is absent", which is the
    /// insert-if-absent primitive idempotency claims are built on.
    CompareAndSwap {
        key: String,
        expected: Option<String>,
        new_value: String,
    },
    /// Compare-and-delete: atomically delete key if current value matches expected.
    CompareAndDelete { key: String, expected: String },
}

impl WriteCommand {
    /// The key this command touches.
    pub fn key(&self) -> &str {
        match self {
            WriteCommand::Set { key, .. }
            | WriteCommand::Delete { key }
            | WriteCommand::CompareAndSwap { key, .. }
            | WriteCommand::CompareAndDelete { key, .. } => key,
        }
    }
}

/// Request to perform a write operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteRequest {
    pub command: WriteCommand,
}

impl WriteRequest {
    /// Create a Set command to store a key-value pair.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Set {
                key: key.into(),
                value: value.into(),
            },
        }
    }

    /// Create a Delete command.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Delete { key: key.into() },
        }
    }

    /// Create a CompareAndSwap command.
    pub fn compare_and_swap(key: impl Into<String>, expected: Option<String>, new_value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::CompareAndSwap {
                key: key.into(),
                expected,
                new_value: new_value.into(),
            },
        }
    }

    /// Create a CompareAndDelete command.
    pub fn compare_and_delete(key: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::CompareAndDelete {
                key: key.into(),
                expected: expected.into(),
            },
        }
    }
}

/// Result of a write operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WriteResult {
    pub command: Option<WriteCommand>,
    /// Store revision assigned to this write.
    pub header_revision: Option<u64>,
    pub keys_deleted: Option<u32>,
}
