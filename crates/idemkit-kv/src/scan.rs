//! Prefix scan types.

use serde::Deserialize;
use serde::Serialize;

use crate::read::KeyValueWithRevision;

/// Request to enumerate keys sharing a prefix, in ascending key order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRequest {
    pub prefix: String,
    /// Maximum entries to return; `DEFAULT_SCAN_LIMIT` when absent.
    pub limit: Option<u32>,
    /// Resume after this key (exclusive). Taken from a previous [`ScanResult`].
    pub continuation_token: Option<String>,
}

impl ScanRequest {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            limit: None,
            continuation_token: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, continuation_token: Option<String>) -> Self {
        self.continuation_token = continuation_token;
        self
    }
}

/// Response from a scan operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanResult {
    pub entries: Vec<KeyValueWithRevision>,
    pub count: u32,
    pub is_truncated: bool,
    pub continuation_token: Option<String>,
}
