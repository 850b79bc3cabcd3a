//! In-memory implementation of [`KeyValueStore`] for testing.
//!
//! Mirrors the behavior a production backend must provide to the coordinator:
//! linearizable single-key operations, atomic compare-and-swap and
//! compare-and-delete, and prefix scans in ascending key order with
//! continuation tokens. No network or disk I/O.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use idemkit_kv::DEFAULT_SCAN_LIMIT;
use idemkit_kv::DeleteRequest;
use idemkit_kv::DeleteResult;
use idemkit_kv::KeyValueStore;
use idemkit_kv::KeyValueStoreError;
use idemkit_kv::KeyValueWithRevision;
use idemkit_kv::ReadRequest;
use idemkit_kv::ReadResult;
use idemkit_kv::ScanRequest;
use idemkit_kv::ScanResult;
use idemkit_kv::WriteCommand;
use idemkit_kv::WriteRequest;
use idemkit_kv::WriteResult;
use idemkit_kv::validate_scan_request;
use idemkit_kv::validate_write_command;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    version: u64,
    create_revision: u64,
    mod_revision: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    revision: u64,
}

impl State {
    fn kv(&self, key: &str) -> Option<KeyValueWithRevision> {
        self.entries.get(key).map(|entry| KeyValueWithRevision {
            key: key.to_string(),
            value: entry.value.clone(),
            version: entry.version,
            create_revision: entry.create_revision,
            mod_revision: entry.mod_revision,
        })
    }

    fn put(&mut self, key: String, value: String) -> u64 {
        self.revision = self.revision.saturating_add(1);
        let revision = self.revision;
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.value = value;
                entry.version = entry.version.saturating_add(1);
                entry.mod_revision = revision;
            }
            None => {
                self.entries.insert(key, Entry {
                    value,
                    version: 1,
                    create_revision: revision,
                    mod_revision: revision,
                });
            }
        }
        revision
    }

    fn remove(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.revision = self.revision.saturating_add(1);
        }
        removed
    }
}

/// In-memory deterministic implementation of [`KeyValueStore`] for testing.
///
/// # Fault injection
///
/// [`set_unavailable`](Self::set_unavailable) makes every operation fail with
/// [`KeyValueStoreError::Failed`] until cleared, and
/// [`fail_next_writes`](Self::fail_next_writes) fails only the next `n` writes.
/// Both simulate infrastructure outages the coordinator must surface rather
/// than retry.
///
/// # Example
///
/// ```ignore
/// let store = DeterministicKeyValueStore::new();
/// store.write(WriteRequest::compare_and_swap("k", None, "v")).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeterministicKeyValueStore {
    inner: Arc<Mutex<State>>,
    is_unavailable: Arc<AtomicBool>,
    failing_writes: Arc<AtomicU32>,
}

impl DeterministicKeyValueStore {
    /// Create a new, empty in-memory key-value store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Toggle a simulated outage affecting every operation.
    pub fn set_unavailable(&self, is_unavailable: bool) {
        self.is_unavailable.store(is_unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` write operations.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// True when no keys are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self, operation: &str) -> Result<(), KeyValueStoreError> {
        if self.is_unavailable.load(Ordering::SeqCst) {
            return Err(KeyValueStoreError::Failed {
                reason: format!("simulated outage during {operation}"),
            });
        }
        Ok(())
    }

    fn check_write_fault(&self) -> Result<(), KeyValueStoreError> {
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(KeyValueStoreError::Failed {
                reason: "simulated write failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for DeterministicKeyValueStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        self.check_available("write")?;
        self.check_write_fault()?;
        validate_write_command(&request.command)?;

        let mut inner = self.inner.lock().await;
        match request.command.clone() {
            WriteCommand::Set { key, value } => {
                let revision = inner.put(key, value);
                Ok(WriteResult {
                    command: Some(request.command),
                    header_revision: Some(revision),
                    ..Default::default()
                })
            }
            WriteCommand::Delete { key } => {
                let is_deleted = inner.remove(&key);
                Ok(WriteResult {
                    command: Some(request.command),
                    keys_deleted: Some(u32::from(is_deleted)),
                    ..Default::default()
                })
            }
            WriteCommand::CompareAndSwap {
                key,
                expected,
                new_value,
            } => {
                let current = inner.entries.get(&key).map(|entry| entry.value.clone());
                let condition_matches = match (&expected, &current) {
                    (None, None) => true,
                    (Some(exp), Some(cur)) => exp == cur,
                    _ => false,
                };
                if !condition_matches {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key,
                        expected,
                        actual: current,
                    });
                }
                let revision = inner.put(key, new_value);
                Ok(WriteResult {
                    command: Some(request.command),
                    header_revision: Some(revision),
                    ..Default::default()
                })
            }
            WriteCommand::CompareAndDelete { key, expected } => {
                let current = inner.entries.get(&key).map(|entry| entry.value.clone());
                if current.as_deref() != Some(expected.as_str()) {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key,
                        expected: Some(expected),
                        actual: current,
                    });
                }
                inner.remove(&key);
                Ok(WriteResult {
                    command: Some(request.command),
                    keys_deleted: Some(1),
                    ..Default::default()
                })
            }
        }
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        self.check_available("read")?;
        let inner = self.inner.lock().await;
        Ok(ReadResult {
            kv: inner.kv(&request.key),
        })
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        self.check_available("delete")?;
        self.check_write_fault()?;
        let mut inner = self.inner.lock().await;
        let is_deleted = inner.remove(&request.key);
        Ok(DeleteResult {
            key: request.key,
            is_deleted,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        self.check_available("scan")?;
        validate_scan_request(&request)?;

        let limit = request.limit.unwrap_or(DEFAULT_SCAN_LIMIT) as usize;
        let inner = self.inner.lock().await;

        let lower = match &request.continuation_token {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Included(request.prefix.clone()),
        };

        let mut matching = inner
            .entries
            .range((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&request.prefix));

        let mut entries = Vec::new();
        for key in matching.by_ref().take(limit) {
            if let Some(kv) = inner.kv(key) {
                entries.push(kv);
            }
        }
        let is_truncated = matching.next().is_some();
        let continuation_token = if is_truncated {
            entries.last().map(|kv| kv.key.clone())
        } else {
            None
        };

        Ok(ScanResult {
            count: entries.len() as u32,
            entries,
            is_truncated,
            continuation_token,
        })
    }
}
