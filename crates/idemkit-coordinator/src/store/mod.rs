//! Record store abstraction.
//!
//! Every state transition is a single atomic step in the backing store.
//! [`IdempotencyStore::try_claim`] is the linearization point: for a key with
//! no record, exactly one concurrent caller observes [`ClaimOutcome::Claimed`].

mod kv;

use async_trait::async_trait;
pub use kv::KvIdempotencyStore;

use crate::error::StoreError;
use crate::key::IdempotencyKey;
use crate::record::IdempotencyRecord;
use crate::verified::RecordDisposition;

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now owns the key.
    Claimed(IdempotencyRecord),
    /// The key already has a cached result.
    AlreadyCompleted(IdempotencyRecord),
    /// The key already has a cached failure.
    AlreadyFailed(IdempotencyRecord),
    /// Another owner claimed the key.
    AlreadyInProgress {
        /// The current record.
        record: IdempotencyRecord,
        /// False once the owner's lease lapsed.
        is_still_leased: bool,
    },
}

impl ClaimOutcome {
    /// Classify a record someone else wrote.
    pub fn existing(record: IdempotencyRecord, now_ms: u64) -> Self {
        match record.disposition(now_ms) {
            RecordDisposition::Completed => ClaimOutcome::AlreadyCompleted(record),
            RecordDisposition::Failed => ClaimOutcome::AlreadyFailed(record),
            RecordDisposition::InProgress { is_still_leased } => ClaimOutcome::AlreadyInProgress {
                record,
                is_still_leased,
            },
        }
    }

    /// The record the outcome refers to.
    pub fn record(&self) -> &IdempotencyRecord {
        match self {
            ClaimOutcome::Claimed(record)
            | ClaimOutcome::AlreadyCompleted(record)
            | ClaimOutcome::AlreadyFailed(record)
            | ClaimOutcome::AlreadyInProgress { record, .. } => record,
        }
    }
}

/// Durable, linearizable storage of idempotency records.
///
/// Owner-checked transitions (`complete`, `fail`, `release`, `renew_lease`)
/// return [`StoreError::LeaseLost`] if the record is missing, not `Claimed`,
/// or owned by someone else. Backend failures surface as
/// [`StoreError::Unavailable`] and are never retried here.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically create a `Claimed` record if none exists.
    async fn try_claim(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        lease_ms: u64,
        now_ms: u64,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Take over an expired claim, but only if the stored record still equals `stale`.
    ///
    /// Losing the race returns the winner's record classified at `now_ms`.
    /// If the record vanished in the meantime this falls back to a fresh claim.
    async fn try_reclaim(
        &self,
        key: &IdempotencyKey,
        stale: &IdempotencyRecord,
        owner_token: &str,
        lease_ms: u64,
        now_ms: u64,
    ) -> Result<ClaimOutcome, StoreError>;

    /// `Claimed` → `Completed`, caching the result.
    async fn complete(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        result_payload: String,
        retention_ms: u64,
        now_ms: u64,
    ) -> Result<IdempotencyRecord, StoreError>;

    /// `Claimed` → `Failed`, caching the error.
    async fn fail(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        error_payload: String,
        retention_ms: u64,
        now_ms: u64,
    ) -> Result<IdempotencyRecord, StoreError>;

    /// Delete an owned claim so the key can be claimed again.
    async fn release(&self, key: &IdempotencyKey, owner_token: &str) -> Result<(), StoreError>;

    /// Extend an owned claim's lease. The deadline never moves backwards.
    async fn renew_lease(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        new_expires_at_ms: u64,
        now_ms: u64,
    ) -> Result<IdempotencyRecord, StoreError>;

    /// Read the current record.
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Delete the record only if it still equals `expected`.
    ///
    /// Returns whether the record was deleted.
    async fn delete_record(&self, key: &IdempotencyKey, expected: &IdempotencyRecord) -> Result<bool, StoreError>;

    /// Unconditionally delete a record. Returns whether one existed.
    async fn remove(&self, key: &IdempotencyKey) -> Result<bool, StoreError>;

    /// Delete up to `limit` `Claimed` records whose lease lapsed before `now_ms`.
    async fn delete_expired_leases(&self, now_ms: u64, limit: u32) -> Result<u32, StoreError>;

    /// Delete up to `limit` terminal records whose retention lapsed before `now_ms`.
    async fn delete_expired_completed(&self, now_ms: u64, limit: u32) -> Result<u32, StoreError>;
}

#[async_trait]
impl<T: IdempotencyStore + ?Sized> IdempotencyStore for std::sync::Arc<T> {
    async fn try_claim(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        lease_ms: u64,
        now_ms: u64,
    ) -> Result<ClaimOutcome, StoreError> {
        (**self).try_claim(key, owner_token, lease_ms, now_ms).await
    }

    async fn try_reclaim(
        &self,
        key: &IdempotencyKey,
        stale: &IdempotencyRecord,
        owner_token: &str,
        lease_ms: u64,
        now_ms: u64,
    ) -> Result<ClaimOutcome, StoreError> {
        (**self).try_reclaim(key, stale, owner_token, lease_ms, now_ms).await
    }

    async fn complete(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        result_payload: String,
        retention_ms: u64,
        now_ms: u64,
    ) -> Result<IdempotencyRecord, StoreError> {
        (**self).complete(key, owner_token, result_payload, retention_ms, now_ms).await
    }

    async fn fail(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        error_payload: String,
        retention_ms: u64,
        now_ms: u64,
    ) -> Result<IdempotencyRecord, StoreError> {
        (**self).fail(key, owner_token, error_payload, retention_ms, now_ms).await
    }

    async fn release(&self, key: &IdempotencyKey, owner_token: &str) -> Result<(), StoreError> {
        (**self).release(key, owner_token).await
    }

    async fn renew_lease(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        new_expires_at_ms: u64,
        now_ms: u64,
    ) -> Result<IdempotencyRecord, StoreError> {
        (**self).renew_lease(key, owner_token, new_expires_at_ms, now_ms).await
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        (**self).get(key).await
    }

    async fn delete_record(&self, key: &IdempotencyKey, expected: &IdempotencyRecord) -> Result<bool, StoreError> {
        (**self).delete_record(key, expected).await
    }

    async fn remove(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        (**self).remove(key).await
    }

    async fn delete_expired_leases(&self, now_ms: u64, limit: u32) -> Result<u32, StoreError> {
        (**self).delete_expired_leases(now_ms, limit).await
    }

    async fn delete_expired_completed(&self, now_ms: u64, limit: u32) -> Result<u32, StoreError> {
        (**self).delete_expired_completed(now_ms, limit).await
    }
}
