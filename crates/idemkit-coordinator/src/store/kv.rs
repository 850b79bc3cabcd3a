//! [`IdempotencyStore`] on top of any [`KeyValueStore`] with compare-and-swap.
//!
//! Each record is a JSON document at `idem/<scope>\0<token>`. Transitions read
//! the raw document, check it, then CAS against the exact bytes read. A lost
//! CAS re-reads and re-checks, up to [`MAX_CAS_RETRIES`] times.

use std::sync::Arc;

use async_trait::async_trait;
use idemkit_kv::DEFAULT_SCAN_LIMIT;
use idemkit_kv::DeleteRequest;
use idemkit_kv::KeyValueStore;
use idemkit_kv::ReadRequest;
use idemkit_kv::ScanRequest;
use idemkit_kv::WriteRequest;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::constants::MAX_CAS_RETRIES;
use crate::constants::RECORD_KEY_PREFIX;
use crate::error::StoreError;
use crate::key::IdempotencyKey;
use crate::record::IdempotencyRecord;
use crate::store::ClaimOutcome;
use crate::store::IdempotencyStore;

/// A record together with the exact JSON it was parsed from.
struct StoredRecord {
    record: IdempotencyRecord,
    raw: String,
}

/// Which terminal or lapsed records a sweep deletes.
#[derive(Debug, Clone, Copy)]
enum Sweep {
    ExpiredLeases,
    ExpiredRetention,
}

impl Sweep {
    fn matches(self, record: &IdempotencyRecord, now_ms: u64) -> bool {
        match self {
            Sweep::ExpiredLeases => record.is_lease_expired(now_ms),
            Sweep::ExpiredRetention => record.is_retention_expired(now_ms),
        }
    }
}

/// Idempotency records stored in a [`KeyValueStore`].
pub struct KvIdempotencyStore<K: KeyValueStore + ?Sized> {
    kv: Arc<K>,
    prefix: String,
}

impl<K: KeyValueStore + ?Sized> Clone for KvIdempotencyStore<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            prefix: self.prefix.clone(),
        }
    }
}

impl<K: KeyValueStore + ?Sized + 'static> KvIdempotencyStore<K> {
    /// Store records under the default `idem/` prefix.
    pub fn new(kv: Arc<K>) -> Self {
        Self::with_prefix(kv, RECORD_KEY_PREFIX)
    }

    /// Store records under a custom prefix, e.g. to share a key space.
    pub fn with_prefix(kv: Arc<K>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    /// The key prefix records are stored under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn storage_key(&self, key: &IdempotencyKey) -> String {
        key.storage_key(&self.prefix)
    }

    fn parse(storage_key: &str, raw: &str) -> Result<IdempotencyRecord, StoreError> {
        let record: IdempotencyRecord = serde_json::from_str(raw).map_err(|e| StoreError::CorruptedRecord {
            key: storage_key.escape_default().to_string(),
            reason: e.to_string(),
        })?;
        record.validate().map_err(|reason| StoreError::CorruptedRecord {
            key: storage_key.escape_default().to_string(),
            reason,
        })?;
        Ok(record)
    }

    async fn read_record(&self, storage_key: &str) -> Result<Option<StoredRecord>, StoreError> {
        let result = self.kv.read(ReadRequest::new(storage_key)).await?;
        match result.kv {
            None => Ok(None),
            Some(kv) => {
                let record = Self::parse(storage_key, &kv.value)?;
                Ok(Some(StoredRecord { record, raw: kv.value }))
            }
        }
    }

    /// `Ok(false)` when the comparison failed.
    async fn compare_and_swap(
        &self,
        storage_key: &str,
        expected: Option<String>,
        new_value: String,
    ) -> Result<bool, StoreError> {
        match self.kv.write(WriteRequest::compare_and_swap(storage_key, expected, new_value)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_cas_conflict() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// `Ok(false)` when the comparison failed.
    async fn compare_and_delete(&self, storage_key: &str, expected: String) -> Result<bool, StoreError> {
        match self.kv.write(WriteRequest::compare_and_delete(storage_key, expected)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_cas_conflict() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply an owner-checked transition. `None` from `transition` deletes the record.
    async fn update_owned<F>(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        transition: F,
    ) -> Result<Option<IdempotencyRecord>, StoreError>
    where
        F: Fn(&IdempotencyRecord) -> Option<IdempotencyRecord> + Send + Sync,
    {
        let storage_key = self.storage_key(key);
        let lease_lost = || StoreError::LeaseLost {
            key: key.to_string(),
            owner_token: owner_token.to_string(),
        };

        for _ in 0..MAX_CAS_RETRIES {
            let Some(current) = self.read_record(&storage_key).await? else {
                return Err(lease_lost());
            };
            if !current.record.is_owned_by(owner_token) {
                return Err(lease_lost());
            }

            match transition(&current.record) {
                Some(next) => {
                    let new_json = serde_json::to_string(&next)?;
                    if self.compare_and_swap(&storage_key, Some(current.raw), new_json).await? {
                        return Ok(Some(next));
                    }
                }
                None => {
                    if self.compare_and_delete(&storage_key, current.raw).await? {
                        return Ok(None);
                    }
                }
            }
            trace!(key = %key, owner_token, "owned transition lost CAS, retrying");
        }

        Err(StoreError::Contention {
            key: key.to_string(),
            attempts: MAX_CAS_RETRIES,
        })
    }

    async fn sweep(&self, sweep: Sweep, now_ms: u64, limit: u32) -> Result<u32, StoreError> {
        let mut deleted: u32 = 0;
        let mut continuation_token: Option<String> = None;

        while deleted < limit {
            let request = ScanRequest::prefix(self.prefix.clone())
                .with_limit(DEFAULT_SCAN_LIMIT)
                .after(continuation_token.take());
            let page = self.kv.scan(request).await?;

            for entry in page.entries {
                if deleted >= limit {
                    break;
                }
                let key = match IdempotencyKey::from_storage_key(&self.prefix, &entry.key) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(error = %e, "skipping foreign key under idempotency prefix");
                        continue;
                    }
                };
                let record = match Self::parse(&entry.key, &entry.value) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(key = %key, error = %e, "skipping unreadable idempotency record");
                        continue;
                    }
                };
                if !sweep.matches(&record, now_ms) {
                    continue;
                }
                // a record rewritten since the scan is left for the next sweep
                if self.compare_and_delete(&entry.key, entry.value).await? {
                    deleted = deleted.saturating_add(1);
                    debug!(
                        key = %key,
                        status = ?record.status,
                        sweep = ?sweep,
                        "deleted idempotency record"
                    );
                }
            }

            if !page.is_truncated {
                break;
            }
            continuation_token = page.continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(deleted)
    }
}

#[async_trait]
impl<K: KeyValueStore + ?Sized + 'static> IdempotencyStore for KvIdempotencyStore<K> {
    async fn try_claim(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        lease_ms: u64,
        now_ms: u64,
    ) -> Result<ClaimOutcome, StoreError> {
        let storage_key = self.storage_key(key);
        let record = IdempotencyRecord::claimed(key, owner_token, lease_ms, now_ms);
        let new_json = serde_json::to_string(&record)?;

        for _ in 0..MAX_CAS_RETRIES {
            if self.compare_and_swap(&storage_key, None, new_json.clone()).await? {
                debug!(key = %key, owner_token, lease_expires_at_ms = record.lease_expires_at_ms, "claimed idempotency key");
                return Ok(ClaimOutcome::Claimed(record));
            }

            // deleted between the failed CAS and this read: try again
            if let Some(existing) = self.read_record(&storage_key).await? {
                return Ok(ClaimOutcome::existing(existing.record, now_ms));
            }
        }

        Err(StoreError::Contention {
            key: key.to_string(),
            attempts: MAX_CAS_RETRIES,
        })
    }

    async fn try_reclaim(
        &self,
        key: &IdempotencyKey,
        stale: &IdempotencyRecord,
        owner_token: &str,
        lease_ms: u64,
        now_ms: u64,
    ) -> Result<ClaimOutcome, StoreError> {
        let storage_key = self.storage_key(key);

        let Some(current) = self.read_record(&storage_key).await? else {
            return self.try_claim(key, owner_token, lease_ms, now_ms).await;
        };
        if current.record != *stale || !current.record.is_lease_expired(now_ms) {
            return Ok(ClaimOutcome::existing(current.record, now_ms));
        }

        let next = current.record.reclaimed(owner_token, lease_ms, now_ms);
        let new_json = serde_json::to_string(&next)?;
        if self.compare_and_swap(&storage_key, Some(current.raw), new_json).await? {
            info!(
                key = %key,
                owner_token,
                previous_owner = %stale.owner_token,
                fencing_token = next.fencing_token,
                "reclaimed expired idempotency lease"
            );
            return Ok(ClaimOutcome::Claimed(next));
        }

        match self.read_record(&storage_key).await? {
            Some(winner) => Ok(ClaimOutcome::existing(winner.record, now_ms)),
            None => self.try_claim(key, owner_token, lease_ms, now_ms).await,
        }
    }

    async fn complete(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        result_payload: String,
        retention_ms: u64,
        now_ms: u64,
    ) -> Result<IdempotencyRecord, StoreError> {
        let updated = self
            .update_owned(key, owner_token, |record| {
                Some(record.completed(result_payload.clone(), retention_ms, now_ms))
            })
            .await?;
        updated.ok_or_else(|| StoreError::LeaseLost {
            key: key.to_string(),
            owner_token: owner_token.to_string(),
        })
    }

    async fn fail(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        error_payload: String,
        retention_ms: u64,
        now_ms: u64,
    ) -> Result<IdempotencyRecord, StoreError> {
        let updated = self
            .update_owned(key, owner_token, |record| Some(record.failed(error_payload.clone(), retention_ms, now_ms)))
            .await?;
        updated.ok_or_else(|| StoreError::LeaseLost {
            key: key.to_string(),
            owner_token: owner_token.to_string(),
        })
    }

    async fn release(&self, key: &IdempotencyKey, owner_token: &str) -> Result<(), StoreError> {
        self.update_owned(key, owner_token, |_| None).await?;
        debug!(key = %key, owner_token, "released idempotency claim");
        Ok(())
    }

    async fn renew_lease(
        &self,
        key: &IdempotencyKey,
        owner_token: &str,
        new_expires_at_ms: u64,
        now_ms: u64,
    ) -> Result<IdempotencyRecord, StoreError> {
        let updated = self.update_owned(key, owner_token, |record| Some(record.renewed(new_expires_at_ms))).await?;
        let record = updated.ok_or_else(|| StoreError::LeaseLost {
            key: key.to_string(),
            owner_token: owner_token.to_string(),
        })?;
        trace!(
            key = %key,
            owner_token,
            lease_expires_at_ms = record.lease_expires_at_ms,
            remaining_ms = record.lease_expires_at_ms.saturating_sub(now_ms),
            "renewed idempotency lease"
        );
        Ok(record)
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.read_record(&self.storage_key(key)).await?.map(|stored| stored.record))
    }

    async fn delete_record(&self, key: &IdempotencyKey, expected: &IdempotencyRecord) -> Result<bool, StoreError> {
        let storage_key = self.storage_key(key);
        let Some(current) = self.read_record(&storage_key).await? else {
            return Ok(false);
        };
        if current.record != *expected {
            return Ok(false);
        }
        self.compare_and_delete(&storage_key, current.raw).await
    }

    async fn remove(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let result = self.kv.delete(DeleteRequest::new(self.storage_key(key))).await?;
        if result.is_deleted {
            info!(key = %key, "removed idempotency record");
        }
        Ok(result.is_deleted)
    }

    async fn delete_expired_leases(&self, now_ms: u64, limit: u32) -> Result<u32, StoreError> {
        self.sweep(Sweep::ExpiredLeases, now_ms, limit).await
    }

    async fn delete_expired_completed(&self, now_ms: u64, limit: u32) -> Result<u32, StoreError> {
        self.sweep(Sweep::ExpiredRetention, now_ms, limit).await
    }
}

#[cfg(test)]
mod tests {
    use idemkit_testing::DeterministicKeyValueStore;
    use tokio::task::JoinSet;

    use super::*;
    use crate::record::RecordStatus;

    fn store() -> (Arc<DeterministicKeyValueStore>, KvIdempotencyStore<DeterministicKeyValueStore>) {
        let kv = DeterministicKeyValueStore::new();
        (Arc::clone(&kv), KvIdempotencyStore::new(kv))
    }

    fn key(token: &str) -> IdempotencyKey {
        IdempotencyKey::new("payments", token).unwrap()
    }

    #[tokio::test]
    async fn test_first_claim_wins() {
        let (_, store) = store();
        let k = key("a");

        let first = store.try_claim(&k, "owner-1", 1_000, 0).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));

        let second = store.try_claim(&k, "owner-2", 1_000, 10).await.unwrap();
        match second {
            ClaimOutcome::AlreadyInProgress { record, is_still_leased } => {
                assert_eq!(record.owner_token, "owner-1");
                assert!(is_still_leased);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let (_, store) = store();
        let store = Arc::new(store);
        let mut tasks = JoinSet::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            tasks.spawn(async move { store.try_claim(&key("race"), &format!("owner-{i}"), 1_000, 0).await });
        }

        let mut winners = 0;
        while let Some(result) = tasks.join_next().await {
            if matches!(result.unwrap().unwrap(), ClaimOutcome::Claimed(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_claim_reports_expired_lease() {
        let (_, store) = store();
        let k = key("a");
        store.try_claim(&k, "owner-1", 1_000, 0).await.unwrap();

        let outcome = store.try_claim(&k, "owner-2", 1_000, 1_001).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::AlreadyInProgress {
            is_still_leased: false,
            ..
        }));
    }

    #[tokio::test]
    async fn test_reclaim_requires_exact_stale_record() {
        let (_, store) = store();
        let k = key("a");
        let ClaimOutcome::Claimed(stale) = store.try_claim(&k, "owner-1", 1_000, 0).await.unwrap() else {
            panic!("expected claim");
        };

        let outcome = store.try_reclaim(&k, &stale, "owner-2", 1_000, 2_000).await.unwrap();
        let ClaimOutcome::Claimed(reclaimed) = outcome else {
            panic!("expected reclaim, got {outcome:?}");
        };
        assert_eq!(reclaimed.owner_token, "owner-2");
        assert_eq!(reclaimed.fencing_token, 2);

        // a second reclaimer holding the same stale snapshot loses
        let outcome = store.try_reclaim(&k, &stale, "owner-3", 1_000, 2_000).await.unwrap();
        match outcome {
            ClaimOutcome::AlreadyInProgress { record, is_still_leased } => {
                assert_eq!(record.owner_token, "owner-2");
                assert!(is_still_leased);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reclaim_refuses_live_lease() {
        let (_, store) = store();
        let k = key("a");
        let ClaimOutcome::Claimed(record) = store.try_claim(&k, "owner-1", 1_000, 0).await.unwrap() else {
            panic!("expected claim");
        };
        let outcome = store.try_reclaim(&k, &record, "owner-2", 1_000, 500).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::AlreadyInProgress {
            is_still_leased: true,
            ..
        }));
    }

    #[tokio::test]
    async fn test_complete_requires_owner() {
        let (_, store) = store();
        let k = key("a");
        store.try_claim(&k, "owner-1", 1_000, 0).await.unwrap();

        let err = store.complete(&k, "owner-2", "1".into(), 60_000, 10).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));

        let record = store.complete(&k, "owner-1", "1".into(), 60_000, 10).await.unwrap();
        assert_eq!(record.status, RecordStatus::Completed);

        // completed is terminal
        let err = store.complete(&k, "owner-1", "2".into(), 60_000, 20).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
        assert_eq!(store.get(&k).await.unwrap().unwrap().result_payload.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_complete_after_unswept_expiry_succeeds() {
        let (_, store) = store();
        let k = key("a");
        store.try_claim(&k, "owner-1", 1_000, 0).await.unwrap();
        let record = store.complete(&k, "owner-1", "1".into(), 60_000, 5_000).await.unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
    }

    #[tokio::test]
    async fn test_fail_and_release() {
        let (kv, store) = store();
        let failed = key("failed");
        store.try_claim(&failed, "owner-1", 1_000, 0).await.unwrap();
        let record = store.fail(&failed, "owner-1", "\"declined\"".into(), 60_000, 10).await.unwrap();
        assert_eq!(record.status, RecordStatus::Failed);

        let released = key("released");
        store.try_claim(&released, "owner-1", 1_000, 0).await.unwrap();
        assert!(matches!(store.release(&released, "owner-2").await, Err(StoreError::LeaseLost { .. })));
        store.release(&released, "owner-1").await.unwrap();
        assert!(store.get(&released).await.unwrap().is_none());
        assert_eq!(kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_renew_extends_lease() {
        let (_, store) = store();
        let k = key("a");
        store.try_claim(&k, "owner-1", 1_000, 0).await.unwrap();

        let record = store.renew_lease(&k, "owner-1", 5_000, 500).await.unwrap();
        assert_eq!(record.lease_expires_at_ms, 5_000);
        let record = store.renew_lease(&k, "owner-1", 2_000, 600).await.unwrap();
        assert_eq!(record.lease_expires_at_ms, 5_000);

        let err = store.renew_lease(&k, "owner-2", 9_000, 700).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
    }

    #[tokio::test]
    async fn test_delete_record_compares() {
        let (_, store) = store();
        let k = key("a");
        store.try_claim(&k, "owner-1", 1_000, 0).await.unwrap();
        let failed = store.fail(&k, "owner-1", "\"e\"".into(), 60_000, 10).await.unwrap();

        let mut other = failed.clone();
        other.error_payload = Some("\"different\"".into());
        assert!(!store.delete_record(&k, &other).await.unwrap());
        assert!(store.delete_record(&k, &failed).await.unwrap());
        assert!(!store.delete_record(&k, &failed).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweeps() {
        let (kv, store) = store();
        // expired claim
        store.try_claim(&key("stale"), "o", 1_000, 0).await.unwrap();
        // live claim
        store.try_claim(&key("live"), "o", 100_000, 0).await.unwrap();
        // completed, retention lapses at 2_010
        store.try_claim(&key("done"), "o", 1_000, 0).await.unwrap();
        store.complete(&key("done"), "o", "1".into(), 2_000, 10).await.unwrap();
        // completed, retained
        store.try_claim(&key("kept"), "o", 1_000, 0).await.unwrap();
        store.complete(&key("kept"), "o", "1".into(), 1_000_000, 10).await.unwrap();

        assert_eq!(store.delete_expired_leases(5_000, 100).await.unwrap(), 1);
        assert_eq!(store.delete_expired_completed(5_000, 100).await.unwrap(), 1);
        assert_eq!(kv.len().await, 2);
        assert!(store.get(&key("live")).await.unwrap().is_some());
        assert!(store.get(&key("kept")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_respects_limit() {
        let (kv, store) = store();
        for i in 0..5 {
            store.try_claim(&key(&format!("k{i}")), "o", 10, 0).await.unwrap();
        }
        assert_eq!(store.delete_expired_leases(100, 2).await.unwrap(), 2);
        assert_eq!(kv.len().await, 3);
        assert_eq!(store.delete_expired_leases(100, 10).await.unwrap(), 3);
        assert!(kv.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupted_record_surfaces() {
        let (kv, store) = store();
        let k = key("a");
        kv.write(WriteRequest::set(k.storage_key(RECORD_KEY_PREFIX), "not json")).await.unwrap();
        assert!(matches!(store.get(&k).await, Err(StoreError::CorruptedRecord { .. })));
        assert!(matches!(
            store.try_claim(&k, "o", 1_000, 0).await,
            Err(StoreError::CorruptedRecord { .. })
        ));
        // sweeps skip it
        assert_eq!(store.delete_expired_leases(u64::MAX, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_outage_is_unavailable() {
        let (kv, store) = store();
        kv.set_unavailable(true);
        let err = store.try_claim(&key("a"), "o", 1_000, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }
}
