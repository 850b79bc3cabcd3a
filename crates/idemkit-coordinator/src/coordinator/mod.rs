//! Exactly-once execution of keyed operations.
//!
//! # Algorithm
//!
//! 1. Claim the key. The first caller wins and runs the operation under a lease.
//! 2. Everyone else sees the record the winner wrote:
//!    - `Completed`: decode and return the cached result
//!    - `Failed`: replay the cached error, or delete it and retry (`RetryFailures`)
//!    - `Claimed`, lease live: `Conflict`, or wait with backoff (`WaitForCompletion`)
//!    - `Claimed`, lease lapsed: take the claim over with a bumped fencing token
//! 3. The winner records the outcome with an owner-checked transition. If the
//!    claim was taken over meanwhile, the result is not cached and the caller
//!    gets `LeaseLost`.
//!
//! Reclaims and failure retries share one budget per call
//! (`max_reclaim_attempts`), after which the call gives up with `Conflict`.

mod heartbeat;
mod wait;

use std::future::Future;
use std::sync::Arc;

use idemkit_kv::MAX_VALUE_SIZE;
use idemkit_time::SystemTimeProvider;
use idemkit_time::TimeProvider;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use self::heartbeat::Heartbeat;
use self::wait::WaitBudget;
use crate::codec::JsonCodec;
use crate::codec::ResultCodec;
use crate::error::CodecError;
use crate::error::CoordinatorError;
use crate::error::StoreError;
use crate::key::IdempotencyKey;
use crate::policy::ConcurrencyPolicy;
use crate::policy::ExecuteOptions;
use crate::policy::FailurePolicy;
use crate::record::IdempotencyRecord;
use crate::store::ClaimOutcome;
use crate::store::IdempotencyStore;
use crate::verified;
use crate::verified::RecordDisposition;

/// How `acquire` resolved the key.
enum Acquired<T, E> {
    /// This caller owns the claim and must run the operation.
    Owned(IdempotencyRecord),
    /// A terminal record answered the call.
    Replayed(Result<T, CoordinatorError<E>>),
}

/// Runs operations at most once per idempotency key.
///
/// Cheap to clone; clones share the store and clock.
pub struct Coordinator<S: IdempotencyStore + ?Sized, C: ResultCodec = JsonCodec> {
    store: Arc<S>,
    clock: Arc<dyn TimeProvider>,
    codec: C,
}

impl<S: IdempotencyStore + ?Sized, C: ResultCodec + Clone> Clone for Coordinator<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            codec: self.codec.clone(),
        }
    }
}

impl<S: IdempotencyStore + ?Sized + 'static> Coordinator<S, JsonCodec> {
    /// JSON payloads and the system clock.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemTimeProvider))
    }

    /// JSON payloads and an injected clock.
    pub fn with_clock(store: Arc<S>, clock: Arc<dyn TimeProvider>) -> Self {
        Self::with_codec(store, clock, JsonCodec)
    }
}

impl<S: IdempotencyStore + ?Sized + 'static, C: ResultCodec> Coordinator<S, C> {
    /// Custom payload codec and clock.
    pub fn with_codec(store: Arc<S>, clock: Arc<dyn TimeProvider>, codec: C) -> Self {
        Self { store, clock, codec }
    }

    /// The underlying record store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_unix_ms()
    }

    /// Run `operation` at most once for `key`, or replay its recorded outcome.
    ///
    /// See [`execute_cancellable`](Self::execute_cancellable) for an operation
    /// that observes heartbeat-detected lease loss.
    pub async fn execute<T, E, F, Fut>(
        &self,
        key: &IdempotencyKey,
        options: &ExecuteOptions,
        operation: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_cancellable(key, options, move |_cancel| operation()).await
    }

    /// Like [`execute`](Self::execute), but the operation receives a token that
    /// is cancelled if a heartbeat finds the claim was taken over.
    ///
    /// Cancellation is advisory: the outcome is still offered to the store and
    /// rejected there with `LeaseLost`.
    pub async fn execute_cancellable<T, E, F, Fut>(
        &self,
        key: &IdempotencyKey,
        options: &ExecuteOptions,
        operation: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: Serialize + DeserializeOwned,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        options.validate().map_err(CoordinatorError::InvalidOptions)?;
        let owner_token = uuid::Uuid::new_v4().to_string();

        match self.acquire::<T, E>(key, options, &owner_token).await? {
            Acquired::Replayed(result) => result,
            Acquired::Owned(record) => self.run_owned(key, options, owner_token, record, operation).await,
        }
    }

    /// Read the current record for `key` without claiming it.
    pub async fn lookup(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.store.get(key).await
    }

    /// Delete the record for `key` regardless of state.
    ///
    /// For operator correction only: forgetting a live claim lets a second
    /// caller run the operation concurrently with the first.
    pub async fn forget(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let removed = self.store.remove(key).await?;
        if removed {
            info!(key = %key, "forgot idempotency record");
        }
        Ok(removed)
    }

    /// Drive the claim state machine until this caller owns the key or a
    /// terminal record answers the call.
    async fn acquire<T, E>(
        &self,
        key: &IdempotencyKey,
        options: &ExecuteOptions,
        owner_token: &str,
    ) -> Result<Acquired<T, E>, CoordinatorError<E>>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let lease_ms = options.lease_duration_ms;
        let mut reclaim_attempts: u32 = 0;
        let mut wait: Option<WaitBudget> = None;

        let mut outcome = self.store.try_claim(key, owner_token, lease_ms, self.now_ms()).await?;

        loop {
            outcome = match outcome {
                ClaimOutcome::Claimed(record) => return Ok(Acquired::Owned(record)),

                ClaimOutcome::AlreadyCompleted(record) => {
                    debug!(key = %key, "replaying cached result");
                    return Ok(Acquired::Replayed(self.decode_result(key, &record)));
                }

                ClaimOutcome::AlreadyFailed(record) => match options.failure_policy {
                    FailurePolicy::CacheFailures => {
                        debug!(key = %key, "replaying cached failure");
                        return Ok(Acquired::Replayed(Err(self.decode_failure(key, &record))));
                    }
                    FailurePolicy::RetryFailures => {
                        self.spend_reclaim_attempt::<E>(key, options, &mut reclaim_attempts)?;
                        let is_deleted = self.store.delete_record(key, &record).await?;
                        debug!(key = %key, is_deleted, "cleared cached failure for retry");
                        self.store.try_claim(key, owner_token, lease_ms, self.now_ms()).await?
                    }
                },

                ClaimOutcome::AlreadyInProgress {
                    record,
                    is_still_leased: false,
                } => {
                    self.spend_reclaim_attempt::<E>(key, options, &mut reclaim_attempts)?;
                    debug!(
                        key = %key,
                        previous_owner = %record.owner_token,
                        lease_expires_at_ms = record.lease_expires_at_ms,
                        "attempting to reclaim expired lease"
                    );
                    self.store.try_reclaim(key, &record, owner_token, lease_ms, self.now_ms()).await?
                }

                ClaimOutcome::AlreadyInProgress {
                    record,
                    is_still_leased: true,
                } => {
                    self.await_in_progress::<E>(key, options, owner_token, &record, &mut wait)
                        .await?
                }
            };
        }
    }

    /// Apply the concurrency policy to a live claim held by someone else.
    async fn await_in_progress<E>(
        &self,
        key: &IdempotencyKey,
        options: &ExecuteOptions,
        owner_token: &str,
        record: &IdempotencyRecord,
        wait: &mut Option<WaitBudget>,
    ) -> Result<ClaimOutcome, CoordinatorError<E>> {
        let ConcurrencyPolicy::WaitForCompletion {
            timeout_ms,
            initial_backoff_ms,
            max_backoff_ms,
        } = options.concurrency_policy
        else {
            debug!(key = %key, owner = %record.owner_token, "key in progress, failing fast");
            return Err(CoordinatorError::Conflict {
                key: key.to_string(),
                reason: "operation in progress",
            });
        };

        let budget = wait.get_or_insert_with(|| WaitBudget::new(timeout_ms, initial_backoff_ms, max_backoff_ms));

        loop {
            let Some(sleep) = budget.next_sleep() else {
                debug!(key = %key, waited_ms = budget.waited_ms(), "gave up waiting for in-progress key");
                return Err(CoordinatorError::Timeout {
                    key: key.to_string(),
                    waited_ms: budget.waited_ms(),
                });
            };
            tokio::time::sleep(sleep).await;

            let now_ms = self.now_ms();
            match self.store.get(key).await? {
                None => {
                    return Ok(self.store.try_claim(key, owner_token, options.lease_duration_ms, now_ms).await?);
                }
                Some(current) => {
                    if current.disposition(now_ms) != (RecordDisposition::InProgress { is_still_leased: true }) {
                        return Ok(ClaimOutcome::existing(current, now_ms));
                    }
                }
            }
        }
    }

    fn spend_reclaim_attempt<E>(
        &self,
        key: &IdempotencyKey,
        options: &ExecuteOptions,
        attempts: &mut u32,
    ) -> Result<(), CoordinatorError<E>> {
        if !verified::can_attempt_reclaim(*attempts, options.max_reclaim_attempts) {
            warn!(key = %key, attempts = *attempts, "reclaim budget exhausted");
            return Err(CoordinatorError::Conflict {
                key: key.to_string(),
                reason: "reclaim attempts exhausted",
            });
        }
        *attempts = attempts.saturating_add(1);
        Ok(())
    }

    async fn run_owned<T, E, F, Fut>(
        &self,
        key: &IdempotencyKey,
        options: &ExecuteOptions,
        owner_token: String,
        record: IdempotencyRecord,
        operation: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        T: Serialize,
        E: Serialize,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        debug!(
            key = %key,
            owner_token = %owner_token,
            fencing_token = record.fencing_token,
            "running operation under claim"
        );

        let cancel = CancellationToken::new();
        let heartbeat = options.heartbeat.interval_ms(options.lease_duration_ms).map(|interval_ms| {
            Heartbeat::spawn(
                Arc::clone(&self.store),
                Arc::clone(&self.clock),
                key.clone(),
                owner_token.clone(),
                options.lease_duration_ms,
                interval_ms,
                cancel.clone(),
            )
        });

        let result = operation(cancel).await;

        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }

        match result {
            Ok(value) => {
                // an unencodable result stays Claimed and expires with its lease
                let payload = self.codec.encode(&value).map_err(|source| CoordinatorError::Codec {
                    key: key.to_string(),
                    source,
                })?;
                if let Err(source) = self.check_payload_size(&payload) {
                    warn!(key = %key, error = %source, "result too large to cache, releasing claim");
                    self.release_quietly(key, &owner_token).await;
                    return Err(CoordinatorError::Codec {
                        key: key.to_string(),
                        source,
                    });
                }
                match self
                    .store
                    .complete(key, &owner_token, payload, options.retention_duration_ms, self.now_ms())
                    .await
                {
                    Ok(_) => {
                        debug!(key = %key, "operation completed, result cached");
                        Ok(value)
                    }
                    Err(StoreError::LeaseLost { key: lost_key, owner_token }) => {
                        warn!(
                            key = %key,
                            owner_token = %owner_token,
                            "claim lost before completion; result not cached and the operation may have run twice"
                        );
                        Err(CoordinatorError::LeaseLost {
                            key: lost_key,
                            owner_token,
                        })
                    }
                    Err(e @ StoreError::Rejected { .. }) => {
                        warn!(key = %key, error = %e, "store rejected completed record, releasing claim");
                        self.release_quietly(key, &owner_token).await;
                        Err(e.into())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(error) => {
                self.record_failure(key, options, &owner_token, &error).await;
                Err(CoordinatorError::Operation(error))
            }
        }
    }

    /// Cache or release a failed claim. Store errors are logged, never returned:
    /// the caller always sees the operation's own error.
    async fn record_failure<E: Serialize>(
        &self,
        key: &IdempotencyKey,
        options: &ExecuteOptions,
        owner_token: &str,
        error: &E,
    ) {
        let result = match options.failure_policy {
            FailurePolicy::CacheFailures => match self.codec.encode(error).and_then(|payload| {
                self.check_payload_size(&payload)?;
                Ok(payload)
            }) {
                Ok(payload) => match self
                    .store
                    .fail(key, owner_token, payload, options.retention_duration_ms, self.now_ms())
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(e @ StoreError::Rejected { .. }) => {
                        warn!(key = %key, error = %e, "store rejected failed record, releasing claim instead");
                        self.store.release(key, owner_token).await
                    }
                    Err(e) => Err(e),
                },
                Err(e) => {
                    warn!(key = %key, error = %e, "failure not cacheable, releasing claim instead");
                    self.store.release(key, owner_token).await
                }
            },
            FailurePolicy::RetryFailures => self.store.release(key, owner_token).await,
        };

        match result {
            Ok(()) => debug!(key = %key, policy = ?options.failure_policy, "operation failed, outcome recorded"),
            Err(StoreError::LeaseLost { .. }) => {
                warn!(key = %key, owner_token, "claim lost before the failure could be recorded");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "could not record failure; claim will expire with its lease");
            }
        }
    }

    /// A payload must fit in a record value; the record envelope is checked by the store.
    fn check_payload_size(&self, payload: &str) -> Result<(), CodecError> {
        let size = u64::try_from(payload.len()).unwrap_or(u64::MAX);
        let max = u64::from(MAX_VALUE_SIZE);
        if size > max {
            return Err(CodecError::PayloadTooLarge {
                codec: self.codec.name(),
                size,
                max,
            });
        }
        Ok(())
    }

    async fn release_quietly(&self, key: &IdempotencyKey, owner_token: &str) {
        if let Err(e) = self.store.release(key, owner_token).await {
            warn!(key = %key, error = %e, "could not release claim; it will expire with its lease");
        }
    }

    fn decode_result<T: DeserializeOwned, E>(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
    ) -> Result<T, CoordinatorError<E>> {
        let payload = record.result_payload.as_deref().ok_or_else(|| CoordinatorError::CorruptedRecord {
            key: key.to_string(),
            reason: "completed record has no result payload".to_string(),
        })?;
        self.codec.decode(payload).map_err(|source| CoordinatorError::Codec {
            key: key.to_string(),
            source,
        })
    }

    fn decode_failure<E: DeserializeOwned>(&self, key: &IdempotencyKey, record: &IdempotencyRecord) -> CoordinatorError<E> {
        let Some(payload) = record.error_payload.as_deref() else {
            return CoordinatorError::CorruptedRecord {
                key: key.to_string(),
                reason: "failed record has no error payload".to_string(),
            };
        };
        match self.codec.decode(payload) {
            Ok(error) => CoordinatorError::Operation(error),
            Err(source) => CoordinatorError::Codec {
                key: key.to_string(),
                source,
            },
        }
    }
}
