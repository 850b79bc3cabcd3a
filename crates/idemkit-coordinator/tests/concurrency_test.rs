//! Concurrent callers sharing one idempotency key.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::harness;
use common::key;
use idemkit_coordinator::ConcurrencyPolicy;
use idemkit_coordinator::CoordinatorError;
use idemkit_coordinator::ExecuteOptions;
use idemkit_coordinator::IdempotencyStore;
use idemkit_coordinator::RecordStatus;
use idemkit_testing::EffectCounter;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Receipt {
    charge_id: String,
    amount_cents: u64,
    line_items: Vec<(String, u32)>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_waiters_see_single_effect() {
    let h = harness();
    let effects = EffectCounter::new();
    let options = ExecuteOptions::default()
        .with_concurrency_policy(ConcurrencyPolicy::wait_for_completion(Duration::from_secs(10)));

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let coordinator = h.coordinator.clone();
        let effects = effects.clone();
        tasks.spawn(async move {
            coordinator
                .execute(&key("jobs", "nightly-export"), &options, || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<u32, String>(effects.record())
                })
                .await
        });
    }

    let mut values = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        values.push(joined.unwrap().unwrap());
    }

    assert_eq!(effects.count(), 1);
    assert_eq!(values.len(), 16);
    assert!(values.iter().all(|v| *v == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fail_fast_single_effect() {
    let h = harness();
    let effects = EffectCounter::new();
    let options = ExecuteOptions::default();

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let coordinator = h.coordinator.clone();
        let effects = effects.clone();
        tasks.spawn(async move {
            coordinator
                .execute(&key("jobs", "race"), &options, || async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<u32, String>(effects.record())
                })
                .await
        });
    }

    let mut successes = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(value) => {
                assert_eq!(value, 1);
                successes += 1;
            }
            Err(CoordinatorError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(effects.count(), 1);
    assert!(successes >= 1);
}

#[tokio::test]
async fn test_payment_retry_while_in_flight_conflicts() {
    let h = harness();
    let effects = EffectCounter::new();
    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let options = ExecuteOptions::default();
    let payment = key("payments", "abc123");

    let first = tokio::spawn({
        let coordinator = h.coordinator.clone();
        let effects = effects.clone();
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        let payment = payment.clone();
        async move {
            coordinator
                .execute(&payment, &options, || async move {
                    started.notify_one();
                    gate.notified().await;
                    effects.record();
                    Ok::<_, String>(Receipt {
                        charge_id: "txn-1".into(),
                        amount_cents: 4_200,
                        line_items: vec![("widget".into(), 2)],
                    })
                })
                .await
        }
    });

    started.notified().await;
    let retry = h
        .coordinator
        .execute(&payment, &options, || async {
            Ok::<_, String>(Receipt {
                charge_id: "ch_duplicate".into(),
                amount_cents: 4_200,
                line_items: vec![],
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(retry, CoordinatorError::Conflict { .. }));
    assert_eq!(retry.status_hint(), Some(409));
    assert!(retry.is_retryable());

    gate.notify_one();
    let receipt = first.await.unwrap().unwrap();
    assert_eq!(receipt.charge_id, "txn-1");

    let replay = h
        .coordinator
        .execute(&payment, &options, || async { Err::<Receipt, _>("must not run".to_string()) })
        .await
        .unwrap();
    assert_eq!(replay, receipt);
    assert_eq!(effects.count(), 1);
}

#[tokio::test]
async fn test_replayed_payload_is_byte_identical() {
    let h = harness();
    let options = ExecuteOptions::default();
    let order = key("orders", "o-77");
    let receipt = Receipt {
        charge_id: "ch_9".into(),
        amount_cents: 12_345,
        line_items: vec![("a".into(), 1), ("b".into(), 3)],
    };

    let expected = receipt.clone();
    let first = h.coordinator.execute(&order, &options, || async move { Ok::<_, String>(expected) }).await.unwrap();
    let record = h.coordinator.lookup(&order).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    let stored_payload = record.result_payload.clone().unwrap();
    assert_eq!(stored_payload, serde_json::to_string(&receipt).unwrap());

    let second: Receipt = h
        .coordinator
        .execute(&order, &options, || async { Err::<Receipt, _>("must not run".to_string()) })
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(serde_json::to_string(&second).unwrap(), stored_payload);
}

#[tokio::test]
async fn test_scopes_are_independent() {
    let h = harness();
    let effects = EffectCounter::new();
    let options = ExecuteOptions::default();

    for scope in ["payments", "refunds"] {
        let effects = effects.clone();
        h.coordinator
            .execute(&key(scope, "42"), &options, || async move { Ok::<u32, String>(effects.record()) })
            .await
            .unwrap();
    }
    assert_eq!(effects.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_times_out_on_stuck_claim() {
    let h = harness();
    h.store
        .try_claim(&key("jobs", "stuck"), "other-process", 60_000, common::START_MS)
        .await
        .unwrap();

    let options = ExecuteOptions::default().with_concurrency_policy(ConcurrencyPolicy::WaitForCompletion {
        timeout_ms: 200,
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
    });
    let err = h
        .coordinator
        .execute(&key("jobs", "stuck"), &options, || async { Ok::<u32, String>(1) })
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Timeout { waited_ms, .. } if waited_ms >= 200));
    assert_eq!(err.status_hint(), Some(504));
}

#[tokio::test(start_paused = true)]
async fn test_waiter_reclaims_when_holder_lease_lapses() {
    let h = harness();
    let effects = EffectCounter::new();
    let job = key("jobs", "orphaned");
    h.store.try_claim(&job, "crashed-holder", 500, common::START_MS).await.unwrap();

    let options = ExecuteOptions::default().with_concurrency_policy(ConcurrencyPolicy::WaitForCompletion {
        timeout_ms: 5_000,
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
    });
    let waiter = tokio::spawn({
        let coordinator = h.coordinator.clone();
        let effects = effects.clone();
        let job = job.clone();
        async move {
            coordinator
                .execute(&job, &options, || async move { Ok::<u32, String>(effects.record()) })
                .await
        }
    });

    // the waiter polls a live lease for a while before the holder's lease lapses
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());
    h.clock.advance_ms(501);

    assert_eq!(waiter.await.unwrap().unwrap(), 1);
    assert_eq!(effects.count(), 1);
    let record = h.coordinator.lookup(&job).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.fencing_token, 2);
}
