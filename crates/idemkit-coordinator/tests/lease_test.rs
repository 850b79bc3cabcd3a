//! Lease expiry, reclaim, heartbeat renewal and lease loss.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::START_MS;
use common::harness;
use common::key;
use idemkit_coordinator::CoordinatorError;
use idemkit_coordinator::ExecuteOptions;
use idemkit_coordinator::HeartbeatPolicy;
use idemkit_coordinator::IdempotencyStore;
use idemkit_coordinator::RecordStatus;
use idemkit_testing::EffectCounter;
use tokio::sync::Notify;

#[tokio::test]
async fn test_crashed_owner_is_reclaimed_after_lease() {
    let h = harness();
    let effects = EffectCounter::new();
    let options = ExecuteOptions::default().with_lease(Duration::from_secs(2));
    let job = key("jobs", "crashy");

    // a process claimed the key and died
    h.store.try_claim(&job, "dead-process", 2_000, START_MS).await.unwrap();

    let err = h
        .coordinator
        .execute(&job, &options, || async { Ok::<u32, String>(0) })
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Conflict { .. }));

    h.clock.advance_ms(2_001);
    let value = h
        .coordinator
        .execute(&job, &options, || {
            let effects = effects.clone();
            async move { Ok::<u32, String>(effects.record()) }
        })
        .await
        .unwrap();
    assert_eq!(value, 1);

    let record = h.coordinator.lookup(&job).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.fencing_token, 2);
    assert_eq!(record.created_at_ms, START_MS);
}

#[tokio::test]
async fn test_lease_expiry_boundary_is_inclusive() {
    let h = harness();
    let job = key("jobs", "boundary");
    h.store.try_claim(&job, "other", 2_000, START_MS).await.unwrap();

    // exactly at the deadline the lease still holds
    h.clock.advance_ms(2_000);
    let err = h
        .coordinator
        .execute(&job, &ExecuteOptions::default(), || async { Ok::<u32, String>(0) })
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Conflict { .. }));

    h.clock.advance_ms(1);
    h.coordinator
        .execute(&job, &ExecuteOptions::default(), || async { Ok::<u32, String>(0) })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_slow_owner_loses_lease_and_is_told() {
    let h = harness();
    let effects = EffectCounter::new();
    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let options = ExecuteOptions::default().with_lease(Duration::from_secs(2));
    let job = key("jobs", "slow");

    let slow = tokio::spawn({
        let coordinator = h.coordinator.clone();
        let effects = effects.clone();
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        let job = job.clone();
        async move {
            coordinator
                .execute(&job, &options, || async move {
                    started.notify_one();
                    gate.notified().await;
                    effects.record();
                    Ok::<u32, String>(1)
                })
                .await
        }
    });

    started.notified().await;
    h.clock.advance_secs(3);

    let second = h
        .coordinator
        .execute(&job, &options, || {
            let effects = effects.clone();
            async move {
                effects.record();
                Ok::<u32, String>(2)
            }
        })
        .await
        .unwrap();
    assert_eq!(second, 2);

    gate.notify_one();
    let err = slow.await.unwrap().unwrap_err();
    assert!(matches!(err, CoordinatorError::LeaseLost { .. }));
    assert_eq!(err.status_hint(), Some(500));

    // the operation ran twice; the reclaimer's result is the one recorded
    assert_eq!(effects.count(), 2);
    let replay = h
        .coordinator
        .execute(&job, &options, || async { Ok::<u32, String>(99) })
        .await
        .unwrap();
    assert_eq!(replay, 2);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_keeps_long_operation_leased() {
    let h = harness();
    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let options = ExecuteOptions::default()
        .with_lease(Duration::from_millis(300))
        .with_heartbeat(HeartbeatPolicy::Auto);
    let job = key("jobs", "long");

    let owner = tokio::spawn({
        let coordinator = h.coordinator.clone();
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        let job = job.clone();
        async move {
            coordinator
                .execute(&job, &options, || async move {
                    started.notify_one();
                    gate.notified().await;
                    Ok::<u32, String>(7)
                })
                .await
        }
    });
    started.notified().await;

    // Without renewals the lease would lapse at START_MS + 300.
    for _ in 0..5 {
        h.clock.advance_ms(100);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let record = h.coordinator.lookup(&job).await.unwrap().unwrap();
    assert!(record.lease_expires_at_ms > START_MS + 300);

    let err = h
        .coordinator
        .execute(&job, &options, || async { Ok::<u32, String>(0) })
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Conflict { .. }));

    gate.notify_one();
    assert_eq!(owner.await.unwrap().unwrap(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_cancels_operation_after_takeover() {
    let h = harness();
    let options = ExecuteOptions::default()
        .with_lease(Duration::from_millis(300))
        .with_heartbeat(HeartbeatPolicy::Interval { interval_ms: 100 });
    let job = key("jobs", "taken-over");

    let store = Arc::clone(&h.store);
    let clock = h.clock.clone();
    let takeover_job = job.clone();
    let result = h
        .coordinator
        .execute_cancellable(&job, &options, |cancel| async move {
            // someone forcibly takes the claim while the operation runs
            let record = store.get(&takeover_job).await.unwrap().unwrap();
            clock.advance_ms(1_000);
            store
                .try_reclaim(&takeover_job, &record, "intruder", 60_000, START_MS + 1_000)
                .await
                .unwrap();
            cancel.cancelled().await;
            Err::<u32, String>("cancelled".to_string())
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, CoordinatorError::Operation(ref e) if e == "cancelled"));
    let record = h.coordinator.lookup(&job).await.unwrap().unwrap();
    assert_eq!(record.owner_token, "intruder");
    assert_eq!(record.status, RecordStatus::Claimed);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_call_stops_renewing_lease() {
    let h = harness();
    let effects = EffectCounter::new();
    let options = ExecuteOptions::default()
        .with_lease(Duration::from_millis(300))
        .with_heartbeat(HeartbeatPolicy::Auto);
    let job = key("jobs", "abandoned");

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.coordinator.execute(&job, &options, || std::future::pending::<Result<u32, String>>()),
    )
    .await;
    assert!(abandoned.is_err());

    h.clock.advance_secs(10);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let record = h.coordinator.lookup(&job).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Claimed);
    assert_eq!(record.lease_expires_at_ms, START_MS + 300);

    let value = h
        .coordinator
        .execute(&job, &options, || {
            let effects = effects.clone();
            async move { Ok::<u32, String>(effects.record()) }
        })
        .await
        .unwrap();
    assert_eq!(value, 1);

    let record = h.coordinator.lookup(&job).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.fencing_token, 2);
}
