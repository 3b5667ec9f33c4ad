use std::sync::Arc;

use inspectra_core::AppError;
use inspectra_domain::{AcquireOutcome, LeasePolicy, RenewOutcome};

use crate::test_support::{FakeLeaseStore, ManualClock, holder, start_time, task};

use super::ClaimCoordinator;

fn coordinator() -> (ClaimCoordinator, Arc<FakeLeaseStore>, Arc<ManualClock>) {
    let store = Arc::new(FakeLeaseStore::default());
    let clock = Arc::new(ManualClock::new(start_time()));
    let coordinator = ClaimCoordinator::new(store.clone(), LeasePolicy::default(), clock.clone());
    (coordinator, store, clock)
}

#[tokio::test]
async fn handoff_between_inspectors_follows_release() {
    let (coordinator, _store, clock) = coordinator();
    let task_id = task("task-1");

    let first = coordinator.acquire(&task_id, &holder("a")).await;
    assert!(matches!(
        first,
        Ok(AcquireOutcome::Claimed { expires_at })
            if expires_at == start_time() + chrono::TimeDelta::seconds(300)
    ));

    clock.advance_seconds(10);
    let denied = coordinator.acquire(&task_id, &holder("b")).await;
    assert!(matches!(
        denied,
        Ok(AcquireOutcome::Held { ref held_by }) if held_by == &holder("a")
    ));

    clock.advance_seconds(10);
    assert!(coordinator.release(&task_id, &holder("a")).await.is_ok());

    clock.advance_seconds(1);
    let second = coordinator.acquire(&task_id, &holder("b")).await;
    assert!(matches!(second, Ok(AcquireOutcome::Claimed { .. })));
}

#[tokio::test]
async fn reacquire_by_holder_extends_expiry() {
    let (coordinator, _store, clock) = coordinator();
    let task_id = task("task-1");

    let first = coordinator.acquire(&task_id, &holder("a")).await;
    clock.advance_seconds(30);
    let second = coordinator.acquire(&task_id, &holder("a")).await;

    match (first, second) {
        (
            Ok(AcquireOutcome::Claimed {
                expires_at: first_expiry,
            }),
            Ok(AcquireOutcome::Claimed {
                expires_at: second_expiry,
            }),
        ) => assert!(second_expiry > first_expiry),
        other => panic!("unexpected outcomes: {other:?}"),
    }
}

#[tokio::test]
async fn expired_lease_goes_to_new_holder() {
    let (coordinator, _store, clock) = coordinator();
    let task_id = task("task-1");

    assert!(coordinator.acquire(&task_id, &holder("a")).await.is_ok());
    clock.advance_seconds(300);

    let outcome = coordinator.acquire(&task_id, &holder("b")).await;
    assert!(matches!(outcome, Ok(AcquireOutcome::Claimed { .. })));
}

#[tokio::test]
async fn release_by_non_holder_keeps_real_lease() {
    let (coordinator, store, _clock) = coordinator();
    let task_id = task("task-1");

    assert!(coordinator.acquire(&task_id, &holder("a")).await.is_ok());
    assert!(coordinator.release(&task_id, &holder("b")).await.is_ok());

    let stored = store.stored(&task_id).await;
    assert_eq!(
        stored.as_ref().map(|lease| lease.holder_id().clone()),
        Some(holder("a"))
    );
    let denied = coordinator.acquire(&task_id, &holder("b")).await;
    assert!(matches!(denied, Ok(AcquireOutcome::Held { .. })));
}

#[tokio::test]
async fn renew_after_expiry_fails_without_competing_holder() {
    let (coordinator, _store, clock) = coordinator();
    let task_id = task("task-1");

    assert!(coordinator.acquire(&task_id, &holder("a")).await.is_ok());
    clock.advance_seconds(301);

    let outcome = coordinator.renew(&task_id, &holder("a")).await;
    assert!(matches!(outcome, Ok(RenewOutcome::Lost { held_by: None })));
}

#[tokio::test]
async fn renew_reports_new_holder() {
    let (coordinator, _store, clock) = coordinator();
    let task_id = task("task-1");

    assert!(coordinator.acquire(&task_id, &holder("a")).await.is_ok());
    clock.advance_seconds(301);
    assert!(coordinator.acquire(&task_id, &holder("b")).await.is_ok());

    let outcome = coordinator.renew(&task_id, &holder("a")).await;
    assert!(matches!(
        outcome,
        Ok(RenewOutcome::Lost { held_by: Some(ref held_by) }) if held_by == &holder("b")
    ));
}

#[tokio::test]
async fn renew_extends_from_renewal_time() {
    let (coordinator, _store, clock) = coordinator();
    let task_id = task("task-1");

    assert!(coordinator.acquire(&task_id, &holder("a")).await.is_ok());
    clock.advance_seconds(240);

    let outcome = coordinator.renew(&task_id, &holder("a")).await;
    assert!(matches!(
        outcome,
        Ok(RenewOutcome::Renewed { expires_at })
            if expires_at == start_time() + chrono::TimeDelta::seconds(540)
    ));
}

#[tokio::test]
async fn concurrent_acquires_grant_exactly_one_holder() {
    let (coordinator, _store, _clock) = coordinator();
    let task_id = task("task-1");

    let mut handles = Vec::new();
    for index in 0..16 {
        let coordinator = coordinator.clone();
        let task_id = task_id.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .acquire(&task_id, &holder(&format!("inspector-{index}")))
                .await
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        if let Ok(Ok(outcome)) = handle.await
            && outcome.is_claimed()
        {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);
}

#[tokio::test]
async fn store_outage_propagates_instead_of_granting() {
    let (coordinator, store, _clock) = coordinator();
    store.set_unavailable(true);

    let outcome = coordinator.acquire(&task("task-1"), &holder("a")).await;
    assert!(matches!(outcome, Err(AppError::Unavailable(_))));
}

#[tokio::test]
async fn disabled_coordinator_always_claims_without_storing() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let coordinator = ClaimCoordinator::disabled(LeasePolicy::default(), clock);
    let task_id = task("task-1");

    assert!(!coordinator.is_enabled());
    let first = coordinator.acquire(&task_id, &holder("a")).await;
    let second = coordinator.acquire(&task_id, &holder("b")).await;
    assert!(matches!(first, Ok(AcquireOutcome::Claimed { .. })));
    assert!(matches!(second, Ok(AcquireOutcome::Claimed { .. })));
    assert!(matches!(
        coordinator.renew(&task_id, &holder("a")).await,
        Ok(RenewOutcome::Renewed { .. })
    ));
    assert!(matches!(coordinator.current_lease(&task_id).await, Ok(None)));
}

#[tokio::test]
async fn compaction_removes_only_expired_leases() {
    let (coordinator, _store, clock) = coordinator();

    assert!(coordinator.acquire(&task("task-1"), &holder("a")).await.is_ok());
    clock.advance_seconds(200);
    assert!(coordinator.acquire(&task("task-2"), &holder("b")).await.is_ok());
    clock.advance_seconds(150);

    let removed = coordinator.compact_expired().await;
    assert!(matches!(removed, Ok(1)));
    assert!(matches!(
        coordinator.current_lease(&task("task-2")).await,
        Ok(Some(_))
    ));
}
