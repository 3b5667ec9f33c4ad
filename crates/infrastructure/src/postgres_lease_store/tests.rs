use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use inspectra_application::LeaseStore;
use inspectra_domain::{ClaimDecision, HolderId, LeasePolicy, RenewalDecision, TaskId};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::PostgresLeaseStore;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres lease store tests: {error}");
    }

    Some(pool)
}

fn unique_task() -> TaskId {
    TaskId::new(format!("task-{}", uuid::Uuid::new_v4())).unwrap_or_else(|_| unreachable!())
}

fn holder(value: &str) -> HolderId {
    HolderId::new(value).unwrap_or_else(|_| unreachable!())
}

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_else(|| unreachable!())
}

#[tokio::test]
async fn competing_holder_is_denied_until_expiry() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PostgresLeaseStore::new(pool);
    let policy = LeasePolicy::default();
    let task_id = unique_task();
    let start = now();

    let first = store
        .try_acquire(&task_id, &holder("a"), start, &policy)
        .await;
    assert!(matches!(first, Ok(ClaimDecision::Grant(_))));

    let denied = store
        .try_acquire(&task_id, &holder("b"), start + TimeDelta::seconds(10), &policy)
        .await;
    assert!(matches!(
        denied,
        Ok(ClaimDecision::Deny { ref held_by }) if held_by == &holder("a")
    ));

    let taken_over = store
        .try_acquire(&task_id, &holder("b"), start + TimeDelta::seconds(300), &policy)
        .await;
    let Ok(ClaimDecision::Grant(lease)) = taken_over else {
        panic!("expected takeover, got {taken_over:?}");
    };
    assert_eq!(lease.holder_id(), &holder("b"));
    assert_eq!(lease.acquired_at(), start + TimeDelta::seconds(300));
    assert!(lease.renewed_at().is_none());
}

#[tokio::test]
async fn reacquire_by_holder_keeps_acquisition_time() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PostgresLeaseStore::new(pool);
    let policy = LeasePolicy::default();
    let task_id = unique_task();
    let start = now();

    assert!(
        store
            .try_acquire(&task_id, &holder("a"), start, &policy)
            .await
            .is_ok()
    );
    let again = store
        .try_acquire(&task_id, &holder("a"), start + TimeDelta::seconds(30), &policy)
        .await;
    let Ok(ClaimDecision::Grant(lease)) = again else {
        panic!("expected grant, got {again:?}");
    };
    assert_eq!(lease.acquired_at(), start);
    assert_eq!(lease.expires_at(), start + TimeDelta::seconds(330));
}

#[tokio::test]
async fn renewal_reports_holder_or_expiry() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PostgresLeaseStore::new(pool);
    let policy = LeasePolicy::default();
    let task_id = unique_task();
    let start = now();

    assert!(
        store
            .try_acquire(&task_id, &holder("a"), start, &policy)
            .await
            .is_ok()
    );

    let renewed = store
        .renew(&task_id, &holder("a"), start + TimeDelta::seconds(240), &policy)
        .await;
    assert!(matches!(
        renewed,
        Ok(RenewalDecision::Renew(ref lease)) if lease.expires_at() == start + TimeDelta::seconds(540)
    ));

    let foreign = store
        .renew(&task_id, &holder("b"), start + TimeDelta::seconds(250), &policy)
        .await;
    assert!(matches!(
        foreign,
        Ok(RenewalDecision::Lost { held_by: Some(ref held_by) }) if held_by == &holder("a")
    ));

    let expired = store
        .renew(&task_id, &holder("a"), start + TimeDelta::seconds(541), &policy)
        .await;
    assert!(matches!(expired, Ok(RenewalDecision::Lost { held_by: None })));
}

#[tokio::test]
async fn concurrent_claims_grant_exactly_one_holder() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = Arc::new(PostgresLeaseStore::new(pool));
    let policy = LeasePolicy::default();
    let task_id = unique_task();
    let start = now();

    let mut handles = Vec::new();
    for index in 0..8 {
        let store = store.clone();
        let task_id = task_id.clone();
        handles.push(tokio::spawn(async move {
            store
                .try_acquire(
                    &task_id,
                    &holder(&format!("inspector-{index}")),
                    start,
                    &policy,
                )
                .await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if matches!(handle.await, Ok(Ok(ClaimDecision::Grant(_)))) {
            granted += 1;
        }
    }
    assert_eq!(granted, 1);
}

#[tokio::test]
async fn release_and_purge_remove_rows() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PostgresLeaseStore::new(pool);
    let policy = LeasePolicy::default();
    let released_task = unique_task();
    let expired_task = unique_task();
    let start = now();

    assert!(
        store
            .try_acquire(&released_task, &holder("a"), start, &policy)
            .await
            .is_ok()
    );
    assert!(matches!(
        store.release(&released_task, &holder("b")).await,
        Ok(false)
    ));
    assert!(matches!(
        store.release(&released_task, &holder("a")).await,
        Ok(true)
    ));

    let long_ago = start - TimeDelta::days(2);
    assert!(
        store
            .try_acquire(&expired_task, &holder("a"), long_ago, &policy)
            .await
            .is_ok()
    );
    let purged = store.purge_expired(start).await;
    assert!(matches!(purged, Ok(count) if count >= 1));
    assert!(matches!(
        store.find_active(&expired_task, long_ago).await,
        Ok(None)
    ));
}
