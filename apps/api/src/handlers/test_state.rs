use std::sync::Arc;

use inspectra_application::{
    ClaimCoordinator, JobStore, QueueRegistry, QueueSettings, SystemClock,
};
use inspectra_core::ActorIdentity;
use inspectra_domain::{LeasePolicy, QueueName, SYNC_QUEUE_NAME};
use inspectra_infrastructure::{InMemoryJobStore, InMemoryLeaseStore, PostgresJobStore};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::state::AppState;

pub(crate) fn actor(subject: &str) -> ActorIdentity {
    ActorIdentity::new(subject, subject)
}

pub(crate) fn enforcing_coordinator() -> ClaimCoordinator {
    ClaimCoordinator::new(
        Arc::new(InMemoryLeaseStore::new()),
        LeasePolicy::default(),
        Arc::new(SystemClock),
    )
}

fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .connect_lazy("postgres://inspectra@127.0.0.1:1/inspectra")
        .unwrap_or_else(|_| unreachable!())
}

pub(crate) fn app_state(claim_coordinator: ClaimCoordinator) -> AppState {
    state_with_job_store(claim_coordinator, Arc::new(InMemoryJobStore::new()))
}

/// State whose job store rejects every call as unavailable.
pub(crate) async fn offline_job_store_state(claim_coordinator: ClaimCoordinator) -> AppState {
    let closed_pool = lazy_pool();
    closed_pool.close().await;
    state_with_job_store(claim_coordinator, Arc::new(PostgresJobStore::new(closed_pool)))
}

fn state_with_job_store(
    claim_coordinator: ClaimCoordinator,
    job_store: Arc<dyn JobStore>,
) -> AppState {
    let sync_queue = QueueName::new(SYNC_QUEUE_NAME).unwrap_or_else(|_| unreachable!());
    let queue_registry = QueueRegistry::new(job_store.clone(), Arc::new(SystemClock))
        .declare_queue(sync_queue, QueueSettings::default());
    let postgres_pool = lazy_pool();

    AppState {
        claim_coordinator,
        queue_registry: Arc::new(queue_registry),
        job_store,
        postgres_pool,
        redis_client: None,
        redis_required: false,
        frontend_url: "http://localhost:3000".to_owned(),
    }
}
