use std::sync::Arc;

use inspectra_application::{
    ClaimCoordinator, Clock, JobStore, LeaseStore, QueueRegistry, QueueSettings, SystemClock,
};
use inspectra_core::{AppError, AppResult};
use inspectra_domain::{QueueName, REPORT_QUEUE_NAME, SYNC_QUEUE_NAME};
use inspectra_infrastructure::{
    InMemoryLeaseStore, PostgresJobStore, PostgresLeaseStore, RedisLeaseStore,
};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::api_config::{ApiConfig, LeaseStoreConfig};
use crate::state::AppState;

const LEASE_KEY_PREFIX: &str = "inspectra:task_claim";

pub fn build_app_state(pool: PgPool, config: &ApiConfig) -> AppResult<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let redis_client = config
        .redis_url
        .as_deref()
        .map(build_redis_client)
        .transpose()?;

    let claim_coordinator =
        build_claim_coordinator(&pool, config, redis_client.clone(), clock.clone())?;

    // Producers only; worker pools run in inspectra-worker.
    let job_store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool.clone()));
    let queue_settings = QueueSettings::default().with_retry_policy(config.retry_policy);
    let queue_registry = QueueRegistry::new(job_store.clone(), clock)
        .declare_queue(QueueName::new(SYNC_QUEUE_NAME)?, queue_settings.clone())
        .declare_queue(QueueName::new(REPORT_QUEUE_NAME)?, queue_settings);

    Ok(AppState {
        claim_coordinator,
        queue_registry: Arc::new(queue_registry),
        job_store,
        postgres_pool: pool,
        redis_client,
        redis_required: matches!(config.lease_store, LeaseStoreConfig::Redis { .. }),
        frontend_url: config.frontend_url.clone(),
    })
}

fn build_claim_coordinator(
    pool: &PgPool,
    config: &ApiConfig,
    redis_client: Option<redis::Client>,
    clock: Arc<dyn Clock>,
) -> AppResult<ClaimCoordinator> {
    let lease_store: Arc<dyn LeaseStore> = match &config.lease_store {
        LeaseStoreConfig::Postgres => Arc::new(PostgresLeaseStore::new(pool.clone())),
        LeaseStoreConfig::Redis { .. } => {
            let redis_client = redis_client.ok_or_else(|| {
                AppError::Validation("REDIS_URL is required when LEASE_STORE=redis".to_owned())
            })?;
            Arc::new(RedisLeaseStore::new(redis_client, LEASE_KEY_PREFIX))
        }
        LeaseStoreConfig::Memory => {
            warn!("task claims are held in process memory; run a single API instance only");
            Arc::new(InMemoryLeaseStore::new())
        }
        LeaseStoreConfig::Disabled => {
            warn!("task claims are disabled; every claim request is granted");
            return Ok(ClaimCoordinator::disabled(config.lease_policy, clock));
        }
    };

    info!(
        lease_store = config.lease_store.as_str(),
        lease_seconds = config.lease_policy.lease_seconds(),
        "task claim coordinator configured"
    );

    Ok(ClaimCoordinator::new(lease_store, config.lease_policy, clock))
}

fn build_redis_client(redis_url: &str) -> AppResult<redis::Client> {
    redis::Client::open(redis_url)
        .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))
}
