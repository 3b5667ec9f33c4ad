//! Inspectra background job worker runtime.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use inspectra_application::{JobHandler, QueueRegistry, QueueSettings, SystemClock};
use inspectra_core::{AppError, AppResult};
use inspectra_domain::{QueueName, REPORT_QUEUE_NAME, RetryPolicy, SYNC_QUEUE_NAME};
use inspectra_infrastructure::{CalendarSyncJobHandler, PostgresJobStore, ReportRenderJobHandler};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    worker_id: String,
    sync_queue_concurrency: usize,
    report_queue_concurrency: usize,
    max_attempts: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    lock_seconds: u32,
    poll_interval_ms: u64,
    sync_service_url: String,
    report_service_url: String,
    collaborator_timeout_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.collaborator_timeout_seconds))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

    let sync_queue = QueueName::new(SYNC_QUEUE_NAME)?;
    let report_queue = QueueName::new(REPORT_QUEUE_NAME)?;
    let registry = QueueRegistry::new(Arc::new(PostgresJobStore::new(pool)), Arc::new(SystemClock))
        .with_worker_id(config.worker_id.clone())
        .declare_queue(
            sync_queue.clone(),
            config.queue_settings(config.sync_queue_concurrency)?,
        )
        .declare_queue(
            report_queue.clone(),
            config.queue_settings(config.report_queue_concurrency)?,
        );

    let sync_handler: Arc<dyn JobHandler> = Arc::new(CalendarSyncJobHandler::new(
        http_client.clone(),
        config.sync_service_url.clone(),
    ));
    let report_handler: Arc<dyn JobHandler> = Arc::new(ReportRenderJobHandler::new(
        http_client,
        config.report_service_url.clone(),
    ));
    registry.create_worker(&sync_queue, sync_handler).await?;
    registry.create_worker(&report_queue, report_handler).await?;

    info!(
        worker_id = %config.worker_id,
        sync_queue_concurrency = config.sync_queue_concurrency,
        report_queue_concurrency = config.report_queue_concurrency,
        max_attempts = config.max_attempts,
        lock_seconds = config.lock_seconds,
        "inspectra-worker started"
    );

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(error = %error, "failed to listen for shutdown signal");
    }

    info!(worker_id = %config.worker_id, "shutdown requested; draining in-flight jobs");
    registry.shutdown().await;

    Ok(())
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Unavailable(format!("failed to connect to database: {error}")))
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let worker_id = env::var("WORKER_ID")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let sync_queue_concurrency = parse_env_usize("SYNC_QUEUE_CONCURRENCY", 4)?;
        let report_queue_concurrency = parse_env_usize("REPORT_QUEUE_CONCURRENCY", 2)?;
        let max_attempts = parse_env_u32("JOB_MAX_ATTEMPTS", 3)?;
        let backoff_base_ms = parse_env_u64("JOB_BACKOFF_BASE_MS", 1_000)?;
        let backoff_max_ms = parse_env_u64("JOB_BACKOFF_MAX_MS", 60_000)?;
        let lock_seconds = parse_env_u32("JOB_LOCK_SECONDS", 120)?;
        let poll_interval_ms = parse_env_u64("WORKER_POLL_INTERVAL_MS", 1_000)?;
        let sync_service_url = required_env("SYNC_SERVICE_URL")?;
        let report_service_url = required_env("REPORT_SERVICE_URL")?;
        let collaborator_timeout_seconds = parse_env_u64("COLLABORATOR_TIMEOUT_SECONDS", 30)?;

        if backoff_max_ms < backoff_base_ms {
            return Err(AppError::Validation(
                "JOB_BACKOFF_MAX_MS must not be lower than JOB_BACKOFF_BASE_MS".to_owned(),
            ));
        }

        if collaborator_timeout_seconds == 0 {
            return Err(AppError::Validation(
                "COLLABORATOR_TIMEOUT_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            worker_id,
            sync_queue_concurrency,
            report_queue_concurrency,
            max_attempts,
            backoff_base_ms,
            backoff_max_ms,
            lock_seconds,
            poll_interval_ms,
            sync_service_url,
            report_service_url,
            collaborator_timeout_seconds,
        })
    }

    fn queue_settings(&self, concurrency: usize) -> AppResult<QueueSettings> {
        let retry_policy = RetryPolicy::new(self.max_attempts)?
            .with_backoff(self.backoff_base_ms, self.backoff_max_ms);

        Ok(QueueSettings::new(concurrency)?
            .with_retry_policy(retry_policy)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))?
            .with_lock_seconds(self.lock_seconds)?)
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    let value = env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
