use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inspectra_core::AppResult;
use inspectra_domain::{Job, JobHandlerError, JobId, QueueName};
use serde_json::Value;

/// Error recorded on a job whose worker stopped renewing its lock.
pub const EXPIRED_LOCK_ERROR: &str = "job lock expired";

/// Job creation payload for store implementations.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    /// Pre-generated job identifier.
    pub id: JobId,
    /// Target queue.
    pub queue_name: QueueName,
    /// Opaque handler payload.
    pub payload: Value,
    /// Higher values are claimed first.
    pub priority: i16,
    /// Retry ceiling for this job.
    pub max_attempts: u32,
    /// Enqueue timestamp.
    pub enqueued_at: DateTime<Utc>,
    /// Earliest claim timestamp.
    pub available_at: DateTime<Utc>,
}

/// Job claimed by one worker together with its fencing token.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    /// Job snapshot in `active` state.
    pub job: Job,
    /// Token required for every later mutation of this claim.
    pub lock_token: String,
    /// Worker that owns the claim.
    pub worker_id: String,
}

/// Per-state job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs waiting for a worker, including delayed retries.
    pub queued: u64,
    /// Jobs currently claimed.
    pub active: u64,
    /// Jobs that finished successfully.
    pub completed: u64,
    /// Jobs that failed terminally.
    pub failed: u64,
}

/// Durable job persistence port.
///
/// Claims must be exclusive across processes. A job whose `locked_until`
/// passed without completion is reclaimed with an incremented attempt while
/// that attempt stays within `max_attempts`; otherwise `fail_expired_locks`
/// moves it to `failed`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists one queued job. Unreachable backends return `AppError::Unavailable`.
    async fn enqueue(&self, job: NewJob) -> AppResult<Job>;

    /// Claims the next available job in priority then FIFO order.
    async fn claim_next(
        &self,
        queue_name: &QueueName,
        worker_id: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> AppResult<Option<ClaimedJob>>;

    /// Fails every job in the queue whose lock lapsed on its final attempt.
    ///
    /// Returns the failed jobs with `last_error` set to [`EXPIRED_LOCK_ERROR`].
    async fn fail_expired_locks(
        &self,
        queue_name: &QueueName,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Job>>;

    /// Extends the claim lock. Returns false when the token no longer owns the job.
    async fn extend_lock(
        &self,
        job_id: JobId,
        lock_token: &str,
        locked_until: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Marks one claimed job as completed.
    async fn complete(&self, job_id: JobId, lock_token: &str, now: DateTime<Utc>)
    -> AppResult<Job>;

    /// Returns one claimed job to the queue with an incremented attempt.
    async fn retry(
        &self,
        job_id: JobId,
        lock_token: &str,
        next_attempt: u32,
        available_at: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Job>;

    /// Marks one claimed job as failed terminally.
    async fn fail(
        &self,
        job_id: JobId,
        lock_token: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Job>;

    /// Returns one job by id.
    async fn find_job(&self, job_id: JobId) -> AppResult<Option<Job>>;

    /// Returns per-state counts for one queue.
    async fn queue_stats(&self, queue_name: &QueueName) -> AppResult<QueueStats>;
}

/// Handler registered for exactly one queue.
///
/// Delivery is at-least-once: a worker crash between the side effect and the
/// completion write replays the job, so handlers must be idempotent.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Executes one job payload.
    async fn handle(&self, job: &Job) -> Result<(), JobHandlerError>;
}

/// Monitoring collaborator notified when a job fails terminally.
#[async_trait]
pub trait JobFailureReporter: Send + Sync {
    /// Reports one failed job; `job.last_error` carries the final failure.
    async fn report_failed(&self, job: &Job);
}
