use inspectra_application::QueueStats;
use inspectra_domain::{Job, Lease, QueueName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// Health response payload.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/health-response.ts"
)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ready: bool,
    pub postgres: HealthDependencyStatus,
    pub redis: HealthDependencyStatus,
}

/// Status of one backing dependency.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/health-dependency-status.ts"
)]
pub struct HealthDependencyStatus {
    pub status: &'static str,
    pub detail: Option<String>,
}

/// Result of a claim attempt.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/claim-response.ts"
)]
pub struct ClaimResponse {
    pub claimed: bool,
    pub expires_at: Option<String>,
    /// Suggested renewal cadence for the console while the claim is held.
    pub renew_after_ms: Option<u64>,
    pub held_by: Option<String>,
}

/// Result of a renewal attempt.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/renew-claim-response.ts"
)]
pub struct RenewClaimResponse {
    pub renewed: bool,
    pub expires_at: Option<String>,
    pub held_by: Option<String>,
}

/// Active lease on one task.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/lease-response.ts"
)]
pub struct LeaseResponse {
    pub task_id: String,
    pub holder_id: String,
    pub acquired_at: String,
    pub renewed_at: Option<String>,
    pub expires_at: String,
}

impl From<Lease> for LeaseResponse {
    fn from(value: Lease) -> Self {
        Self {
            task_id: value.task_id().as_str().to_owned(),
            holder_id: value.holder_id().as_str().to_owned(),
            acquired_at: value.acquired_at().to_rfc3339(),
            renewed_at: value.renewed_at().map(|renewed_at| renewed_at.to_rfc3339()),
            expires_at: value.expires_at().to_rfc3339(),
        }
    }
}

/// Incoming payload for job submission.
#[derive(Debug, Deserialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/enqueue-job-request.ts"
)]
pub struct EnqueueJobRequest {
    #[ts(type = "unknown")]
    pub payload: Value,
    pub priority: Option<i16>,
    pub max_attempts: Option<u32>,
    pub delay_seconds: Option<u64>,
}

/// Identifier of an accepted job.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/enqueue-job-response.ts"
)]
pub struct EnqueueJobResponse {
    pub job_id: String,
}

/// API representation of a background job.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/job-response.ts"
)]
pub struct JobResponse {
    pub job_id: String,
    pub queue_name: String,
    pub state: String,
    pub priority: i16,
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: String,
    pub available_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
}

impl From<Job> for JobResponse {
    fn from(value: Job) -> Self {
        Self {
            job_id: value.id.to_string(),
            queue_name: value.queue_name.as_str().to_owned(),
            state: value.state.as_str().to_owned(),
            priority: value.priority,
            attempt: value.attempt,
            max_attempts: value.max_attempts,
            last_error: value.last_error,
            enqueued_at: value.enqueued_at.to_rfc3339(),
            available_at: value.available_at.to_rfc3339(),
            updated_at: value.updated_at.to_rfc3339(),
            finished_at: value.finished_at.map(|finished_at| finished_at.to_rfc3339()),
        }
    }
}

/// Per-state job counts for one queue.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/queue-stats-response.ts"
)]
pub struct QueueStatsResponse {
    pub queue_name: String,
    pub queued: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStatsResponse {
    pub fn new(queue_name: &QueueName, stats: QueueStats) -> Self {
        Self {
            queue_name: queue_name.as_str().to_owned(),
            queued: stats.queued,
            active: stats.active,
            completed: stats.completed,
            failed: stats.failed,
        }
    }
}
