use async_trait::async_trait;
use inspectra_domain::Job;
use tracing::error;

use crate::job_ports::JobFailureReporter;

/// Failure reporter that emits one structured error event per failed job.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingJobFailureReporter;

#[async_trait]
impl JobFailureReporter for TracingJobFailureReporter {
    async fn report_failed(&self, job: &Job) {
        error!(
            queue = %job.queue_name,
            job_id = %job.id,
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            error = job.last_error.as_deref().unwrap_or("unknown error"),
            "job failed permanently"
        );
    }
}
