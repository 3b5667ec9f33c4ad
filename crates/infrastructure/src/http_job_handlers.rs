//! HTTP job handlers for the calendar-sync and report-render collaborators.

use async_trait::async_trait;
use inspectra_application::JobHandler;
use inspectra_domain::{Job, JobHandlerError};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
const JOB_ATTEMPT_HEADER: &str = "X-Inspectra-Job-Attempt";

/// Pushes inspection schedule changes to the calendar collaborator.
///
/// Payload: `{"inspection_id": "...", ...}`; the whole payload is forwarded.
pub struct CalendarSyncJobHandler {
    http_client: reqwest::Client,
    endpoint: String,
}

impl CalendarSyncJobHandler {
    /// Creates a handler posting to `endpoint`.
    #[must_use]
    pub fn new(http_client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl JobHandler for CalendarSyncJobHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobHandlerError> {
        let inspection_id = required_string(&job.payload, "inspection_id")?;

        post_job(
            &self.http_client,
            self.endpoint.as_str(),
            job,
            &json!({
                "inspection_id": inspection_id,
                "job_id": job.id,
                "payload": job.payload,
            }),
        )
        .await
    }
}

/// Asks the report collaborator to render one PDF report.
///
/// Payload: `{"report_id": "...", "template": "..."?}`.
pub struct ReportRenderJobHandler {
    http_client: reqwest::Client,
    endpoint: String,
}

impl ReportRenderJobHandler {
    /// Creates a handler posting to `endpoint`.
    #[must_use]
    pub fn new(http_client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl JobHandler for ReportRenderJobHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobHandlerError> {
        let report_id = required_string(&job.payload, "report_id")?;
        let template = job
            .payload
            .get("template")
            .and_then(Value::as_str)
            .unwrap_or("inspection-summary");

        post_job(
            &self.http_client,
            self.endpoint.as_str(),
            job,
            &json!({
                "report_id": report_id,
                "template": template,
                "job_id": job.id,
            }),
        )
        .await
    }
}

fn required_string<'a>(payload: &'a Value, field: &str) -> Result<&'a str, JobHandlerError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            JobHandlerError::permanent(format!("job payload requires string field '{field}'"))
        })
}

async fn post_job(
    http_client: &reqwest::Client,
    endpoint: &str,
    job: &Job,
    body: &Value,
) -> Result<(), JobHandlerError> {
    let response = http_client
        .post(endpoint)
        .header(IDEMPOTENCY_KEY_HEADER, job.id.to_string())
        .header(JOB_ATTEMPT_HEADER, job.attempt.to_string())
        .json(body)
        .send()
        .await
        .map_err(|error| {
            JobHandlerError::retryable(format!("collaborator transport error: {error}"))
        })?;

    let status = response.status();
    if status.is_success() {
        debug!(job_id = %job.id, status = status.as_u16(), "collaborator accepted job");
        return Ok(());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
    Err(failure_for_status(status, body.as_str()))
}

/// Classifies a non-success collaborator response.
///
/// Server errors, throttling and request timeouts are worth another attempt;
/// any other client error means the payload itself was rejected.
fn failure_for_status(status: StatusCode, body: &str) -> JobHandlerError {
    let message = format!("collaborator returned status {}: {body}", status.as_u16());

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return JobHandlerError::retryable(message);
    }

    JobHandlerError::permanent(message)
}
