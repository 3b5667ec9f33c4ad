use std::time::Duration;

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use inspectra_application::EnqueueOptions;
use inspectra_core::{ActorIdentity, AppError};
use inspectra_domain::{JobId, QueueName};
use tracing::info;

use crate::dto::{EnqueueJobRequest, EnqueueJobResponse, JobResponse, QueueStatsResponse};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn enqueue_job_handler(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorIdentity>,
    Path(queue_name): Path<String>,
    Json(payload): Json<EnqueueJobRequest>,
) -> ApiResult<(StatusCode, Json<EnqueueJobResponse>)> {
    let queue_name = QueueName::new(queue_name)?;
    let queue = state.queue_registry.queue(&queue_name).await?;

    let options = EnqueueOptions {
        priority: payload.priority.unwrap_or_default(),
        max_attempts: payload.max_attempts,
        delay: payload.delay_seconds.map(Duration::from_secs),
    };
    let job_id = queue.enqueue_with(payload.payload, options).await?;

    info!(
        queue = %queue_name,
        job_id = %job_id,
        subject = %actor.subject(),
        "job enqueued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueJobResponse {
            job_id: job_id.to_string(),
        }),
    ))
}

pub async fn queue_stats_handler(
    State(state): State<AppState>,
    Extension(_actor): Extension<ActorIdentity>,
    Path(queue_name): Path<String>,
) -> ApiResult<Json<QueueStatsResponse>> {
    let queue_name = QueueName::new(queue_name)?;
    let queue = state.queue_registry.queue(&queue_name).await?;
    let stats = queue.stats().await?;

    Ok(Json(QueueStatsResponse::new(&queue_name, stats)))
}

pub async fn get_job_handler(
    State(state): State<AppState>,
    Extension(_actor): Extension<ActorIdentity>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job_id = JobId::parse(job_id.as_str())?;
    let job = state
        .job_store
        .find_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job '{job_id}' does not exist")))?;

    Ok(Json(JobResponse::from(job)))
}
