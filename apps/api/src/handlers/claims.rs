use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use inspectra_core::ActorIdentity;
use inspectra_domain::{AcquireOutcome, HolderId, RenewOutcome, TaskId};
use tracing::info;

use crate::dto::{ClaimResponse, LeaseResponse, RenewClaimResponse};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn acquire_claim_handler(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorIdentity>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ClaimResponse>> {
    let task_id = TaskId::new(task_id)?;
    let holder_id = HolderId::new(actor.subject())?;

    let response = match state.claim_coordinator.acquire(&task_id, &holder_id).await? {
        AcquireOutcome::Claimed { expires_at } => {
            info!(task_id = %task_id, holder_id = %holder_id, "task claimed");
            let renew_after_ms = state.claim_coordinator.policy().renew_interval().as_millis();
            ClaimResponse {
                claimed: true,
                expires_at: Some(expires_at.to_rfc3339()),
                renew_after_ms: Some(u64::try_from(renew_after_ms).unwrap_or(u64::MAX)),
                held_by: None,
            }
        }
        AcquireOutcome::Held { held_by } => ClaimResponse {
            claimed: false,
            expires_at: None,
            renew_after_ms: None,
            held_by: Some(held_by.as_str().to_owned()),
        },
    };

    Ok(Json(response))
}

pub async fn renew_claim_handler(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorIdentity>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<RenewClaimResponse>> {
    let task_id = TaskId::new(task_id)?;
    let holder_id = HolderId::new(actor.subject())?;

    let response = match state.claim_coordinator.renew(&task_id, &holder_id).await? {
        RenewOutcome::Renewed { expires_at } => RenewClaimResponse {
            renewed: true,
            expires_at: Some(expires_at.to_rfc3339()),
            held_by: None,
        },
        RenewOutcome::Lost { held_by } => {
            info!(task_id = %task_id, holder_id = %holder_id, "task claim lost");
            RenewClaimResponse {
                renewed: false,
                expires_at: None,
                held_by: held_by.map(|held_by| held_by.as_str().to_owned()),
            }
        }
    };

    Ok(Json(response))
}

pub async fn release_claim_handler(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorIdentity>,
    Path(task_id): Path<String>,
) -> ApiResult<StatusCode> {
    let task_id = TaskId::new(task_id)?;
    let holder_id = HolderId::new(actor.subject())?;

    state.claim_coordinator.release(&task_id, &holder_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn current_claim_handler(
    State(state): State<AppState>,
    Extension(_actor): Extension<ActorIdentity>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Option<LeaseResponse>>> {
    let task_id = TaskId::new(task_id)?;
    let lease = state.claim_coordinator.current_lease(&task_id).await?;

    Ok(Json(lease.map(LeaseResponse::from)))
}

#[cfg(test)]
mod tests;
