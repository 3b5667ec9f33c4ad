use std::sync::Arc;

use inspectra_application::{ClaimCoordinator, JobStore, QueueRegistry};
use sqlx::PgPool;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub claim_coordinator: ClaimCoordinator,
    pub queue_registry: Arc<QueueRegistry>,
    pub job_store: Arc<dyn JobStore>,
    pub postgres_pool: PgPool,
    pub redis_client: Option<redis::Client>,
    pub redis_required: bool,
    pub frontend_url: String,
}
