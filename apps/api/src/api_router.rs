use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use inspectra_core::AppError;
use tower_http::trace::TraceLayer;
use tower_sessions::SessionManagerLayer;
use tower_sessions_sqlx_store::PostgresStore;

use crate::state::AppState;
use crate::{handlers, middleware};

mod cors;

pub fn build_router(
    app_state: AppState,
    session_layer: SessionManagerLayer<PostgresStore>,
) -> Result<Router, AppError> {
    let protected_routes = Router::new()
        .route(
            "/api/tasks/{task_id}/claim",
            get(handlers::claims::current_claim_handler)
                .post(handlers::claims::acquire_claim_handler)
                .delete(handlers::claims::release_claim_handler),
        )
        .route(
            "/api/tasks/{task_id}/claim/renew",
            post(handlers::claims::renew_claim_handler),
        )
        .route(
            "/api/queues/{queue_name}/jobs",
            post(handlers::jobs::enqueue_job_handler),
        )
        .route(
            "/api/queues/{queue_name}/stats",
            get(handlers::jobs::queue_stats_handler),
        )
        .route("/api/jobs/{job_id}", get(handlers::jobs::get_job_handler))
        .route_layer(from_fn(middleware::require_actor));

    let cors_layer = cors::build_cors_layer(app_state.frontend_url.as_str())?;

    Ok(Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(protected_routes)
        .route_layer(from_fn_with_state(
            app_state.clone(),
            middleware::require_same_origin_for_mutations,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .layer(session_layer)
        .with_state(app_state))
}
