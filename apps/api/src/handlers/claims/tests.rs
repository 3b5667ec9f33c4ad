use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use inspectra_application::{ClaimCoordinator, SystemClock};
use inspectra_domain::LeasePolicy;

use super::{
    acquire_claim_handler, current_claim_handler, release_claim_handler, renew_claim_handler,
};
use crate::handlers::test_state::{actor, app_state, enforcing_coordinator};

fn task(value: &str) -> Path<String> {
    Path(value.to_owned())
}

#[tokio::test]
async fn second_inspector_sees_current_holder() {
    let state = app_state(enforcing_coordinator());

    let first = acquire_claim_handler(
        State(state.clone()),
        Extension(actor("inspector-a")),
        task("task-1"),
    )
    .await;
    let Ok(first) = first else {
        panic!("first claim failed");
    };
    assert!(first.0.claimed);
    assert!(first.0.expires_at.is_some());
    assert!(first.0.renew_after_ms.is_some_and(|ms| ms > 0));

    let second = acquire_claim_handler(
        State(state.clone()),
        Extension(actor("inspector-b")),
        task("task-1"),
    )
    .await;
    let Ok(second) = second else {
        panic!("second claim failed");
    };
    assert!(!second.0.claimed);
    assert_eq!(second.0.held_by.as_deref(), Some("inspector-a"));

    let current = current_claim_handler(
        State(state),
        Extension(actor("inspector-b")),
        task("task-1"),
    )
    .await;
    assert!(matches!(
        current,
        Ok(lease) if lease.0.as_ref().is_some_and(|lease| lease.holder_id == "inspector-a")
    ));
}

#[tokio::test]
async fn holder_renews_and_release_frees_the_task() {
    let state = app_state(enforcing_coordinator());
    assert!(
        acquire_claim_handler(
            State(state.clone()),
            Extension(actor("inspector-a")),
            task("task-1"),
        )
        .await
        .is_ok()
    );

    let renewed = renew_claim_handler(
        State(state.clone()),
        Extension(actor("inspector-a")),
        task("task-1"),
    )
    .await;
    assert!(matches!(renewed, Ok(ref response) if response.0.renewed));

    let ignored = release_claim_handler(
        State(state.clone()),
        Extension(actor("inspector-b")),
        task("task-1"),
    )
    .await;
    assert!(matches!(ignored, Ok(StatusCode::NO_CONTENT)));
    let still_held = current_claim_handler(
        State(state.clone()),
        Extension(actor("inspector-a")),
        task("task-1"),
    )
    .await;
    assert!(matches!(still_held, Ok(ref lease) if lease.0.is_some()));

    let released = release_claim_handler(
        State(state.clone()),
        Extension(actor("inspector-a")),
        task("task-1"),
    )
    .await;
    assert!(matches!(released, Ok(StatusCode::NO_CONTENT)));

    let taken_over = acquire_claim_handler(
        State(state),
        Extension(actor("inspector-b")),
        task("task-1"),
    )
    .await;
    assert!(matches!(taken_over, Ok(ref response) if response.0.claimed));
}

#[tokio::test]
async fn renewing_without_a_lease_reports_lost() {
    let state = app_state(enforcing_coordinator());

    let renewed = renew_claim_handler(
        State(state),
        Extension(actor("inspector-a")),
        task("task-9"),
    )
    .await;
    let Ok(renewed) = renewed else {
        panic!("renewal request failed");
    };
    assert!(!renewed.0.renewed);
    assert!(renewed.0.held_by.is_none());
}

#[tokio::test]
async fn blank_task_id_is_a_bad_request() {
    let state = app_state(enforcing_coordinator());

    let result = acquire_claim_handler(
        State(state),
        Extension(actor("inspector-a")),
        task("   "),
    )
    .await;
    let Err(error) = result else {
        panic!("blank task id must be rejected");
    };
    assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn disabled_claims_never_block() {
    let state = app_state(ClaimCoordinator::disabled(
        LeasePolicy::default(),
        Arc::new(SystemClock),
    ));

    for subject in ["inspector-a", "inspector-b"] {
        let claimed =
            acquire_claim_handler(State(state.clone()), Extension(actor(subject)), task("task-1"))
                .await;
        assert!(matches!(claimed, Ok(ref response) if response.0.claimed));
    }

    let current = current_claim_handler(
        State(state),
        Extension(actor("inspector-a")),
        task("task-1"),
    )
    .await;
    assert!(matches!(current, Ok(ref lease) if lease.0.is_none()));
}
