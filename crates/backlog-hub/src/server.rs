use crate::tracker::{MetricsPublisher, RefreshOutcome, RefreshTrigger, SnapshotSource, Tracker};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::Arc;

pub const REFRESHED_MESSAGE: &str = "the backlog has been refreshed!";
pub const IN_PROGRESS_MESSAGE: &str = "a refresh is already in progress";

pub fn router<S, P>(tracker: Arc<Tracker<S, P>>) -> Router
where
    S: SnapshotSource,
    P: MetricsPublisher,
{
    Router::new()
        .route("/refresh", get(refresh_handler::<S, P>))
        .route("/health", get(|| async { "ok" }))
        .with_state(tracker)
}

/// Runs a full pass before answering. The answer is always 200; the body
/// says whether the pass ran.
pub async fn refresh_handler<S, P>(
    State(tracker): State<Arc<Tracker<S, P>>>,
) -> (StatusCode, String)
where
    S: SnapshotSource,
    P: MetricsPublisher,
{
    let body = match tracker.refresh(RefreshTrigger::Http).await {
        RefreshOutcome::Completed(_) => REFRESHED_MESSAGE.to_string(),
        RefreshOutcome::AlreadyRunning => IN_PROGRESS_MESSAGE.to_string(),
        RefreshOutcome::Skipped(reason) => format!("refresh skipped: {reason}"),
    };
    (StatusCode::OK, body)
}
