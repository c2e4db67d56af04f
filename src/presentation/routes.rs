// Route table for a dashboard node
use crate::infrastructure::http_transport::MESSAGES_PATH;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    branch_status, force_sync, health_check, latest_aggregate, list_schedules, put_metrics, receive_message,
    tier_snapshot,
};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route(MESSAGES_PATH, post(receive_message))
        .route("/dashboard/aggregates/:data_type", get(latest_aggregate))
        .route("/dashboard/schedules", get(list_schedules))
        .route("/dashboard/state", get(tier_snapshot))
        .route("/dashboard/sync", post(force_sync))
        .route("/dashboard/branches/:id/status", get(branch_status))
        .route("/metrics/:data_type", put(put_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
