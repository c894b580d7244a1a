// libs/call-signaling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::handlers::*;
use crate::services::coordinator::CallCoordinator;

/// Creates the call signaling routes
/// Follows the RESTful API design pattern used by other cells
pub fn call_signaling_routes(coordinator: Arc<CallCoordinator>) -> Router {
    Router::new()
        // System
        .route("/health", get(signaling_health_check))
        // Call lifecycle
        .route("/calls", post(initiate_call))
        .route("/calls/{call_id}", get(get_call))
        .route("/calls/{call_id}/accept", post(accept_call))
        .route("/calls/{call_id}/reject", post(reject_call))
        .route("/calls/{call_id}/end", delete(end_call))
        // User queries
        .route("/users/{user_id}/calls", get(get_user_calls))
        .route("/users/{user_id}/calls/pending", get(get_pending_calls))
        .route("/users/{user_id}/events", get(poll_user_events))
        .with_state(coordinator)
}
