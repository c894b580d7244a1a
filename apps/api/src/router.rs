use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use call_signaling_cell::router::call_signaling_routes;
use call_signaling_cell::CallCoordinator;

pub fn create_router(coordinator: Arc<CallCoordinator>) -> Router {
    Router::new()
        .route("/", get(|| async { "Call signaling API is running!" }))
        .nest("/signaling", call_signaling_routes(coordinator))
        // Other cells added later
}
