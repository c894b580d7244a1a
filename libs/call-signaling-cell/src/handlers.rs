// libs/call-signaling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use shared_models::error::AppError;

use crate::error::CallSignalingError;
use crate::models::{CallActionRequest, InitiateCallRequest};
use crate::services::coordinator::CallCoordinator;

const DEFAULT_POLL_TIMEOUT_MS: u64 = 25_000;
const MAX_POLL_TIMEOUT_MS: u64 = 60_000;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct EventPollQuery {
    pub timeout_ms: Option<u64>,
}

// ==============================================================================
// CALL LIFECYCLE HANDLERS
// ==============================================================================

/// Start ringing a callee
#[axum::debug_handler]
pub async fn initiate_call(
    State(coordinator): State<Arc<CallCoordinator>>,
    Json(request): Json<InitiateCallRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    validate_initiate_request(&request)?;

    info!(
        "Call initiation request: {} -> {}",
        request.caller_id, request.callee_id
    );
    let call = coordinator.initiate_call(request).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "call": call,
            "message": "Call initiated"
        })),
    ))
}

/// Get the current state of a call
#[axum::debug_handler]
pub async fn get_call(
    State(coordinator): State<Arc<CallCoordinator>>,
    Path(call_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let call = coordinator
        .get_active_call(&call_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Call {} not found", call_id)))?;

    Ok(Json(json!({
        "success": true,
        "call": call
    })))
}

/// Accept a ringing call
#[axum::debug_handler]
pub async fn accept_call(
    State(coordinator): State<Arc<CallCoordinator>>,
    Path(call_id): Path<String>,
    Json(request): Json<CallActionRequest>,
) -> Result<Json<Value>, AppError> {
    let call = coordinator
        .accept_call(&call_id, &request.user_id)
        .await
        .map_err(map_call_error)?;

    Ok(Json(json!({
        "success": true,
        "call": call,
        "message": "Call accepted"
    })))
}

/// Reject a ringing call
#[axum::debug_handler]
pub async fn reject_call(
    State(coordinator): State<Arc<CallCoordinator>>,
    Path(call_id): Path<String>,
    Json(request): Json<CallActionRequest>,
) -> Result<Json<Value>, AppError> {
    let call = coordinator
        .reject_call(&call_id, &request.user_id)
        .await
        .map_err(map_call_error)?;

    Ok(Json(json!({
        "success": true,
        "call": call,
        "message": "Call rejected"
    })))
}

/// End a ringing or accepted call
#[axum::debug_handler]
pub async fn end_call(
    State(coordinator): State<Arc<CallCoordinator>>,
    Path(call_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let call = coordinator.end_call(&call_id).await.map_err(map_call_error)?;

    Ok(Json(json!({
        "success": true,
        "call": call,
        "message": "Call ended"
    })))
}

// ==============================================================================
// USER QUERY HANDLERS
// ==============================================================================

/// All active calls a user participates in
#[axum::debug_handler]
pub async fn get_user_calls(
    State(coordinator): State<Arc<CallCoordinator>>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let calls = coordinator.get_user_active_calls(&user_id).await;

    Ok(Json(json!({
        "success": true,
        "count": calls.len(),
        "calls": calls
    })))
}

/// Ringing calls waiting for a user, for clients that poll instead of
/// holding an event subscription
#[axum::debug_handler]
pub async fn get_pending_calls(
    State(coordinator): State<Arc<CallCoordinator>>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let calls = coordinator.get_pending_calls(&user_id).await;

    Ok(Json(json!({
        "success": true,
        "count": calls.len(),
        "calls": calls
    })))
}

/// Long-poll for the next event addressed to a user. Responds 204 when the
/// timeout elapses without an event.
#[axum::debug_handler]
pub async fn poll_user_events(
    State(coordinator): State<Arc<CallCoordinator>>,
    Path(user_id): Path<String>,
    Query(query): Query<EventPollQuery>,
) -> Response {
    let wait = Duration::from_millis(
        query
            .timeout_ms
            .unwrap_or(DEFAULT_POLL_TIMEOUT_MS)
            .min(MAX_POLL_TIMEOUT_MS),
    );

    let mut receiver = coordinator.subscribe_user(&user_id);
    let response = match timeout(wait, receiver.recv()).await {
        Ok(Ok(event)) => Json(json!({
            "success": true,
            "event": event
        }))
        .into_response(),
        Ok(Err(e)) => {
            debug!("Event stream interrupted for user {}: {}", user_id, e);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    };

    // Drop the receiver before sweeping so this poll's own channel counts as
    // idle unless a concurrent poll still holds one
    drop(receiver);
    coordinator.prune_idle_channels();

    response
}

// ==============================================================================
// SYSTEM HANDLERS
// ==============================================================================

/// Health check for the signaling cell
#[axum::debug_handler]
pub async fn signaling_health_check(
    State(coordinator): State<Arc<CallCoordinator>>,
) -> Json<Value> {
    let connected = coordinator.is_connected();

    Json(json!({
        "status": if connected { "healthy" } else { "not_connected" },
        "transport_mode": coordinator.transport_mode(),
        "transport_connected": connected,
        "active_calls": coordinator.active_call_count().await
    }))
}

// Private helper methods

fn validate_initiate_request(request: &InitiateCallRequest) -> Result<(), AppError> {
    let required = [
        ("caller_id", &request.caller_id),
        ("caller_name", &request.caller_name),
        ("callee_id", &request.callee_id),
        ("callee_name", &request.callee_name),
        ("appointment_id", &request.appointment_id),
        ("channel_name", &request.channel_name),
    ];

    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(AppError::ValidationError(format!("{} is required", field)));
        }
    }

    Ok(())
}

fn map_call_error(err: CallSignalingError) -> AppError {
    match err {
        CallSignalingError::CallNotFound(call_id) => {
            AppError::NotFound(format!("Call {} not found", call_id))
        }
        CallSignalingError::InvalidStatusTransition { .. } => AppError::Conflict(err.to_string()),
        CallSignalingError::NotConnected
        | CallSignalingError::TransportError(_)
        | CallSignalingError::RedisError(_) => AppError::ServiceUnavailable(err.to_string()),
        _ => AppError::Internal(err.to_string()),
    }
}
