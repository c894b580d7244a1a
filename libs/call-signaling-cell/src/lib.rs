// libs/call-signaling-cell/src/lib.rs
//! # Call Signaling Cell
//!
//! This cell coordinates call signaling between patients and doctors:
//! who is ringing whom, whether the call was answered, and when it ended.
//! It owns the call lifecycle only; media itself flows through the video
//! conferencing infrastructure on the channel named by each call.
//!
//! ## Features
//!
//! - **Call Lifecycle Tracking**: ringing, accepted, rejected and ended
//!   states with forward-only transitions
//! - **Pluggable Transport**: in-process loopback for development and tests,
//!   Redis pub/sub for multi-instance deployments
//! - **Multi-Subscriber Events**: any number of callbacks per event kind,
//!   fired in registration order and isolated from each other's panics
//! - **Per-User Event Channels**: long-poll friendly broadcast channels for
//!   clients that cannot hold a callback
//! - **Ring Expiry**: unanswered calls are rejected automatically after a
//!   configurable timeout
//!
//! ## Architecture
//!
//! The call signaling cell follows the established cell architecture pattern:
//!
//! ```text
//! +-----------------------------------------------------+
//! |                Call Signaling Cell                  |
//! +-----------------------------------------------------+
//! |  handlers.rs    |  HTTP endpoint handlers           |
//! |  router.rs      |  Route definitions                |
//! |  models.rs      |  Call, signal & event types       |
//! |  services/      |  Business logic layer             |
//! |    coordinator.rs| Call lifecycle coordination      |
//! |    events.rs    |  Subscriber & channel fan-out     |
//! |    transport.rs |  Transport trait + loopback impl  |
//! |    broker.rs    |  Redis pub/sub transport          |
//! +-----------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! ### Call Lifecycle
//! - `POST /calls` - Initiate a call
//! - `GET /calls/{call_id}` - Get call state
//! - `POST /calls/{call_id}/accept` - Accept a ringing call
//! - `POST /calls/{call_id}/reject` - Reject a ringing call
//! - `DELETE /calls/{call_id}/end` - End a call
//!
//! ### User Queries
//! - `GET /users/{user_id}/calls` - Active calls for a user
//! - `GET /users/{user_id}/calls/pending` - Ringing calls awaiting a user
//! - `GET /users/{user_id}/events` - Long-poll for the next call event
//!
//! ### System Administration
//! - `GET /health` - Health check
//!
//! ## Usage Example
//!
//! ```rust
//! use std::sync::Arc;
//! use call_signaling_cell::router::call_signaling_routes;
//! use call_signaling_cell::{CallCoordinator, LoopbackTransport};
//!
//! let coordinator = Arc::new(CallCoordinator::new(Arc::new(LoopbackTransport::new())));
//! let signaling_routes = call_signaling_routes(coordinator);
//! ```
//!
//! ## Configuration
//!
//! Environment variables (all optional):
//! - `REDIS_URL` - broker connection string; without it the cell runs on the
//!   in-process loopback transport
//! - `SIGNAL_CHANNEL` - Redis pub/sub channel name
//! - `CALL_RING_TIMEOUT_SECONDS` - ring timeout before auto-reject
//! - `CALL_PURGE_GRACE_SECONDS` - how long terminal calls stay readable
//! - `CALL_EXPIRY_SWEEP_INTERVAL_MS` - expiry sweeper cadence
//! - `CALL_EVENT_CHANNEL_CAPACITY` - event channel buffer size
//!
//! ## Subscribing to Call Events
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use call_signaling_cell::{CallCoordinator, LoopbackTransport, TransportSession};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = CallCoordinator::new(Arc::new(LoopbackTransport::new()));
//! coordinator.start(TransportSession::new("token").with_user("doctor-1")).await?;
//!
//! coordinator.on_incoming_call(|call| {
//!     println!("{} is calling {}", call.caller_name, call.callee_name);
//! });
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

// Re-export commonly used types
pub use models::{
    Call, CallActionRequest, CallEndedPayload, CallEvent, CallResponsePayload, CallSignal,
    CallStatus, DeclineReason, InitiateCallRequest, SignalEnvelope, TransportMode,
    TransportSession,
};

pub use error::CallSignalingError;

pub use services::{
    CallCoordinator, CallEventBus, CallEventReceiver, CallTransport, CoordinatorConfig,
    LoopbackTransport, RedisSignalTransport, SubscriptionId,
};

pub use router::call_signaling_routes;
