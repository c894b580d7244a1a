// libs/call-signaling-cell/src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallSignalingError {
    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Invalid call status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for CallSignalingError {
    fn from(err: anyhow::Error) -> Self {
        CallSignalingError::Internal(err.to_string())
    }
}
