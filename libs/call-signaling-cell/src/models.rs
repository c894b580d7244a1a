// libs/call-signaling-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// CALL LIFECYCLE TYPES
// ==============================================================================

/// Lifecycle state of a call. Transitions are forward-only: once a call
/// leaves `Ringing` it never returns, and terminal states accept nothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ringing,
    Accepted,
    Rejected,
    Ended,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Rejected | CallStatus::Ended)
    }

    pub fn can_transition_to(&self, target: &CallStatus) -> bool {
        matches!(
            (self, target),
            (CallStatus::Ringing, CallStatus::Accepted)
                | (CallStatus::Ringing, CallStatus::Rejected)
                | (CallStatus::Ringing, CallStatus::Ended)
                | (CallStatus::Accepted, CallStatus::Ended)
        )
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Ringing => write!(f, "ringing"),
            CallStatus::Accepted => write!(f, "accepted"),
            CallStatus::Rejected => write!(f, "rejected"),
            CallStatus::Ended => write!(f, "ended"),
        }
    }
}

/// A tracked call between two participants, keyed by `call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub callee_id: String,
    pub callee_name: String,
    pub appointment_id: String,
    pub channel_name: String,
    pub status: CallStatus,
    pub initiated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Call {
    /// Build a fresh ringing call from an initiation request. Each call gets
    /// its own identifier even when two requests land in the same millisecond.
    pub fn from_request(request: InitiateCallRequest) -> Self {
        Self {
            call_id: generate_call_id(),
            caller_id: request.caller_id,
            caller_name: request.caller_name,
            callee_id: request.callee_id,
            callee_name: request.callee_name,
            appointment_id: request.appointment_id,
            channel_name: request.channel_name,
            status: CallStatus::Ringing,
            initiated_at: Utc::now(),
            start_time: None,
            ended_at: None,
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }
}

fn generate_call_id() -> String {
    format!(
        "call_{}_{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

// ==============================================================================
// SIGNAL WIRE FORMAT
// ==============================================================================

/// Signals exchanged between coordinator instances over the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum CallSignal {
    InitiateCall(Call),
    CallResponse(CallResponsePayload),
    CallEnded(CallEndedPayload),
}

impl CallSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            CallSignal::InitiateCall(_) => "initiate-call",
            CallSignal::CallResponse(_) => "call-response",
            CallSignal::CallEnded(_) => "call-ended",
        }
    }
}

/// Envelope wrapping a signal on the wire. `origin` identifies the emitting
/// transport instance and is only used for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub signal: CallSignal,
    pub origin: String,
    pub emitted_at: DateTime<Utc>,
}

impl SignalEnvelope {
    pub fn new(signal: CallSignal) -> Self {
        Self {
            signal,
            origin: String::new(),
            emitted_at: Utc::now(),
        }
    }
}

/// How a transport moves signals around.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// In-process delivery only, for development and tests.
    Loopback,
    /// Cross-instance delivery through a message broker.
    Broker,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Loopback => write!(f, "loopback"),
            TransportMode::Broker => write!(f, "broker"),
        }
    }
}

/// Credentials handed to the transport at connect time. The transport passes
/// the token through without inspecting it.
#[derive(Debug, Clone, Default)]
pub struct TransportSession {
    pub token: String,
    pub user_id: Option<String>,
    pub role: Option<String>,
}

impl TransportSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
            role: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

// ==============================================================================
// SUBSCRIBER EVENT TYPES
// ==============================================================================

/// Why a call was answered negatively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    /// The callee explicitly rejected the call.
    Declined,
    /// Nobody answered before the ring timeout elapsed.
    RingTimeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallResponsePayload {
    pub call_id: String,
    pub accepted: bool,
    pub caller_id: String,
    pub callee_id: String,
    pub appointment_id: String,
    pub channel_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<DeclineReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEndedPayload {
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub appointment_id: String,
    pub ended_at: DateTime<Utc>,
}

/// Event delivered to per-user and global event channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum CallEvent {
    IncomingCall(Call),
    CallResponse(CallResponsePayload),
    CallEnded(CallEndedPayload),
}

// ==============================================================================
// REQUEST STRUCTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateCallRequest {
    pub caller_id: String,
    pub caller_name: String,
    pub callee_id: String,
    pub callee_name: String,
    pub appointment_id: String,
    pub channel_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CallActionRequest {
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_request() -> InitiateCallRequest {
        InitiateCallRequest {
            caller_id: "doctor-1".to_string(),
            caller_name: "Dr. Acula".to_string(),
            callee_id: "patient-1".to_string(),
            callee_name: "Pat Ient".to_string(),
            appointment_id: "appt-1".to_string(),
            channel_name: "appt-1-video".to_string(),
        }
    }

    #[test]
    fn test_new_call_starts_ringing() {
        let call = Call::from_request(test_request());

        assert_eq!(call.status, CallStatus::Ringing);
        assert_eq!(call.caller_id, "doctor-1");
        assert_eq!(call.callee_id, "patient-1");
        assert!(call.start_time.is_none(), "Ringing call should have no start time");
        assert!(call.ended_at.is_none(), "Ringing call should have no end time");
    }

    #[test]
    fn test_call_ids_are_unique_for_identical_requests() {
        let first = Call::from_request(test_request());
        let second = Call::from_request(test_request());

        assert_ne!(first.call_id, second.call_id, "Every initiation should mint its own id");
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        assert!(CallStatus::Ringing.can_transition_to(&CallStatus::Accepted));
        assert!(CallStatus::Ringing.can_transition_to(&CallStatus::Rejected));
        assert!(CallStatus::Ringing.can_transition_to(&CallStatus::Ended));
        assert!(CallStatus::Accepted.can_transition_to(&CallStatus::Ended));

        assert!(!CallStatus::Accepted.can_transition_to(&CallStatus::Ringing));
        assert!(!CallStatus::Accepted.can_transition_to(&CallStatus::Rejected));
        assert!(!CallStatus::Rejected.can_transition_to(&CallStatus::Accepted));
        assert!(!CallStatus::Rejected.can_transition_to(&CallStatus::Ended));
        assert!(!CallStatus::Ended.can_transition_to(&CallStatus::Accepted));
        assert!(!CallStatus::Ended.can_transition_to(&CallStatus::Ended));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!CallStatus::Ringing.is_terminal());
        assert!(!CallStatus::Accepted.is_terminal());
        assert!(CallStatus::Rejected.is_terminal());
        assert!(CallStatus::Ended.is_terminal());
    }

    #[test]
    fn test_involves_matches_both_participants() {
        let call = Call::from_request(test_request());

        assert!(call.involves("doctor-1"));
        assert!(call.involves("patient-1"));
        assert!(!call.involves("someone-else"));
    }

    #[test]
    fn test_signal_envelope_wire_names() {
        let call = Call::from_request(test_request());
        let envelope = SignalEnvelope::new(CallSignal::InitiateCall(call));

        let wire = serde_json::to_string(&envelope).expect("envelope should serialize");
        assert!(wire.contains("\"initiate-call\""), "wire format should use kebab-case event names");

        let decoded: SignalEnvelope = serde_json::from_str(&wire).expect("envelope should deserialize");
        assert_eq!(decoded.signal.kind(), "initiate-call");
        assert!(decoded.origin.is_empty(), "fresh envelopes carry no origin");
    }
}
