// libs/call-signaling-cell/src/services/coordinator.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;

use crate::error::CallSignalingError;
use crate::models::{
    Call, CallEndedPayload, CallResponsePayload, CallSignal, CallStatus, DeclineReason,
    InitiateCallRequest, SignalEnvelope, TransportMode, TransportSession,
};
use crate::services::events::{CallEventBus, CallEventReceiver, SubscriptionId};
use crate::services::transport::{CallTransport, SignalReceiver};

/// Timing knobs for call lifecycle management.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a call may ring before it is rejected automatically.
    pub ring_timeout: Duration,
    /// How long a terminal call record stays readable before it is purged.
    pub purge_grace: Duration,
    /// How often the expiry sweeper scans for overdue ringing calls.
    pub sweep_interval: Duration,
    /// Capacity of the per-user and global event channels.
    pub event_channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(30),
            purge_grace: Duration::from_secs(1),
            sweep_interval: Duration::from_millis(500),
            event_channel_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            ring_timeout: Duration::from_secs(config.ring_timeout_seconds),
            purge_grace: Duration::from_secs(config.purge_grace_seconds),
            sweep_interval: Duration::from_millis(config.expiry_sweep_interval_ms),
            event_channel_capacity: config.event_channel_capacity,
        }
    }
}

/// Outcome of applying a status transition to the active call map.
enum TransitionOutcome {
    /// The transition was applied and the updated call is returned.
    Applied(Call),
    /// The call already carried the target status, nothing changed.
    AlreadyInState(Call),
    /// The current status does not allow the transition.
    Conflict { current: CallStatus },
    /// No call with that id is being tracked.
    Unknown,
}

/// Tracks active calls and drives their lifecycle.
///
/// Lifecycle operations update the local call map and emit a signal through
/// the transport. Subscriber dispatch happens in exactly one place: the
/// signal pump, which applies every envelope the transport delivers,
/// including the echo of this instance's own emissions. Applying envelopes
/// is idempotent, so echoes and peer signals produce each event once.
#[derive(Clone)]
pub struct CallCoordinator {
    transport: Arc<dyn CallTransport>,
    events: Arc<CallEventBus>,
    active_calls: Arc<RwLock<HashMap<String, Call>>>,
    config: CoordinatorConfig,
    is_started: Arc<AtomicBool>,
    is_shutdown: Arc<RwLock<bool>>,
}

impl CallCoordinator {
    pub fn new(transport: Arc<dyn CallTransport>) -> Self {
        Self::with_config(transport, CoordinatorConfig::default())
    }

    pub fn with_config(transport: Arc<dyn CallTransport>, config: CoordinatorConfig) -> Self {
        let events = Arc::new(CallEventBus::with_capacity(config.event_channel_capacity));

        Self {
            transport,
            events,
            active_calls: Arc::new(RwLock::new(HashMap::new())),
            config,
            is_started: Arc::new(AtomicBool::new(false)),
            is_shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Connect the transport and start the signal pump and expiry sweeper.
    /// Calling again after a successful start is a no-op.
    #[instrument(skip(self, session))]
    pub async fn start(&self, session: TransportSession) -> Result<(), CallSignalingError> {
        if self.is_started.swap(true, Ordering::SeqCst) {
            debug!("Call coordinator already started");
            return Ok(());
        }

        // Subscribe before connecting so no envelope can slip past the pump.
        let receiver = self.transport.subscribe();
        if let Err(e) = self.transport.connect(session).await {
            self.is_started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let pump = self.clone();
        tokio::spawn(async move {
            pump.signal_pump(receiver).await;
        });

        let sweeper = self.clone();
        tokio::spawn(async move {
            sweeper.ring_expiry_loop().await;
        });

        info!("Call coordinator started in {} mode", self.transport.mode());
        Ok(())
    }

    pub async fn shutdown(&self) {
        {
            let mut is_shutdown = self.is_shutdown.write().await;
            *is_shutdown = true;
        }
        self.transport.disconnect().await;

        // Clean up user event channels; pending pollers see their stream close
        for user_id in self.events.active_user_channels() {
            self.events.remove_user_channel(&user_id);
        }

        info!("Call coordinator shut down");
    }

    // ==============================================================================
    // CALL LIFECYCLE OPERATIONS
    // ==============================================================================

    /// Start ringing a callee. The call is tracked immediately and the
    /// initiate-call signal is emitted fire-and-forget: a transport failure
    /// is logged, and the ring timeout cleans up calls nobody could answer.
    #[instrument(skip(self, request), fields(caller_id = %request.caller_id, callee_id = %request.callee_id))]
    pub async fn initiate_call(&self, request: InitiateCallRequest) -> Call {
        let call = Call::from_request(request);

        {
            let mut calls = self.active_calls.write().await;
            calls.insert(call.call_id.clone(), call.clone());
        }

        info!(
            "Call {} initiated: {} -> {} (appointment {})",
            call.call_id, call.caller_id, call.callee_id, call.appointment_id
        );
        self.emit_signal(CallSignal::InitiateCall(call.clone())).await;

        call
    }

    /// Accept a ringing call on behalf of `user_id`, stamping its start time.
    #[instrument(skip(self))]
    pub async fn accept_call(
        &self,
        call_id: &str,
        user_id: &str,
    ) -> Result<Call, CallSignalingError> {
        let call = self
            .transition_or_err(call_id, CallStatus::Accepted, Some(Utc::now()), None)
            .await?;

        info!("Call {} accepted by {}", call_id, user_id);

        let payload = CallResponsePayload {
            call_id: call.call_id.clone(),
            accepted: true,
            caller_id: call.caller_id.clone(),
            callee_id: call.callee_id.clone(),
            appointment_id: call.appointment_id.clone(),
            channel_name: call.channel_name.clone(),
            responded_by: Some(user_id.to_string()),
            decline_reason: None,
            start_time: call.start_time,
        };
        self.emit_signal(CallSignal::CallResponse(payload)).await;

        Ok(call)
    }

    /// Reject a ringing call on behalf of `user_id`.
    #[instrument(skip(self))]
    pub async fn reject_call(
        &self,
        call_id: &str,
        user_id: &str,
    ) -> Result<Call, CallSignalingError> {
        let call = self
            .transition_or_err(call_id, CallStatus::Rejected, None, None)
            .await?;

        info!("Call {} rejected by {}", call_id, user_id);

        let payload = CallResponsePayload {
            call_id: call.call_id.clone(),
            accepted: false,
            caller_id: call.caller_id.clone(),
            callee_id: call.callee_id.clone(),
            appointment_id: call.appointment_id.clone(),
            channel_name: call.channel_name.clone(),
            responded_by: Some(user_id.to_string()),
            decline_reason: Some(DeclineReason::Declined),
            start_time: None,
        };
        self.emit_signal(CallSignal::CallResponse(payload)).await;

        Ok(call)
    }

    /// End a call, either while it is still ringing (caller hangs up) or
    /// after it was accepted.
    #[instrument(skip(self))]
    pub async fn end_call(&self, call_id: &str) -> Result<Call, CallSignalingError> {
        let call = self
            .transition_or_err(call_id, CallStatus::Ended, None, Some(Utc::now()))
            .await?;

        info!("Call {} ended", call_id);

        let payload = CallEndedPayload {
            call_id: call.call_id.clone(),
            caller_id: call.caller_id.clone(),
            callee_id: call.callee_id.clone(),
            appointment_id: call.appointment_id.clone(),
            ended_at: call.ended_at.unwrap_or_else(Utc::now),
        };
        self.emit_signal(CallSignal::CallEnded(payload)).await;

        Ok(call)
    }

    // ==============================================================================
    // QUERIES
    // ==============================================================================

    pub async fn get_active_call(&self, call_id: &str) -> Option<Call> {
        let calls = self.active_calls.read().await;
        calls.get(call_id).cloned()
    }

    pub async fn get_user_active_calls(&self, user_id: &str) -> Vec<Call> {
        let calls = self.active_calls.read().await;
        calls.values().filter(|call| call.involves(user_id)).cloned().collect()
    }

    /// Ringing calls addressed to `user_id`, for clients that poll instead of
    /// listening on an event channel.
    pub async fn get_pending_calls(&self, user_id: &str) -> Vec<Call> {
        let calls = self.active_calls.read().await;
        calls
            .values()
            .filter(|call| call.callee_id == user_id && call.status == CallStatus::Ringing)
            .cloned()
            .collect()
    }

    pub async fn active_call_count(&self) -> usize {
        let calls = self.active_calls.read().await;
        calls.len()
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.transport.mode()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    // ==============================================================================
    // EVENT SUBSCRIPTIONS
    // ==============================================================================

    pub fn on_incoming_call(
        &self,
        callback: impl Fn(&Call) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.on_incoming_call(callback)
    }

    pub fn off_incoming_call(&self, id: SubscriptionId) -> bool {
        self.events.off_incoming_call(id)
    }

    pub fn on_call_response(
        &self,
        callback: impl Fn(&CallResponsePayload) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.on_call_response(callback)
    }

    pub fn off_call_response(&self, id: SubscriptionId) -> bool {
        self.events.off_call_response(id)
    }

    pub fn on_call_ended(
        &self,
        callback: impl Fn(&CallEndedPayload) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.on_call_ended(callback)
    }

    pub fn off_call_ended(&self, id: SubscriptionId) -> bool {
        self.events.off_call_ended(id)
    }

    pub fn subscribe_user(&self, user_id: &str) -> CallEventReceiver {
        self.events.subscribe_user(user_id)
    }

    pub fn subscribe_global(&self) -> CallEventReceiver {
        self.events.subscribe_global()
    }

    /// Drop user event channels that lost their last receiver.
    pub fn prune_idle_channels(&self) -> usize {
        self.events.prune_idle_channels()
    }

    pub fn active_user_channels(&self) -> Vec<String> {
        self.events.active_user_channels()
    }

    // ==============================================================================
    // SIGNAL PUMP
    // ==============================================================================

    async fn signal_pump(&self, mut receiver: SignalReceiver) {
        debug!("Signal pump started");

        loop {
            if *self.is_shutdown.read().await {
                break;
            }

            match timeout(Duration::from_secs(1), receiver.recv()).await {
                Ok(Ok(envelope)) => self.apply_signal(envelope).await,
                Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    warn!("Signal pump lagged, {} envelope(s) dropped", missed);
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    debug!("Transport signal stream closed");
                    break;
                }
                Err(_) => {
                    // Idle tick, loop around and re-check for shutdown
                }
            }
        }

        debug!("Signal pump stopped");
    }

    async fn apply_signal(&self, envelope: SignalEnvelope) {
        debug!(
            "Applying {} signal emitted at {}",
            envelope.signal.kind(),
            envelope.emitted_at
        );

        match envelope.signal {
            CallSignal::InitiateCall(call) => self.apply_initiate_signal(call).await,
            CallSignal::CallResponse(payload) => self.apply_response_signal(payload).await,
            CallSignal::CallEnded(payload) => self.apply_ended_signal(payload).await,
        }
    }

    async fn apply_initiate_signal(&self, call: Call) {
        let dispatch = {
            let mut calls = self.active_calls.write().await;
            match calls.get(&call.call_id) {
                None => {
                    calls.insert(call.call_id.clone(), call.clone());
                    true
                }
                // Echo of our own initiation: the record exists and still
                // rings, dispatch without touching it.
                Some(existing) if existing.status == CallStatus::Ringing => true,
                Some(existing) => {
                    debug!(
                        "Dropping stale initiate-call signal for {} (already {})",
                        call.call_id, existing.status
                    );
                    false
                }
            }
        };

        if dispatch {
            debug!(
                "Dispatching incoming call {} to {}",
                call.call_id, call.callee_id
            );
            self.events.dispatch_incoming_call(&call);
        }
    }

    async fn apply_response_signal(&self, payload: CallResponsePayload) {
        let target = if payload.accepted {
            CallStatus::Accepted
        } else {
            CallStatus::Rejected
        };

        match self
            .transition_call(&payload.call_id, target, payload.start_time, None)
            .await
        {
            TransitionOutcome::Applied(call) => {
                if call.status.is_terminal() {
                    self.schedule_purge(&call.call_id);
                }
                self.events.dispatch_call_response(&payload);
            }
            // Echo of a transition this instance already applied.
            TransitionOutcome::AlreadyInState(_) => {
                self.events.dispatch_call_response(&payload);
            }
            TransitionOutcome::Conflict { current } => {
                debug!(
                    "Dropping stale call-response signal for {} (already {})",
                    payload.call_id, current
                );
            }
            TransitionOutcome::Unknown => {
                warn!("Received call-response signal for unknown call {}", payload.call_id);
            }
        }
    }

    async fn apply_ended_signal(&self, payload: CallEndedPayload) {
        match self
            .transition_call(&payload.call_id, CallStatus::Ended, None, Some(payload.ended_at))
            .await
        {
            TransitionOutcome::Applied(call) => {
                self.schedule_purge(&call.call_id);
                self.events.dispatch_call_ended(&payload);
            }
            TransitionOutcome::AlreadyInState(_) => {
                self.events.dispatch_call_ended(&payload);
            }
            TransitionOutcome::Conflict { current } => {
                debug!(
                    "Dropping stale call-ended signal for {} (status {})",
                    payload.call_id, current
                );
            }
            TransitionOutcome::Unknown => {
                warn!("Received call-ended signal for unknown call {}", payload.call_id);
            }
        }
    }

    // ==============================================================================
    // RING EXPIRY
    // ==============================================================================

    async fn ring_expiry_loop(&self) {
        debug!("Ring expiry sweeper started");

        loop {
            if *self.is_shutdown.read().await {
                break;
            }

            sleep(self.config.sweep_interval).await;
            self.expire_overdue_calls().await;
        }

        debug!("Ring expiry sweeper stopped");
    }

    /// Reject every call that has been ringing longer than the ring timeout.
    /// Expiry is dispatched locally without emitting a signal: each instance
    /// sweeps its own view, so a shared signal would double-fire the event.
    async fn expire_overdue_calls(&self) {
        let cutoff = Utc::now() - ring_timeout_window(self.config.ring_timeout);

        let overdue: Vec<Call> = {
            let calls = self.active_calls.read().await;
            calls
                .values()
                .filter(|call| call.status == CallStatus::Ringing && call.initiated_at < cutoff)
                .cloned()
                .collect()
        };

        for call in overdue {
            match self
                .transition_call(&call.call_id, CallStatus::Rejected, None, None)
                .await
            {
                TransitionOutcome::Applied(expired) => {
                    warn!(
                        "Call {} rang for over {:?} without an answer, rejecting",
                        expired.call_id, self.config.ring_timeout
                    );

                    let payload = CallResponsePayload {
                        call_id: expired.call_id.clone(),
                        accepted: false,
                        caller_id: expired.caller_id.clone(),
                        callee_id: expired.callee_id.clone(),
                        appointment_id: expired.appointment_id.clone(),
                        channel_name: expired.channel_name.clone(),
                        responded_by: None,
                        decline_reason: Some(DeclineReason::RingTimeout),
                        start_time: None,
                    };
                    self.events.dispatch_call_response(&payload);
                    self.schedule_purge(&expired.call_id);
                }
                _ => {
                    // The call was answered or ended while we swept it
                }
            }
        }
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    async fn emit_signal(&self, signal: CallSignal) {
        let envelope = SignalEnvelope::new(signal);
        if let Err(e) = self.transport.emit(envelope).await {
            warn!("Failed to emit call signal: {}", e);
        }
    }

    async fn transition_call(
        &self,
        call_id: &str,
        target: CallStatus,
        start_time: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> TransitionOutcome {
        let mut calls = self.active_calls.write().await;
        match calls.get_mut(call_id) {
            None => TransitionOutcome::Unknown,
            Some(call) if call.status == target => TransitionOutcome::AlreadyInState(call.clone()),
            Some(call) if call.status.can_transition_to(&target) => {
                call.status = target;
                if target == CallStatus::Accepted {
                    call.start_time = start_time.or_else(|| Some(Utc::now()));
                }
                if target == CallStatus::Ended {
                    call.ended_at = ended_at.or_else(|| Some(Utc::now()));
                }
                TransitionOutcome::Applied(call.clone())
            }
            Some(call) => TransitionOutcome::Conflict { current: call.status },
        }
    }

    async fn transition_or_err(
        &self,
        call_id: &str,
        target: CallStatus,
        start_time: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<Call, CallSignalingError> {
        match self.transition_call(call_id, target, start_time, ended_at).await {
            TransitionOutcome::Applied(call) => {
                if call.status.is_terminal() {
                    self.schedule_purge(&call.call_id);
                }
                Ok(call)
            }
            TransitionOutcome::AlreadyInState(call) => {
                Err(CallSignalingError::InvalidStatusTransition {
                    from: call.status.to_string(),
                    to: target.to_string(),
                })
            }
            TransitionOutcome::Conflict { current } => {
                Err(CallSignalingError::InvalidStatusTransition {
                    from: current.to_string(),
                    to: target.to_string(),
                })
            }
            TransitionOutcome::Unknown => {
                warn!("Requested {} on unknown call {}", target, call_id);
                Err(CallSignalingError::CallNotFound(call_id.to_string()))
            }
        }
    }

    /// Drop a terminal call record after the grace period, leaving a window
    /// where late status reads still succeed.
    fn schedule_purge(&self, call_id: &str) {
        let calls = Arc::clone(&self.active_calls);
        let grace = self.config.purge_grace;
        let call_id = call_id.to_string();

        tokio::spawn(async move {
            sleep(grace).await;
            let removed = {
                let mut calls = calls.write().await;
                calls.remove(&call_id)
            };
            if removed.is_some() {
                debug!("Purged terminal call record {}", call_id);
            }
        });
    }
}

fn ring_timeout_window(ring_timeout: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(ring_timeout.as_millis() as i64)
}
