// libs/call-signaling-cell/src/services/events.rs
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::models::{Call, CallEndedPayload, CallEvent, CallResponsePayload};

pub type CallEventSender = broadcast::Sender<CallEvent>;
pub type CallEventReceiver = broadcast::Receiver<CallEvent>;

/// Handle returned at registration, used to remove the callback later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type IncomingCallFn = dyn Fn(&Call) + Send + Sync;
type CallResponseFn = dyn Fn(&CallResponsePayload) + Send + Sync;
type CallEndedFn = dyn Fn(&CallEndedPayload) + Send + Sync;

/// Fan-out point for call lifecycle events.
///
/// Callbacks are invoked in registration order, each isolated so one
/// panicking subscriber cannot starve the others. Per-user broadcast
/// channels carry the same events to HTTP pollers, and a global channel
/// mirrors everything for monitoring.
pub struct CallEventBus {
    incoming: RwLock<Vec<(SubscriptionId, Arc<IncomingCallFn>)>>,
    responses: RwLock<Vec<(SubscriptionId, Arc<CallResponseFn>)>>,
    ended: RwLock<Vec<(SubscriptionId, Arc<CallEndedFn>)>>,
    user_channels: RwLock<HashMap<String, CallEventSender>>,
    global_sender: CallEventSender,
    next_id: AtomicU64,
    channel_capacity: usize,
}

impl CallEventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(channel_capacity: usize) -> Self {
        let (global_sender, _) = broadcast::channel(channel_capacity.max(1));

        Self {
            incoming: RwLock::new(Vec::new()),
            responses: RwLock::new(Vec::new()),
            ended: RwLock::new(Vec::new()),
            user_channels: RwLock::new(HashMap::new()),
            global_sender,
            next_id: AtomicU64::new(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    // ==============================================================================
    // CALLBACK REGISTRATION
    // ==============================================================================

    pub fn on_incoming_call(
        &self,
        callback: impl Fn(&Call) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.incoming
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        debug!("Registered incoming-call subscriber {:?}", id);
        id
    }

    pub fn off_incoming_call(&self, id: SubscriptionId) -> bool {
        Self::remove(&self.incoming, id)
    }

    pub fn on_call_response(
        &self,
        callback: impl Fn(&CallResponsePayload) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.responses
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        debug!("Registered call-response subscriber {:?}", id);
        id
    }

    pub fn off_call_response(&self, id: SubscriptionId) -> bool {
        Self::remove(&self.responses, id)
    }

    pub fn on_call_ended(
        &self,
        callback: impl Fn(&CallEndedPayload) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.ended
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        debug!("Registered call-ended subscriber {:?}", id);
        id
    }

    pub fn off_call_ended(&self, id: SubscriptionId) -> bool {
        Self::remove(&self.ended, id)
    }

    // ==============================================================================
    // BROADCAST CHANNELS
    // ==============================================================================

    /// Subscribe to events addressed to a single user. The channel is created
    /// on demand and lives only while it has receivers; once the last one is
    /// dropped the entry is pruned and the next subscribe starts fresh.
    pub fn subscribe_user(&self, user_id: &str) -> CallEventReceiver {
        let mut channels = self.user_channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!("Created event channel for user {}", user_id);
                broadcast::channel(self.channel_capacity).0
            })
            .subscribe()
    }

    pub fn remove_user_channel(&self, user_id: &str) {
        let mut channels = self.user_channels.write().unwrap_or_else(|e| e.into_inner());
        channels.remove(user_id);
        debug!("Removed event channel for user {}", user_id);
    }

    /// Drop user channels with no remaining receivers. A receiverless
    /// broadcast sender buffers nothing; the channel is recreated on the
    /// next subscribe.
    pub fn prune_idle_channels(&self) -> usize {
        let mut channels = self.user_channels.write().unwrap_or_else(|e| e.into_inner());
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        let pruned = before - channels.len();
        if pruned > 0 {
            debug!("Pruned {} idle user event channel(s)", pruned);
        }
        pruned
    }

    /// Subscribe to every event regardless of addressee.
    pub fn subscribe_global(&self) -> CallEventReceiver {
        self.global_sender.subscribe()
    }

    pub fn active_user_channels(&self) -> Vec<String> {
        let channels = self.user_channels.read().unwrap_or_else(|e| e.into_inner());
        channels.keys().cloned().collect()
    }

    // ==============================================================================
    // DISPATCH
    // ==============================================================================

    pub fn dispatch_incoming_call(&self, call: &Call) {
        let callbacks: Vec<(SubscriptionId, Arc<IncomingCallFn>)> = {
            let registered = self.incoming.read().unwrap_or_else(|e| e.into_inner());
            registered.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect()
        };

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(call))).is_err() {
                error!("Incoming-call subscriber {:?} panicked for call {}", id, call.call_id);
            }
        }

        self.notify_user(&call.callee_id, CallEvent::IncomingCall(call.clone()));
        self.publish_global(CallEvent::IncomingCall(call.clone()));
    }

    pub fn dispatch_call_response(&self, payload: &CallResponsePayload) {
        let callbacks: Vec<(SubscriptionId, Arc<CallResponseFn>)> = {
            let registered = self.responses.read().unwrap_or_else(|e| e.into_inner());
            registered.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect()
        };

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                error!("Call-response subscriber {:?} panicked for call {}", id, payload.call_id);
            }
        }

        self.notify_user(&payload.caller_id, CallEvent::CallResponse(payload.clone()));
        self.publish_global(CallEvent::CallResponse(payload.clone()));
    }

    pub fn dispatch_call_ended(&self, payload: &CallEndedPayload) {
        let callbacks: Vec<(SubscriptionId, Arc<CallEndedFn>)> = {
            let registered = self.ended.read().unwrap_or_else(|e| e.into_inner());
            registered.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect()
        };

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                error!("Call-ended subscriber {:?} panicked for call {}", id, payload.call_id);
            }
        }

        self.notify_user(&payload.caller_id, CallEvent::CallEnded(payload.clone()));
        self.notify_user(&payload.callee_id, CallEvent::CallEnded(payload.clone()));
        self.publish_global(CallEvent::CallEnded(payload.clone()));
    }

    // Private helper methods

    fn remove<T: ?Sized>(
        registry: &RwLock<Vec<(SubscriptionId, Arc<T>)>>,
        id: SubscriptionId,
    ) -> bool {
        let mut registered = registry.write().unwrap_or_else(|e| e.into_inner());
        let before = registered.len();
        registered.retain(|(registered_id, _)| *registered_id != id);
        let removed = registered.len() < before;
        if removed {
            debug!("Removed subscriber {:?}", id);
        }
        removed
    }

    fn notify_user(&self, user_id: &str, event: CallEvent) {
        let undelivered = {
            let channels = self.user_channels.read().unwrap_or_else(|e| e.into_inner());
            match channels.get(user_id) {
                Some(sender) => sender.send(event).is_err(),
                None => false,
            }
        };

        if undelivered {
            debug!("No active event listeners for user {}", user_id);
            self.prune_idle_channels();
        }
    }

    fn publish_global(&self, event: CallEvent) {
        if let Err(e) = self.global_sender.send(event) {
            debug!("No global event listeners: {}", e);
        }
    }

    fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CallEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::models::{CallStatus, InitiateCallRequest};

    fn test_call() -> Call {
        Call::from_request(InitiateCallRequest {
            caller_id: "doctor-1".to_string(),
            caller_name: "Dr. Acula".to_string(),
            callee_id: "patient-1".to_string(),
            callee_name: "Pat Ient".to_string(),
            appointment_id: "appt-1".to_string(),
            channel_name: "appt-1-video".to_string(),
        })
    }

    #[test]
    fn test_subscribers_fire_in_registration_order() {
        let bus = CallEventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        bus.on_incoming_call(move |_| first.lock().unwrap().push(1));
        let second = Arc::clone(&order);
        bus.on_incoming_call(move |_| second.lock().unwrap().push(2));
        let third = Arc::clone(&order);
        bus.on_incoming_call(move |_| third.lock().unwrap().push(3));

        bus.dispatch_incoming_call(&test_call());

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3], "Callbacks should run in registration order");
    }

    #[test]
    fn test_removed_subscriber_stops_firing() {
        let bus = CallEventBus::new();
        let kept_count = Arc::new(AtomicUsize::new(0));
        let removed_count = Arc::new(AtomicUsize::new(0));

        let removed_clone = Arc::clone(&removed_count);
        let removed_id = bus.on_incoming_call(move |_| {
            removed_clone.fetch_add(1, Ordering::SeqCst);
        });
        let kept_clone = Arc::clone(&kept_count);
        bus.on_incoming_call(move |_| {
            kept_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.off_incoming_call(removed_id), "Removal of a live subscriber should succeed");
        assert!(!bus.off_incoming_call(removed_id), "Second removal should report nothing removed");

        bus.dispatch_incoming_call(&test_call());

        assert_eq!(removed_count.load(Ordering::SeqCst), 0, "Removed subscriber must not fire");
        assert_eq!(kept_count.load(Ordering::SeqCst), 1, "Remaining subscriber should still fire");
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_siblings() {
        let bus = CallEventBus::new();
        let survivor_count = Arc::new(AtomicUsize::new(0));

        bus.on_incoming_call(|_| panic!("subscriber exploded"));
        let survivor_clone = Arc::clone(&survivor_count);
        bus.on_incoming_call(move |_| {
            survivor_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch_incoming_call(&test_call());

        assert_eq!(survivor_count.load(Ordering::SeqCst), 1, "Subscriber after a panic should still fire");
    }

    #[tokio::test]
    async fn test_user_channel_receives_addressed_events() {
        let bus = CallEventBus::new();
        let mut callee_events = bus.subscribe_user("patient-1");
        let mut bystander_events = bus.subscribe_user("someone-else");

        let call = test_call();
        bus.dispatch_incoming_call(&call);

        match callee_events.try_recv() {
            Ok(CallEvent::IncomingCall(received)) => {
                assert_eq!(received.call_id, call.call_id);
                assert_eq!(received.status, CallStatus::Ringing);
            }
            other => panic!("Expected incoming-call event for callee, got {:?}", other),
        }

        assert!(bystander_events.try_recv().is_err(), "Unrelated user should receive nothing");
    }

    #[tokio::test]
    async fn test_global_channel_mirrors_all_events() {
        let bus = CallEventBus::new();
        let mut global_events = bus.subscribe_global();

        bus.dispatch_incoming_call(&test_call());

        assert!(
            matches!(global_events.try_recv(), Ok(CallEvent::IncomingCall(_))),
            "Global channel should carry every dispatched event"
        );
    }

    #[test]
    fn test_channel_bookkeeping() {
        let bus = CallEventBus::new();
        assert_eq!(bus.active_user_channels().len(), 0, "New bus should have no user channels");

        let _rx = bus.subscribe_user("patient-1");
        assert_eq!(bus.active_user_channels(), vec!["patient-1".to_string()]);

        bus.remove_user_channel("patient-1");
        assert_eq!(bus.active_user_channels().len(), 0, "Channel should be gone after removal");
    }

    #[test]
    fn test_prune_drops_only_receiverless_channels() {
        let bus = CallEventBus::new();

        for i in 0..100 {
            drop(bus.subscribe_user(&format!("user-{}", i)));
        }
        let _held = bus.subscribe_user("user-kept");
        assert_eq!(bus.active_user_channels().len(), 101);

        assert_eq!(bus.prune_idle_channels(), 100, "Every receiverless channel should be pruned");
        assert_eq!(
            bus.active_user_channels(),
            vec!["user-kept".to_string()],
            "A channel with a live receiver must survive the sweep"
        );
    }

    #[test]
    fn test_dispatch_prunes_channels_without_receivers() {
        let bus = CallEventBus::new();
        drop(bus.subscribe_user("patient-1"));
        drop(bus.subscribe_user("stranded-user"));
        assert_eq!(bus.active_user_channels().len(), 2);

        // patient-1 is the callee; delivery finds no receiver and sweeps
        bus.dispatch_incoming_call(&test_call());

        assert!(
            bus.active_user_channels().is_empty(),
            "Channels without receivers should be gone after a dispatch"
        );
    }
}
