// libs/call-signaling-cell/src/services/transport.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, info, trace};

use crate::error::CallSignalingError;
use crate::models::{SignalEnvelope, TransportMode, TransportSession};

pub type SignalSender = broadcast::Sender<SignalEnvelope>;
pub type SignalReceiver = broadcast::Receiver<SignalEnvelope>;

const DEFAULT_SIGNAL_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

/// Moves call signals between coordinator instances.
///
/// Every emitted envelope is also delivered back through `subscribe`, so the
/// emitting instance applies its own signals the same way peers do. That
/// keeps dispatch in one place regardless of how many instances are running.
#[async_trait]
pub trait CallTransport: Send + Sync {
    /// Establish the transport. Calling again while connected is a no-op.
    async fn connect(&self, session: TransportSession) -> Result<(), CallSignalingError>;

    /// Publish a signal envelope. Returns whether it reached any subscriber.
    async fn emit(&self, envelope: SignalEnvelope) -> Result<bool, CallSignalingError>;

    /// Stream of envelopes this instance should apply.
    fn subscribe(&self) -> SignalReceiver;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn mode(&self) -> TransportMode;
}

/// In-process transport for development and tests. Envelopes never leave the
/// process: emitting hands them straight back to local subscribers, and emit
/// always reports success.
pub struct LoopbackTransport {
    events: SignalSender,
    connected: AtomicBool,
    heartbeat_interval: Duration,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SIGNAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));

        Self {
            events,
            connected: AtomicBool::new(false),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECONDS),
            heartbeat_task: Mutex::new(None),
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallTransport for LoopbackTransport {
    async fn connect(&self, session: TransportSession) -> Result<(), CallSignalingError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            debug!("Loopback transport already connected");
            return Ok(());
        }

        let heartbeat_interval = self.heartbeat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                trace!("Loopback transport heartbeat");
            }
        });

        {
            let mut task = self.heartbeat_task.lock().unwrap_or_else(|e| e.into_inner());
            *task = Some(handle);
        }

        info!(
            "Loopback transport connected (user: {})",
            session.user_id.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }

    async fn emit(&self, envelope: SignalEnvelope) -> Result<bool, CallSignalingError> {
        debug!("Loopback transport delivering {} signal in process", envelope.signal.kind());

        if self.events.send(envelope).is_err() {
            trace!("No local subscribers for loopback signal");
        }

        Ok(true)
    }

    fn subscribe(&self) -> SignalReceiver {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let handle = {
            let mut task = self.heartbeat_task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }

        info!("Loopback transport disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Loopback
    }
}
