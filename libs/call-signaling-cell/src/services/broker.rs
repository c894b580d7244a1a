// libs/call-signaling-cell/src/services/broker.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::CallSignalingError;
use crate::models::{SignalEnvelope, TransportMode, TransportSession};
use crate::services::transport::{CallTransport, SignalReceiver, SignalSender};

/// Transport backed by a Redis pub/sub channel shared by every coordinator
/// instance. Published envelopes are echoed back to the publishing instance
/// as well; the coordinator applies them idempotently, so the echo is what
/// drives local dispatch.
pub struct RedisSignalTransport {
    pool: Pool,
    client: redis::Client,
    channel: String,
    instance_id: String,
    events: SignalSender,
    connected: AtomicBool,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl RedisSignalTransport {
    pub async fn new(config: &AppConfig) -> Result<Self, CallSignalingError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let cfg = Config::from_url(redis_url.clone());
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            CallSignalingError::TransportError(format!("Failed to create Redis pool: {}", e))
        })?;

        // Test connection
        let mut conn = pool.get().await.map_err(|e| {
            CallSignalingError::TransportError(format!("Failed to connect to Redis: {}", e))
        })?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        let client = redis::Client::open(redis_url)?;
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));

        info!("Redis signal transport initialized on channel {}", config.signal_channel);

        Ok(Self {
            pool,
            client,
            channel: config.signal_channel.clone(),
            instance_id: Uuid::new_v4().to_string(),
            events,
            connected: AtomicBool::new(false),
            listener_task: Mutex::new(None),
        })
    }

    /// Identifier stamped onto every envelope this instance publishes.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[async_trait]
impl CallTransport for RedisSignalTransport {
    async fn connect(&self, session: TransportSession) -> Result<(), CallSignalingError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            debug!("Redis signal transport already connected");
            return Ok(());
        }

        let conn = match self.client.get_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let mut pubsub = conn.into_pubsub();
        if let Err(e) = pubsub.subscribe(&self.channel).await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let events = self.events.clone();
        let channel = self.channel.clone();
        let handle = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let raw: String = match message.get_payload() {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("Unreadable signal payload on {}: {}", channel, e);
                        continue;
                    }
                };

                let envelope: SignalEnvelope = match serde_json::from_str(&raw) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("Undecodable signal envelope on {}: {}", channel, e);
                        continue;
                    }
                };

                debug!(
                    "Received {} signal from instance {}",
                    envelope.signal.kind(),
                    envelope.origin
                );
                if events.send(envelope).is_err() {
                    debug!("No local subscribers for broker signal");
                }
            }
            debug!("Redis signal listener stream ended");
        });

        {
            let mut task = self.listener_task.lock().unwrap_or_else(|e| e.into_inner());
            *task = Some(handle);
        }

        info!(
            "Subscribed to Redis signal channel {} as instance {} (user: {})",
            self.channel,
            self.instance_id,
            session.user_id.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }

    async fn emit(&self, mut envelope: SignalEnvelope) -> Result<bool, CallSignalingError> {
        if !self.is_connected() {
            return Err(CallSignalingError::NotConnected);
        }

        envelope.origin = self.instance_id.clone();
        let payload = serde_json::to_string(&envelope)?;

        let mut conn = self.pool.get().await.map_err(|e| {
            CallSignalingError::TransportError(format!("Failed to get Redis connection: {}", e))
        })?;
        let receivers: i64 = conn.publish(&self.channel, payload).await?;

        debug!(
            "Published {} signal to {} subscriber(s) on {}",
            envelope.signal.kind(),
            receivers,
            self.channel
        );
        Ok(receivers > 0)
    }

    fn subscribe(&self) -> SignalReceiver {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let handle = {
            let mut task = self.listener_task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }

        info!("Redis signal transport disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Broker
    }
}
