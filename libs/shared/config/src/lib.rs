use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis_url: Option<String>,
    pub signal_channel: String,
    pub ring_timeout_seconds: u64,
    pub purge_grace_seconds: u64,
    pub expiry_sweep_interval_ms: u64,
    pub event_channel_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            signal_channel: env::var("SIGNAL_CHANNEL")
                .unwrap_or_else(|_| "call-signals".to_string()),
            ring_timeout_seconds: parse_var("CALL_RING_TIMEOUT_SECONDS", 30),
            purge_grace_seconds: parse_var("CALL_PURGE_GRACE_SECONDS", 1),
            expiry_sweep_interval_ms: parse_var("CALL_EXPIRY_SWEEP_INTERVAL_MS", 500),
            event_channel_capacity: parse_var("CALL_EVENT_CHANNEL_CAPACITY", 256),
        };

        if !config.is_broker_configured() {
            warn!("REDIS_URL not set - call signaling will use the in-process loopback transport");
        }

        config
    }

    pub fn is_broker_configured(&self) -> bool {
        self.redis_url.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            signal_channel: "call-signals".to_string(),
            ring_timeout_seconds: 30,
            purge_grace_seconds: 1,
            expiry_sweep_interval_ms: 500,
            event_channel_capacity: 256,
        }
    }
}

fn parse_var<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
