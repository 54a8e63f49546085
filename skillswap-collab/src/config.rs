//! Runtime configuration for editors and the relay.
//!
//! Both structs deserialise from `SKILLSWAP_*` environment variables
//! (optionally seeded from `app.env` or `.env`), with defaults for every
//! field so an empty environment is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "SKILLSWAP_";

/// Editor-side settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollabConfig {
    /// Relay base URL; the document id is appended as the topic path.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Document store base URL (None = in-process store).
    pub store_url: Option<String>,

    /// Quiet period before a local edit is broadcast.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How long local change capture stays disarmed after a remote update.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Lifetime of a remote cursor indicator.
    #[serde(default = "default_cursor_ttl_ms")]
    pub cursor_ttl_ms: u64,

    /// Fixed delay between reconnect attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Ping interval; two silent intervals mark the connection half-open.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Outbound frames buffered per connection before publishes are dropped.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl CollabConfig {
    /// Load from the environment, falling back to defaults for unset keys.
    pub fn from_env() -> Result<Self, envy::Error> {
        load_dotenv();
        envy::prefixed(ENV_PREFIX).from_env::<Self>()
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn cursor_ttl(&self) -> Duration {
        Duration::from_millis(self.cursor_ttl_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            store_url: None,
            debounce_ms: default_debounce_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            cursor_ttl_ms: default_cursor_ttl_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Relay server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Address to bind to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Subscribers allowed per document topic
    #[serde(default = "default_max_peers_per_room")]
    pub max_peers_per_room: usize,

    /// Frames buffered per subscriber before it starts lagging
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        load_dotenv();
        envy::prefixed(ENV_PREFIX).from_env::<Self>()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_peers_per_room: default_max_peers_per_room(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

fn load_dotenv() {
    if std::path::Path::new("app.env").exists() {
        dotenvy::from_filename("app.env").ok();
    } else {
        dotenvy::dotenv().ok();
    }
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:9090".to_string()
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_settle_delay_ms() -> u64 {
    50
}

fn default_cursor_ttl_ms() -> u64 {
    5_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_bind_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_max_peers_per_room() -> usize {
    100
}

fn default_broadcast_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collab_defaults() {
        let config = CollabConfig::default();
        assert_eq!(config.debounce_delay(), Duration::from_millis(300));
        assert_eq!(config.cursor_ttl(), Duration::from_secs(5));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert!(config.store_url.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CollabConfig =
            serde_json::from_str(r#"{"debounce_ms": 120, "store_url": "http://api"}"#).unwrap();
        assert_eq!(config.debounce_ms, 120);
        assert_eq!(config.store_url.as_deref(), Some("http://api"));
        assert_eq!(config.settle_delay_ms, 50);
        assert_eq!(config.relay_url, "ws://127.0.0.1:9090");
    }

    #[test]
    fn test_relay_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_peers_per_room, 100);
        assert_eq!(config.broadcast_capacity, 256);
    }
}
