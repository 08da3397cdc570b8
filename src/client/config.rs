//! Client configuration.
//!
//! Every field has a default, so a configuration can be loaded from a
//! partial JSON or TOML document:
//!
//! ```ignore
//! let config: ClientConfig = serde_json::from_str(r#"{ "url": "wss://rt.example/ws" }"#)?;
//! assert_eq!(config.max_reconnect_attempts, 10);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Channel;
use crate::session::{BackoffPolicy, SessionSettings};

// ============================================================================
// ClientConfig
// ============================================================================

/// Configuration of a [`RealtimeClient`](crate::RealtimeClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Transport endpoint.
    #[serde(default)]
    pub url: String,

    /// Backoff base in milliseconds.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Reconnects attempted before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Heartbeat period in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Failed writes tolerated per queued envelope.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Outbound queue bound.
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,

    /// Events buffered per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Connect as soon as the client is spawned.
    #[serde(default)]
    pub auto_connect: bool,

    /// Re-send stored credentials after every open.
    #[serde(default = "default_auto_authenticate")]
    pub auto_authenticate: bool,

    /// Channels requested at construction.
    #[serde(default)]
    pub channels: Vec<Channel>,

    /// Stamped into outbound envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_queue_len() -> usize {
    1_000
}

fn default_event_capacity() -> usize {
    256
}

fn default_auto_authenticate() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            max_queue_len: default_max_queue_len(),
            event_capacity: default_event_capacity(),
            auto_connect: false,
            auto_authenticate: default_auto_authenticate(),
            channels: Vec::new(),
            protocol_version: None,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for `url` with defaults elsewhere.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Returns the backoff base.
    #[inline]
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Returns the backoff cap.
    #[inline]
    #[must_use]
    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    /// Returns the heartbeat period.
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Returns the connect timeout.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the reconnect backoff policy.
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.reconnect_interval(),
            self.max_reconnect_delay(),
            self.max_reconnect_attempts,
        )
    }

    /// Returns the session policy derived from this configuration.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            backoff: self.backoff(),
            max_queue_len: self.max_queue_len,
            max_retries: self.max_retries,
            auto_authenticate: self.auto_authenticate,
            protocol_version: self.protocol_version.clone(),
        }
    }

    /// Validates the configuration.
    ///
    /// `ws://` or `wss://` is only enforced when `websocket` is set, so
    /// custom connectors may use their own schemes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self, websocket: bool) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::config(
                "url is required. Use .url() to set it.\n\
                 Example: RealtimeClient::builder().url(\"wss://realtime.example.com/ws\")",
            ));
        }

        let url = Url::parse(&self.url)
            .map_err(|e| Error::config(format!("invalid url {:?}: {e}", self.url)))?;
        if websocket && !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "url scheme must be ws or wss, got {:?}",
                url.scheme()
            )));
        }

        let durations = [
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("max_reconnect_delay_ms", self.max_reconnect_delay_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("timeout_ms", self.timeout_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(Error::config(format!("{name} must be greater than zero")));
        }

        if self.event_capacity == 0 {
            return Err(Error::config("event_capacity must be greater than zero"));
        }

        if self.max_queue_len == 0 {
            return Err(Error::config(
                "max_queue_len must be greater than zero, or every send while \
                 disconnected fails with QueueFull",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
