//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`RealtimeClient`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use paygate_realtime::{MessageType, RealtimeClient, Role};
//!
//! # async fn example() -> paygate_realtime::Result<()> {
//! let client = RealtimeClient::builder()
//!     .url("wss://realtime.example.com/ws")
//!     .role(Role::Merchant)
//!     .credentials("token", "merchant-42")
//!     .on(MessageType::InvoicePaid, |routed| println!("paid: {}", routed.envelope.id))
//!     .spawn()
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::{Channel, MessageType};
use crate::session::{Clock, Credentials, MessageHandler, RoutedMessage, SystemClock};
use crate::transport::{Connector, WsConnector};

use super::config::ClientConfig;
use super::core::RealtimeClient;
use super::presets::Role;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`RealtimeClient`] instance.
///
/// Use [`RealtimeClient::builder()`] to create a new builder.
#[derive(Default)]
pub struct ClientBuilder {
    /// Client configuration.
    config: ClientConfig,
    /// Credentials sent after every open.
    credentials: Option<Credentials>,
    /// Transport factory; WebSocket when unset.
    connector: Option<Arc<dyn Connector>>,
    /// Time source; system clock when unset.
    clock: Option<Arc<dyn Clock>>,
    /// Domain handlers registered at build time.
    handlers: Vec<(MessageType, MessageHandler)>,
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a new builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the transport endpoint.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Sets the backoff base.
    #[inline]
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval_ms = whole_millis(interval);
        self
    }

    /// Sets the backoff cap.
    #[inline]
    #[must_use]
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.max_reconnect_delay_ms = whole_millis(delay);
        self
    }

    /// Sets the reconnect ceiling.
    #[inline]
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the heartbeat period.
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = whole_millis(interval);
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = whole_millis(timeout);
        self
    }

    /// Sets the retry ceiling of queued envelopes.
    #[inline]
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Sets the outbound queue bound.
    #[inline]
    #[must_use]
    pub fn max_queue_len(mut self, len: usize) -> Self {
        self.config.max_queue_len = len;
        self
    }

    /// Sets the number of events buffered per subscriber.
    #[inline]
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Connects from [`spawn`](Self::spawn) when enabled.
    #[inline]
    #[must_use]
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.config.auto_connect = enabled;
        self
    }

    /// Re-sends stored credentials after every open when enabled.
    #[inline]
    #[must_use]
    pub fn auto_authenticate(mut self, enabled: bool) -> Self {
        self.config.auto_authenticate = enabled;
        self
    }

    /// Sets the channels requested at construction.
    #[must_use]
    pub fn channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.config.channels = channels.into_iter().collect();
        self
    }

    /// Sets the protocol version stamped into outbound envelopes.
    #[inline]
    #[must_use]
    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.config.protocol_version = Some(version.into());
        self
    }

    /// Applies a role preset: the role's channels and `auto_connect`.
    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        self.config.auto_connect = true;
        self.config.channels = role.channels().to_vec();
        self
    }

    /// Sets credentials sent after every open.
    #[inline]
    #[must_use]
    pub fn credentials(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(token, user_id));
        self
    }

    /// Sets the transport factory.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Sets the time source.
    #[inline]
    #[must_use]
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Registers the handler for a domain message type.
    ///
    /// Internal types are rejected by [`build`](Self::build).
    #[must_use]
    pub fn on<F>(mut self, kind: MessageType, handler: F) -> Self
    where
        F: Fn(&RoutedMessage) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        self.handlers.push((kind, handler));
        self
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the configuration is invalid
    /// - [`Error::InvalidArgument`](crate::Error::InvalidArgument) if a handler
    ///   targets an internal message type
    pub fn build(self) -> Result<RealtimeClient> {
        self.config.validate(self.connector.is_none())?;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector) as Arc<dyn Connector>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let client = RealtimeClient::from_parts(self.config, connector, clock, self.credentials);
        for (kind, handler) in self.handlers {
            client.router().register(kind, handler)?;
        }
        Ok(client)
    }

    /// Builds the client and connects if `auto_connect` is set.
    ///
    /// # Errors
    ///
    /// Returns any [`build`](Self::build) error, or the connect error.
    pub async fn spawn(self) -> Result<RealtimeClient> {
        let client = self.build()?;
        if client.config().auto_connect {
            client.connect().await?;
        }
        Ok(client)
    }
}

/// Converts to milliseconds, rounding a non-zero sub-millisecond duration up
/// to 1 so it is not mistaken for an unset zero.
fn whole_millis(duration: Duration) -> u64 {
    match u64::try_from(duration.as_millis()) {
        Ok(0) if !duration.is_zero() => 1,
        Ok(ms) => ms,
        Err(_) => u64::MAX,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;
    use crate::transport::MemoryConnector;

    #[test]
    fn test_new_creates_default_config() {
        let builder = ClientBuilder::new();
        assert_eq!(builder.config, ClientConfig::default());
        assert!(builder.credentials.is_none());
        assert!(builder.connector.is_none());
    }

    #[test]
    fn test_duration_setters() {
        let builder = ClientBuilder::new()
            .reconnect_interval(Duration::from_millis(250))
            .heartbeat_interval(Duration::from_secs(5))
            .timeout(Duration::from_secs(2));
        assert_eq!(builder.config.reconnect_interval_ms, 250);
        assert_eq!(builder.config.heartbeat_interval_ms, 5_000);
        assert_eq!(builder.config.timeout_ms, 2_000);
    }

    #[test]
    fn test_sub_millisecond_durations_round_up() {
        let builder = ClientBuilder::new()
            .url("ws://realtime.test")
            .reconnect_interval(Duration::from_micros(500))
            .timeout(Duration::from_nanos(1))
            .heartbeat_interval(Duration::from_micros(1_500));
        assert_eq!(builder.config.reconnect_interval_ms, 1);
        assert_eq!(builder.config.timeout_ms, 1);
        assert_eq!(builder.config.heartbeat_interval_ms, 1);
        assert!(builder.config.validate(true).is_ok());

        let builder = ClientBuilder::new().timeout(Duration::ZERO);
        assert_eq!(builder.config.timeout_ms, 0);
    }

    #[test]
    fn test_role_sets_channels_and_auto_connect() {
        let builder = ClientBuilder::new().role(Role::User);
        assert!(builder.config.auto_connect);
        assert_eq!(builder.config.channels, Role::User.channels());
    }

    #[test]
    fn test_credentials_are_redacted() {
        let builder = ClientBuilder::new().credentials("secret-token", "u-1");
        let debug = format!("{:?}", builder.credentials.expect("credentials"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("u-1"));
    }

    #[tokio::test]
    async fn test_build_requires_url() {
        let err = ClientBuilder::new().build().err().expect("missing url");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_requires_websocket_scheme_for_default_connector() {
        let err = ClientBuilder::new()
            .url("http://realtime.test")
            .build()
            .err()
            .expect("bad scheme");
        assert!(matches!(err, Error::Config { .. }));

        let (connector, _listener) = MemoryConnector::new();
        assert!(
            ClientBuilder::new()
                .url("memory://realtime.test")
                .connector(connector)
                .build()
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_build_rejects_internal_handler() {
        let (connector, _listener) = MemoryConnector::new();
        let err = ClientBuilder::new()
            .url("ws://realtime.test")
            .connector(connector)
            .on(MessageType::Authentication, |_| {})
            .build()
            .err()
            .expect("internal handler");
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
