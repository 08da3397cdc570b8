//! Real-time client facade.
//!
//! [`RealtimeClient`] is a cheap, cloneable handle over one [`Session`] and
//! its driver task. `connect()` is the only operation that waits; every
//! other call takes the session lock, applies its effect and returns.
//!
//! # Example
//!
//! ```no_run
//! use paygate_realtime::{Channel, ClientEvent, RealtimeClient};
//! use serde_json::json;
//!
//! # async fn example() -> paygate_realtime::Result<()> {
//! let client = RealtimeClient::builder()
//!     .url("wss://realtime.example.com/ws")
//!     .build()?;
//!
//! let mut events = client.events();
//! client.subscribe(&[Channel::SystemAlerts])?;
//! client.connect().await?;
//! client.authenticate("token", "admin-1")?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Subscribed(channels) = event {
//!         println!("subscribed to {channels:?}");
//!         break;
//!     }
//! }
//!
//! client.send(paygate_realtime::MessageType::UserNotification, json!({ "read": true }))?;
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{MessageId, SessionId};
use crate::protocol::{Channel, MessageType};
use crate::session::driver::DriverContext;
use crate::session::{
    ClientEvent, Clock, ConnectionState, ConnectionStatus, Credentials, EventBus, MessageRouter,
    Metrics, RoutedMessage, Session,
};
use crate::transport::Connector;

use super::builder::ClientBuilder;
use super::config::ClientConfig;
use super::presets::Role;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the client.
pub(crate) struct ClientInner {
    /// Validated configuration.
    config: ClientConfig,

    /// Session, router and connector shared with the driver task.
    driver: DriverContext,

    /// Event stream source.
    events: EventBus,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.driver.session.lock().disconnect();
    }
}

// ============================================================================
// RealtimeClient
// ============================================================================

/// Handle to a real-time messaging client.
///
/// Clones share the same connection. Dropping the last handle disconnects.
#[derive(Clone)]
pub struct RealtimeClient {
    /// Shared inner state.
    pub(crate) inner: Arc<ClientInner>,
}

/// Non-owning handle to a [`RealtimeClient`].
///
/// Capture this in message handlers that call back into the client.
#[derive(Clone)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    /// Returns the client if a strong handle is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<RealtimeClient> {
        self.inner.upgrade().map(|inner| RealtimeClient { inner })
    }
}

impl fmt::Debug for WeakClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakClient")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// ============================================================================
// RealtimeClient - Display
// ============================================================================

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("url", &self.inner.config.url)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RealtimeClient - Construction
// ============================================================================

impl RealtimeClient {
    /// Creates a configuration builder for the client.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a builder preset for `role`.
    ///
    /// The role's channels are requested at construction and
    /// [`ClientBuilder::spawn`] connects immediately.
    #[must_use]
    pub fn for_role(url: impl Into<String>, role: Role) -> ClientBuilder {
        ClientBuilder::new().url(url).role(role)
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
        credentials: Option<Credentials>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let mut session = Session::new(config.session_settings(), clock, events.clone());

        if let Some(credentials) = credentials {
            session.set_credentials(credentials);
        }
        if !config.channels.is_empty()
            && let Err(e) = session.subscribe(&config.channels, None)
        {
            debug!(error = %e, "Initial channels not requested");
        }

        let driver = DriverContext {
            session: Arc::new(Mutex::new(session)),
            router: Arc::new(MessageRouter::new()),
            connector,
            url: config.url.clone(),
            timeout: config.timeout(),
            heartbeat_interval: config.heartbeat_interval(),
        };

        Self {
            inner: Arc::new(ClientInner {
                config,
                driver,
                events,
            }),
        }
    }

    /// Returns a handle that does not keep the client alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[inline]
    fn session(&self) -> &Mutex<Session> {
        &self.inner.driver.session
    }

    #[inline]
    pub(crate) fn router(&self) -> &MessageRouter {
        &self.inner.driver.router
    }
}

// ============================================================================
// RealtimeClient - Lifecycle
// ============================================================================

impl RealtimeClient {
    /// Opens the transport.
    ///
    /// Resolves once the transport is open, or fails after the configured
    /// timeout. While a connection is already opening, open or waiting to
    /// reconnect this is a no-op returning `Ok(())`.
    ///
    /// A failed open is reported and returned; it does not schedule a
    /// reconnect.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the transport did not open in time
    /// - [`Error::Connection`] if the connector failed
    /// - [`Error::ConnectionClosed`] if `disconnect()` was called meanwhile
    pub async fn connect(&self) -> Result<()> {
        let Some(ticket) = self.session().lock().begin_connect() else {
            return Ok(());
        };
        let driver = &self.inner.driver;

        match driver.open(&ticket.cancel).await {
            None => Err(Error::ConnectionClosed),
            Some(Err(e)) => {
                driver.session.lock().on_open_failed(ticket.id, e.clone());
                Err(e)
            }
            Some(Ok(transport)) => {
                if !driver.session.lock().on_open(ticket.id, transport.sink) {
                    return Err(Error::ConnectionClosed);
                }
                driver.spawn(ticket, transport.events);
                Ok(())
            }
        }
    }

    /// Closes the transport and cancels every timer, including a pending
    /// reconnect. Idempotent.
    ///
    /// Active and pending channels are cleared; queued envelopes and stored
    /// credentials survive for a later [`connect`](Self::connect).
    pub fn disconnect(&self) {
        self.session().lock().disconnect();
    }

    /// Sends an authentication request and stores the credentials for
    /// re-authentication after reconnects.
    ///
    /// Returns the session ID of the attempt; the outcome arrives as
    /// [`ClientEvent::Authenticated`] or an [`Error::AuthenticationFailed`]
    /// event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the transport is open.
    pub fn authenticate(
        &self,
        token: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<SessionId> {
        self.session()
            .lock()
            .authenticate(Credentials::new(token, user_id))
    }
}

// ============================================================================
// RealtimeClient - Messaging
// ============================================================================

impl RealtimeClient {
    /// Sends an envelope of `kind`, queueing it while not connected.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if `payload` cannot be serialized
    /// - [`Error::QueueFull`] if it must be queued and the queue is full
    pub fn send(&self, kind: MessageType, payload: impl Serialize) -> Result<MessageId> {
        let payload = serde_json::to_value(payload)?;
        self.session().lock().send(kind, payload, None)
    }

    /// Sends an envelope carrying `correlation_id`.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn send_correlated(
        &self,
        kind: MessageType,
        payload: impl Serialize,
        correlation_id: impl Into<String>,
    ) -> Result<MessageId> {
        let payload = serde_json::to_value(payload)?;
        self.session()
            .lock()
            .send(kind, payload, Some(correlation_id.into()))
    }

    /// Requests `channels`.
    ///
    /// Safe before `connect()`: channels stay pending until the session is
    /// authenticated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `channels` is empty.
    pub fn subscribe(&self, channels: &[Channel]) -> Result<()> {
        self.session().lock().subscribe(channels, None)
    }

    /// Requests `channels` with server-side filters.
    ///
    /// The filters are replayed with the channels after every reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `channels` is empty.
    pub fn subscribe_with_filters(&self, channels: &[Channel], filters: Value) -> Result<()> {
        self.session().lock().subscribe(channels, Some(filters))
    }

    /// Removes `channels` from both the active and pending sets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `channels` is empty.
    pub fn unsubscribe(&self, channels: &[Channel]) -> Result<()> {
        self.session().lock().unsubscribe(channels)
    }

    /// Registers the handler for a domain message type, replacing any
    /// previous one.
    ///
    /// Handlers that need the client should capture [`downgrade`](Self::downgrade)
    /// rather than a clone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for internally handled types.
    pub fn on<F>(&self, kind: MessageType, handler: F) -> Result<()>
    where
        F: Fn(&RoutedMessage) + Send + Sync + 'static,
    {
        self.router().register(kind, Arc::new(handler))?;
        Ok(())
    }

    /// Removes the handler for `kind`.
    ///
    /// Returns `true` if one was registered.
    pub fn remove_handler(&self, kind: MessageType) -> bool {
        self.router().remove(kind)
    }

    /// Subscribes to the event stream.
    ///
    /// Dropping the receiver unregisters it.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }
}

// ============================================================================
// RealtimeClient - Accessors
// ============================================================================

impl RealtimeClient {
    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns a snapshot of the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session().lock().state()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.session().lock().status()
    }

    /// Returns a snapshot of the metrics.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.session().lock().metrics()
    }

    /// Returns `true` while the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Returns `true` once the server accepted the credentials.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status() == ConnectionStatus::Authenticated
    }

    /// Returns the channels acknowledged by the server.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<Channel> {
        self.session().lock().registry().active().iter().copied().collect()
    }

    /// Returns the channels requested but not yet acknowledged.
    #[must_use]
    pub fn pending_subscriptions(&self) -> Vec<Channel> {
        self.session().lock().registry().pending().iter().copied().collect()
    }

    /// Returns the number of envelopes waiting for a transport.
    #[must_use]
    pub fn queued_messages(&self) -> usize {
        self.session().lock().queue().len()
    }
}

// ============================================================================
// Tests
// ============================================================================
