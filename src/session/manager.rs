//! Connection manager.
//!
//! [`Session`] owns every piece of mutable client state: status, registry,
//! queue, credentials, metrics and the frame sink of the open transport. It
//! performs no I/O and never sleeps; the driver task feeds it transport
//! events and timer ticks, and the facade calls it for user operations.
//! Both go through one `Mutex<Session>`, so a queue flush and a new send can
//! never interleave.
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect()--> Connecting --open ok--> Connected --auth ok--> Authenticated
//! Connecting --open fail/timeout--> Disconnected (error emitted)
//! Connected/Authenticated --unclean close & attempts<max--> Connecting (after backoff)
//! Connected/Authenticated --unclean close & attempts>=max--> Disconnected (terminal)
//! Connected/Authenticated --disconnect()/clean close--> Disconnected
//! ```
//!
//! # Runs
//!
//! Each `connect()` starts a run: one [`RunTicket`] carrying an ID and a
//! cancellation token, covering the initial open and every reconnect that
//! follows. Driver callbacks carry the run ID. Callbacks for a run that was
//! cancelled by `disconnect()` are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{MessageId, SessionId};
use crate::protocol::{
    AuthenticationRequest, AuthenticationResponse, Channel, Envelope, HeartbeatPayload,
    InboundMessage, MessageType, SubscriptionAck, SubscriptionAction, SubscriptionRequest,
};
use crate::transport::{CLOSE_NORMAL, FrameSink, OutboundFrame};

use super::backoff::BackoffPolicy;
use super::clock::Clock;
use super::events::{ClientEvent, EventBus};
use super::queue::{DEFAULT_MAX_QUEUE_LEN, DEFAULT_MAX_RETRIES, OutboundQueue, QueuedEnvelope, RetryOutcome};
use super::registry::SubscriptionRegistry;
use super::router::{Inbound, RoutedMessage, classify};
use super::state::{ConnectionState, ConnectionStatus, Metrics};

// ============================================================================
// Constants
// ============================================================================

/// Reason sent with a client-initiated close.
pub const CLIENT_DISCONNECT_REASON: &str = "client disconnect";

// ============================================================================
// Credentials
// ============================================================================

/// Credentials replayed on every (re)connect.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Opaque token.
    pub token: String,
    /// User the token belongs to.
    pub user_id: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

// ============================================================================
// SessionSettings
// ============================================================================

/// Policy knobs of a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Reconnect backoff.
    pub backoff: BackoffPolicy,
    /// Outbound queue bound.
    pub max_queue_len: usize,
    /// Per-envelope retry ceiling.
    pub max_retries: u32,
    /// Re-send stored credentials after every open.
    pub auto_authenticate: bool,
    /// Stamped into outbound envelopes.
    pub protocol_version: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            max_retries: DEFAULT_MAX_RETRIES,
            auto_authenticate: true,
            protocol_version: None,
        }
    }
}

// ============================================================================
// Driver Types
// ============================================================================

/// Handle on one run.
#[derive(Debug, Clone)]
pub struct RunTicket {
    /// Run ID.
    pub id: u64,
    /// Cancelled by `disconnect()`.
    pub cancel: CancellationToken,
}

/// What the driver does after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// End the run.
    Stop,
    /// Sleep, then reopen.
    Reconnect(Duration),
}

// ============================================================================
// Session
// ============================================================================

/// Connection manager state.
pub struct Session {
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    events: EventBus,

    state: ConnectionState,
    metrics: Metrics,
    registry: SubscriptionRegistry,
    queue: OutboundQueue,

    sink: Option<FrameSink>,
    run: Option<RunTicket>,
    next_run: u64,
    reconnect_pending: bool,

    credentials: Option<Credentials>,
    pending_auth: Option<SessionId>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.state.status)
            .field("run", &self.run.as_ref().map(|run| run.id))
            .field("active", self.registry.active())
            .field("pending", self.registry.pending())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a disconnected session.
    #[must_use]
    pub fn new(settings: SessionSettings, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        let queue = OutboundQueue::new(settings.max_queue_len, settings.max_retries);
        Self {
            settings,
            clock,
            events,
            state: ConnectionState::default(),
            metrics: Metrics::default(),
            registry: SubscriptionRegistry::new(),
            queue,
            sink: None,
            run: None,
            next_run: 0,
            reconnect_pending: false,
            credentials: None,
            pending_auth: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns a snapshot of the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.clone()
    }

    /// Returns the current status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    /// Returns a snapshot of the metrics.
    #[inline]
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// Returns the subscription registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Returns the envelopes waiting for a transport.
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Returns the stored credentials.
    #[inline]
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Returns `true` while a reconnect delay is running.
    #[inline]
    #[must_use]
    pub fn is_reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Returns the event bus.
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Stores credentials without sending them.
    ///
    /// They are sent on the next open when auto-authentication is enabled.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts a run.
    ///
    /// Returns `None` when the client is already connecting, connected or
    /// waiting to reconnect.
    pub fn begin_connect(&mut self) -> Option<RunTicket> {
        if self.run.is_some() || self.state.status != ConnectionStatus::Disconnected {
            debug!(status = %self.state.status, "connect() ignored, run in progress");
            return None;
        }

        self.next_run += 1;
        let ticket = RunTicket {
            id: self.next_run,
            cancel: CancellationToken::new(),
        };
        self.run = Some(ticket.clone());
        self.state.status = ConnectionStatus::Connecting;

        debug!(run = ticket.id, "Connecting");
        Some(ticket)
    }

    /// Starts the reopen that follows a backoff delay.
    ///
    /// Returns `false` if the run was cancelled meanwhile.
    pub fn begin_reconnect(&mut self, run: u64) -> bool {
        if !self.is_current(run) {
            return false;
        }
        self.reconnect_pending = false;
        self.state.status = ConnectionStatus::Connecting;
        debug!(run, attempt = self.state.reconnect_attempts, "Reconnecting");
        true
    }

    /// Records a successful open.
    ///
    /// Flushes the queue, then re-authenticates with stored credentials.
    /// Returns `false` if the run was cancelled meanwhile; the caller then
    /// drops the transport.
    pub fn on_open(&mut self, run: u64, sink: FrameSink) -> bool {
        if !self.is_current(run) {
            debug!(run, "Open completed for a cancelled run");
            return false;
        }

        self.state.mark_connected(self.clock.now());
        self.sink = Some(sink);
        self.reconnect_pending = false;

        info!(run, queued = self.queue.len(), "Connected");

        self.flush_queue();
        self.events.emit(ClientEvent::Connected);

        if self.settings.auto_authenticate && self.credentials.is_some() {
            if let Err(e) = self.send_authentication() {
                debug!(error = %e, "Automatic authentication not sent");
            }
        }
        true
    }

    /// Records a failed initial open. No reconnect is scheduled.
    pub fn on_open_failed(&mut self, run: u64, error: Error) {
        if !self.is_current(run) {
            return;
        }

        warn!(run, error = %error, "Connect failed");
        self.run = None;
        self.state.status = ConnectionStatus::Disconnected;
        self.record_error(error);
    }

    /// Records a failed reopen, which counts as another unclean close.
    pub fn on_reconnect_failed(&mut self, run: u64, error: Error) -> CloseAction {
        if !self.is_current(run) {
            return CloseAction::Stop;
        }

        warn!(run, attempt = self.state.reconnect_attempts, error = %error, "Reconnect failed");
        self.state.status = ConnectionStatus::Disconnected;
        self.record_error(error);
        self.schedule_reconnect()
    }

    /// Records a transport close.
    pub fn on_closed(&mut self, run: u64, code: u16, reason: &str) -> CloseAction {
        if !self.is_current(run) {
            return CloseAction::Stop;
        }

        self.sink = None;
        self.pending_auth = None;
        self.state.mark_disconnected(self.clock.now());
        self.registry.demote();

        info!(run, code, reason, "Disconnected");
        self.events.emit(ClientEvent::Disconnected {
            code,
            reason: reason.to_string(),
        });

        if code == CLOSE_NORMAL {
            self.run = None;
            return CloseAction::Stop;
        }
        self.schedule_reconnect()
    }

    /// Closes the transport and tears the session down. Idempotent.
    ///
    /// Pending and active channels are cleared. Queued envelopes and stored
    /// credentials are kept for a later `connect()`.
    pub fn disconnect(&mut self) {
        let live = self.run.is_some() || self.state.status != ConnectionStatus::Disconnected;

        if let Some(run) = self.run.take() {
            run.cancel.cancel();
        }
        if let Some(sink) = self.sink.take() {
            let _ = sink.send(OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: CLIENT_DISCONNECT_REASON.to_string(),
            });
        }

        self.reconnect_pending = false;
        self.pending_auth = None;
        self.registry.clear();

        if !live {
            debug!("disconnect() ignored, already disconnected");
            return;
        }

        self.state.mark_disconnected(self.clock.now());
        info!("Disconnected by client");
        self.events.emit(ClientEvent::Disconnected {
            code: CLOSE_NORMAL,
            reason: CLIENT_DISCONNECT_REASON.to_string(),
        });
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Sends an envelope, or queues it while the transport is not open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] if the envelope must be queued and the
    /// queue is at capacity.
    pub fn send(
        &mut self,
        kind: MessageType,
        payload: Value,
        correlation_id: Option<String>,
    ) -> Result<MessageId> {
        let mut envelope = self.envelope(kind, payload);
        if let Some(correlation_id) = correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        let id = envelope.id.clone();

        if !self.state.status.is_connected() {
            self.queue.push(envelope, self.clock.now())?;
            debug!(%id, %kind, queued = self.queue.len(), "Envelope queued");
            return Ok(id);
        }

        self.flush_queue();
        if !self.queue.is_empty() {
            let outcome = self.queue.push_failed(envelope, self.clock.now());
            self.handle_retry(outcome);
            return Ok(id);
        }

        if self.transmit(&envelope).is_err() {
            let outcome = self.queue.push_failed(envelope, self.clock.now());
            self.handle_retry(outcome);
        }
        Ok(id)
    }

    /// Sends a heartbeat carrying the current time.
    pub fn heartbeat(&mut self, run: u64) {
        if !self.is_current(run) || !self.state.status.is_connected() {
            return;
        }

        let payload = HeartbeatPayload {
            timestamp: self.clock.now_ms(),
        };
        match serde_json::to_value(payload) {
            Ok(payload) => self.send_control(MessageType::Heartbeat, payload),
            Err(e) => warn!(error = %e, "Failed to encode heartbeat"),
        }
    }

    /// Writes queued envelopes in FIFO order until the queue is empty or a
    /// write fails.
    fn flush_queue(&mut self) {
        while let Some(item) = self.queue.pop() {
            if let Err(e) = self.transmit(&item.envelope) {
                debug!(id = %item.envelope.id, error = %e, "Queued envelope not written");
                let outcome = self.queue.retry(item);
                self.handle_retry(outcome);
                break;
            }
        }
    }

    fn handle_retry(&mut self, outcome: RetryOutcome) {
        if let RetryOutcome::Dropped(item) = outcome {
            self.report_drop(item);
        }
    }

    fn report_drop(&mut self, item: QueuedEnvelope) {
        self.metrics.dropped_messages += 1;
        warn!(
            id = %item.envelope.id,
            kind = %item.envelope.kind,
            retries = item.retry_count,
            "Dropping envelope after exhausting retries"
        );
        self.events.emit(ClientEvent::MessageDropped {
            id: item.envelope.id,
            retries: item.retry_count,
        });
    }

    /// Writes a client-generated control envelope. Not queued on failure.
    fn send_control(&mut self, kind: MessageType, payload: Value) {
        let envelope = self.envelope(kind, payload);
        if let Err(e) = self.transmit(&envelope) {
            debug!(%kind, error = %e, "Control envelope not written");
        }
    }

    fn transmit(&mut self, envelope: &Envelope) -> Result<()> {
        let sink = self.sink.as_ref().ok_or(Error::NotConnected)?;
        let json = envelope.to_json()?;
        sink.send(OutboundFrame::Text(json))
            .map_err(|_| Error::ConnectionClosed)?;

        self.metrics.messages_sent += 1;
        trace!(id = %envelope.id, kind = %envelope.kind, "Envelope sent");
        Ok(())
    }

    fn envelope(&self, kind: MessageType, payload: Value) -> Envelope {
        Envelope::new(kind, payload, self.clock.now())
            .with_version(self.settings.protocol_version.clone())
    }

    // ========================================================================
    // Authentication & Subscriptions
    // ========================================================================

    /// Stores credentials and sends an authentication request.
    ///
    /// The status only becomes `Authenticated` once the server accepts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the transport is open.
    pub fn authenticate(&mut self, credentials: Credentials) -> Result<SessionId> {
        if !self.state.status.is_connected() {
            return Err(Error::NotConnected);
        }
        self.credentials = Some(credentials);
        self.send_authentication()
    }

    fn send_authentication(&mut self) -> Result<SessionId> {
        let credentials = self.credentials.clone().ok_or(Error::NotConnected)?;
        let session_id = SessionId::generate();

        let request = AuthenticationRequest {
            token: credentials.token,
            user_id: credentials.user_id,
            session_id: session_id.clone(),
        };
        let envelope = self.envelope(MessageType::Authentication, serde_json::to_value(&request)?);
        self.transmit(&envelope)?;

        debug!(session_id = %session_id, user_id = %request.user_id, "Authentication sent");
        self.pending_auth = Some(session_id.clone());
        Ok(session_id)
    }

    /// Requests `channels`, sending now if authenticated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `channels` is empty.
    pub fn subscribe(&mut self, channels: &[Channel], filters: Option<Value>) -> Result<()> {
        if channels.is_empty() {
            return Err(Error::invalid_argument("no channels to subscribe"));
        }

        let requested = self.registry.request(channels, filters.as_ref());
        if requested.is_empty() {
            debug!(?channels, "Channels already active");
            return Ok(());
        }

        if self.state.status == ConnectionStatus::Authenticated {
            self.send_subscription(SubscriptionAction::Subscribe, requested, filters);
        } else {
            debug!(channels = ?requested, "Subscription pending until authenticated");
        }
        Ok(())
    }

    /// Removes `channels` without waiting for an acknowledgment.
    ///
    /// The request is written only if the transport is open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `channels` is empty.
    pub fn unsubscribe(&mut self, channels: &[Channel]) -> Result<()> {
        if channels.is_empty() {
            return Err(Error::invalid_argument("no channels to unsubscribe"));
        }

        self.registry.remove(channels);
        if self.state.status.is_connected() {
            self.send_subscription(SubscriptionAction::Unsubscribe, channels.to_vec(), None);
        }
        self.events.emit(ClientEvent::Unsubscribed(channels.to_vec()));
        Ok(())
    }

    fn send_subscription(
        &mut self,
        action: SubscriptionAction,
        channels: Vec<Channel>,
        filters: Option<Value>,
    ) {
        let kind = match action {
            SubscriptionAction::Subscribe => MessageType::Subscription,
            SubscriptionAction::Unsubscribe => MessageType::Unsubscription,
        };
        debug!(?action, ?channels, "Subscription request");

        let request = SubscriptionRequest {
            action,
            channels,
            filters,
        };
        match serde_json::to_value(&request) {
            Ok(payload) => self.send_control(kind, payload),
            Err(e) => warn!(error = %e, "Failed to encode subscription request"),
        }
    }

    fn replay_pending(&mut self) {
        for (channels, filters) in self.registry.replay_groups() {
            self.send_subscription(SubscriptionAction::Subscribe, channels, filters);
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Processes one inbound text frame.
    ///
    /// Returns the domain message to dispatch, if any. Dispatch happens
    /// outside the session lock.
    pub fn handle_text(&mut self, run: u64, text: &str) -> Option<RoutedMessage> {
        if !self.is_current(run) {
            return None;
        }

        self.metrics.messages_received += 1;
        trace!(len = text.len(), "Frame received");

        match classify(text, self.clock.now()) {
            Err(e) => {
                self.metrics.decode_failures += 1;
                warn!(error = %e, "Dropping undecodable frame");
                self.record_error(e);
                None
            }

            Ok(Inbound::Unknown(raw)) => {
                warn!(kind = %raw.kind, id = %raw.id, "Unhandled message type");
                self.events.emit(ClientEvent::Unhandled(raw));
                None
            }

            Ok(Inbound::Internal(envelope, message)) => {
                self.events.emit(ClientEvent::Message(envelope));
                self.handle_internal(message);
                None
            }

            Ok(Inbound::Domain(routed)) => {
                self.events.emit(ClientEvent::Message(routed.envelope.clone()));
                if let InboundMessage::Error(error) = &routed.message {
                    warn!(code = %error.code, detail = %error.message, "Server error");
                    self.events
                        .emit(ClientEvent::Error(Error::server(&error.code, &error.message)));
                }
                Some(routed)
            }
        }
    }

    fn handle_internal(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::ConnectionStatus(status) => {
                debug!(status = %status.status, detail = ?status.message, "Connection status");
            }
            InboundMessage::Heartbeat(heartbeat) => self.on_heartbeat(heartbeat),
            InboundMessage::Authentication(response) => self.on_authentication(response),
            InboundMessage::Subscription(ack) => self.on_subscription_ack(&ack),
            InboundMessage::Unsubscription(ack) => {
                debug!(channels = ?ack.channels, "Unsubscription acknowledged");
            }
            other => debug!(kind = %other.kind(), "Not an internal message"),
        }
    }

    /// Records a domain handler that panicked on one message.
    ///
    /// The message is lost; the connection and later messages are not
    /// affected.
    pub fn on_handler_panic(&mut self, run: u64, kind: MessageType, message: String) {
        if !self.is_current(run) {
            return;
        }
        warn!(%kind, detail = %message, "Handler panicked");
        self.record_error(Error::handler(kind, message));
    }

    fn on_heartbeat(&mut self, heartbeat: HeartbeatPayload) {
        let Some(latency) = self.clock.now_ms().checked_sub(heartbeat.timestamp) else {
            self.metrics.decode_failures += 1;
            warn!(timestamp = heartbeat.timestamp, "Discarding heartbeat with out-of-range timestamp");
            return;
        };
        if latency < 0 {
            debug!(latency, "Discarding heartbeat from the future");
            return;
        }

        self.metrics.record_latency(latency as f64, self.clock.now());
        trace!(latency, average = self.metrics.average_latency_ms, "Heartbeat");
    }

    fn on_authentication(&mut self, response: AuthenticationResponse) {
        let Some(expected) = self.pending_auth.as_ref() else {
            debug!("Ignoring unsolicited authentication response");
            return;
        };
        if response
            .session_id
            .as_deref()
            .is_some_and(|session_id| session_id != expected.as_str())
        {
            debug!(session_id = ?response.session_id, "Ignoring stale authentication response");
            return;
        }
        self.pending_auth = None;

        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "authentication rejected".to_string());
            warn!(reason = %message, "Authentication failed");

            self.credentials = None;
            if self.state.status == ConnectionStatus::Authenticated {
                self.state.status = ConnectionStatus::Connected;
                self.state.clear_identity();
                self.registry.demote();
            }
            self.record_error(Error::authentication_failed(message));
            return;
        }

        let user_id = response
            .user_id
            .or_else(|| self.credentials.as_ref().map(|c| c.user_id.clone()))
            .unwrap_or_default();
        let permissions = response.permissions.unwrap_or_default();

        self.state.status = ConnectionStatus::Authenticated;
        self.state.user_id = Some(user_id.clone());
        self.state.permissions = permissions.clone();

        info!(user_id = %user_id, "Authenticated");
        self.events.emit(ClientEvent::Authenticated {
            user_id,
            permissions,
        });

        self.replay_pending();
    }

    fn on_subscription_ack(&mut self, ack: &SubscriptionAck) {
        if self.state.status != ConnectionStatus::Authenticated {
            warn!(status = %self.state.status, "Ignoring subscription ack while not authenticated");
            return;
        }

        let (accepted, rejected) = ack.outcome();

        let promoted = self.registry.acknowledge(&accepted);
        if !promoted.is_empty() {
            info!(channels = ?promoted, "Subscribed");
            self.events.emit(ClientEvent::Subscribed(promoted));
        }

        for (channel, reason) in rejected {
            warn!(%channel, reason = %reason, "Subscription rejected");
            self.registry.reject(channel);
            self.record_error(Error::subscription_failed(channel, reason));
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn is_current(&self, run: u64) -> bool {
        self.run.as_ref().is_some_and(|current| current.id == run)
    }

    fn schedule_reconnect(&mut self) -> CloseAction {
        let attempts = self.state.reconnect_attempts;

        let Some(delay) = self.settings.backoff.next_delay(attempts) else {
            self.run = None;
            self.reconnect_pending = false;
            warn!(attempts, "Reconnect attempts exhausted");
            self.record_error(Error::ReconnectExhausted { attempts });
            return CloseAction::Stop;
        };

        self.state.reconnect_attempts += 1;
        self.metrics.reconnect_count += 1;
        self.reconnect_pending = true;

        let attempt = self.state.reconnect_attempts;
        info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.events.emit(ClientEvent::Reconnecting { attempt, delay });
        CloseAction::Reconnect(delay)
    }

    fn record_error(&mut self, error: Error) {
        self.state.last_error = Some(error.to_string());
        self.events.emit(ClientEvent::Error(error));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::{broadcast, mpsc};

    use crate::session::clock::ManualClock;

    type Frames = mpsc::UnboundedReceiver<OutboundFrame>;

    fn session_with(settings: SessionSettings) -> (Session, Arc<ManualClock>, broadcast::Receiver<ClientEvent>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let events = EventBus::new(64);
        let rx = events.subscribe();
        let session = Session::new(settings, Arc::clone(&clock) as Arc<dyn Clock>, events);
        (session, clock, rx)
    }

    fn session() -> (Session, Arc<ManualClock>, broadcast::Receiver<ClientEvent>) {
        session_with(SessionSettings::default())
    }

    fn open(session: &mut Session) -> (RunTicket, Frames) {
        let ticket = session.begin_connect().expect("run started");
        let frames = reopen(session, ticket.id);
        (ticket, frames)
    }

    fn reopen(session: &mut Session, run: u64) -> Frames {
        let (sink, frames) = mpsc::unbounded_channel();
        assert!(session.on_open(run, sink));
        frames
    }

    fn sent(frames: &mut Frames) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Ok(frame) = frames.try_recv() {
            if let OutboundFrame::Text(text) = frame {
                envelopes.push(serde_json::from_str(&text).expect("envelope"));
            }
        }
        envelopes
    }

    fn inbound(session: &mut Session, run: u64, kind: &str, payload: Value) -> Option<RoutedMessage> {
        let text = json!({ "id": "srv", "type": kind, "payload": payload }).to_string();
        session.handle_text(run, &text)
    }

    fn drain(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    /// Authenticates and returns the frames written so far.
    fn authenticate(session: &mut Session, run: u64, frames: &mut Frames) -> Vec<Envelope> {
        let session_id = session
            .authenticate(Credentials::new("tok", "u-1"))
            .expect("authenticate");
        inbound(
            session,
            run,
            "authentication",
            json!({ "success": true, "userId": "u-1", "sessionId": session_id.as_str() }),
        );
        sent(frames)
    }

    #[test]
    fn test_connect_is_noop_while_in_progress() {
        let (mut session, _, _) = session();
        let ticket = session.begin_connect().expect("first connect");
        assert!(session.begin_connect().is_none());

        let _frames = reopen(&mut session, ticket.id);
        assert!(session.begin_connect().is_none());
        assert_eq!(session.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_open_failure_does_not_reconnect() {
        let (mut session, _, mut events) = session();
        let ticket = session.begin_connect().expect("run");
        session.on_open_failed(ticket.id, Error::connection_timeout(10_000));

        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(!session.is_reconnect_pending());
        assert_eq!(session.metrics().reconnect_count, 0);
        assert!(matches!(drain(&mut events)[..], [ClientEvent::Error(Error::ConnectionTimeout { .. })]));

        assert!(session.begin_connect().is_some());
    }

    #[test]
    fn test_queued_messages_flush_in_order_before_new_sends() {
        let (mut session, _, _) = session();
        for n in 1..=3 {
            session
                .send(MessageType::SystemAlert, json!({ "n": n }), None)
                .expect("queued");
        }
        assert_eq!(session.queue().len(), 3);

        let (_, mut frames) = open(&mut session);
        session
            .send(MessageType::SystemAlert, json!({ "n": 4 }), None)
            .expect("sent");

        let order: Vec<_> = sent(&mut frames)
            .iter()
            .map(|envelope| envelope.payload["n"].as_u64().expect("n"))
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert!(session.queue().is_empty());
        assert_eq!(session.metrics().messages_sent, 4);
    }

    #[test]
    fn test_send_fails_when_queue_full() {
        let (mut session, _, _) = session_with(SessionSettings {
            max_queue_len: 1,
            ..Default::default()
        });
        session.send(MessageType::SystemAlert, json!({}), None).expect("queued");

        let err = session
            .send(MessageType::SystemAlert, json!({}), None)
            .unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 1 }));
    }

    #[test]
    fn test_outbound_envelopes_carry_version_and_correlation() {
        let (mut session, _, _) = session_with(SessionSettings {
            protocol_version: Some("1.0".to_string()),
            ..Default::default()
        });
        let (_, mut frames) = open(&mut session);

        let id = session
            .send(MessageType::SystemAlert, json!({}), Some("req-7".to_string()))
            .expect("sent");

        let envelopes = sent(&mut frames);
        assert_eq!(envelopes[0].id, id);
        assert_eq!(envelopes[0].version.as_deref(), Some("1.0"));
        assert_eq!(envelopes[0].correlation_id.as_deref(), Some("req-7"));
    }

    #[test]
    fn test_queued_envelope_dropped_after_retries() {
        let (mut session, _, mut events) = session_with(SessionSettings {
            max_retries: 1,
            ..Default::default()
        });
        let id = session
            .send(MessageType::SystemAlert, json!({}), None)
            .expect("queued");

        // Two opens whose transports are already gone
        let ticket = session.begin_connect().expect("run");
        for _ in 0..2 {
            let (sink, frames) = mpsc::unbounded_channel();
            drop(frames);
            assert!(session.on_open(ticket.id, sink));
            assert!(matches!(
                session.on_closed(ticket.id, 1006, "reset"),
                CloseAction::Reconnect(_)
            ));
            assert!(session.begin_reconnect(ticket.id));
        }

        assert!(session.queue().is_empty());
        assert_eq!(session.metrics().dropped_messages, 1);
        assert!(drain(&mut events).iter().any(|event| matches!(
            event,
            ClientEvent::MessageDropped { id: dropped, retries: 2 } if *dropped == id
        )));
    }

    #[test]
    fn test_subscribe_before_connect_is_sent_once_after_authentication() {
        let (mut session, _, _) = session();
        session.subscribe(&[Channel::SystemAlerts], None).expect("subscribe");
        assert!(session.registry().pending().contains(&Channel::SystemAlerts));

        let (ticket, mut frames) = open(&mut session);
        assert!(sent(&mut frames).is_empty());

        let written = authenticate(&mut session, ticket.id, &mut frames);
        let subscriptions: Vec<_> = written
            .iter()
            .filter(|envelope| envelope.kind == MessageType::Subscription)
            .collect();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(
            subscriptions[0].payload,
            json!({ "action": "subscribe", "channels": ["system_alerts"] })
        );

        inbound(&mut session, ticket.id, "subscription", json!({ "channels": ["system_alerts"] }));
        assert!(session.registry().active().contains(&Channel::SystemAlerts));
        assert!(session.registry().pending().is_empty());
    }

    #[test]
    fn test_active_channels_replayed_after_unclean_close() {
        let (mut session, _, mut events) = session();
        let (ticket, mut frames) = open(&mut session);
        authenticate(&mut session, ticket.id, &mut frames);

        let channels = [Channel::UserBalances, Channel::SystemAlerts];
        session.subscribe(&channels, None).expect("subscribe");
        inbound(&mut session, ticket.id, "subscription", json!({ "channels": channels }));
        assert_eq!(session.registry().active().len(), 2);
        sent(&mut frames);

        let action = session.on_closed(ticket.id, 1006, "reset");
        assert_eq!(action, CloseAction::Reconnect(Duration::from_secs(5)));
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.registry().active().is_empty());
        assert_eq!(session.registry().pending().len(), 2);

        assert!(session.begin_reconnect(ticket.id));
        let mut frames = reopen(&mut session, ticket.id);

        // Stored credentials are replayed without caller intervention
        let written = sent(&mut frames);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].kind, MessageType::Authentication);
        let session_id = written[0].payload["sessionId"].as_str().expect("session id").to_string();

        inbound(
            &mut session,
            ticket.id,
            "authentication",
            json!({ "success": true, "sessionId": session_id }),
        );
        let written = sent(&mut frames);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].payload["channels"], json!(["user_balances", "system_alerts"]));

        inbound(&mut session, ticket.id, "subscription", json!({ "channels": channels }));
        assert_eq!(
            session.registry().active().iter().copied().collect::<Vec<_>>(),
            vec![Channel::UserBalances, Channel::SystemAlerts]
        );
        assert_eq!(session.state().reconnect_attempts, 0);

        let names: Vec<_> = drain(&mut events).iter().map(ClientEvent::name).collect();
        assert!(names.contains(&"reconnecting"));
        assert_eq!(names.iter().filter(|name| **name == "subscribed").count(), 2);
    }

    #[test]
    fn test_replay_keeps_filters() {
        let (mut session, _, _) = session();
        let eur = json!({ "currency": "EUR" });
        session
            .subscribe(&[Channel::UserBalances], Some(eur.clone()))
            .expect("subscribe");
        session.subscribe(&[Channel::SystemAlerts], None).expect("subscribe");

        let (ticket, mut frames) = open(&mut session);
        let written = authenticate(&mut session, ticket.id, &mut frames);
        let payloads: Vec<_> = written
            .iter()
            .filter(|envelope| envelope.kind == MessageType::Subscription)
            .map(|envelope| envelope.payload.clone())
            .collect();

        assert_eq!(
            payloads,
            vec![
                json!({ "action": "subscribe", "channels": ["user_balances"], "filters": eur }),
                json!({ "action": "subscribe", "channels": ["system_alerts"] }),
            ]
        );
    }

    #[test]
    fn test_unsubscribe_is_optimistic() {
        let (mut session, _, mut events) = session();
        let (ticket, mut frames) = open(&mut session);
        authenticate(&mut session, ticket.id, &mut frames);
        session.subscribe(&[Channel::UserBalances], None).expect("subscribe");
        inbound(&mut session, ticket.id, "subscription", json!({ "channels": ["user_balances"] }));
        sent(&mut frames);
        drain(&mut events);

        session.unsubscribe(&[Channel::UserBalances]).expect("unsubscribe");

        assert!(session.registry().active().is_empty());
        assert!(session.registry().pending().is_empty());
        let written = sent(&mut frames);
        assert_eq!(written[0].kind, MessageType::Unsubscription);
        assert_eq!(written[0].payload["action"], "unsubscribe");
        assert!(matches!(
            drain(&mut events)[..],
            [ClientEvent::Unsubscribed(ref channels)] if channels == &[Channel::UserBalances]
        ));
    }

    #[test]
    fn test_heartbeat_latency_average() {
        let (mut session, clock, _) = session();
        let (ticket, mut frames) = open(&mut session);

        for latency in [100, 300] {
            session.heartbeat(ticket.id);
            let heartbeat = sent(&mut frames).pop().expect("heartbeat");
            assert_eq!(heartbeat.kind, MessageType::Heartbeat);

            clock.advance_ms(latency);
            inbound(&mut session, ticket.id, "heartbeat", heartbeat.payload);
        }

        let metrics = session.metrics();
        assert_eq!(metrics.average_latency_ms, 200.0);
        assert!(metrics.last_heartbeat_at.is_some());
    }

    #[test]
    fn test_heartbeat_from_the_future_is_discarded() {
        let (mut session, _, _) = session();
        let (ticket, _frames) = open(&mut session);

        inbound(&mut session, ticket.id, "heartbeat", json!({ "timestamp": 60_000 }));
        assert_eq!(session.metrics().average_latency_ms, 0.0);
        assert!(session.metrics().last_heartbeat_at.is_none());
    }

    #[test]
    fn test_heartbeat_with_out_of_range_timestamp_is_isolated() {
        let (mut session, _, _) = session();
        let (ticket, _frames) = open(&mut session);

        inbound(&mut session, ticket.id, "heartbeat", json!({ "timestamp": i64::MIN }));
        assert_eq!(session.metrics().decode_failures, 1);
        assert!(session.metrics().last_heartbeat_at.is_none());

        let routed = inbound(
            &mut session,
            ticket.id,
            "invoice_paid",
            json!({ "invoiceId": "inv-1" }),
        );
        assert_eq!(routed.map(|r| r.kind()), Some(MessageType::InvoicePaid));
        assert_eq!(session.metrics().messages_received, 2);
    }

    #[test]
    fn test_authenticate_requires_connection() {
        let (mut session, _, _) = session();
        let err = session
            .authenticate(Credentials::new("tok", "u-1"))
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(session.credentials().is_none());
    }

    #[test]
    fn test_authentication_failure_keeps_connection() {
        let (mut session, _, mut events) = session();
        let (ticket, _frames) = open(&mut session);

        let session_id = session
            .authenticate(Credentials::new("bad", "u-1"))
            .expect("sent");
        inbound(
            &mut session,
            ticket.id,
            "authentication",
            json!({ "success": false, "sessionId": session_id.as_str(), "message": "expired" }),
        );

        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert!(session.credentials().is_none());
        assert!(drain(&mut events).iter().any(|event| matches!(
            event,
            ClientEvent::Error(Error::AuthenticationFailed { message }) if message == "expired"
        )));

        // A retry with fresh credentials works on the same transport
        let session_id = session
            .authenticate(Credentials::new("good", "u-1"))
            .expect("sent");
        inbound(
            &mut session,
            ticket.id,
            "authentication",
            json!({ "success": true, "sessionId": session_id.as_str(), "permissions": ["read"] }),
        );
        let state = session.state();
        assert_eq!(state.status, ConnectionStatus::Authenticated);
        assert_eq!(state.user_id.as_deref(), Some("u-1"));
        assert_eq!(state.permissions, vec!["read".to_string()]);
    }

    #[test]
    fn test_stale_authentication_response_is_ignored() {
        let (mut session, _, _) = session();
        let (ticket, _frames) = open(&mut session);

        let first = session
            .authenticate(Credentials::new("tok", "u-1"))
            .expect("sent");
        let _second = session
            .authenticate(Credentials::new("tok", "u-1"))
            .expect("sent");

        inbound(
            &mut session,
            ticket.id,
            "authentication",
            json!({ "success": true, "sessionId": first.as_str() }),
        );
        assert_eq!(session.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_failed_reauthentication_demotes_channels() {
        let (mut session, _, _) = session();
        let (ticket, mut frames) = open(&mut session);
        authenticate(&mut session, ticket.id, &mut frames);
        session.subscribe(&[Channel::SystemAlerts], None).expect("subscribe");
        inbound(&mut session, ticket.id, "subscription", json!({ "channels": ["system_alerts"] }));

        let session_id = session
            .authenticate(Credentials::new("revoked", "u-1"))
            .expect("sent");
        inbound(
            &mut session,
            ticket.id,
            "authentication",
            json!({ "success": false, "sessionId": session_id.as_str() }),
        );

        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert!(session.state().user_id.is_none());
        assert!(session.registry().active().is_empty());
        assert!(session.registry().pending().contains(&Channel::SystemAlerts));
    }

    #[test]
    fn test_partial_subscription_failure() {
        let (mut session, _, mut events) = session();
        let (ticket, mut frames) = open(&mut session);
        authenticate(&mut session, ticket.id, &mut frames);
        session
            .subscribe(&[Channel::UserBalances, Channel::AdminNotifications], None)
            .expect("subscribe");
        drain(&mut events);

        inbound(
            &mut session,
            ticket.id,
            "subscription",
            json!({
                "channels": ["user_balances", "admin_notifications"],
                "failed": [{ "channel": "admin_notifications", "reason": "forbidden" }]
            }),
        );

        assert!(session.registry().active().contains(&Channel::UserBalances));
        assert!(!session.registry().active().contains(&Channel::AdminNotifications));
        assert!(session.registry().pending().is_empty());

        let events: Vec<_> = drain(&mut events)
            .into_iter()
            .filter(|event| !matches!(event, ClientEvent::Message(_)))
            .collect();
        assert!(matches!(&events[0], ClientEvent::Subscribed(channels) if channels == &[Channel::UserBalances]));
        assert!(matches!(
            &events[1],
            ClientEvent::Error(Error::SubscriptionFailed { channel: Channel::AdminNotifications, reason })
                if reason == "forbidden"
        ));
    }

    #[test]
    fn test_subscription_ack_ignored_when_not_authenticated() {
        let (mut session, _, _) = session();
        session.subscribe(&[Channel::SystemAlerts], None).expect("subscribe");
        let (ticket, _frames) = open(&mut session);

        inbound(&mut session, ticket.id, "subscription", json!({ "channels": ["system_alerts"] }));
        assert!(session.registry().active().is_empty());
        assert!(session.registry().pending().contains(&Channel::SystemAlerts));
    }

    #[test]
    fn test_reconnect_exhaustion_is_terminal() {
        let (mut session, _, mut events) = session_with(SessionSettings {
            backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(30), 2),
            ..Default::default()
        });
        let (ticket, _frames) = open(&mut session);

        assert_eq!(
            session.on_closed(ticket.id, 1006, "reset"),
            CloseAction::Reconnect(Duration::from_millis(100))
        );
        assert!(session.begin_reconnect(ticket.id));
        assert_eq!(
            session.on_reconnect_failed(ticket.id, Error::connection("refused")),
            CloseAction::Reconnect(Duration::from_millis(200))
        );
        assert!(session.begin_reconnect(ticket.id));
        assert_eq!(
            session.on_reconnect_failed(ticket.id, Error::connection("refused")),
            CloseAction::Stop
        );

        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(!session.is_reconnect_pending());
        assert_eq!(session.metrics().reconnect_count, 2);
        assert!(matches!(
            drain(&mut events).last(),
            Some(ClientEvent::Error(Error::ReconnectExhausted { attempts: 2 }))
        ));

        // An explicit connect starts over
        assert!(session.begin_connect().is_some());
    }

    #[test]
    fn test_clean_close_does_not_reconnect() {
        let (mut session, _, _) = session();
        let (ticket, _frames) = open(&mut session);

        assert_eq!(session.on_closed(ticket.id, CLOSE_NORMAL, "bye"), CloseAction::Stop);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert_eq!(session.metrics().reconnect_count, 0);
        assert!(session.begin_connect().is_some());
    }

    #[test]
    fn test_disconnect_tears_down_and_is_idempotent() {
        let (mut session, _, mut events) = session();
        session.subscribe(&[Channel::SystemAlerts], None).expect("subscribe");
        let (ticket, mut frames) = open(&mut session);
        drain(&mut events);

        session.disconnect();

        assert!(ticket.cancel.is_cancelled());
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.registry().pending().is_empty());
        assert_eq!(
            frames.try_recv().expect("close frame"),
            OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: CLIENT_DISCONNECT_REASON.to_string(),
            }
        );

        session.disconnect();
        let events = drain(&mut events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ClientEvent::Disconnected { code: CLOSE_NORMAL, .. }));

        // Late callbacks from the cancelled run are ignored
        assert_eq!(session.on_closed(ticket.id, 1006, "reset"), CloseAction::Stop);
        assert!(session.handle_text(ticket.id, "{}").is_none());
        assert_eq!(session.metrics().messages_received, 0);
    }

    #[test]
    fn test_disconnect_cancels_pending_reconnect() {
        let (mut session, _, _) = session();
        let (ticket, _frames) = open(&mut session);
        session.on_closed(ticket.id, 1006, "reset");
        assert!(session.is_reconnect_pending());

        session.disconnect();
        assert!(!session.is_reconnect_pending());
        assert!(!session.begin_reconnect(ticket.id));
    }

    #[test]
    fn test_inbound_routing() {
        let (mut session, _, mut events) = session();
        let (ticket, _frames) = open(&mut session);
        drain(&mut events);

        // Malformed frame is contained
        assert!(session.handle_text(ticket.id, "garbage").is_none());
        // Payload mismatch is contained
        assert!(inbound(&mut session, ticket.id, "invoice_paid", json!({ "amount": 5 })).is_none());
        // Unknown type is reported
        assert!(inbound(&mut session, ticket.id, "payout_update", json!({})).is_none());
        // Internal type is consumed
        assert!(inbound(&mut session, ticket.id, "connection_status", json!({ "status": "ok" })).is_none());
        // Domain type is routed
        let routed = inbound(&mut session, ticket.id, "invoice_paid", json!({ "invoiceId": "inv-1" }))
            .expect("routed");
        assert_eq!(routed.kind(), MessageType::InvoicePaid);

        let metrics = session.metrics();
        assert_eq!(metrics.messages_received, 5);
        assert_eq!(metrics.decode_failures, 2);

        let names: Vec<_> = drain(&mut events).iter().map(ClientEvent::name).collect();
        assert_eq!(names, vec!["error", "error", "unhandled", "message", "message"]);
    }

    #[test]
    fn test_server_error_is_routed_and_reported() {
        let (mut session, _, mut events) = session();
        let (ticket, _frames) = open(&mut session);
        drain(&mut events);

        let routed = inbound(
            &mut session,
            ticket.id,
            "error",
            json!({ "code": "RATE", "message": "slow down" }),
        );
        assert!(routed.is_some());
        assert!(drain(&mut events).iter().any(|event| matches!(
            event,
            ClientEvent::Error(Error::Server { code, .. }) if code == "RATE"
        )));
    }
}
