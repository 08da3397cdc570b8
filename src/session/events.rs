//! Client events.
//!
//! Every observable transition is published as a [`ClientEvent`] on a
//! `tokio::sync::broadcast` channel. Subscribers obtained from
//! [`RealtimeClient::events`](crate::RealtimeClient::events) unregister by
//! dropping their receiver. A receiver that falls more than the configured
//! capacity behind skips the oldest events.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::trace;

use crate::error::Error;
use crate::identifiers::MessageId;
use crate::protocol::{Channel, Envelope, RawEnvelope};

// ============================================================================
// ClientEvent
// ============================================================================

/// Event published by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Transport opened.
    Connected,
    /// Transport closed or lost.
    Disconnected {
        /// Close code (1000 is clean).
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Reconnect scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Asynchronous failure.
    Error(Error),
    /// Inbound envelope decoded.
    Message(Envelope),
    /// Server accepted the credentials.
    Authenticated {
        /// Authenticated user.
        user_id: String,
        /// Granted permissions.
        permissions: Vec<String>,
    },
    /// Server acknowledged channels.
    Subscribed(Vec<Channel>),
    /// Channels removed.
    Unsubscribed(Vec<Channel>),
    /// Inbound envelope with an unknown type.
    Unhandled(RawEnvelope),
    /// Queued envelope dropped after exhausting its retries.
    MessageDropped {
        /// Envelope ID.
        id: MessageId,
        /// Retries attempted.
        retries: u32,
    },
}

impl ClientEvent {
    /// Returns the event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Error(_) => "error",
            Self::Message(_) => "message",
            Self::Authenticated { .. } => "authenticated",
            Self::Subscribed(_) => "subscribed",
            Self::Unsubscribed(_) => "unsubscribed",
            Self::Unhandled(_) => "unhandled",
            Self::MessageDropped { .. } => "message_dropped",
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Sending side of the event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Creates a bus buffering `capacity` events per receiver.
    ///
    /// `capacity` must be non-zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event. Having no receivers is not an error.
    pub fn emit(&self, event: ClientEvent) {
        trace!(event = event.name(), receivers = self.tx.receiver_count(), "Event");
        let _ = self.tx.send(event);
    }

    /// Returns a new receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
