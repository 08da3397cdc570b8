//! Inbound classification and domain dispatch.
//!
//! Every text frame goes through [`classify`]:
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | [`Inbound::Internal`] | consumed by the session (heartbeat, authentication, ...) |
//! | [`Inbound::Domain`] | forwarded to the handler registered for its type |
//! | [`Inbound::Unknown`] | type outside the closed set, reported as unhandled |
//!
//! A frame that is not an envelope, or whose payload does not match its
//! type, is an [`Error::Decode`] for that frame alone.
//!
//! Handlers run on the driver task and must not block. They are called
//! without any client lock held, so they may call back into the client
//! through a [`WeakClient`](crate::client::WeakClient). A handler holding a
//! strong [`RealtimeClient`](crate::RealtimeClient) keeps the client alive
//! and stops teardown on drop. A handler panic loses only its own message.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{Envelope, InboundMessage, MessageType, RawEnvelope};

// ============================================================================
// Types
// ============================================================================

/// Handler applying one domain message to caller-owned state.
pub type MessageHandler = Arc<dyn Fn(&RoutedMessage) + Send + Sync>;

/// A decoded domain message.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    /// The envelope as received.
    pub envelope: Envelope,
    /// Its decoded payload.
    pub message: InboundMessage,
}

impl RoutedMessage {
    /// Returns the message type.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> MessageType {
        self.envelope.kind
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Consumed by the session.
    Internal(Envelope, InboundMessage),
    /// Forwarded to a domain handler.
    Domain(RoutedMessage),
    /// Type outside the closed set.
    Unknown(RawEnvelope),
}

// ============================================================================
// Classification
// ============================================================================

/// Parses and decodes one text frame.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the frame is not an envelope or its payload
/// does not match its type.
pub fn classify(text: &str, received_at: DateTime<Utc>) -> Result<Inbound> {
    let raw = RawEnvelope::parse(text)?;

    let Some(kind) = raw.message_type() else {
        return Ok(Inbound::Unknown(raw));
    };

    let envelope = raw.into_envelope(kind, received_at)?;
    let message = InboundMessage::decode(kind, &envelope.payload)?;

    if kind.is_internal() {
        Ok(Inbound::Internal(envelope, message))
    } else {
        Ok(Inbound::Domain(RoutedMessage { envelope, message }))
    }
}

// ============================================================================
// MessageRouter
// ============================================================================

/// Map of domain message types to handlers.
#[derive(Default)]
pub struct MessageRouter {
    handlers: RwLock<FxHashMap<MessageType, MessageHandler>>,
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.read().keys().copied().collect();
        kinds.sort();
        f.debug_struct("MessageRouter").field("handlers", &kinds).finish()
    }
}

impl MessageRouter {
    /// Creates a router without handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `kind`, replacing any previous one.
    ///
    /// Returns the replaced handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `kind` is handled internally.
    pub fn register(&self, kind: MessageType, handler: MessageHandler) -> Result<Option<MessageHandler>> {
        if kind.is_internal() {
            return Err(Error::invalid_argument(format!(
                "{kind} messages are handled by the client"
            )));
        }
        Ok(self.handlers.write().insert(kind, handler))
    }

    /// Removes the handler for `kind`. Returns `true` if one was registered.
    pub fn remove(&self, kind: MessageType) -> bool {
        self.handlers.write().remove(&kind).is_some()
    }

    /// Returns `true` if a handler is registered for `kind`.
    #[inline]
    #[must_use]
    pub fn has_handler(&self, kind: MessageType) -> bool {
        self.handlers.read().contains_key(&kind)
    }

    /// Calls the handler registered for the message's type.
    ///
    /// Returns `false` if no handler is registered.
    pub fn dispatch(&self, routed: &RoutedMessage) -> bool {
        // Release the lock before calling out so handlers may re-register
        let handler = self.handlers.read().get(&routed.kind()).cloned();

        match handler {
            Some(handler) => {
                handler(routed);
                true
            }
            None => {
                debug!(kind = %routed.kind(), id = %routed.envelope.id, "No handler registered");
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(kind: &str, payload: serde_json::Value) -> String {
        serde_json::json!({
            "id": "srv-1",
            "type": kind,
            "payload": payload,
            "timestamp": "2026-10-14T09:30:00Z"
        })
        .to_string()
    }

    #[test]
    fn test_classify_internal() {
        let text = frame("heartbeat", serde_json::json!({ "timestamp": 10 }));
        let inbound = classify(&text, Utc::now()).expect("classify");
        assert!(matches!(inbound, Inbound::Internal(_, InboundMessage::Heartbeat(_))));
    }

    #[test]
    fn test_classify_domain() {
        let text = frame("invoice_paid", serde_json::json!({ "invoiceId": "inv-9" }));
        let Inbound::Domain(routed) = classify(&text, Utc::now()).expect("classify") else {
            panic!("expected domain message");
        };
        assert_eq!(routed.kind(), MessageType::InvoicePaid);
        assert_eq!(routed.envelope.id.as_str(), "srv-1");
    }

    #[test]
    fn test_classify_unknown() {
        let text = frame("payout_update", serde_json::json!({}));
        let inbound = classify(&text, Utc::now()).expect("classify");
        assert!(matches!(inbound, Inbound::Unknown(ref raw) if raw.kind == "payout_update"));
    }

    #[test]
    fn test_classify_decode_errors() {
        assert!(matches!(
            classify("not json", Utc::now()),
            Err(Error::Decode { ref kind, .. }) if kind == "frame"
        ));

        let text = frame("balance_update", serde_json::json!({ "available": 10 }));
        assert!(matches!(
            classify(&text, Utc::now()),
            Err(Error::Decode { ref kind, .. }) if kind == "balance_update"
        ));
    }

    #[test]
    fn test_register_rejects_internal_types() {
        let router = MessageRouter::new();
        let err = router
            .register(MessageType::Heartbeat, Arc::new(|_: &RoutedMessage| {}))
            .err()
            .expect("internal type rejected");
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_dispatch_calls_registered_handler() {
        let router = MessageRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        router
            .register(
                MessageType::InvoicePaid,
                Arc::new(move |_: &RoutedMessage| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("register");

        let text = frame("invoice_paid", serde_json::json!({ "invoiceId": "inv-9" }));
        let Inbound::Domain(routed) = classify(&text, Utc::now()).expect("classify") else {
            panic!("expected domain message");
        };

        assert!(router.dispatch(&routed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(router.remove(MessageType::InvoicePaid));
        assert!(!router.dispatch(&routed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
