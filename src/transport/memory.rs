//! In-process connector.
//!
//! [`MemoryConnector`] hands every opened transport's server end to a
//! [`MemoryListener`]. Tests and demos play the server through the accepted
//! [`MemoryPeer`]: read what the client wrote, push envelopes back, and
//! close with any code.
//!
//! # Example
//!
//! ```ignore
//! let (connector, mut listener) = MemoryConnector::new();
//! let client = RealtimeClient::builder()
//!     .url("ws://dashboard.test/realtime")
//!     .connector(connector)
//!     .build()?;
//!
//! client.connect().await?;
//! let mut server = listener.accept().await.expect("peer");
//! server.send(MessageType::SystemAlert, json!({ "message": "hello" }));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{Envelope, MessageType};

use super::{CLOSE_ABNORMAL, Connector, OutboundFrame, Transport, TransportEvent};

// ============================================================================
// MemoryConnector
// ============================================================================

/// Connector whose server side lives in the same process.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    failures: AtomicU32,
    latency: Mutex<Option<Duration>>,
    opens: AtomicUsize,
}

impl MemoryConnector {
    /// Creates a connector and the listener receiving its server ends.
    #[must_use]
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(MemoryInner {
                accept_tx,
                failures: AtomicU32::new(0),
                latency: Mutex::new(None),
                opens: AtomicUsize::new(0),
            }),
        };
        (connector, MemoryListener { accept_rx })
    }

    /// Makes the next `count` opens fail with [`Error::Connection`].
    pub fn fail_next(&self, count: u32) {
        self.inner.failures.store(count, Ordering::SeqCst);
    }

    /// Delays every open by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = Some(latency);
    }

    /// Returns how many opens were attempted.
    #[inline]
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<Transport> {
        let attempt = self.inner.opens.fetch_add(1, Ordering::SeqCst) + 1;

        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let refused = self
            .inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            debug!(url, attempt, "Memory open refused");
            return Err(Error::connection(format!("{url}: connection refused")));
        }

        let (sink, frames) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        self.inner
            .accept_tx
            .send(MemoryPeer { frames, events })
            .map_err(|_| Error::connection(format!("{url}: listener dropped")))?;

        debug!(url, attempt, "Memory transport opened");

        Ok(Transport {
            sink,
            events: events_rx,
        })
    }
}

// ============================================================================
// MemoryListener
// ============================================================================

/// Receives the server end of each opened transport.
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Waits for the next opened transport.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Returns an already opened transport, if any.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Server end of one memory transport.
pub struct MemoryPeer {
    frames: mpsc::UnboundedReceiver<OutboundFrame>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryPeer {
    /// Waits for the next frame written by the client.
    ///
    /// Returns `None` once the client released the transport.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.frames.recv().await
    }

    /// Waits for the next envelope written by the client.
    ///
    /// Returns `None` on a close frame, on release, or on a frame that is
    /// not an envelope.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        match self.recv().await? {
            OutboundFrame::Text(text) => serde_json::from_str(&text).ok(),
            OutboundFrame::Close { .. } => None,
        }
    }

    /// Returns every envelope already written by the client.
    pub fn drain_envelopes(&mut self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            if let OutboundFrame::Text(text) = frame
                && let Ok(envelope) = serde_json::from_str(&text)
            {
                envelopes.push(envelope);
            }
        }
        envelopes
    }

    /// Pushes a raw text frame to the client.
    ///
    /// Returns `false` if the client released the transport.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Text(text.into())).is_ok()
    }

    /// Pushes an envelope of `kind` to the client.
    pub fn send(&self, kind: MessageType, payload: Value) -> bool {
        match Envelope::new(kind, payload, Utc::now()).to_json() {
            Ok(json) => self.send_text(json),
            Err(_) => false,
        }
    }

    /// Closes the transport with `code`.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    /// Simulates a network drop.
    pub fn drop_connection(self) {
        self.close(CLOSE_ABNORMAL, "connection reset");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[tokio::test]
    async fn test_open_hands_peer_to_listener() {
        let (connector, mut listener) = MemoryConnector::new();
        let Transport { sink, mut events } = connector.open("ws://test").await.expect("open");
        let mut peer = listener.try_accept().expect("peer");

        let envelope = Envelope::new(MessageType::Heartbeat, json!({ "timestamp": 5 }), Utc::now());
        sink.send(OutboundFrame::Text(envelope.to_json().expect("json")))
            .expect("send");
        assert_eq!(peer.recv_envelope().await, Some(envelope));

        assert!(peer.send(MessageType::SystemAlert, json!({ "message": "hi" })));
        assert!(matches!(events.recv().await, Some(TransportEvent::Text(_))));

        peer.drop_connection();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: "connection reset".to_string(),
            })
        );
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let (connector, mut listener) = MemoryConnector::new();
        connector.fail_next(2);

        assert!(connector.open("ws://test").await.is_err());
        assert!(connector.open("ws://test").await.is_err());
        assert!(connector.open("ws://test").await.is_ok());
        assert_eq!(connector.open_count(), 3);
        assert!(listener.try_accept().is_some());
        assert!(listener.try_accept().is_none());
    }
}
