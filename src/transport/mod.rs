//! Transport layer.
//!
//! A [`Connector`] opens one bidirectional text transport and hands back a
//! [`Transport`]: a frame sink for outbound text and a stream of
//! [`TransportEvent`]s for inbound text and the final close.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   OutboundFrame    ┌───────────────┐
//! │  Session         │───────────────────►│  pump task    │◄──► server
//! │  (manager)       │◄───────────────────│  (connector)  │
//! └──────────────────┘   TransportEvent   └───────────────┘
//! ```
//!
//! The session pushes frames into an unbounded channel, so writes never block
//! and keep submission order. The pump task owns the socket.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | `tokio-tungstenite` connector |
//! | `memory` | In-process connector for tests and demos |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// In-process connector.
pub mod memory;

/// WebSocket connector.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use websocket::WsConnector;

// ============================================================================
// Constants
// ============================================================================

/// Close code of a client-initiated, clean shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the transport ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

// ============================================================================
// Frames
// ============================================================================

/// Frame written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Serialized envelope.
    Text(String),
    /// Close the transport with the given code.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Event produced by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text frame from the server.
    Text(String),
    /// Transport closed. No further events follow.
    Closed {
        /// Close code (1000 is clean).
        code: u16,
        /// Close reason.
        reason: String,
    },
}

impl TransportEvent {
    /// Creates an abnormal close event.
    #[inline]
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::Closed {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
        }
    }
}

/// Sending half of an open transport.
pub type FrameSink = mpsc::UnboundedSender<OutboundFrame>;

/// Receiving half of an open transport.
pub type FrameStream = mpsc::UnboundedReceiver<TransportEvent>;

// ============================================================================
// Transport
// ============================================================================

/// An open transport.
#[derive(Debug)]
pub struct Transport {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound events.
    pub events: FrameStream,
}

// ============================================================================
// Connector
// ============================================================================

/// Opens transports to a URL.
///
/// Implementations must not apply their own connect timeout; the caller
/// bounds [`Connector::open`] with the configured timeout.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) (or a wrapped
    /// transport error) if the endpoint cannot be reached.
    async fn open(&self, url: &str) -> Result<Transport>;
}
