//! Paygate Realtime - real-time messaging client for payment dashboards.
//!
//! This library keeps one persistent bidirectional connection to a realtime
//! server, authenticates it, subscribes to role-scoped channels and routes
//! typed inbound messages to domain handlers.
//!
//! # Architecture
//!
//! The client splits into a lock-guarded state machine and a driver task:
//!
//! - **Session**: connection status, subscription registry, outbound queue,
//!   metrics. Every transition happens under one lock.
//! - **Driver**: one task per run pumps inbound frames, ticks the heartbeat
//!   and sleeps through reconnect backoff.
//!
//! Key behaviours:
//!
//! - Unclean closes reconnect with capped exponential backoff
//! - Messages sent while disconnected are queued and flushed in order
//! - Active channels are replayed after every re-authentication
//! - Only `connect()` waits; everything else returns immediately
//!
//! # Quick Start
//!
//! ```no_run
//! use paygate_realtime::{ClientEvent, MessageType, RealtimeClient, Result, Role};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = RealtimeClient::for_role("wss://realtime.example.com/ws", Role::Merchant)
//!         .credentials("token", "merchant-42")
//!         .on(MessageType::InvoicePaid, |routed| {
//!             println!("invoice paid: {}", routed.envelope.payload);
//!         })
//!         .spawn()
//!         .await?;
//!
//!     let mut events = client.events();
//!     while let Ok(event) = events.recv().await {
//!         if let ClientEvent::Disconnected { code, reason } = event {
//!             println!("disconnected: {code} {reason}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`RealtimeClient`], [`ClientBuilder`], [`ClientConfig`], [`Role`] |
//! | [`session`] | Connection manager, registry, router, events |
//! | [`protocol`] | Envelope, message types, channels, payloads |
//! | [`transport`] | [`Connector`] trait, WebSocket and in-memory connectors |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Client facade.
///
/// Use [`RealtimeClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for envelopes and authentication attempts.
pub mod identifiers;

/// Wire protocol.
pub mod protocol;

/// Connection lifecycle, subscriptions and routing.
pub mod session;

/// Transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientBuilder, ClientConfig, RealtimeClient, Role, WeakClient};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{MessageId, SessionId};

// Protocol types
pub use protocol::{Channel, Envelope, InboundMessage, MessageType, RawEnvelope};

// Session types
pub use session::{
    BackoffPolicy, ClientEvent, Clock, ConnectionState, ConnectionStatus, Credentials,
    ManualClock, MessageHandler, Metrics, RoutedMessage, SystemClock,
};

// Transport types
pub use transport::{Connector, MemoryConnector, MemoryListener, MemoryPeer, WsConnector};
