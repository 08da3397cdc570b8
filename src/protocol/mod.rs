//! Wire protocol message types.
//!
//! This module defines the envelope exchanged with the realtime server and
//! the payload carried by each message type.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `heartbeat` | both | Keep-alive and latency probe |
//! | `authentication` | both | Credential exchange |
//! | `subscription` / `unsubscription` | both | Channel requests and acks |
//! | `connection_status` | server → client | Connection notices |
//! | domain types | server → client | Updates routed to handlers |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Subscription topics |
//! | `envelope` | Envelope and message type |
//! | `payload` | Typed payloads and inbound decoding |

// ============================================================================
// Submodules
// ============================================================================

/// Subscription topics.
pub mod channel;

/// Envelope and message type.
pub mod envelope;

/// Typed payloads.
pub mod payload;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::Channel;
pub use envelope::{Envelope, MessageType, RawEnvelope};
pub use payload::{
    AuthenticationRequest, AuthenticationResponse, BalanceUpdate, ConnectionStatusPayload,
    HeartbeatPayload, InboundMessage, InvoicePaid, InvoiceUpdate, Notification, RateLimitWarning,
    ServerError, SubscriptionAck, SubscriptionAction, SubscriptionFailure, SubscriptionRequest,
    SystemAlert, SystemMaintenance, TransactionUpdate, UnsubscriptionAck,
};
