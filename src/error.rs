//! Error types for the realtime client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use paygate_realtime::{RealtimeClient, Result};
//!
//! async fn example(client: &RealtimeClient) -> Result<()> {
//!     client.connect().await?;
//!     client.authenticate("token", "user-1")?;
//!     Ok(())
//! }
//! ```
//!
//! Failures that happen asynchronously (a dropped connection, a rejected
//! subscription, a malformed inbound payload) are never returned from a call;
//! they are surfaced as [`ClientEvent::Error`](crate::ClientEvent::Error).
//! For that reason [`Error`] is `Clone`: external errors are held behind
//! [`Arc`].
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::NotConnected`], [`Error::ReconnectExhausted`] |
//! | Session | [`Error::AuthenticationFailed`], [`Error::SubscriptionFailed`], [`Error::Handler`] |
//! | Protocol | [`Error::Decode`], [`Error::Server`] |
//! | Queue | [`Error::QueueFull`], [`Error::MessageDropped`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::MessageId;
use crate::protocol::{Channel, MessageType};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned by [`ClientBuilder::build`](crate::ClientBuilder::build)
    /// when the configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to a client operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be opened.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport did not open within the configured timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation requires an open connection.
    #[error("Not connected")]
    NotConnected,

    /// Reconnect ceiling reached; an explicit `connect()` is required.
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of reconnect attempts made.
        attempts: u32,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Server rejected the authentication attempt.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Reason reported by the server.
        message: String,
    },

    /// Server rejected a channel in a subscription request.
    #[error("Subscription to {channel} failed: {reason}")]
    SubscriptionFailed {
        /// The rejected channel.
        channel: Channel,
        /// Reason reported by the server.
        reason: String,
    },

    /// A domain handler panicked while processing one message.
    #[error("Handler for {kind} panicked: {message}")]
    Handler {
        /// Message type whose handler failed.
        kind: MessageType,
        /// Panic message.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Inbound frame or payload did not match its expected shape.
    #[error("Failed to decode {kind} message: {message}")]
    Decode {
        /// Message type (or `frame` when the envelope itself is malformed).
        kind: String,
        /// Decoder error message.
        message: String,
    },

    /// Error envelope sent by the server.
    #[error("Server error {code}: {message}")]
    Server {
        /// Server error code.
        code: String,
        /// Server error message.
        message: String,
    },

    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// Outbound queue is at capacity.
    #[error("Outbound queue full ({capacity} messages)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Queued envelope dropped after exhausting its retries.
    #[error("Message {id} dropped after {retries} retries")]
    MessageDropped {
        /// The dropped envelope's ID.
        id: MessageId,
        /// Retries attempted.
        retries: u32,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(Arc<WsError>),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Conversions
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Self::WebSocket(Arc::new(err))
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an authentication failure.
    #[inline]
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Creates a subscription failure for one channel.
    #[inline]
    pub fn subscription_failed(channel: Channel, reason: impl Into<String>) -> Self {
        Self::SubscriptionFailed {
            channel,
            reason: reason.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Creates a handler failure for `kind`.
    #[inline]
    pub fn handler(kind: MessageType, message: impl Into<String>) -> Self {
        Self::Handler {
            kind,
            message: message.into(),
        }
    }

    /// Creates a server error.
    #[inline]
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::ReconnectExhausted { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when the caller retries the operation
    /// (reconnect, re-authenticate, re-subscribe).
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::ReconnectExhausted { .. }
                | Self::AuthenticationFailed { .. }
                | Self::SubscriptionFailed { .. }
                | Self::QueueFull { .. }
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
