//! Wire envelope and message type.
//!
//! Every frame exchanged with the server is a JSON envelope:
//!
//! ```json
//! {
//!   "id": "2b0c7d4e-…",
//!   "type": "transaction_update",
//!   "payload": { ... },
//!   "timestamp": "2026-10-14T09:30:00.000Z",
//!   "version": "1.0",
//!   "correlationId": "…"
//! }
//! ```
//!
//! `type` alone decides how `payload` is interpreted. Inbound frames are
//! first read as a [`RawEnvelope`] (type kept as a string) so that unknown
//! types can be reported instead of failing the whole frame.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::MessageId;

// ============================================================================
// MessageType
// ============================================================================

/// Closed set of envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Connection status notice from the server.
    ConnectionStatus,
    /// Keep-alive carrying a client timestamp, echoed by the server.
    Heartbeat,
    /// Authentication request (outbound) or response (inbound).
    Authentication,
    /// Subscription request (outbound) or acknowledgment (inbound).
    Subscription,
    /// Unsubscription request (outbound) or acknowledgment (inbound).
    Unsubscription,
    /// Transaction state change.
    TransactionUpdate,
    /// Balance change.
    BalanceUpdate,
    /// Invoice state change.
    InvoiceUpdate,
    /// Invoice settled.
    InvoicePaid,
    /// Platform alert.
    SystemAlert,
    /// Notification for an end user.
    UserNotification,
    /// Notification for a merchant.
    MerchantNotification,
    /// Notification for an administrator.
    AdminNotification,
    /// Scheduled maintenance notice.
    SystemMaintenance,
    /// Client is close to a rate limit.
    RateLimitWarning,
    /// Server-side error report.
    Error,
}

impl MessageType {
    /// Every message type, in declaration order.
    pub const ALL: [Self; 16] = [
        Self::ConnectionStatus,
        Self::Heartbeat,
        Self::Authentication,
        Self::Subscription,
        Self::Unsubscription,
        Self::TransactionUpdate,
        Self::BalanceUpdate,
        Self::InvoiceUpdate,
        Self::InvoicePaid,
        Self::SystemAlert,
        Self::UserNotification,
        Self::MerchantNotification,
        Self::AdminNotification,
        Self::SystemMaintenance,
        Self::RateLimitWarning,
        Self::Error,
    ];

    /// Returns the wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionStatus => "connection_status",
            Self::Heartbeat => "heartbeat",
            Self::Authentication => "authentication",
            Self::Subscription => "subscription",
            Self::Unsubscription => "unsubscription",
            Self::TransactionUpdate => "transaction_update",
            Self::BalanceUpdate => "balance_update",
            Self::InvoiceUpdate => "invoice_update",
            Self::InvoicePaid => "invoice_paid",
            Self::SystemAlert => "system_alert",
            Self::UserNotification => "user_notification",
            Self::MerchantNotification => "merchant_notification",
            Self::AdminNotification => "admin_notification",
            Self::SystemMaintenance => "system_maintenance",
            Self::RateLimitWarning => "rate_limit_warning",
            Self::Error => "error",
        }
    }

    /// Looks up a type by wire name.
    ///
    /// Returns `None` for names outside the closed set.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Returns `true` for types consumed by the client itself.
    ///
    /// These never reach domain handlers.
    #[inline]
    #[must_use]
    pub const fn is_internal(self) -> bool {
        matches!(
            self,
            Self::ConnectionStatus
                | Self::Heartbeat
                | Self::Authentication
                | Self::Subscription
                | Self::Unsubscription
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A typed wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique identifier.
    pub id: MessageId,

    /// Message kind; decides how `payload` is read.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Kind-specific data.
    #[serde(default)]
    pub payload: Value,

    /// Creation time.
    pub timestamp: DateTime<Utc>,

    /// Protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// ID of the envelope this one answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Creates an envelope with a freshly generated ID.
    #[must_use]
    pub fn new(kind: MessageType, payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::generate(),
            kind,
            payload,
            timestamp,
            version: None,
            correlation_id: None,
        }
    }

    /// Sets the protocol version.
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    /// Sets the correlation ID.
    #[inline]
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Serializes the envelope to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// RawEnvelope
// ============================================================================

/// An inbound envelope whose `type` has not been checked yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEnvelope {
    /// Server-assigned identifier.
    pub id: String,

    /// Message type as sent.
    #[serde(rename = "type")]
    pub kind: String,

    /// Unparsed payload.
    #[serde(default)]
    pub payload: Value,

    /// Creation time as sent.
    #[serde(default)]
    pub timestamp: Option<String>,

    /// Protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Correlation ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl RawEnvelope {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the frame is not an envelope.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::decode("frame", e.to_string()))
    }

    /// Returns the message type if it is part of the closed set.
    #[inline]
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_wire(&self.kind)
    }

    /// Converts into a typed [`Envelope`].
    ///
    /// A missing timestamp is replaced with `received_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the timestamp is not ISO-8601.
    pub fn into_envelope(self, kind: MessageType, received_at: DateTime<Utc>) -> Result<Envelope> {
        let timestamp = match self.timestamp.as_deref() {
            None => received_at,
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| Error::decode(kind.as_str(), format!("invalid timestamp {raw:?}: {e}")))?
                .with_timezone(&Utc),
        };

        Ok(Envelope {
            id: MessageId::new(self.id),
            kind,
            payload: self.payload,
            timestamp,
            version: self.version,
            correlation_id: self.correlation_id,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
