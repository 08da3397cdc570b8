//! Typed payloads, keyed by [`MessageType`].
//!
//! Inbound payloads are decoded exhaustively at the router boundary into
//! [`InboundMessage`]. A payload that does not match its type is a contained
//! [`Error::Decode`] for that one message.
//!
//! Domain payloads type the fields the client and most consumers rely on and
//! keep everything else in `details`, so server-side additions do not break
//! decoding.

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

use super::{Channel, MessageType};

// ============================================================================
// Outbound Payloads
// ============================================================================

/// Heartbeat payload, echoed back unchanged by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Send time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRequest {
    /// Opaque credential.
    pub token: String,
    /// User being authenticated.
    pub user_id: String,
    /// Fresh per attempt.
    pub session_id: SessionId,
}

/// Subscription request action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Start receiving the channels.
    Subscribe,
    /// Stop receiving the channels.
    Unsubscribe,
}

/// Subscription or unsubscription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// What to do with the channels.
    pub action: SubscriptionAction,
    /// Channels concerned.
    pub channels: Vec<Channel>,
    /// Server-side filters applied to the channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
}

// ============================================================================
// Inbound Control Payloads
// ============================================================================

/// Connection status notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatusPayload {
    /// Status reported by the server.
    pub status: String,
    /// Human-readable detail.
    #[serde(default)]
    pub message: Option<String>,
}

/// Authentication response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    /// Whether the credentials were accepted.
    pub success: bool,
    /// Authenticated user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Attempt this response answers.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Permissions granted to the session.
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    /// Failure reason.
    #[serde(default)]
    pub message: Option<String>,
}

/// One channel rejected in a subscription acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFailure {
    /// Rejected channel.
    pub channel: Channel,
    /// Rejection reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Subscription acknowledgment.
///
/// `channels` lists accepted channels and `failed` the rejected ones. When
/// `success` is `false`, every channel in `channels` is considered rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionAck {
    /// Overall outcome, if the server reports one.
    #[serde(default)]
    pub success: Option<bool>,
    /// Channels concerned by the acknowledgment.
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// Rejected channels.
    #[serde(default)]
    pub failed: Vec<SubscriptionFailure>,
    /// Failure reason applying to the whole request.
    #[serde(default)]
    pub message: Option<String>,
}

impl SubscriptionAck {
    /// Splits the acknowledgment into accepted channels and rejections.
    #[must_use]
    pub fn outcome(&self) -> (Vec<Channel>, Vec<(Channel, String)>) {
        let fallback = || {
            self.message
                .clone()
                .unwrap_or_else(|| "rejected by server".to_string())
        };

        let mut rejected: Vec<(Channel, String)> = self
            .failed
            .iter()
            .map(|f| (f.channel, f.reason.clone().unwrap_or_else(fallback)))
            .collect();

        if self.success == Some(false) {
            rejected.extend(self.channels.iter().map(|&channel| (channel, fallback())));
            return (Vec::new(), rejected);
        }

        let accepted = self
            .channels
            .iter()
            .copied()
            .filter(|channel| !rejected.iter().any(|(c, _)| c == channel))
            .collect();
        (accepted, rejected)
    }
}

/// Unsubscription acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscriptionAck {
    /// Channels the server stopped sending.
    #[serde(default)]
    pub channels: Vec<Channel>,
}

// ============================================================================
// Domain Payloads
// ============================================================================

/// Transaction state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    /// Transaction identifier.
    pub transaction_id: String,
    /// New status.
    pub status: String,
    /// Amount in minor or major units, as sent.
    #[serde(default)]
    pub amount: Option<Number>,
    /// ISO-4217 currency code.
    #[serde(default)]
    pub currency: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdate {
    /// ISO-4217 currency code.
    pub currency: String,
    /// Spendable balance.
    #[serde(default)]
    pub available: Option<Number>,
    /// Balance awaiting settlement.
    #[serde(default)]
    pub pending: Option<Number>,
    /// Remaining fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Invoice state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceUpdate {
    /// Invoice identifier.
    pub invoice_id: String,
    /// New status.
    pub status: String,
    /// Invoice amount.
    #[serde(default)]
    pub amount: Option<Number>,
    /// ISO-4217 currency code.
    #[serde(default)]
    pub currency: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Invoice settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePaid {
    /// Invoice identifier.
    pub invoice_id: String,
    /// Amount paid.
    #[serde(default)]
    pub amount: Option<Number>,
    /// ISO-4217 currency code.
    #[serde(default)]
    pub currency: Option<String>,
    /// Settlement time.
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    /// Remaining fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Platform alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAlert {
    /// Severity as sent (`info`, `warning`, `critical`, ...).
    #[serde(default = "default_severity")]
    pub severity: String,
    /// Alert text.
    pub message: String,
    /// Remaining fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

fn default_severity() -> String {
    "info".to_string()
}

/// User, merchant or admin notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Priority as sent.
    #[serde(default)]
    pub priority: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Maintenance notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMaintenance {
    /// Notice text.
    pub message: String,
    /// Window start.
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// Window end.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// Remaining fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Rate limit warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWarning {
    /// Requests allowed per window.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// Window reset time.
    #[serde(default)]
    pub reset_at: Option<DateTime<Utc>>,
    /// Remaining fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Server-side error report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: String,
    /// Error text.
    pub message: String,
    /// Remaining fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

// ============================================================================
// InboundMessage
// ============================================================================

/// Decoded inbound payload, one variant per [`MessageType`].
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Connection status notice.
    ConnectionStatus(ConnectionStatusPayload),
    /// Heartbeat echo.
    Heartbeat(HeartbeatPayload),
    /// Authentication response.
    Authentication(AuthenticationResponse),
    /// Subscription acknowledgment.
    Subscription(SubscriptionAck),
    /// Unsubscription acknowledgment.
    Unsubscription(UnsubscriptionAck),
    /// Transaction update.
    TransactionUpdate(TransactionUpdate),
    /// Balance update.
    BalanceUpdate(BalanceUpdate),
    /// Invoice update.
    InvoiceUpdate(InvoiceUpdate),
    /// Invoice paid.
    InvoicePaid(InvoicePaid),
    /// System alert.
    SystemAlert(SystemAlert),
    /// User notification.
    UserNotification(Notification),
    /// Merchant notification.
    MerchantNotification(Notification),
    /// Admin notification.
    AdminNotification(Notification),
    /// Maintenance notice.
    SystemMaintenance(SystemMaintenance),
    /// Rate limit warning.
    RateLimitWarning(RateLimitWarning),
    /// Server error.
    Error(ServerError),
}

impl InboundMessage {
    /// Decodes `payload` as the shape required by `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload does not match.
    pub fn decode(kind: MessageType, payload: &Value) -> Result<Self> {
        let message = match kind {
            MessageType::ConnectionStatus => Self::ConnectionStatus(parse(kind, payload)?),
            MessageType::Heartbeat => Self::Heartbeat(parse(kind, payload)?),
            MessageType::Authentication => Self::Authentication(parse(kind, payload)?),
            MessageType::Subscription => Self::Subscription(parse(kind, payload)?),
            MessageType::Unsubscription => Self::Unsubscription(parse(kind, payload)?),
            MessageType::TransactionUpdate => Self::TransactionUpdate(parse(kind, payload)?),
            MessageType::BalanceUpdate => Self::BalanceUpdate(parse(kind, payload)?),
            MessageType::InvoiceUpdate => Self::InvoiceUpdate(parse(kind, payload)?),
            MessageType::InvoicePaid => Self::InvoicePaid(parse(kind, payload)?),
            MessageType::SystemAlert => Self::SystemAlert(parse(kind, payload)?),
            MessageType::UserNotification => Self::UserNotification(parse(kind, payload)?),
            MessageType::MerchantNotification => Self::MerchantNotification(parse(kind, payload)?),
            MessageType::AdminNotification => Self::AdminNotification(parse(kind, payload)?),
            MessageType::SystemMaintenance => Self::SystemMaintenance(parse(kind, payload)?),
            MessageType::RateLimitWarning => Self::RateLimitWarning(parse(kind, payload)?),
            MessageType::Error => Self::Error(parse(kind, payload)?),
        };
        Ok(message)
    }

    /// Returns the message type of the variant.
    #[must_use]
    pub fn kind(&self) -> MessageType {
        match self {
            Self::ConnectionStatus(_) => MessageType::ConnectionStatus,
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::Authentication(_) => MessageType::Authentication,
            Self::Subscription(_) => MessageType::Subscription,
            Self::Unsubscription(_) => MessageType::Unsubscription,
            Self::TransactionUpdate(_) => MessageType::TransactionUpdate,
            Self::BalanceUpdate(_) => MessageType::BalanceUpdate,
            Self::InvoiceUpdate(_) => MessageType::InvoiceUpdate,
            Self::InvoicePaid(_) => MessageType::InvoicePaid,
            Self::SystemAlert(_) => MessageType::SystemAlert,
            Self::UserNotification(_) => MessageType::UserNotification,
            Self::MerchantNotification(_) => MessageType::MerchantNotification,
            Self::AdminNotification(_) => MessageType::AdminNotification,
            Self::SystemMaintenance(_) => MessageType::SystemMaintenance,
            Self::RateLimitWarning(_) => MessageType::RateLimitWarning,
            Self::Error(_) => MessageType::Error,
        }
    }
}

#[inline]
fn parse<T: DeserializeOwned>(kind: MessageType, payload: &Value) -> Result<T> {
    T::deserialize(payload).map_err(|e| Error::decode(kind.as_str(), e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_authentication_request_is_camel_case() {
        let request = AuthenticationRequest {
            token: "tok".to_string(),
            user_id: "u-1".to_string(),
            session_id: SessionId::generate(),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["userId"], "u-1");
        assert!(value["sessionId"].as_str().expect("session").starts_with("sess-"));
    }

    #[test]
    fn test_subscription_request_format() {
        let request = SubscriptionRequest {
            action: SubscriptionAction::Subscribe,
            channels: vec![Channel::SystemAlerts],
            filters: None,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value, json!({ "action": "subscribe", "channels": ["system_alerts"] }));
    }

    #[test]
    fn test_decode_transaction_keeps_details() {
        let payload = json!({
            "transactionId": "tx-1",
            "status": "settled",
            "amount": 1250,
            "currency": "EUR",
            "merchantId": "m-7"
        });
        let message = InboundMessage::decode(MessageType::TransactionUpdate, &payload).expect("decode");

        let InboundMessage::TransactionUpdate(update) = message else {
            panic!("expected transaction update");
        };
        assert_eq!(update.transaction_id, "tx-1");
        assert_eq!(update.amount.and_then(|a| a.as_u64()), Some(1250));
        assert_eq!(update.details.get("merchantId"), Some(&json!("m-7")));
    }

    #[test]
    fn test_decode_mismatched_payload_is_error() {
        let payload = json!({ "status": "settled" });
        let err = InboundMessage::decode(MessageType::TransactionUpdate, &payload).unwrap_err();
        assert!(matches!(err, Error::Decode { ref kind, .. } if kind == "transaction_update"));
    }

    #[test]
    fn test_decode_notifications_share_shape() {
        let payload = json!({ "title": "Hi", "message": "Welcome" });
        let user = InboundMessage::decode(MessageType::UserNotification, &payload).expect("decode");
        let admin = InboundMessage::decode(MessageType::AdminNotification, &payload).expect("decode");
        assert_eq!(user.kind(), MessageType::UserNotification);
        assert_eq!(admin.kind(), MessageType::AdminNotification);
    }

    #[test]
    fn test_subscription_ack_partial_failure() {
        let ack: SubscriptionAck = serde_json::from_value(json!({
            "channels": ["user_balances", "system_alerts"],
            "failed": [{ "channel": "system_alerts", "reason": "forbidden" }]
        }))
        .expect("parse");

        let (accepted, rejected) = ack.outcome();
        assert_eq!(accepted, vec![Channel::UserBalances]);
        assert_eq!(rejected, vec![(Channel::SystemAlerts, "forbidden".to_string())]);
    }

    #[test]
    fn test_subscription_ack_total_failure() {
        let ack: SubscriptionAck = serde_json::from_value(json!({
            "success": false,
            "channels": ["admin_notifications"],
            "message": "insufficient role"
        }))
        .expect("parse");

        let (accepted, rejected) = ack.outcome();
        assert!(accepted.is_empty());
        assert_eq!(
            rejected,
            vec![(Channel::AdminNotifications, "insufficient role".to_string())]
        );
    }

    #[test]
    fn test_decode_rate_limit_warning() {
        let payload = json!({ "limit": 100, "remaining": 3, "resetAt": "2026-10-14T10:00:00Z" });
        let message = InboundMessage::decode(MessageType::RateLimitWarning, &payload).expect("decode");
        let InboundMessage::RateLimitWarning(warning) = message else {
            panic!("expected rate limit warning");
        };
        assert_eq!(warning.remaining, 3);
        assert!(warning.reset_at.is_some());
    }
}
