//! Connection status, state snapshot and metrics.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Mutually exclusive connection status.
///
/// `Authenticated` implies an open transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport opening.
    Connecting,
    /// Transport open, not authenticated.
    Connected,
    /// Transport open and authenticated.
    Authenticated,
}

impl ConnectionStatus {
    /// Returns `true` if the transport is open.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    /// Returns the status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Snapshot of the connection state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Reconnects attempted since the last successful open.
    pub reconnect_attempts: u32,
    /// Time of the last successful open.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Time the transport was last lost or closed.
    pub last_disconnected_at: Option<DateTime<Utc>>,
    /// Last failure, rendered.
    pub last_error: Option<String>,
    /// Authenticated user.
    pub user_id: Option<String>,
    /// Permissions granted by the server.
    pub permissions: Vec<String>,
}

impl ConnectionState {
    /// Moves to `Connected` after a successful open.
    pub(crate) fn mark_connected(&mut self, at: DateTime<Utc>) {
        self.status = ConnectionStatus::Connected;
        self.reconnect_attempts = 0;
        self.last_connected_at = Some(at);
        self.last_error = None;
    }

    /// Moves to `Disconnected` and forgets the authenticated identity.
    pub(crate) fn mark_disconnected(&mut self, at: DateTime<Utc>) {
        self.status = ConnectionStatus::Disconnected;
        self.last_disconnected_at = Some(at);
        self.clear_identity();
    }

    #[inline]
    pub(crate) fn clear_identity(&mut self) {
        self.user_id = None;
        self.permissions.clear();
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Observational counters. Never drive control flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Envelopes written to the transport.
    pub messages_sent: u64,
    /// Frames received from the transport.
    pub messages_received: u64,
    /// Reconnects scheduled.
    pub reconnect_count: u64,
    /// Running heartbeat round-trip average, in milliseconds.
    pub average_latency_ms: f64,
    /// Time of the last heartbeat echo.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Queued envelopes dropped after exhausting their retries.
    pub dropped_messages: u64,
    /// Inbound frames or payloads that failed to decode.
    pub decode_failures: u64,
}

impl Metrics {
    /// Folds one round-trip sample into the running average.
    ///
    /// The first sample seeds the average; later ones fold as
    /// `(avg + sample) / 2`.
    pub(crate) fn record_latency(&mut self, sample_ms: f64, at: DateTime<Utc>) {
        self.average_latency_ms = if self.average_latency_ms == 0.0 {
            sample_ms
        } else {
            (self.average_latency_ms + sample_ms) / 2.0
        };
        self.last_heartbeat_at = Some(at);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_connected() {
        assert!(!ConnectionStatus::Disconnected.is_connected());
        assert!(!ConnectionStatus::Connecting.is_connected());
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(ConnectionStatus::Authenticated.is_connected());
    }

    #[test]
    fn test_mark_connected_resets_attempts() {
        let mut state = ConnectionState {
            reconnect_attempts: 4,
            last_error: Some("boom".to_string()),
            ..Default::default()
        };
        state.mark_connected(Utc::now());
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.reconnect_attempts, 0);
        assert!(state.last_error.is_none());
        assert!(state.last_connected_at.is_some());
    }

    #[test]
    fn test_latency_average() {
        let mut metrics = Metrics::default();
        metrics.record_latency(100.0, Utc::now());
        assert_eq!(metrics.average_latency_ms, 100.0);
        metrics.record_latency(300.0, Utc::now());
        assert_eq!(metrics.average_latency_ms, 200.0);
        metrics.record_latency(100.0, Utc::now());
        assert_eq!(metrics.average_latency_ms, 150.0);
    }
}
