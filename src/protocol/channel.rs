//! Logical subscription topics.
//!
//! Channels are opaque to the connection manager. Which channels a role
//! subscribes to is policy, see [`Role`](crate::Role).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Channel
// ============================================================================

/// A named topic a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Transaction updates for the authenticated user.
    UserTransactions,
    /// Balance updates for the authenticated user.
    UserBalances,
    /// Notifications addressed to the user.
    UserNotifications,
    /// Invoice lifecycle for a merchant.
    MerchantInvoices,
    /// Merchant analytics feed.
    MerchantAnalytics,
    /// Platform alerts.
    SystemAlerts,
    /// Platform health feed.
    SystemHealth,
    /// Notifications addressed to administrators.
    AdminNotifications,
    /// Announcements for every connected client.
    GlobalAnnouncements,
}

impl Channel {
    /// Every channel, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::UserTransactions,
        Self::UserBalances,
        Self::UserNotifications,
        Self::MerchantInvoices,
        Self::MerchantAnalytics,
        Self::SystemAlerts,
        Self::SystemHealth,
        Self::AdminNotifications,
        Self::GlobalAnnouncements,
    ];

    /// Returns the wire name of the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserTransactions => "user_transactions",
            Self::UserBalances => "user_balances",
            Self::UserNotifications => "user_notifications",
            Self::MerchantInvoices => "merchant_invoices",
            Self::MerchantAnalytics => "merchant_analytics",
            Self::SystemAlerts => "system_alerts",
            Self::SystemHealth => "system_health",
            Self::AdminNotifications => "admin_notifications",
            Self::GlobalAnnouncements => "global_announcements",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| Error::invalid_argument(format!("Unknown channel: {s}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
