//! Role presets.
//!
//! The only place role semantics enter the client: a static table mapping
//! each dashboard role to the channels it subscribes to.
//!
//! | Role | Channels |
//! |------|----------|
//! | `User` | `user_transactions`, `user_balances`, `user_notifications`, `global_announcements` |
//! | `Merchant` | `merchant_invoices`, `merchant_analytics`, `user_notifications`, `global_announcements` |
//! | `Admin` | `system_alerts`, `system_health`, `admin_notifications`, `global_announcements` |
//!
//! A preset also turns on `auto_connect`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::protocol::Channel;

// ============================================================================
// Role
// ============================================================================

/// Dashboard role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user.
    User,
    /// Merchant.
    Merchant,
    /// Administrator.
    Admin,
}

const ROLE_CHANNELS: [(Role, &[Channel]); 3] = [
    (
        Role::User,
        &[
            Channel::UserTransactions,
            Channel::UserBalances,
            Channel::UserNotifications,
            Channel::GlobalAnnouncements,
        ],
    ),
    (
        Role::Merchant,
        &[
            Channel::MerchantInvoices,
            Channel::MerchantAnalytics,
            Channel::UserNotifications,
            Channel::GlobalAnnouncements,
        ],
    ),
    (
        Role::Admin,
        &[
            Channel::SystemAlerts,
            Channel::SystemHealth,
            Channel::AdminNotifications,
            Channel::GlobalAnnouncements,
        ],
    ),
];

impl Role {
    /// Every role.
    pub const ALL: [Self; 3] = [Self::User, Self::Merchant, Self::Admin];

    /// Returns the channels the role subscribes to.
    #[must_use]
    pub fn channels(self) -> &'static [Channel] {
        ROLE_CHANNELS
            .iter()
            .find(|(role, _)| *role == self)
            .map(|(_, channels)| *channels)
            .unwrap_or(&[])
    }

    /// Returns the role name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Merchant => "merchant",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| Error::invalid_argument(format!("unknown role {s:?}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
