//! Subscription registry.
//!
//! Tracks two disjoint channel sets:
//!
//! | Set | Meaning |
//! |-----|---------|
//! | `active` | acknowledged by the server |
//! | `pending` | requested, not yet acknowledged (includes everything requested while offline) |
//!
//! A channel is in at most one set. Moving `pending → active` only happens on
//! an acknowledgment; `active → pending` happens when the authenticated
//! session is lost. Filters passed with a request are remembered per channel
//! so replays carry them.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::protocol::Channel;

// ============================================================================
// Types
// ============================================================================

/// Channels sharing one set of filters, replayed as a single request.
pub type ReplayGroup = (Vec<Channel>, Option<Value>);

// ============================================================================
// SubscriptionRegistry
// ============================================================================

/// Active and pending channel sets.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    active: BTreeSet<Channel>,
    pending: BTreeSet<Channel>,
    filters: FxHashMap<Channel, Value>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `channels` as pending and remembers their filters.
    ///
    /// Channels already active are left alone. Returns the channels that
    /// still need a subscription request, in order.
    pub fn request(&mut self, channels: &[Channel], filters: Option<&Value>) -> Vec<Channel> {
        let mut requested = Vec::with_capacity(channels.len());

        for &channel in channels {
            if self.active.contains(&channel) || requested.contains(&channel) {
                continue;
            }

            match filters {
                Some(filters) => {
                    self.filters.insert(channel, filters.clone());
                }
                None => {
                    self.filters.remove(&channel);
                }
            }
            self.pending.insert(channel);
            requested.push(channel);
        }

        requested
    }

    /// Forgets `channels` entirely.
    pub fn remove(&mut self, channels: &[Channel]) {
        for channel in channels {
            self.active.remove(channel);
            self.pending.remove(channel);
            self.filters.remove(channel);
        }
    }

    /// Promotes acknowledged channels from pending to active.
    ///
    /// Channels that were not pending are ignored. Returns the promoted ones.
    pub fn acknowledge(&mut self, channels: &[Channel]) -> Vec<Channel> {
        channels
            .iter()
            .copied()
            .filter(|channel| {
                let promoted = self.pending.remove(channel);
                if promoted {
                    self.active.insert(*channel);
                }
                promoted
            })
            .collect()
    }

    /// Drops a channel the server refused.
    pub fn reject(&mut self, channel: Channel) {
        self.remove(&[channel]);
    }

    /// Moves every active channel back to pending.
    pub fn demote(&mut self) {
        let active = std::mem::take(&mut self.active);
        self.pending.extend(active);
    }

    /// Clears both sets and all filters.
    pub fn clear(&mut self) {
        self.active.clear();
        self.pending.clear();
        self.filters.clear();
    }

    /// Groups pending channels by identical filters.
    ///
    /// Groups are ordered by their first channel.
    #[must_use]
    pub fn replay_groups(&self) -> Vec<ReplayGroup> {
        let mut groups: Vec<ReplayGroup> = Vec::new();

        for &channel in &self.pending {
            let filters = self.filters.get(&channel);
            match groups.iter_mut().find(|(_, f)| f.as_ref() == filters) {
                Some((channels, _)) => channels.push(channel),
                None => groups.push((vec![channel], filters.cloned())),
            }
        }

        groups
    }

    /// Returns the acknowledged channels.
    #[inline]
    #[must_use]
    pub fn active(&self) -> &BTreeSet<Channel> {
        &self.active
    }

    /// Returns the unacknowledged channels.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> &BTreeSet<Channel> {
        &self.pending
    }

    /// Returns the filters remembered for `channel`.
    #[inline]
    #[must_use]
    pub fn filters(&self, channel: Channel) -> Option<&Value> {
        self.filters.get(&channel)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_request_skips_active_channels() {
        let mut registry = SubscriptionRegistry::new();
        registry.request(&[Channel::SystemAlerts], None);
        registry.acknowledge(&[Channel::SystemAlerts]);

        let requested = registry.request(&[Channel::SystemAlerts, Channel::UserBalances], None);
        assert_eq!(requested, vec![Channel::UserBalances]);
        assert!(registry.active().contains(&Channel::SystemAlerts));
        assert!(registry.pending().contains(&Channel::UserBalances));
    }

    #[test]
    fn test_sets_stay_disjoint() {
        let mut registry = SubscriptionRegistry::new();
        registry.request(&[Channel::UserBalances, Channel::UserTransactions], None);
        registry.acknowledge(&[Channel::UserBalances]);

        assert!(registry.active().is_disjoint(registry.pending()));
        assert_eq!(registry.active().len(), 1);
        assert_eq!(registry.pending().len(), 1);

        registry.demote();
        assert!(registry.active().is_empty());
        assert_eq!(registry.pending().len(), 2);
    }

    #[test]
    fn test_acknowledge_ignores_unrequested() {
        let mut registry = SubscriptionRegistry::new();
        let promoted = registry.acknowledge(&[Channel::SystemHealth]);
        assert!(promoted.is_empty());
        assert!(registry.active().is_empty());
    }

    #[test]
    fn test_remove_clears_both_sets_and_filters() {
        let mut registry = SubscriptionRegistry::new();
        registry.request(&[Channel::UserBalances], Some(&json!({ "currency": "EUR" })));
        registry.acknowledge(&[Channel::UserBalances]);
        registry.request(&[Channel::UserTransactions], None);

        registry.remove(&[Channel::UserBalances, Channel::UserTransactions]);
        assert!(registry.active().is_empty());
        assert!(registry.pending().is_empty());
        assert!(registry.filters(Channel::UserBalances).is_none());
    }

    #[test]
    fn test_replay_groups_by_filters() {
        let eur = json!({ "currency": "EUR" });
        let mut registry = SubscriptionRegistry::new();
        registry.request(&[Channel::UserBalances, Channel::UserTransactions], Some(&eur));
        registry.request(&[Channel::SystemAlerts, Channel::GlobalAnnouncements], None);

        let groups = registry.replay_groups();
        assert_eq!(
            groups,
            vec![
                (vec![Channel::UserTransactions, Channel::UserBalances], Some(eur)),
                (vec![Channel::SystemAlerts, Channel::GlobalAnnouncements], None),
            ]
        );
    }
}
