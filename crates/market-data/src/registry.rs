//! Per-client subscription registry.
//!
//! Tracks which markets are actively subscribed on each channel kind. An
//! entry exists only while the subscription is active, so membership is the
//! "active" flag. Markets are keyed by their exchange symbol and kept in
//! subscription order, which is also the order they are replayed after a
//! reconnect.

use std::collections::BTreeMap;

use cxfeed_core::types::{ChannelKind, Market};

/// Active markets for one channel kind, in subscription order.
#[derive(Debug, Clone, Default)]
struct ChannelEntries {
    next_seq: u64,
    /// `market.id -> (insertion sequence, market)`.
    by_id: BTreeMap<String, (u64, Market)>,
}

impl ChannelEntries {
    fn ordered(&self) -> Vec<&Market> {
        let mut markets: Vec<(u64, &Market)> =
            self.by_id.values().map(|(seq, m)| (*seq, m)).collect();
        markets.sort_unstable_by_key(|(seq, _)| *seq);
        markets.into_iter().map(|(_, m)| m).collect()
    }
}

/// Set of active `(channel kind, market)` subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    channels: BTreeMap<ChannelKind, ChannelEntries>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `market` on `kind`.
    ///
    /// Returns `true` only if the entry was not already active; repeated
    /// calls leave the registry unchanged.
    pub fn insert(&mut self, kind: ChannelKind, market: Market) -> bool {
        let entries = self.channels.entry(kind).or_default();
        if entries.by_id.contains_key(&market.id) {
            return false;
        }
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.by_id.insert(market.id.clone(), (seq, market));
        true
    }

    /// Deactivate `market_id` on `kind`.
    ///
    /// Returns the removed market, or `None` if it was not active.
    pub fn remove(&mut self, kind: ChannelKind, market_id: &str) -> Option<Market> {
        let entries = self.channels.get_mut(&kind)?;
        let (_, market) = entries.by_id.remove(market_id)?;
        if entries.by_id.is_empty() {
            self.channels.remove(&kind);
        }
        Some(market)
    }

    pub fn contains(&self, kind: ChannelKind, market_id: &str) -> bool {
        self.channels
            .get(&kind)
            .is_some_and(|e| e.by_id.contains_key(market_id))
    }

    /// Look up the subscribed market for an exact exchange symbol.
    pub fn get(&self, kind: ChannelKind, market_id: &str) -> Option<&Market> {
        self.channels
            .get(&kind)?
            .by_id
            .get(market_id)
            .map(|(_, m)| m)
    }

    /// Look up a subscribed market by predicate.
    ///
    /// Used where the wire echoes the symbol in a different casing or format
    /// than the caller-supplied id.
    pub fn find<F>(&self, kind: ChannelKind, mut predicate: F) -> Option<&Market>
    where
        F: FnMut(&Market) -> bool,
    {
        self.channels
            .get(&kind)?
            .by_id
            .values()
            .map(|(_, m)| m)
            .find(|m| predicate(m))
    }

    /// Active markets for `kind`, in subscription order.
    pub fn markets(&self, kind: ChannelKind) -> Vec<&Market> {
        self.channels
            .get(&kind)
            .map(ChannelEntries::ordered)
            .unwrap_or_default()
    }

    /// Number of active markets on `kind`.
    pub fn count(&self, kind: ChannelKind) -> usize {
        self.channels.get(&kind).map_or(0, |e| e.by_id.len())
    }

    /// Total number of active entries across all kinds.
    pub fn len(&self) -> usize {
        self.channels.values().map(|e| e.by_id.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Every active entry in replay order: channel kinds in
    /// [`ChannelKind::REPLAY_ORDER`], markets in subscription order.
    pub fn iter_replay(&self) -> Vec<(ChannelKind, &Market)> {
        ChannelKind::REPLAY_ORDER
            .iter()
            .flat_map(|&kind| self.markets(kind).into_iter().map(move |m| (kind, m)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Market {
        Market::new("btcusd", "BTC", "USD")
    }

    fn eth() -> Market {
        Market::new("ethusd", "ETH", "USD")
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut reg = SubscriptionRegistry::new();
        assert!(reg.insert(ChannelKind::Ticker, btc()));
        assert!(!reg.insert(ChannelKind::Ticker, btc()));
        assert_eq!(reg.count(ChannelKind::Ticker), 1);
        // Same market on another kind is a separate entry.
        assert!(reg.insert(ChannelKind::Trades, btc()));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_remove_inactive_is_noop() {
        let mut reg = SubscriptionRegistry::new();
        assert!(reg.remove(ChannelKind::Ticker, "btcusd").is_none());

        reg.insert(ChannelKind::Ticker, btc());
        assert_eq!(reg.remove(ChannelKind::Ticker, "btcusd"), Some(btc()));
        assert!(reg.remove(ChannelKind::Ticker, "btcusd").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_resubscribe_after_remove() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Trades, btc());
        reg.remove(ChannelKind::Trades, "btcusd");
        assert!(reg.insert(ChannelKind::Trades, btc()));
    }

    #[test]
    fn test_markets_keep_subscription_order() {
        let mut reg = SubscriptionRegistry::new();
        // "ethusd" sorts after "btcusd"; insertion order must win.
        reg.insert(ChannelKind::Trades, eth());
        reg.insert(ChannelKind::Trades, btc());
        let ids: Vec<&str> = reg
            .markets(ChannelKind::Trades)
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["ethusd", "btcusd"]);
    }

    #[test]
    fn test_find_case_insensitive() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Updates, btc());
        let found = reg.find(ChannelKind::Level2Updates, |m| {
            m.id.eq_ignore_ascii_case("BTCUSD")
        });
        assert_eq!(found, Some(&btc()));
        assert!(reg.find(ChannelKind::Trades, |_| true).is_none());
    }

    #[test]
    fn test_iter_replay_puts_snapshots_first() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Updates, btc());
        reg.insert(ChannelKind::Ticker, eth());
        reg.insert(ChannelKind::Level2Snapshots, btc());

        let order: Vec<(ChannelKind, &str)> = reg
            .iter_replay()
            .into_iter()
            .map(|(k, m)| (k, m.id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (ChannelKind::Level2Snapshots, "btcusd"),
                (ChannelKind::Ticker, "ethusd"),
                (ChannelKind::Level2Updates, "btcusd"),
            ]
        );
    }

    #[test]
    fn test_clear() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Ticker, btc());
        reg.insert(ChannelKind::Trades, eth());
        reg.clear();
        assert!(reg.is_empty());
        assert!(!reg.contains(ChannelKind::Ticker, "btcusd"));
    }
}
