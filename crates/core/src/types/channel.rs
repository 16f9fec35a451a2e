//! Channel kinds and static capability descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A kind of market data subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKind {
    #[serde(rename = "ticker")]
    Ticker,
    #[serde(rename = "trade")]
    Trades,
    #[serde(rename = "l2snapshot")]
    Level2Snapshots,
    #[serde(rename = "l2update")]
    Level2Updates,
    #[serde(rename = "l3snapshot")]
    Level3Snapshots,
    #[serde(rename = "l3update")]
    Level3Updates,
}

impl ChannelKind {
    /// Order in which active subscriptions are replayed after a (re)connect.
    ///
    /// Snapshot channels go first so that update channels which need a seed
    /// snapshot find one already requested.
    pub const REPLAY_ORDER: [ChannelKind; 6] = [
        ChannelKind::Level2Snapshots,
        ChannelKind::Level3Snapshots,
        ChannelKind::Ticker,
        ChannelKind::Trades,
        ChannelKind::Level2Updates,
        ChannelKind::Level3Updates,
    ];

    /// Event name used for this channel (`ticker`, `trade`, `l2snapshot`, ...).
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Ticker => "ticker",
            ChannelKind::Trades => "trade",
            ChannelKind::Level2Snapshots => "l2snapshot",
            ChannelKind::Level2Updates => "l2update",
            ChannelKind::Level3Snapshots => "l3snapshot",
            ChannelKind::Level3Updates => "l3update",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of what an exchange adapter supports.
///
/// Every adapter exposes one as an associated constant, so support can be
/// checked without a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub has_tickers: bool,
    pub has_trades: bool,
    pub has_level2_snapshots: bool,
    pub has_level2_updates: bool,
    pub has_level3_snapshots: bool,
    pub has_level3_updates: bool,
}

impl Capabilities {
    /// Returns `true` if subscribing to `kind` is supported.
    pub const fn supports(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Ticker => self.has_tickers,
            ChannelKind::Trades => self.has_trades,
            ChannelKind::Level2Snapshots => self.has_level2_snapshots,
            ChannelKind::Level2Updates => self.has_level2_updates,
            ChannelKind::Level3Snapshots => self.has_level3_snapshots,
            ChannelKind::Level3Updates => self.has_level3_updates,
        }
    }

    /// Channel kinds supported by this descriptor, in replay order.
    pub fn supported(&self) -> Vec<ChannelKind> {
        ChannelKind::REPLAY_ORDER
            .into_iter()
            .filter(|kind| self.supports(*kind))
            .collect()
    }
}
