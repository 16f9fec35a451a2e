//! Market identity types: exchange identifiers, trade side, and markets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported exchanges.
///
/// Serializes as the exchange display name (e.g. `"Bitstamp"`), which is the
/// value carried in the `exchange` field of every normalized payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Bitstamp,
    Coinex,
    Gemini,
    Huobi,
    Poloniex,
    Upbit,
}

impl Exchange {
    /// Every supported exchange, in alphabetical order.
    pub const ALL: [Exchange; 6] = [
        Exchange::Bitstamp,
        Exchange::Coinex,
        Exchange::Gemini,
        Exchange::Huobi,
        Exchange::Poloniex,
        Exchange::Upbit,
    ];

    /// The fixed exchange name attached to normalized payloads.
    pub const fn name(&self) -> &'static str {
        match self {
            Exchange::Bitstamp => "Bitstamp",
            Exchange::Coinex => "Coinex",
            Exchange::Gemini => "Gemini",
            Exchange::Huobi => "Huobi",
            Exchange::Poloniex => "Poloniex",
            Exchange::Upbit => "Upbit",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Taker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buyer was the aggressor.
    Buy,
    /// Seller was the aggressor.
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// A tradable pair on a specific exchange.
///
/// Supplied by the caller. `id` is the exchange's own symbol (`"btcusd"`,
/// `"USDT_BTC"`, `"KRW-BTC"`, ...) and is the key used for subscription
/// lookups; `base` and `quote` are copied verbatim onto every event produced
/// for this market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market {
    /// Exchange-specific symbol.
    pub id: String,
    /// Base asset.
    pub base: String,
    /// Quote asset.
    pub quote: String,
}

impl Market {
    /// Create a new market.
    pub fn new(id: impl Into<String>, base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.id, self.base, self.quote)
    }
}
