//! Normalized market data payloads shared across exchange implementations.
//!
//! These types are the canonical external format. Exchange specific decoders
//! convert wire-format messages into these structures. Numeric fields are
//! decimal strings; optional fields that an exchange does not provide are
//! `None` and are omitted from serialized output.

use serde::{Deserialize, Serialize};

use super::market::{Exchange, Market, Side};

/// 24h ticker statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub exchange: Exchange,
    pub base: String,
    pub quote: String,
    /// Milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<String>,
    /// Volume in base units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    /// Volume in quote units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid_volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask_volume: Option<String>,
}

impl Ticker {
    /// Create an empty ticker for `market`; all statistics start absent.
    pub fn new(exchange: Exchange, market: &Market) -> Self {
        Self {
            exchange,
            base: market.base.clone(),
            quote: market.quote.clone(),
            timestamp: None,
            last: None,
            open: None,
            high: None,
            low: None,
            volume: None,
            quote_volume: None,
            change: None,
            change_percent: None,
            bid: None,
            bid_volume: None,
            ask: None,
            ask_volume: None,
        }
    }
}

/// Individual public trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub exchange: Exchange,
    pub base: String,
    pub quote: String,
    /// Exchange-assigned trade identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    /// Trade time in milliseconds since the epoch.
    pub unix: u64,
    /// Taker side (the aggressor).
    pub side: Side,
    pub price: String,
    pub amount: String,
}

/// A single aggregated price level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level2Point {
    pub price: String,
    pub size: String,
    /// Number of orders at this level, where the exchange reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<String>,
}

impl Level2Point {
    /// Create a level without an order count.
    pub fn new(price: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            size: size.into(),
            count: None,
        }
    }
}

/// A single resting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level3Point {
    pub order_id: String,
    pub price: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<String>,
}

impl Level3Point {
    pub fn new(
        order_id: impl Into<String>,
        price: impl Into<String>,
        size: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            price: price.into(),
            size: size.into(),
            count: None,
        }
    }
}

macro_rules! book_payload {
    ($(#[$meta:meta])* $name:ident, $point:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            pub exchange: Exchange,
            pub base: String,
            pub quote: String,
            /// Exchange event time in milliseconds, where provided.
            #[serde(skip_serializing_if = "Option::is_none")]
            pub timestamp_ms: Option<u64>,
            /// Exchange sequence number, where provided. Always positive.
            #[serde(skip_serializing_if = "Option::is_none")]
            pub sequence_id: Option<u64>,
            /// Bid side, in the order the exchange sent it.
            pub bids: Vec<$point>,
            /// Ask side, in the order the exchange sent it.
            pub asks: Vec<$point>,
        }

        impl $name {
            /// Create an empty payload for `market`.
            pub fn new(exchange: Exchange, market: &Market) -> Self {
                Self {
                    exchange,
                    base: market.base.clone(),
                    quote: market.quote.clone(),
                    timestamp_ms: None,
                    sequence_id: None,
                    bids: Vec::new(),
                    asks: Vec::new(),
                }
            }

            /// Returns `true` if neither side carries any level.
            pub fn is_empty(&self) -> bool {
                self.bids.is_empty() && self.asks.is_empty()
            }
        }
    };
}

book_payload!(
    /// Full replacement of the aggregated book.
    Level2Snapshot,
    Level2Point
);
book_payload!(
    /// Incremental change to the aggregated book. A size of zero removes the level.
    Level2Update,
    Level2Point
);
book_payload!(
    /// Full replacement of the per-order book.
    Level3Snapshot,
    Level3Point
);
book_payload!(
    /// Incremental change to the per-order book. A size of zero removes the order.
    Level3Update,
    Level3Point
);
