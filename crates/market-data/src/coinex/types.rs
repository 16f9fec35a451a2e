//! Coinex JSON-RPC wire types.
//!
//! Server pushes look like `{"method": "...update", "params": [...], "id": null}`;
//! replies to our own calls carry `result`/`error` and the request id.

use std::collections::BTreeMap;

use serde::Deserialize;

use cxfeed_core::types::decimal::{change, change_percent, number_to_string};
use cxfeed_core::types::timestamp::seconds_to_millis;
use cxfeed_core::types::{Exchange, Level2Snapshot, Level2Update, Market, Side, Ticker, Trade};

use crate::decode::{decimal_field, millis_field, string_levels, DecodeError};

/// Any inbound message.
#[derive(Debug, Deserialize)]
pub struct CoinexMessage {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// `state.update` params: one map of market id to 24h statistics.
pub type StateParams = Vec<BTreeMap<String, CoinexState>>;

/// `deals.update` params: `[market, deals]`.
pub type DealsParams = (String, Vec<CoinexDeal>);

/// `depth.update` params: `[clean, depth, market]`.
pub type DepthParams = (bool, CoinexDepth, String);

/// 24h market statistics.
#[derive(Debug, Deserialize)]
pub struct CoinexState {
    pub last: String,
    pub open: String,
    pub high: String,
    pub low: String,
    /// Base volume.
    pub volume: String,
    /// Quote volume.
    pub deal: String,
}

#[derive(Debug, Deserialize)]
pub struct CoinexDeal {
    pub id: u64,
    /// Seconds since the epoch with a fractional part.
    pub time: serde_json::Number,
    pub price: String,
    pub amount: String,
    #[serde(rename = "type")]
    pub side: Side,
}

#[derive(Debug, Deserialize)]
pub struct CoinexDepth {
    #[serde(default)]
    pub bids: Vec<Vec<String>>,
    #[serde(default)]
    pub asks: Vec<Vec<String>>,
}

impl CoinexState {
    /// Coinex does not timestamp state pushes; `received_ms` is used instead.
    pub fn to_ticker(&self, market: &Market, received_ms: u64) -> Result<Ticker, DecodeError> {
        let mut ticker = Ticker::new(Exchange::Coinex, market);
        ticker.timestamp = Some(received_ms);
        ticker.last = Some(decimal_field("last", &self.last)?);
        ticker.open = Some(decimal_field("open", &self.open)?);
        ticker.high = Some(decimal_field("high", &self.high)?);
        ticker.low = Some(decimal_field("low", &self.low)?);
        ticker.volume = Some(decimal_field("volume", &self.volume)?);
        ticker.quote_volume = Some(decimal_field("deal", &self.deal)?);
        ticker.change = change(&self.last, &self.open);
        ticker.change_percent = change_percent(&self.last, &self.open);
        Ok(ticker)
    }
}

impl CoinexDeal {
    pub fn to_trade(&self, market: &Market) -> Result<Trade, DecodeError> {
        let time = number_to_string(&self.time);
        let unix = seconds_to_millis(&time).ok_or(DecodeError::Invalid {
            field: "time",
            value: time.clone(),
        })?;
        Ok(Trade {
            exchange: Exchange::Coinex,
            base: market.base.clone(),
            quote: market.quote.clone(),
            trade_id: Some(self.id.to_string()),
            unix: millis_field("time", unix)?,
            side: self.side,
            price: decimal_field("price", &self.price)?,
            amount: decimal_field("amount", &self.amount)?,
        })
    }
}

impl CoinexDepth {
    pub fn to_snapshot(&self, market: &Market) -> Result<Level2Snapshot, DecodeError> {
        let mut snap = Level2Snapshot::new(Exchange::Coinex, market);
        snap.bids = string_levels("bids", &self.bids)?;
        snap.asks = string_levels("asks", &self.asks)?;
        Ok(snap)
    }

    pub fn to_update(&self, market: &Market) -> Result<Level2Update, DecodeError> {
        let mut update = Level2Update::new(Exchange::Coinex, market);
        update.bids = string_levels("bids", &self.bids)?;
        update.asks = string_levels("asks", &self.asks)?;
        Ok(update)
    }
}
