//! Bitstamp wire types.
//!
//! Every message is a `{"event", "channel", "data"}` envelope. Numeric values
//! arrive as strings except for a few convenience duplicates (`price`,
//! `amount`) which are ignored in favour of their `_str` counterparts.

use serde::Deserialize;

use cxfeed_core::types::timestamp::micros_to_millis;
use cxfeed_core::types::{Exchange, Level2Snapshot, Level2Update, Market, Side, Trade};

use crate::decode::{decimal_field, millis_field, string_levels, DecodeError};

/// Top-level message envelope.
#[derive(Debug, Deserialize)]
pub struct BitstampEnvelope {
    /// `trade`, `data`, `bts:subscription_succeeded`, `bts:request_reconnect`, ...
    pub event: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of a `live_trades_{pair}` event.
#[derive(Debug, Deserialize)]
pub struct BitstampTrade {
    pub id: u64,
    /// Microseconds since the epoch, as a string.
    pub microtimestamp: String,
    pub price_str: String,
    pub amount_str: String,
    /// `0` = buy, `1` = sell (taker side).
    #[serde(rename = "type")]
    pub side: u8,
}

/// Payload of `order_book_{pair}` and `diff_order_book_{pair}` events.
#[derive(Debug, Deserialize)]
pub struct BitstampBook {
    pub microtimestamp: String,
    #[serde(default)]
    pub bids: Vec<Vec<String>>,
    #[serde(default)]
    pub asks: Vec<Vec<String>>,
}

pub(crate) fn parse_micros(raw: &str) -> Result<u64, DecodeError> {
    raw.parse::<u64>().map_err(|_| DecodeError::Invalid {
        field: "microtimestamp",
        value: raw.to_string(),
    })
}

impl BitstampTrade {
    pub fn to_trade(&self, market: &Market) -> Result<Trade, DecodeError> {
        let side = match self.side {
            0 => Side::Buy,
            1 => Side::Sell,
            other => {
                return Err(DecodeError::Invalid {
                    field: "type",
                    value: other.to_string(),
                })
            }
        };
        Ok(Trade {
            exchange: Exchange::Bitstamp,
            base: market.base.clone(),
            quote: market.quote.clone(),
            trade_id: Some(self.id.to_string()),
            unix: millis_field("microtimestamp", micros_to_millis(parse_micros(&self.microtimestamp)?))?,
            side,
            price: decimal_field("price_str", &self.price_str)?,
            amount: decimal_field("amount_str", &self.amount_str)?,
        })
    }
}

impl BitstampBook {
    /// Event time in microseconds; also the update ordering key.
    pub fn micros(&self) -> Result<u64, DecodeError> {
        parse_micros(&self.microtimestamp)
    }

    pub fn to_snapshot(&self, market: &Market) -> Result<Level2Snapshot, DecodeError> {
        let mut snap = Level2Snapshot::new(Exchange::Bitstamp, market);
        snap.timestamp_ms = Some(millis_field("microtimestamp", micros_to_millis(self.micros()?))?);
        snap.bids = string_levels("bids", &self.bids)?;
        snap.asks = string_levels("asks", &self.asks)?;
        Ok(snap)
    }

    pub fn to_update(&self, market: &Market) -> Result<Level2Update, DecodeError> {
        let mut update = Level2Update::new(Exchange::Bitstamp, market);
        update.timestamp_ms = Some(millis_field("microtimestamp", micros_to_millis(self.micros()?))?);
        update.bids = string_levels("bids", &self.bids)?;
        update.asks = string_levels("asks", &self.asks)?;
        Ok(update)
    }
}
