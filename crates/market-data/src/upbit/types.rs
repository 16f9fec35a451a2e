//! Upbit wire types (default, non-abbreviated field format).

use serde::Deserialize;
use serde_json::{Number, Value};

use cxfeed_core::types::decimal::{number_to_string, scale};
use cxfeed_core::types::{Exchange, Level2Point, Level2Snapshot, Market, Side, Ticker, Trade};

use crate::decode::{decimal_field, millis_field, parse_json, DecodeError};

/// A data message, selected by its `type` field.
#[derive(Debug)]
pub enum UpbitMessage {
    Ticker(UpbitTicker),
    Trade(UpbitTrade),
    Orderbook(UpbitOrderbook),
}

impl UpbitMessage {
    /// Decode one message. The body is deserialized from a parsed [`Value`]
    /// rather than through a serde tag, which would buffer numbers and lose
    /// their wire text.
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = parse_json(raw)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::Missing("type"))?
            .to_string();
        Ok(match kind.as_str() {
            "ticker" => UpbitMessage::Ticker(serde_json::from_value(value)?),
            "trade" => UpbitMessage::Trade(serde_json::from_value(value)?),
            "orderbook" => UpbitMessage::Orderbook(serde_json::from_value(value)?),
            _ => return Err(DecodeError::Invalid { field: "type", value: kind }),
        })
    }

    pub fn code(&self) -> &str {
        match self {
            UpbitMessage::Ticker(t) => &t.code,
            UpbitMessage::Trade(t) => &t.code,
            UpbitMessage::Orderbook(b) => &b.code,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpbitTicker {
    pub code: String,
    pub opening_price: Number,
    pub high_price: Number,
    pub low_price: Number,
    pub trade_price: Number,
    pub signed_change_price: Number,
    /// Fraction, not percent.
    pub signed_change_rate: Number,
    pub acc_trade_volume_24h: Number,
    pub acc_trade_price_24h: Number,
    pub timestamp: u64,
}

/// Which side of the book the taker hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AskBid {
    Ask,
    Bid,
}

#[derive(Debug, Deserialize)]
pub struct UpbitTrade {
    pub code: String,
    pub trade_price: Number,
    pub trade_volume: Number,
    pub ask_bid: AskBid,
    pub trade_timestamp: u64,
    pub sequential_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct UpbitOrderbook {
    pub code: String,
    pub timestamp: u64,
    pub orderbook_units: Vec<UpbitUnit>,
}

#[derive(Debug, Deserialize)]
pub struct UpbitUnit {
    pub ask_price: Number,
    pub bid_price: Number,
    pub ask_size: Number,
    pub bid_size: Number,
}

fn number_field(field: &'static str, n: &Number) -> Result<String, DecodeError> {
    decimal_field(field, &number_to_string(n))
}

impl UpbitTicker {
    pub fn to_ticker(&self, market: &Market) -> Result<Ticker, DecodeError> {
        let rate = number_field("signed_change_rate", &self.signed_change_rate)?;
        let mut ticker = Ticker::new(Exchange::Upbit, market);
        ticker.timestamp = Some(millis_field("timestamp", self.timestamp)?);
        ticker.last = Some(number_field("trade_price", &self.trade_price)?);
        ticker.open = Some(number_field("opening_price", &self.opening_price)?);
        ticker.high = Some(number_field("high_price", &self.high_price)?);
        ticker.low = Some(number_field("low_price", &self.low_price)?);
        ticker.volume = Some(number_field("acc_trade_volume_24h", &self.acc_trade_volume_24h)?);
        ticker.quote_volume = Some(number_field("acc_trade_price_24h", &self.acc_trade_price_24h)?);
        ticker.change = Some(number_field("signed_change_price", &self.signed_change_price)?);
        ticker.change_percent = scale(&rate, rust_decimal::Decimal::ONE_HUNDRED);
        Ok(ticker)
    }
}

impl UpbitTrade {
    pub fn to_trade(&self, market: &Market) -> Result<Trade, DecodeError> {
        Ok(Trade {
            exchange: Exchange::Upbit,
            base: market.base.clone(),
            quote: market.quote.clone(),
            trade_id: Some(self.sequential_id.to_string()),
            unix: millis_field("trade_timestamp", self.trade_timestamp)?,
            side: match self.ask_bid {
                AskBid::Ask => Side::Sell,
                AskBid::Bid => Side::Buy,
            },
            price: number_field("trade_price", &self.trade_price)?,
            amount: number_field("trade_volume", &self.trade_volume)?,
        })
    }
}

impl UpbitOrderbook {
    pub fn to_snapshot(&self, market: &Market) -> Result<Level2Snapshot, DecodeError> {
        let mut snap = Level2Snapshot::new(Exchange::Upbit, market);
        snap.timestamp_ms = Some(millis_field("timestamp", self.timestamp)?);
        for unit in &self.orderbook_units {
            snap.asks.push(Level2Point::new(
                number_field("ask_price", &unit.ask_price)?,
                number_field("ask_size", &unit.ask_size)?,
            ));
            snap.bids.push(Level2Point::new(
                number_field("bid_price", &unit.bid_price)?,
                number_field("bid_size", &unit.bid_size)?,
            ));
        }
        Ok(snap)
    }
}
