//! Poloniex push API wire types.
//!
//! Every frame is a JSON array `[channel, seq, rows]`. Book channels are
//! identified by a numeric pair id; `rows` mixes book snapshot (`i`), book
//! change (`o`) and trade (`t`) rows. Positional rows are decoded by hand.

use std::cmp::Reverse;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use cxfeed_core::types::decimal::{change, format_decimal, parse_decimal, scale};
use cxfeed_core::types::{Exchange, Level2Point, Market, Side, Ticker, Trade};

use crate::decode::{decimal_field, millis_field, DecodeError};

/// Channel id of the ticker feed.
pub const TICKER_CHANNEL: u64 = 1002;
/// Channel id of the connection heartbeat.
pub const HEARTBEAT_CHANNEL: u64 = 1010;

fn str_at<'v>(row: &'v [Value], idx: usize, field: &'static str) -> Result<&'v str, DecodeError> {
    row.get(idx)
        .and_then(Value::as_str)
        .ok_or(DecodeError::Missing(field))
}

fn u64_at(row: &[Value], idx: usize, field: &'static str) -> Result<u64, DecodeError> {
    row.get(idx)
        .and_then(Value::as_u64)
        .ok_or(DecodeError::Missing(field))
}

/// One row of a book channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum BookRow {
    /// Full book for `pair`; sides sorted best first.
    Snapshot {
        pair: String,
        bids: Vec<Level2Point>,
        asks: Vec<Level2Point>,
    },
    Change {
        bid: bool,
        point: Level2Point,
    },
    Trade(PoloniexTrade),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoloniexTrade {
    pub id: String,
    pub side: Side,
    pub price: String,
    pub size: String,
    /// Seconds since the epoch.
    pub time: u64,
}

impl BookRow {
    /// Decode one row. Unknown row types yield `None`.
    pub fn parse(row: &Value) -> Result<Option<BookRow>, DecodeError> {
        let row = row.as_array().ok_or(DecodeError::Missing("row"))?;
        let parsed = match str_at(row, 0, "row type")? {
            "i" => {
                let body = row.get(1).and_then(Value::as_object).ok_or(DecodeError::Missing("i"))?;
                let pair = body
                    .get("currencyPair")
                    .and_then(Value::as_str)
                    .ok_or(DecodeError::Missing("currencyPair"))?;
                let sides = body
                    .get("orderBook")
                    .and_then(Value::as_array)
                    .ok_or(DecodeError::Missing("orderBook"))?;
                let side = |idx: usize, field: &'static str| {
                    sides
                        .get(idx)
                        .and_then(Value::as_object)
                        .ok_or(DecodeError::Missing(field))
                        .and_then(|m| side_levels(field, m))
                };
                let mut asks = side(0, "asks")?;
                let mut bids = side(1, "bids")?;
                // Object keys lose the exchange's ordering.
                asks.sort_by_key(|p| parse_decimal(&p.price));
                bids.sort_by_key(|p| Reverse(parse_decimal(&p.price)));
                BookRow::Snapshot {
                    pair: pair.to_string(),
                    bids,
                    asks,
                }
            }
            "o" => BookRow::Change {
                bid: u64_at(row, 1, "side")? == 1,
                point: Level2Point::new(
                    decimal_field("price", str_at(row, 2, "price")?)?,
                    decimal_field("size", str_at(row, 3, "size")?)?,
                ),
            },
            "t" => BookRow::Trade(PoloniexTrade {
                id: str_at(row, 1, "trade id")?.to_string(),
                side: if u64_at(row, 2, "side")? == 1 { Side::Buy } else { Side::Sell },
                price: decimal_field("price", str_at(row, 3, "price")?)?,
                size: decimal_field("size", str_at(row, 4, "size")?)?,
                time: u64_at(row, 5, "timestamp")?,
            }),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

fn side_levels(field: &'static str, levels: &Map<String, Value>) -> Result<Vec<Level2Point>, DecodeError> {
    levels
        .iter()
        .map(|(price, size)| {
            let size = size.as_str().ok_or(DecodeError::Missing(field))?;
            Ok(Level2Point::new(decimal_field(field, price)?, decimal_field(field, size)?))
        })
        .collect()
}

impl PoloniexTrade {
    pub fn to_trade(&self, market: &Market) -> Result<Trade, DecodeError> {
        Ok(Trade {
            exchange: Exchange::Poloniex,
            base: market.base.clone(),
            quote: market.quote.clone(),
            trade_id: Some(self.id.clone()),
            unix: millis_field("timestamp", self.time.saturating_mul(1_000))?,
            side: self.side,
            price: self.price.clone(),
            amount: self.size.clone(),
        })
    }
}

/// Row of the `1002` ticker channel:
/// `[pairId, last, lowestAsk, highestBid, percentChange, baseVolume, quoteVolume, isFrozen, high24hr, low24hr]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoloniexTicker {
    pub pair_id: u64,
    pub last: String,
    pub ask: String,
    pub bid: String,
    /// Fraction, not percent (`0.05` is 5%).
    pub percent_change: String,
    /// Poloniex names the pair quote-first, so its "base" volume is in our
    /// quote currency.
    pub base_volume: String,
    pub quote_volume: String,
    pub high: String,
    pub low: String,
}

impl PoloniexTicker {
    pub fn parse(row: &[Value]) -> Result<Self, DecodeError> {
        let field = |idx: usize, name: &'static str| -> Result<String, DecodeError> {
            decimal_field(name, str_at(row, idx, name)?)
        };
        Ok(Self {
            pair_id: u64_at(row, 0, "pair id")?,
            last: field(1, "last")?,
            ask: field(2, "lowestAsk")?,
            bid: field(3, "highestBid")?,
            percent_change: field(4, "percentChange")?,
            base_volume: field(5, "baseVolume")?,
            quote_volume: field(6, "quoteVolume")?,
            high: field(8, "high24hr")?,
            low: field(9, "low24hr")?,
        })
    }

    /// `received_ms` stands in for the missing exchange timestamp.
    pub fn to_ticker(&self, market: &Market, received_ms: u64) -> Ticker {
        let mut ticker = Ticker::new(Exchange::Poloniex, market);
        ticker.timestamp = Some(received_ms);

        // open = last / (1 + percentChange)
        let open = parse_decimal(&self.last)
            .zip(parse_decimal(&self.percent_change))
            .and_then(|(last, pct)| last.checked_div(Decimal::ONE + pct));
        if let Some(open) = open {
            let open = format_decimal(open.round_dp(8));
            ticker.change = change(&self.last, &open);
            ticker.open = Some(open);
        }
        ticker.change_percent = scale(&self.percent_change, Decimal::ONE_HUNDRED);

        ticker.last = Some(self.last.clone());
        ticker.high = Some(self.high.clone());
        ticker.low = Some(self.low.clone());
        ticker.volume = Some(self.quote_volume.clone());
        ticker.quote_volume = Some(self.base_volume.clone());
        ticker.bid = Some(self.bid.clone());
        ticker.ask = Some(self.ask.clone());
        ticker
    }
}
