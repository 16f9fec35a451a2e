//! Gemini v1 market data wire types.
//!
//! The v1 feed is one socket per symbol. Every message carries a
//! `socket_sequence` that counts up by one from zero; the message with
//! sequence zero holds the full book as `change` events with reason
//! `initial`.

use serde::Deserialize;

use cxfeed_core::types::{Exchange, Level2Point, Level2Snapshot, Level2Update, Market, Side, Trade};

use crate::decode::{decimal_field, millis_field, DecodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Update,
    Heartbeat,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Change,
    Trade,
    /// Auction and block trade events.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct GeminiMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, rename = "eventId")]
    pub event_id: Option<u64>,
    #[serde(default)]
    pub socket_sequence: Option<u64>,
    /// Absent on the initial book.
    #[serde(default)]
    pub timestampms: Option<u64>,
    #[serde(default)]
    pub events: Vec<GeminiEvent>,
}

/// One entry of `events`. Only the fields of `change` and `trade` are
/// modelled.
#[derive(Debug, Deserialize)]
pub struct GeminiEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub price: Option<String>,
    /// `bid` or `ask` on a change.
    #[serde(default)]
    pub side: Option<String>,
    /// Size left at the level after a change.
    #[serde(default)]
    pub remaining: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub tid: Option<u64>,
    #[serde(default)]
    pub amount: Option<String>,
    /// Side of the resting order: `bid`, `ask` or `auction`.
    #[serde(default, rename = "makerSide")]
    pub maker_side: Option<String>,
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, DecodeError> {
    value.as_deref().ok_or(DecodeError::Missing(field))
}

impl GeminiMessage {
    /// `socket_sequence`, required on updates and heartbeats.
    pub fn sequence(&self) -> Result<u64, DecodeError> {
        self.socket_sequence.ok_or(DecodeError::Missing("socket_sequence"))
    }

    /// Returns `true` for the message holding the full book.
    pub fn is_initial(&self) -> bool {
        self.socket_sequence == Some(0)
            || self
                .events
                .iter()
                .any(|e| e.kind == EventKind::Change && e.reason.as_deref() == Some("initial"))
    }

    fn changes(&self) -> Result<(Vec<Level2Point>, Vec<Level2Point>), DecodeError> {
        let mut bids = Vec::new();
        let mut asks = Vec::new();
        for event in self.events.iter().filter(|e| e.kind == EventKind::Change) {
            let point = Level2Point::new(
                decimal_field("price", required("price", &event.price)?)?,
                decimal_field("remaining", required("remaining", &event.remaining)?)?,
            );
            match required("side", &event.side)? {
                "bid" => bids.push(point),
                "ask" => asks.push(point),
                other => {
                    return Err(DecodeError::Invalid {
                        field: "side",
                        value: other.to_string(),
                    })
                }
            }
        }
        Ok((bids, asks))
    }

    /// The initial book. Its sequence is the `eventId`.
    pub fn to_snapshot(&self, market: &Market) -> Result<Level2Snapshot, DecodeError> {
        let (bids, asks) = self.changes()?;
        let mut snap = Level2Snapshot::new(Exchange::Gemini, market);
        snap.sequence_id = self.event_id.filter(|id| *id > 0);
        snap.bids = bids;
        snap.asks = asks;
        Ok(snap)
    }

    /// Book changes of a later message. Empty for heartbeats and trade-only
    /// updates.
    pub fn to_update(&self, market: &Market) -> Result<Level2Update, DecodeError> {
        let (bids, asks) = self.changes()?;
        let mut update = Level2Update::new(Exchange::Gemini, market);
        update.sequence_id = Some(self.sequence()?).filter(|seq| *seq > 0);
        update.timestamp_ms = self
            .timestampms
            .map(|ms| millis_field("timestampms", ms))
            .transpose()?;
        update.bids = bids;
        update.asks = asks;
        Ok(update)
    }

    /// Trades in this message. Auction fills have no aggressor and are
    /// skipped.
    pub fn trades(&self, market: &Market) -> Result<Vec<Trade>, DecodeError> {
        let mut trades = Vec::new();
        for event in self.events.iter().filter(|e| e.kind == EventKind::Trade) {
            let side = match required("makerSide", &event.maker_side)? {
                // A resting ask was lifted.
                "ask" => Side::Buy,
                "bid" => Side::Sell,
                other => {
                    tracing::trace!(
                        exchange = "Gemini",
                        maker_side = other,
                        "skipping trade without aggressor"
                    );
                    continue;
                }
            };
            let unix = millis_field(
                "timestampms",
                self.timestampms.ok_or(DecodeError::Missing("timestampms"))?,
            )?;
            trades.push(Trade {
                exchange: Exchange::Gemini,
                base: market.base.clone(),
                quote: market.quote.clone(),
                trade_id: event.tid.map(|tid| tid.to_string()),
                unix,
                side,
                price: decimal_field("price", required("price", &event.price)?)?,
                amount: decimal_field("amount", required("amount", &event.amount)?)?,
            });
        }
        Ok(trades)
    }
}
