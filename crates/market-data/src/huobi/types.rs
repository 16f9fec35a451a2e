//! Huobi wire types. Numeric fields arrive as JSON numbers.

use serde::Deserialize;
use serde_json::Number;

use cxfeed_core::types::decimal::{change, change_percent, number_to_string};
use cxfeed_core::types::{Exchange, Level2Snapshot, Market, Side, Ticker, Trade};

use crate::decode::{decimal_field, millis_field, number_levels, DecodeError};

/// Any inbound message, after inflating.
#[derive(Debug, Deserialize)]
pub struct HuobiMessage {
    /// Server keepalive; must be echoed back as `pong`.
    #[serde(default)]
    pub ping: Option<u64>,
    /// Topic of a data push.
    #[serde(default)]
    pub ch: Option<String>,
    #[serde(default)]
    pub ts: Option<u64>,
    #[serde(default)]
    pub tick: Option<serde_json::Value>,
    /// Present on sub/unsub replies.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "err-msg")]
    pub err_msg: Option<String>,
}

/// `market.{id}.detail`: rolling 24h statistics.
#[derive(Debug, Deserialize)]
pub struct HuobiDetail {
    pub open: Number,
    pub close: Number,
    pub high: Number,
    pub low: Number,
    /// Base volume.
    pub amount: Number,
    /// Quote volume.
    pub vol: Number,
}

/// `market.{id}.trade.detail` tick.
#[derive(Debug, Deserialize)]
pub struct HuobiTradeTick {
    pub data: Vec<HuobiTrade>,
}

#[derive(Debug, Deserialize)]
pub struct HuobiTrade {
    /// Legacy unique id.
    pub id: Number,
    /// Sequential trade id, where present.
    #[serde(default, rename = "tradeId")]
    pub trade_id: Option<u64>,
    pub ts: u64,
    pub price: Number,
    pub amount: Number,
    pub direction: Side,
}

/// `market.{id}.depth.step0` tick.
#[derive(Debug, Deserialize)]
pub struct HuobiDepth {
    #[serde(default)]
    pub ts: Option<u64>,
    #[serde(default)]
    pub bids: Vec<[Number; 2]>,
    #[serde(default)]
    pub asks: Vec<[Number; 2]>,
}

fn number_field(field: &'static str, n: &Number) -> Result<String, DecodeError> {
    decimal_field(field, &number_to_string(n))
}

impl HuobiDetail {
    pub fn to_ticker(&self, market: &Market, ts: u64) -> Result<Ticker, DecodeError> {
        let last = number_field("close", &self.close)?;
        let open = number_field("open", &self.open)?;
        let mut ticker = Ticker::new(Exchange::Huobi, market);
        ticker.timestamp = Some(millis_field("ts", ts)?);
        ticker.change = change(&last, &open);
        ticker.change_percent = change_percent(&last, &open);
        ticker.last = Some(last);
        ticker.open = Some(open);
        ticker.high = Some(number_field("high", &self.high)?);
        ticker.low = Some(number_field("low", &self.low)?);
        ticker.volume = Some(number_field("amount", &self.amount)?);
        ticker.quote_volume = Some(number_field("vol", &self.vol)?);
        Ok(ticker)
    }
}

impl HuobiTrade {
    pub fn to_trade(&self, market: &Market) -> Result<Trade, DecodeError> {
        let trade_id = match self.trade_id {
            Some(id) => id.to_string(),
            None => number_to_string(&self.id),
        };
        Ok(Trade {
            exchange: Exchange::Huobi,
            base: market.base.clone(),
            quote: market.quote.clone(),
            trade_id: Some(trade_id),
            unix: millis_field("ts", self.ts)?,
            side: self.direction,
            price: number_field("price", &self.price)?,
            amount: number_field("amount", &self.amount)?,
        })
    }
}

impl HuobiDepth {
    /// `fallback_ts` is the envelope time, used when the tick has none.
    pub fn to_snapshot(&self, market: &Market, fallback_ts: Option<u64>) -> Result<Level2Snapshot, DecodeError> {
        let ts = self.ts.or(fallback_ts).ok_or(DecodeError::Missing("ts"))?;
        let mut snap = Level2Snapshot::new(Exchange::Huobi, market);
        snap.timestamp_ms = Some(millis_field("ts", ts)?);
        snap.bids = number_levels("bids", &self.bids)?;
        snap.asks = number_levels("asks", &self.asks)?;
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> Market {
        Market::new("btcusdt", "BTC", "USDT")
    }

    #[test]
    fn test_detail_to_ticker() {
        let json = r#"{"amount":12224.2922,"open":9790.52,"close":10195.00,"high":10300.00,"id":1494496390,"count":15195,"low":9657.00,"vol":121906001.754751}"#;
        let detail: HuobiDetail = serde_json::from_str(json).unwrap();
        let ticker = detail.to_ticker(&market(), 1_494_496_390_000).unwrap();
        assert_eq!(ticker.last.as_deref(), Some("10195.00"));
        assert_eq!(ticker.open.as_deref(), Some("9790.52"));
        assert_eq!(ticker.quote_volume.as_deref(), Some("121906001.754751"));
        assert_eq!(ticker.change.as_deref(), Some("404.48"));
        assert!(ticker.change_percent.is_some());
        assert_eq!(ticker.bid, None);
    }

    #[test]
    fn test_detail_keeps_wire_digits() {
        let json = r#"{"amount":12345.678901234567891,"open":9790.52,"close":10195.00,"high":10300.00,"low":9657.00,"vol":428163279.9318508946793434}"#;
        let detail: HuobiDetail = serde_json::from_str(json).unwrap();
        let ticker = detail.to_ticker(&market(), 1_494_496_390_000).unwrap();
        assert_eq!(ticker.quote_volume.as_deref(), Some("428163279.9318508946793434"));
        assert_eq!(ticker.volume.as_deref(), Some("12345.678901234567891"));

        // Same through the client path, which decodes the tick from a Value.
        let msg: HuobiMessage = serde_json::from_str(&format!(r#"{{"ch":"market.btcusdt.detail","ts":1,"tick":{json}}}"#)).unwrap();
        let detail: HuobiDetail = serde_json::from_value(msg.tick.unwrap()).unwrap();
        assert_eq!(number_to_string(&detail.vol), "428163279.9318508946793434");
    }

    #[test]
    fn test_trade_prefers_sequential_id() {
        let json = r#"{"data":[
            {"id":10055003876227587366,"ts":1706000000123,"tradeId":102209813567,"amount":0.01,"price":42000.5,"direction":"buy"},
            {"id":10055003876227587367,"ts":1706000000124,"amount":0.02,"price":42000.4,"direction":"sell"}
        ]}"#;
        let tick: HuobiTradeTick = serde_json::from_str(json).unwrap();
        let first = tick.data[0].to_trade(&market()).unwrap();
        assert_eq!(first.trade_id.as_deref(), Some("102209813567"));
        assert_eq!(first.side, Side::Buy);
        assert_eq!(first.price, "42000.5");

        let second = tick.data[1].to_trade(&market()).unwrap();
        assert_eq!(second.trade_id.as_deref(), Some("10055003876227587367"));
        assert_eq!(second.side, Side::Sell);
    }

    #[test]
    fn test_depth_to_snapshot() {
        let json = r#"{"bids":[[42000.1,0.5],[42000,1]],"asks":[[42000.2,0.0001]],"version":100,"ts":1706000000200}"#;
        let depth: HuobiDepth = serde_json::from_str(json).unwrap();
        let snap = depth.to_snapshot(&market(), None).unwrap();
        assert_eq!(snap.timestamp_ms, Some(1_706_000_000_200));
        assert_eq!(snap.bids[1].price, "42000");
        assert_eq!(snap.asks[0].size, "0.0001");
        assert_eq!(snap.sequence_id, None);
    }
}
