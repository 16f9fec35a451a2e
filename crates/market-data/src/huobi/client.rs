//! Huobi adapter.
//!
//! Every server frame is gzip-compressed JSON. The server pings with
//! `{"ping": n}` and drops connections that do not answer `{"pong": n}`.

use anyhow::{Context, Result};
use serde_json::json;

use cxfeed_core::config::FeedConfig;
use cxfeed_core::types::{Capabilities, ChannelKind, Exchange, Market};

use crate::adapter::{ExchangeAdapter, Session};
use crate::client::{ClientEvent, MarketClient};
use crate::decode::{inflate_gzip, parse_json, DecodeError};
use crate::registry::SubscriptionRegistry;
use crate::ws::Frame;

use super::types::{HuobiDepth, HuobiDetail, HuobiMessage, HuobiTradeTick};

pub const HUOBI_WS_URL: &str = "wss://api.huobi.pro/ws";

pub type HuobiClient = MarketClient<HuobiAdapter>;

/// Topic suffix for each supported channel kind.
fn topic_suffix(kind: ChannelKind) -> Option<&'static str> {
    match kind {
        ChannelKind::Ticker => Some("detail"),
        ChannelKind::Trades => Some("trade.detail"),
        ChannelKind::Level2Snapshots => Some("depth.step0"),
        _ => None,
    }
}

/// Split `market.{id}.{suffix}` into the market id and channel kind.
fn parse_topic(topic: &str) -> Option<(&str, ChannelKind)> {
    let rest = topic.strip_prefix("market.")?;
    // Longest suffix first: `trade.detail` also ends in `detail`.
    for kind in [ChannelKind::Trades, ChannelKind::Level2Snapshots, ChannelKind::Ticker] {
        let suffix = topic_suffix(kind)?;
        if let Some(id) = rest.strip_suffix(suffix).and_then(|s| s.strip_suffix('.')) {
            return Some((id, kind));
        }
    }
    None
}

pub struct HuobiAdapter {
    url: String,
    next_id: u64,
}

impl Default for HuobiAdapter {
    fn default() -> Self {
        Self::with_url(HUOBI_WS_URL)
    }
}

impl HuobiAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            next_id: 0,
        }
    }

    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self::with_url(cfg.huobi.ws_url.clone())
    }

    fn request(&mut self, op: &str, kind: ChannelKind, market: &Market) -> Vec<Frame> {
        let Some(suffix) = topic_suffix(kind) else {
            return Vec::new();
        };
        self.next_id += 1;
        let topic = format!("market.{}.{}", market.id, suffix);
        vec![Frame::text(json!({ op: topic, "id": self.next_id.to_string() }).to_string())]
    }
}

impl ExchangeAdapter for HuobiAdapter {
    const EXCHANGE: Exchange = Exchange::Huobi;
    const CAPABILITIES: Capabilities = Capabilities {
        has_tickers: true,
        has_trades: true,
        has_level2_snapshots: true,
        has_level2_updates: false,
        has_level3_snapshots: false,
        has_level3_updates: false,
    };

    fn url(&self) -> &str {
        &self.url
    }

    fn subscribe_frames(
        &mut self,
        kind: ChannelKind,
        market: &Market,
        _registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        self.request("sub", kind, market)
    }

    fn unsubscribe_frames(
        &mut self,
        kind: ChannelKind,
        market: &Market,
        _registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        self.request("unsub", kind, market)
    }

    fn on_frame(&mut self, frame: &Frame, session: &mut Session<'_>) -> Result<()> {
        let text = match frame {
            Frame::Binary(data) => inflate_gzip(data)?,
            Frame::Text(text) => text.clone(),
        };
        let msg: HuobiMessage = parse_json(&text)?;

        if let Some(ping) = msg.ping {
            session.send(Frame::text(json!({ "pong": ping }).to_string()));
            return Ok(());
        }

        let Some(topic) = msg.ch.as_deref() else {
            if msg.status.as_deref() == Some("error") {
                tracing::warn!(
                    exchange = "Huobi",
                    error = msg.err_msg.as_deref().unwrap_or("unknown"),
                    "request rejected"
                );
            }
            return Ok(());
        };

        let (id, kind) = parse_topic(topic).ok_or_else(|| DecodeError::Invalid {
            field: "ch",
            value: topic.to_string(),
        })?;
        let market = session
            .registry()
            .get(kind, id)
            .cloned()
            .ok_or_else(|| DecodeError::UnknownMarket(id.to_string()))?;
        let tick = msg.tick.ok_or(DecodeError::Missing("tick"))?;

        match kind {
            ChannelKind::Ticker => {
                let detail: HuobiDetail = serde_json::from_value(tick).context("failed to parse detail")?;
                let ts = msg.ts.ok_or(DecodeError::Missing("ts"))?;
                let ticker = detail.to_ticker(&market, ts)?;
                session.emit(ClientEvent::Ticker(ticker, market));
            }
            ChannelKind::Trades => {
                let tick: HuobiTradeTick = serde_json::from_value(tick).context("failed to parse trades")?;
                for raw in &tick.data {
                    let trade = raw.to_trade(&market)?;
                    session.emit(ClientEvent::Trade(trade, market.clone()));
                }
            }
            ChannelKind::Level2Snapshots => {
                let depth: HuobiDepth = serde_json::from_value(tick).context("failed to parse depth")?;
                let snapshot = depth.to_snapshot(&market, msg.ts)?;
                session.emit(ClientEvent::L2Snapshot(snapshot, market));
            }
            _ => {}
        }
        Ok(())
    }
}
