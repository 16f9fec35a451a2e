//! Upbit adapter.
//!
//! Upbit has no unsubscribe: each request frame replaces every subscription
//! on the connection, so any change re-sends the complete set. Server frames
//! are binary UTF-8 JSON.

use anyhow::Result;
use serde_json::{json, Value};
use uuid::Uuid;

use cxfeed_core::config::FeedConfig;
use cxfeed_core::types::{Capabilities, ChannelKind, Exchange, Market};

use crate::adapter::{ExchangeAdapter, Session};
use crate::client::{ClientEvent, MarketClient};
use crate::decode::frame_text;
use crate::registry::SubscriptionRegistry;
use crate::ws::Frame;

use super::types::UpbitMessage;

pub const UPBIT_WS_URL: &str = "wss://api.upbit.com/websocket/v1";

pub type UpbitClient = MarketClient<UpbitAdapter>;

/// Request type for each supported channel kind.
const TYPES: [(ChannelKind, &str); 3] = [
    (ChannelKind::Ticker, "ticker"),
    (ChannelKind::Trades, "trade"),
    (ChannelKind::Level2Snapshots, "orderbook"),
];

pub struct UpbitAdapter {
    url: String,
    ticket: String,
}

impl Default for UpbitAdapter {
    fn default() -> Self {
        Self::with_url(UPBIT_WS_URL)
    }
}

impl UpbitAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ticket: Uuid::new_v4().to_string(),
        }
    }

    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self::with_url(cfg.upbit.ws_url.clone())
    }

    /// Ticket identifying this client's requests.
    pub fn ticket(&self) -> &str {
        &self.ticket
    }

    /// A request covering every active subscription, or `None` if there is
    /// nothing to ask for.
    fn full_set(&self, registry: &SubscriptionRegistry) -> Option<Frame> {
        let mut request = vec![json!({ "ticket": self.ticket })];
        for (kind, name) in TYPES {
            let codes: Vec<&str> = registry.markets(kind).iter().map(|m| m.id.as_str()).collect();
            if !codes.is_empty() {
                request.push(json!({ "type": name, "codes": codes }));
            }
        }
        (request.len() > 1).then(|| Frame::text(Value::Array(request).to_string()))
    }
}

impl ExchangeAdapter for UpbitAdapter {
    const EXCHANGE: Exchange = Exchange::Upbit;
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

    fn on_connect(&mut self) {
        self.ticket = Uuid::new_v4().to_string();
    }

    fn subscribe_frames(
        &mut self,
        _kind: ChannelKind,
        _market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        self.full_set(registry).into_iter().collect()
    }

    fn unsubscribe_frames(
        &mut self,
        _kind: ChannelKind,
        _market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        self.full_set(registry).into_iter().collect()
    }

    fn replay_frames(&mut self, registry: &SubscriptionRegistry) -> Vec<Frame> {
        self.full_set(registry).into_iter().collect()
    }

    fn on_frame(&mut self, frame: &Frame, session: &mut Session<'_>) -> Result<()> {
        let text = frame_text(frame)?;
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&text) {
            if let Some(error) = obj.get("error") {
                tracing::warn!(exchange = "Upbit", error = %error, "error message from server");
                return Ok(());
            }
            if obj.get("status").is_some() {
                // Connection status reply, e.g. {"status":"UP"}.
                return Ok(());
            }
        }
        let msg = UpbitMessage::parse(&text)?;

        let kind = match &msg {
            UpbitMessage::Ticker(_) => ChannelKind::Ticker,
            UpbitMessage::Trade(_) => ChannelKind::Trades,
            UpbitMessage::Orderbook(_) => ChannelKind::Level2Snapshots,
        };
        let Some(market) = session.registry().get(kind, msg.code()).cloned() else {
            // Without unsubscribe, data for dropped markets keeps flowing
            // until the next request replaces the set.
            tracing::trace!(exchange = "Upbit", code = msg.code(), channel = %kind, "data for inactive subscription");
            return Ok(());
        };

        let event = match msg {
            UpbitMessage::Ticker(raw) => ClientEvent::Ticker(raw.to_ticker(&market)?, market),
            UpbitMessage::Trade(raw) => ClientEvent::Trade(raw.to_trade(&market)?, market),
            UpbitMessage::Orderbook(raw) => ClientEvent::L2Snapshot(raw.to_snapshot(&market)?, market),
        };
        session.emit(event);
        Ok(())
    }
}
