//! Coinex adapter.
//!
//! Coinex speaks JSON-RPC. Each `*.subscribe` call replaces the previous
//! subscription set for that method, so every change re-sends the full list
//! of active markets for the affected channel.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use cxfeed_core::config::FeedConfig;
use cxfeed_core::types::timestamp::now_millis;
use cxfeed_core::types::{Capabilities, ChannelKind, Exchange, Market};

use crate::adapter::{ExchangeAdapter, Session};
use crate::client::{ClientEvent, MarketClient};
use crate::decode::{frame_text, parse_json, DecodeError};
use crate::registry::SubscriptionRegistry;
use crate::sync::{BookSynchronizer, SequencePolicy, SyncOutcome};
use crate::ws::Frame;

use super::types::{CoinexMessage, DealsParams, DepthParams, StateParams};

/// Default Coinex WebSocket endpoint.
pub const COINEX_WS_URL: &str = "wss://socket.coinex.com/";

/// Keepalive period for `server.ping`.
pub const COINEX_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Depth levels requested per market.
const DEPTH_LIMIT: u32 = 50;
/// Price merge precision; `"0"` means unmerged.
const DEPTH_MERGE: &str = "0";

pub type CoinexClient = MarketClient<CoinexAdapter>;

pub struct CoinexAdapter {
    url: String,
    next_id: u64,
    sync: BookSynchronizer,
}

impl Default for CoinexAdapter {
    fn default() -> Self {
        Self::with_url(COINEX_WS_URL)
    }
}

impl CoinexAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            next_id: 0,
            sync: BookSynchronizer::new(SequencePolicy::Unsequenced),
        }
    }

    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self::with_url(cfg.coinex.ws_url.clone())
    }

    fn call(&mut self, method: &str, params: Value) -> Frame {
        self.next_id += 1;
        Frame::text(json!({ "method": method, "params": params, "id": self.next_id }).to_string())
    }

    /// The frame that brings the server's set for `kind` in line with `registry`.
    fn set_frame(&mut self, kind: ChannelKind, registry: &SubscriptionRegistry) -> Option<Frame> {
        let ids: Vec<&str> = registry.markets(kind).iter().map(|m| m.id.as_str()).collect();
        let (method, params) = match kind {
            ChannelKind::Ticker if ids.is_empty() => ("state.unsubscribe", json!([])),
            ChannelKind::Ticker => ("state.subscribe", json!(ids)),
            ChannelKind::Trades if ids.is_empty() => ("deals.unsubscribe", json!([])),
            ChannelKind::Trades => ("deals.subscribe", json!(ids)),
            ChannelKind::Level2Updates if ids.is_empty() => ("depth.unsubscribe", json!([])),
            ChannelKind::Level2Updates => {
                let rows: Vec<Value> = ids
                    .iter()
                    .map(|id| json!([id, DEPTH_LIMIT, DEPTH_MERGE]))
                    .collect();
                ("depth.subscribe_multi", Value::Array(rows))
            }
            _ => return None,
        };
        Some(self.call(method, params))
    }

    fn handle_state(&self, params: Value, session: &mut Session<'_>) -> Result<()> {
        let params: StateParams = serde_json::from_value(params).context("failed to parse state.update")?;
        let received = now_millis();
        for entry in params {
            for (id, state) in entry {
                let Some(market) = session.registry().get(ChannelKind::Ticker, &id).cloned() else {
                    tracing::trace!(exchange = "Coinex", market = %id, "state for unsubscribed market");
                    continue;
                };
                let ticker = state.to_ticker(&market, received)?;
                session.emit(ClientEvent::Ticker(ticker, market));
            }
        }
        Ok(())
    }

    fn handle_deals(&self, params: Value, session: &mut Session<'_>) -> Result<()> {
        let (id, deals): DealsParams = serde_json::from_value(params).context("failed to parse deals.update")?;
        let market = session
            .registry()
            .get(ChannelKind::Trades, &id)
            .cloned()
            .ok_or(DecodeError::UnknownMarket(id))?;
        for deal in &deals {
            let trade = deal.to_trade(&market)?;
            session.emit(ClientEvent::Trade(trade, market.clone()));
        }
        Ok(())
    }

    fn handle_depth(&mut self, params: Value, session: &mut Session<'_>) -> Result<()> {
        let (clean, depth, id): DepthParams =
            serde_json::from_value(params).context("failed to parse depth.update")?;
        let market = session
            .registry()
            .get(ChannelKind::Level2Updates, &id)
            .cloned()
            .ok_or_else(|| DecodeError::UnknownMarket(id.clone()))?;

        if clean {
            let snapshot = depth.to_snapshot(&market)?;
            let replayed = self.sync.on_snapshot(&id, &snapshot, None)?;
            session.emit(ClientEvent::L2Snapshot(snapshot, market.clone()));
            for update in replayed {
                session.emit(ClientEvent::L2Update(update, market.clone()));
            }
        } else {
            let update = depth.to_update(&market)?;
            if self.sync.on_update(&id, &update, None)? == SyncOutcome::Applied {
                session.emit(ClientEvent::L2Update(update, market));
            }
        }
        Ok(())
    }
}

impl ExchangeAdapter for CoinexAdapter {
    const EXCHANGE: Exchange = Exchange::Coinex;
    const CAPABILITIES: Capabilities = Capabilities {
        has_tickers: true,
        has_trades: true,
        has_level2_snapshots: false,
        has_level2_updates: true,
        has_level3_snapshots: false,
        has_level3_updates: false,
    };

    fn url(&self) -> &str {
        &self.url
    }

    fn on_connect(&mut self) {
        self.sync.clear();
    }

    fn subscribe_frames(
        &mut self,
        kind: ChannelKind,
        _market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        self.set_frame(kind, registry).into_iter().collect()
    }

    fn unsubscribe_frames(
        &mut self,
        kind: ChannelKind,
        _market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        self.set_frame(kind, registry).into_iter().collect()
    }

    fn replay_frames(&mut self, registry: &SubscriptionRegistry) -> Vec<Frame> {
        ChannelKind::REPLAY_ORDER
            .into_iter()
            .filter(|kind| registry.count(*kind) > 0)
            .filter_map(|kind| self.set_frame(kind, registry))
            .collect()
    }

    fn on_unsubscribed(&mut self, kind: ChannelKind, market: &Market) {
        if kind == ChannelKind::Level2Updates {
            self.sync.reset(&market.id);
        }
    }

    fn ping_interval(&self) -> Option<Duration> {
        Some(COINEX_PING_INTERVAL)
    }

    fn ping_frame(&mut self) -> Option<Frame> {
        Some(self.call("server.ping", json!([])))
    }

    fn on_frame(&mut self, frame: &Frame, session: &mut Session<'_>) -> Result<()> {
        let text = frame_text(frame)?;
        let msg: CoinexMessage = parse_json(&text)?;

        let Some(method) = msg.method.as_deref() else {
            // Reply to one of our calls.
            match msg.error {
                Some(error) if !error.is_null() => {
                    tracing::warn!(exchange = "Coinex", id = ?msg.id, error = %error, "call failed");
                }
                _ => tracing::trace!(exchange = "Coinex", id = ?msg.id, "call acknowledged"),
            }
            return Ok(());
        };

        match method {
            "state.update" => self.handle_state(msg.params, session),
            "deals.update" => self.handle_deals(msg.params, session),
            "depth.update" => self.handle_depth(msg.params, session),
            other => {
                tracing::trace!(exchange = "Coinex", method = other, "ignoring push");
                Ok(())
            }
        }
    }
}
