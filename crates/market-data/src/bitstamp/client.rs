//! Bitstamp adapter.
//!
//! Channels are per pair: `live_trades_{id}`, `order_book_{id}` (full top-100
//! snapshots) and `diff_order_book_{id}` (deltas). Diffs carry no sequence
//! number; they are ordered by `microtimestamp` and need a snapshot to seed
//! the book, so subscribing to level-2 updates also subscribes the snapshot
//! channel until the first snapshot has arrived.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde_json::json;

use cxfeed_core::config::FeedConfig;
use cxfeed_core::types::{Capabilities, ChannelKind, Exchange, Market};

use crate::adapter::{ExchangeAdapter, Session};
use crate::client::{ClientEvent, MarketClient};
use crate::decode::{frame_text, parse_json, DecodeError};
use crate::registry::SubscriptionRegistry;
use crate::sync::{BookSynchronizer, SequencePolicy, SyncOutcome};
use crate::ws::Frame;

use super::types::{BitstampBook, BitstampEnvelope, BitstampTrade};

/// Default Bitstamp WebSocket endpoint.
pub const BITSTAMP_WS_URL: &str = "wss://ws.bitstamp.net";

const TRADES_PREFIX: &str = "live_trades_";
const BOOK_PREFIX: &str = "order_book_";
const DIFF_PREFIX: &str = "diff_order_book_";

/// Client handle for Bitstamp.
pub type BitstampClient = MarketClient<BitstampAdapter>;

/// Protocol adapter for Bitstamp's v2 WebSocket API.
pub struct BitstampAdapter {
    url: String,
    sync: BookSynchronizer,
    /// Pairs subscribed to `order_book_` only to seed level-2 updates.
    seeding: HashSet<String>,
}

impl Default for BitstampAdapter {
    fn default() -> Self {
        Self::with_url(BITSTAMP_WS_URL)
    }
}

impl BitstampAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sync: BookSynchronizer::new(SequencePolicy::Monotonic),
            seeding: HashSet::new(),
        }
    }

    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self::with_url(cfg.bitstamp.ws_url.clone())
    }

    fn frame(event: &str, channel: String) -> Frame {
        Frame::text(json!({ "event": event, "data": { "channel": channel } }).to_string())
    }

    fn subscribe(channel: String) -> Frame {
        Self::frame("bts:subscribe", channel)
    }

    fn unsubscribe(channel: String) -> Frame {
        Self::frame("bts:unsubscribe", channel)
    }

    fn handle_trade(&self, pair: &str, data: serde_json::Value, session: &mut Session<'_>) -> Result<()> {
        let market = session
            .registry()
            .get(ChannelKind::Trades, pair)
            .cloned()
            .ok_or_else(|| DecodeError::UnknownMarket(pair.to_string()))?;
        let raw: BitstampTrade = serde_json::from_value(data).context("failed to parse trade")?;
        let trade = raw.to_trade(&market)?;
        session.emit(ClientEvent::Trade(trade, market));
        Ok(())
    }

    fn handle_snapshot(&mut self, pair: &str, data: serde_json::Value, session: &mut Session<'_>) -> Result<()> {
        let registry = session.registry();
        let wants_snapshots = registry.contains(ChannelKind::Level2Snapshots, pair);
        let wants_updates = registry.contains(ChannelKind::Level2Updates, pair);
        let market = registry
            .get(ChannelKind::Level2Snapshots, pair)
            .or_else(|| registry.get(ChannelKind::Level2Updates, pair))
            .cloned()
            .ok_or_else(|| DecodeError::UnknownMarket(pair.to_string()))?;

        let raw: BitstampBook = serde_json::from_value(data).context("failed to parse order book")?;
        let snapshot = raw.to_snapshot(&market)?;

        let replayed = if wants_updates {
            self.sync.on_snapshot(pair, &snapshot, Some(raw.micros()?))?
        } else {
            Vec::new()
        };

        session.emit(ClientEvent::L2Snapshot(snapshot, market.clone()));
        for update in replayed {
            session.emit(ClientEvent::L2Update(update, market.clone()));
        }

        if self.seeding.remove(pair) && !wants_snapshots {
            tracing::debug!(exchange = "Bitstamp", market = pair, "book seeded, leaving snapshot channel");
            session.send(Self::unsubscribe(format!("{BOOK_PREFIX}{pair}")));
        }
        Ok(())
    }

    fn handle_diff(&mut self, pair: &str, data: serde_json::Value, session: &mut Session<'_>) -> Result<()> {
        let market = session
            .registry()
            .get(ChannelKind::Level2Updates, pair)
            .cloned()
            .ok_or_else(|| DecodeError::UnknownMarket(pair.to_string()))?;
        let raw: BitstampBook = serde_json::from_value(data).context("failed to parse book diff")?;
        let update = raw.to_update(&market)?;

        match self.sync.on_update(pair, &update, Some(raw.micros()?))? {
            SyncOutcome::Applied => session.emit(ClientEvent::L2Update(update, market)),
            SyncOutcome::Buffered | SyncOutcome::Stale => {}
            // Monotonic ordering never reports gaps.
            SyncOutcome::Gap { .. } => {}
        }
        Ok(())
    }
}

impl ExchangeAdapter for BitstampAdapter {
    const EXCHANGE: Exchange = Exchange::Bitstamp;
    const CAPABILITIES: Capabilities = Capabilities {
        has_tickers: false,
        has_trades: true,
        has_level2_snapshots: true,
        has_level2_updates: true,
        has_level3_snapshots: false,
        has_level3_updates: false,
    };

    fn url(&self) -> &str {
        &self.url
    }

    fn on_connect(&mut self) {
        self.sync.clear();
        self.seeding.clear();
    }

    fn subscribe_frames(
        &mut self,
        kind: ChannelKind,
        market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        let pair = &market.id;
        match kind {
            ChannelKind::Trades => vec![Self::subscribe(format!("{TRADES_PREFIX}{pair}"))],
            ChannelKind::Level2Snapshots => {
                if self.seeding.contains(pair) {
                    // Already on the channel to seed updates; keep it afterwards.
                    Vec::new()
                } else {
                    vec![Self::subscribe(format!("{BOOK_PREFIX}{pair}"))]
                }
            }
            ChannelKind::Level2Updates => {
                let mut frames = Vec::with_capacity(2);
                if !registry.contains(ChannelKind::Level2Snapshots, pair) {
                    self.seeding.insert(pair.clone());
                    frames.push(Self::subscribe(format!("{BOOK_PREFIX}{pair}")));
                }
                frames.push(Self::subscribe(format!("{DIFF_PREFIX}{pair}")));
                frames
            }
            _ => Vec::new(),
        }
    }

    fn unsubscribe_frames(
        &mut self,
        kind: ChannelKind,
        market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        let pair = &market.id;
        match kind {
            ChannelKind::Trades => vec![Self::unsubscribe(format!("{TRADES_PREFIX}{pair}"))],
            ChannelKind::Level2Snapshots => {
                if self.seeding.contains(pair) {
                    // Still needed to seed updates; dropped after the first snapshot.
                    Vec::new()
                } else if registry.contains(ChannelKind::Level2Updates, pair) && !self.sync.is_synced(pair) {
                    // Updates were relying on this channel for their seed.
                    self.seeding.insert(pair.clone());
                    Vec::new()
                } else {
                    vec![Self::unsubscribe(format!("{BOOK_PREFIX}{pair}"))]
                }
            }
            ChannelKind::Level2Updates => {
                let mut frames = vec![Self::unsubscribe(format!("{DIFF_PREFIX}{pair}"))];
                if self.seeding.remove(pair) && !registry.contains(ChannelKind::Level2Snapshots, pair) {
                    frames.push(Self::unsubscribe(format!("{BOOK_PREFIX}{pair}")));
                }
                frames
            }
            _ => Vec::new(),
        }
    }

    fn on_unsubscribed(&mut self, kind: ChannelKind, market: &Market) {
        if kind == ChannelKind::Level2Updates {
            self.sync.reset(&market.id);
        }
    }

    fn on_frame(&mut self, frame: &Frame, session: &mut Session<'_>) -> Result<()> {
        let text = frame_text(frame)?;
        let env: BitstampEnvelope = parse_json(&text)?;

        match env.event.as_str() {
            "trade" => {
                let pair = env
                    .channel
                    .strip_prefix(TRADES_PREFIX)
                    .ok_or(DecodeError::Missing("channel"))?;
                self.handle_trade(pair, env.data, session)
            }
            "data" => {
                if let Some(pair) = env.channel.strip_prefix(DIFF_PREFIX) {
                    self.handle_diff(pair, env.data, session)
                } else if let Some(pair) = env.channel.strip_prefix(BOOK_PREFIX) {
                    self.handle_snapshot(pair, env.data, session)
                } else {
                    Err(DecodeError::Invalid {
                        field: "channel",
                        value: env.channel,
                    }
                    .into())
                }
            }
            "bts:subscription_succeeded" => {
                tracing::debug!(exchange = "Bitstamp", channel = %env.channel, "subscription confirmed");
                Ok(())
            }
            "bts:unsubscription_succeeded" => Ok(()),
            "bts:request_reconnect" => {
                tracing::info!(exchange = "Bitstamp", "server requested reconnect");
                session.request_reconnect();
                Ok(())
            }
            "bts:error" => {
                tracing::warn!(exchange = "Bitstamp", data = %env.data, "error message from server");
                Ok(())
            }
            other => {
                tracing::trace!(exchange = "Bitstamp", event = other, "ignoring event");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Market {
        Market::new("btcusd", "BTC", "USD")
    }

    fn channels(frames: &[Frame]) -> Vec<String> {
        frames
            .iter()
            .map(|f| {
                let v: serde_json::Value = serde_json::from_str(f.as_text().unwrap()).unwrap();
                format!("{} {}", v["event"].as_str().unwrap(), v["data"]["channel"].as_str().unwrap())
            })
            .collect()
    }

    fn book_frame(channel: &str, micros: u64, bids: &str) -> Frame {
        Frame::text(format!(
            r#"{{"event":"data","channel":"{channel}","data":{{"timestamp":"{}","microtimestamp":"{micros}","bids":{bids},"asks":[["42101","1"]]}}}}"#,
            micros / 1_000_000
        ))
    }

    fn run(adapter: &mut BitstampAdapter, registry: &SubscriptionRegistry, frame: Frame) -> (Vec<ClientEvent>, Vec<Frame>) {
        let mut session = Session::new(registry);
        adapter.on_frame(&frame, &mut session).unwrap();
        let out = session.finish();
        (out.events, out.outbound)
    }

    #[test]
    fn test_capabilities() {
        let caps = BitstampAdapter::CAPABILITIES;
        assert!(!caps.has_tickers);
        assert!(caps.has_trades && caps.has_level2_snapshots && caps.has_level2_updates);
        assert!(!caps.has_level3_snapshots && !caps.has_level3_updates);
    }

    #[test]
    fn test_subscribe_frame_format() {
        let mut adapter = BitstampAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Trades, btc());
        let frames = adapter.subscribe_frames(ChannelKind::Trades, &btc(), &reg);
        assert_eq!(
            frames,
            vec![Frame::text(
                r#"{"data":{"channel":"live_trades_btcusd"},"event":"bts:subscribe"}"#
            )]
        );
    }

    #[test]
    fn test_level2_updates_seed_from_snapshot_channel() {
        let mut adapter = BitstampAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Updates, btc());
        let frames = adapter.subscribe_frames(ChannelKind::Level2Updates, &btc(), &reg);
        assert_eq!(
            channels(&frames),
            vec!["bts:subscribe order_book_btcusd", "bts:subscribe diff_order_book_btcusd"]
        );

        // A diff before the snapshot is held back.
        let (events, _) = run(&mut adapter, &reg, book_frame("diff_order_book_btcusd", 1_706_000_000_600_000, r#"[["42100","2"]]"#));
        assert!(events.is_empty());

        // The seeding snapshot is emitted, the buffered newer diff follows,
        // and the snapshot channel is left.
        let (events, outbound) = run(&mut adapter, &reg, book_frame("order_book_btcusd", 1_706_000_000_500_000, r#"[["42100","1"]]"#));
        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["l2snapshot", "l2update"]);
        assert_eq!(channels(&outbound), vec!["bts:unsubscribe order_book_btcusd"]);

        // Older diffs are stale; newer diffs flow.
        let (events, _) = run(&mut adapter, &reg, book_frame("diff_order_book_btcusd", 1_706_000_000_400_000, "[]"));
        assert!(events.is_empty());
        let (events, _) = run(&mut adapter, &reg, book_frame("diff_order_book_btcusd", 1_706_000_000_700_000, "[]"));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_snapshot_channel_kept_when_snapshots_subscribed() {
        let mut adapter = BitstampAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Updates, btc());
        adapter.subscribe_frames(ChannelKind::Level2Updates, &btc(), &reg);

        reg.insert(ChannelKind::Level2Snapshots, btc());
        assert!(adapter
            .subscribe_frames(ChannelKind::Level2Snapshots, &btc(), &reg)
            .is_empty());

        let (_, outbound) = run(&mut adapter, &reg, book_frame("order_book_btcusd", 1_706_000_000_500_000, "[]"));
        assert!(outbound.is_empty());
    }

    #[test]
    fn test_snapshot_unsubscribe_before_seed_keeps_channel() {
        let mut adapter = BitstampAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Snapshots, btc());
        adapter.subscribe_frames(ChannelKind::Level2Snapshots, &btc(), &reg);
        reg.insert(ChannelKind::Level2Updates, btc());
        assert_eq!(
            channels(&adapter.subscribe_frames(ChannelKind::Level2Updates, &btc(), &reg)),
            vec!["bts:subscribe diff_order_book_btcusd"]
        );

        // No snapshot has seeded the book yet, so the channel must stay.
        reg.remove(ChannelKind::Level2Snapshots, "btcusd");
        assert!(adapter
            .unsubscribe_frames(ChannelKind::Level2Snapshots, &btc(), &reg)
            .is_empty());

        let (events, _) = run(&mut adapter, &reg, book_frame("diff_order_book_btcusd", 1_706_000_000_600_000, r#"[["42100","2"]]"#));
        assert!(events.is_empty());
        let (events, outbound) = run(&mut adapter, &reg, book_frame("order_book_btcusd", 1_706_000_000_500_000, r#"[["42100","1"]]"#));
        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["l2snapshot", "l2update"]);
        assert_eq!(channels(&outbound), vec!["bts:unsubscribe order_book_btcusd"]);

        for i in 0..5u64 {
            let (events, _) = run(
                &mut adapter,
                &reg,
                book_frame("diff_order_book_btcusd", 1_706_000_000_700_000 + i, "[]"),
            );
            assert!(matches!(&events[..], [ClientEvent::L2Update(..)]));
        }
    }

    #[test]
    fn test_snapshot_unsubscribe_after_seed_leaves_channel() {
        let mut adapter = BitstampAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Snapshots, btc());
        reg.insert(ChannelKind::Level2Updates, btc());
        adapter.subscribe_frames(ChannelKind::Level2Updates, &btc(), &reg);
        run(&mut adapter, &reg, book_frame("order_book_btcusd", 1_706_000_000_500_000, "[]"));

        reg.remove(ChannelKind::Level2Snapshots, "btcusd");
        assert_eq!(
            channels(&adapter.unsubscribe_frames(ChannelKind::Level2Snapshots, &btc(), &reg)),
            vec!["bts:unsubscribe order_book_btcusd"]
        );
    }

    #[test]
    fn test_unsubscribe_updates_before_seed() {
        let mut adapter = BitstampAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Updates, btc());
        adapter.subscribe_frames(ChannelKind::Level2Updates, &btc(), &reg);
        reg.remove(ChannelKind::Level2Updates, "btcusd");

        let frames = adapter.unsubscribe_frames(ChannelKind::Level2Updates, &btc(), &reg);
        assert_eq!(
            channels(&frames),
            vec!["bts:unsubscribe diff_order_book_btcusd", "bts:unsubscribe order_book_btcusd"]
        );
    }

    #[test]
    fn test_trade_event() {
        let mut adapter = BitstampAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Trades, btc());
        let frame = Frame::text(
            r#"{"data":{"id":1,"microtimestamp":"1706000000123456","price_str":"42105","amount_str":"0.5","type":0},"channel":"live_trades_btcusd","event":"trade"}"#,
        );
        let (events, _) = run(&mut adapter, &reg, frame);
        match &events[..] {
            [ClientEvent::Trade(trade, market)] => {
                assert_eq!(market, &btc());
                assert_eq!(trade.base, "BTC");
                assert_eq!(trade.unix, 1_706_000_000_123);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_request_reconnect() {
        let mut adapter = BitstampAdapter::new();
        let reg = SubscriptionRegistry::new();
        let mut session = Session::new(&reg);
        adapter
            .on_frame(
                &Frame::text(r#"{"event":"bts:request_reconnect","channel":"","data":""}"#),
                &mut session,
            )
            .unwrap();
        assert!(session.finish().reconnect);
    }

    #[test]
    fn test_unknown_pair_is_an_error() {
        let mut adapter = BitstampAdapter::new();
        let reg = SubscriptionRegistry::new();
        let mut session = Session::new(&reg);
        let frame = Frame::text(
            r#"{"data":{"id":1,"microtimestamp":"1706000000123456","price_str":"1","amount_str":"1","type":0},"channel":"live_trades_ethusd","event":"trade"}"#,
        );
        assert!(adapter.on_frame(&frame, &mut session).is_err());
    }
}
