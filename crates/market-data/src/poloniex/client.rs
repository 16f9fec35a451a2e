//! Poloniex adapter.
//!
//! A pair channel carries both the book and trades for that pair, so trades
//! and level-2 updates share one wire subscription. Tickers for every pair
//! arrive on channel `1002` keyed by numeric pair id; the id table is learnt
//! from book snapshots and can be seeded up front for ticker-only use.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde_json::{json, Value};

use cxfeed_core::config::FeedConfig;
use cxfeed_core::types::timestamp::now_millis;
use cxfeed_core::types::{Capabilities, ChannelKind, Exchange, Level2Snapshot, Level2Update, Market};

use crate::adapter::{ExchangeAdapter, Session};
use crate::client::{ClientEvent, MarketClient};
use crate::decode::{frame_text, parse_json, DecodeError};
use crate::registry::SubscriptionRegistry;
use crate::sync::{BookSynchronizer, SequencePolicy, SyncOutcome};
use crate::ws::Frame;

use super::types::{BookRow, PoloniexTicker, HEARTBEAT_CHANNEL, TICKER_CHANNEL};

pub const POLONIEX_WS_URL: &str = "wss://api2.poloniex.com";

pub type PoloniexClient = MarketClient<PoloniexAdapter>;

pub struct PoloniexAdapter {
    url: String,
    sync: BookSynchronizer,
    /// Numeric channel id to pair name.
    pair_ids: HashMap<u64, String>,
}

impl Default for PoloniexAdapter {
    fn default() -> Self {
        Self::with_url(POLONIEX_WS_URL)
    }
}

impl PoloniexAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sync: BookSynchronizer::new(SequencePolicy::Contiguous { step: 1 }),
            pair_ids: HashMap::new(),
        }
    }

    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self::with_url(cfg.poloniex.ws_url.clone())
    }

    /// Seed the pair id table so tickers resolve before any book snapshot.
    pub fn with_pair_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = (u64, S)>,
        S: Into<String>,
    {
        self.pair_ids
            .extend(ids.into_iter().map(|(id, pair)| (id, pair.into())));
        self
    }

    pub fn pair_for_id(&self, id: u64) -> Option<&str> {
        self.pair_ids.get(&id).map(String::as_str)
    }

    fn command(command: &str, channel: Value) -> Frame {
        Frame::text(json!({ "command": command, "channel": channel }).to_string())
    }

    fn pair_frame(command: &str, market: &Market) -> Frame {
        Self::command(command, json!(market.id))
    }

    fn uses_pair_channel(kind: ChannelKind) -> bool {
        matches!(kind, ChannelKind::Trades | ChannelKind::Level2Updates)
    }

    fn handle_ticker(&self, msg: &[Value], session: &mut Session<'_>) -> Result<()> {
        let Some(row) = msg.get(2).and_then(Value::as_array) else {
            // Subscription acknowledgement.
            return Ok(());
        };
        let raw = PoloniexTicker::parse(row)?;
        let Some(pair) = self.pair_for_id(raw.pair_id) else {
            tracing::trace!(exchange = "Poloniex", pair_id = raw.pair_id, "ticker for unknown pair id");
            return Ok(());
        };
        if let Some(market) = session.registry().get(ChannelKind::Ticker, pair).cloned() {
            let ticker = raw.to_ticker(&market, now_millis());
            session.emit(ClientEvent::Ticker(ticker, market));
        }
        Ok(())
    }

    fn handle_book(&mut self, channel: u64, msg: &[Value], session: &mut Session<'_>) -> Result<()> {
        let Some(rows) = msg.get(2).and_then(Value::as_array) else {
            return Ok(());
        };
        let seq = msg
            .get(1)
            .and_then(Value::as_u64)
            .ok_or(DecodeError::Missing("seq"))?;

        let mut snapshot = None;
        let mut bids = Vec::new();
        let mut asks = Vec::new();
        let mut trades = Vec::new();
        for row in rows {
            match BookRow::parse(row)? {
                Some(BookRow::Snapshot { pair, bids, asks }) => {
                    self.pair_ids.insert(channel, pair);
                    snapshot = Some((bids, asks));
                }
                Some(BookRow::Change { bid: true, point }) => bids.push(point),
                Some(BookRow::Change { bid: false, point }) => asks.push(point),
                Some(BookRow::Trade(trade)) => trades.push(trade),
                None => {}
            }
        }

        let pair = self
            .pair_for_id(channel)
            .map(str::to_string)
            .ok_or_else(|| DecodeError::UnknownMarket(channel.to_string()))?;
        let registry = session.registry();
        let trade_market = registry.get(ChannelKind::Trades, &pair).cloned();
        let book_market = registry.get(ChannelKind::Level2Updates, &pair).cloned();
        if trade_market.is_none() && book_market.is_none() {
            return Err(DecodeError::UnknownMarket(pair).into());
        }

        if let Some(market) = book_market {
            if let Some((bids, asks)) = snapshot {
                let mut snap = Level2Snapshot::new(Exchange::Poloniex, &market);
                snap.sequence_id = Some(seq);
                snap.bids = bids;
                snap.asks = asks;
                let replayed = self.sync.on_snapshot(&pair, &snap, Some(seq))?;
                session.emit(ClientEvent::L2Snapshot(snap, market.clone()));
                for update in replayed {
                    session.emit(ClientEvent::L2Update(update, market.clone()));
                }
            }

            if !bids.is_empty() || !asks.is_empty() {
                let mut update = Level2Update::new(Exchange::Poloniex, &market);
                update.sequence_id = Some(seq);
                update.bids = bids;
                update.asks = asks;
                match self.sync.on_update(&pair, &update, Some(seq))? {
                    SyncOutcome::Applied => session.emit(ClientEvent::L2Update(update, market)),
                    SyncOutcome::Buffered | SyncOutcome::Stale => {}
                    SyncOutcome::Gap { expected, received } => {
                        tracing::info!(
                            exchange = "Poloniex",
                            market = %pair,
                            expected,
                            received,
                            "resubscribing for a fresh book"
                        );
                        session.send(Self::pair_frame("unsubscribe", &market));
                        session.send(Self::pair_frame("subscribe", &market));
                    }
                }
            }
        }

        if let Some(market) = trade_market {
            for raw in &trades {
                let trade = raw.to_trade(&market)?;
                session.emit(ClientEvent::Trade(trade, market.clone()));
            }
        }
        Ok(())
    }
}

impl ExchangeAdapter for PoloniexAdapter {
    const EXCHANGE: Exchange = Exchange::Poloniex;
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
        market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        match kind {
            ChannelKind::Ticker if registry.count(ChannelKind::Ticker) == 1 => {
                vec![Self::command("subscribe", json!(TICKER_CHANNEL))]
            }
            ChannelKind::Trades if !registry.contains(ChannelKind::Level2Updates, &market.id) => {
                vec![Self::pair_frame("subscribe", market)]
            }
            ChannelKind::Level2Updates if registry.contains(ChannelKind::Trades, &market.id) => {
                // The pair channel is already open; only a resubscribe sends a book.
                self.sync.reset(&market.id);
                vec![
                    Self::pair_frame("unsubscribe", market),
                    Self::pair_frame("subscribe", market),
                ]
            }
            ChannelKind::Level2Updates => vec![Self::pair_frame("subscribe", market)],
            _ => Vec::new(),
        }
    }

    fn unsubscribe_frames(
        &mut self,
        kind: ChannelKind,
        market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        match kind {
            ChannelKind::Ticker if registry.count(ChannelKind::Ticker) == 0 => {
                vec![Self::command("unsubscribe", json!(TICKER_CHANNEL))]
            }
            kind if Self::uses_pair_channel(kind)
                && !registry.contains(ChannelKind::Trades, &market.id)
                && !registry.contains(ChannelKind::Level2Updates, &market.id) =>
            {
                vec![Self::pair_frame("unsubscribe", market)]
            }
            _ => Vec::new(),
        }
    }

    fn replay_frames(&mut self, registry: &SubscriptionRegistry) -> Vec<Frame> {
        let mut frames = Vec::new();
        if registry.count(ChannelKind::Ticker) > 0 {
            frames.push(Self::command("subscribe", json!(TICKER_CHANNEL)));
        }
        let mut seen = HashSet::new();
        for (kind, market) in registry.iter_replay() {
            if Self::uses_pair_channel(kind) && seen.insert(market.id.as_str()) {
                frames.push(Self::pair_frame("subscribe", market));
            }
        }
        frames
    }

    fn on_unsubscribed(&mut self, kind: ChannelKind, market: &Market) {
        if kind == ChannelKind::Level2Updates {
            self.sync.reset(&market.id);
        }
    }

    fn on_frame(&mut self, frame: &Frame, session: &mut Session<'_>) -> Result<()> {
        let text = frame_text(frame)?;
        let msg: Value = parse_json(&text)?;

        if let Some(error) = msg.get("error") {
            tracing::warn!(exchange = "Poloniex", error = %error, "error message from server");
            return Ok(());
        }

        let msg = msg.as_array().ok_or(DecodeError::Missing("channel"))?;
        let channel = msg
            .first()
            .and_then(Value::as_u64)
            .ok_or(DecodeError::Missing("channel"))?;

        match channel {
            HEARTBEAT_CHANNEL => Ok(()),
            TICKER_CHANNEL => self.handle_ticker(msg, session),
            _ => self.handle_book(channel, msg, session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Market {
        Market::new("USDT_BTC", "BTC", "USDT")
    }

    fn run(adapter: &mut PoloniexAdapter, registry: &SubscriptionRegistry, raw: &str) -> (Vec<ClientEvent>, Vec<Frame>) {
        let mut session = Session::new(registry);
        adapter.on_frame(&Frame::text(raw), &mut session).unwrap();
        let out = session.finish();
        (out.events, out.outbound)
    }

    const SNAPSHOT: &str = r#"[121,100,[["i",{"currencyPair":"USDT_BTC","orderBook":[{"6501":"1"},{"6500":"2"}]}]]]"#;

    #[test]
    fn test_frame_format() {
        let mut adapter = PoloniexAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Trades, btc());
        assert_eq!(
            adapter.subscribe_frames(ChannelKind::Trades, &btc(), &reg),
            vec![Frame::text(r#"{"channel":"USDT_BTC","command":"subscribe"}"#)]
        );

        reg.insert(ChannelKind::Ticker, btc());
        assert_eq!(
            adapter.subscribe_frames(ChannelKind::Ticker, &btc(), &reg),
            vec![Frame::text(r#"{"channel":1002,"command":"subscribe"}"#)]
        );
    }

    #[test]
    fn test_ticker_channel_shared_by_all_markets() {
        let mut adapter = PoloniexAdapter::new();
        let eth = Market::new("USDT_ETH", "ETH", "USDT");
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Ticker, btc());
        assert_eq!(adapter.subscribe_frames(ChannelKind::Ticker, &btc(), &reg).len(), 1);
        reg.insert(ChannelKind::Ticker, eth.clone());
        assert!(adapter.subscribe_frames(ChannelKind::Ticker, &eth, &reg).is_empty());

        reg.remove(ChannelKind::Ticker, "USDT_BTC");
        assert!(adapter.unsubscribe_frames(ChannelKind::Ticker, &btc(), &reg).is_empty());
        reg.remove(ChannelKind::Ticker, "USDT_ETH");
        assert_eq!(adapter.unsubscribe_frames(ChannelKind::Ticker, &eth, &reg).len(), 1);
    }

    #[test]
    fn test_replay_dedups_pair_channel() {
        let mut adapter = PoloniexAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Trades, btc());
        reg.insert(ChannelKind::Level2Updates, btc());
        reg.insert(ChannelKind::Ticker, btc());
        let frames = adapter.replay_frames(&reg);
        assert_eq!(
            frames,
            vec![
                Frame::text(r#"{"channel":1002,"command":"subscribe"}"#),
                Frame::text(r#"{"channel":"USDT_BTC","command":"subscribe"}"#),
            ]
        );
    }

    #[test]
    fn test_snapshot_then_contiguous_updates() {
        let mut adapter = PoloniexAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Updates, btc());

        let (events, _) = run(&mut adapter, &reg, SNAPSHOT);
        match &events[..] {
            [ClientEvent::L2Snapshot(snap, _)] => assert_eq!(snap.sequence_id, Some(100)),
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(adapter.pair_for_id(121), Some("USDT_BTC"));

        let (events, _) = run(&mut adapter, &reg, r#"[121,101,[["o",1,"6500","0"],["o",0,"6502","1"]]]"#);
        match &events[..] {
            [ClientEvent::L2Update(update, _)] => {
                assert_eq!(update.sequence_id, Some(101));
                assert_eq!(update.bids.len(), 1);
                assert_eq!(update.asks.len(), 1);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_gap_triggers_resubscribe() {
        let mut adapter = PoloniexAdapter::new();
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Updates, btc());
        run(&mut adapter, &reg, SNAPSHOT);

        let (events, outbound) = run(&mut adapter, &reg, r#"[121,103,[["o",1,"6500","1"]]]"#);
        assert!(events.is_empty());
        assert_eq!(
            outbound,
            vec![
                Frame::text(r#"{"channel":"USDT_BTC","command":"unsubscribe"}"#),
                Frame::text(r#"{"channel":"USDT_BTC","command":"subscribe"}"#),
            ]
        );

        // Held until the fresh snapshot arrives; no second resubscribe.
        let (events, outbound) = run(&mut adapter, &reg, r#"[121,104,[["o",1,"6500","1"]]]"#);
        assert!(events.is_empty());
        assert!(outbound.is_empty());
    }

    #[test]
    fn test_trades_from_pair_channel() {
        let mut adapter = PoloniexAdapter::new().with_pair_ids([(121, "USDT_BTC")]);
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Trades, btc());
        let (events, _) = run(
            &mut adapter,
            &reg,
            r#"[121,105,[["o",1,"6500","1"],["t","42706057",1,"6500.1","0.05",1706000000]]]"#,
        );
        match &events[..] {
            [ClientEvent::Trade(trade, _)] => {
                assert_eq!(trade.trade_id.as_deref(), Some("42706057"));
                assert_eq!(trade.unix, 1_706_000_000_000);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_ticker_uses_seeded_ids() {
        let mut adapter = PoloniexAdapter::new().with_pair_ids([(121, "USDT_BTC")]);
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Ticker, btc());
        let (events, _) = run(
            &mut adapter,
            &reg,
            r#"[1002,null,[121,"6600","6600.5","6599.5","0.10","1000000","150.5",0,"6700","6000"]]"#,
        );
        assert!(matches!(&events[..], [ClientEvent::Ticker(t, _)] if t.last.as_deref() == Some("6600")));

        let (events, _) = run(
            &mut adapter,
            &reg,
            r#"[1002,null,[999,"1","1","1","0","1","1",0,"1","1"]]"#,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_heartbeat_and_acks_ignored() {
        let mut adapter = PoloniexAdapter::new();
        let reg = SubscriptionRegistry::new();
        assert!(run(&mut adapter, &reg, "[1010]").0.is_empty());
        assert!(run(&mut adapter, &reg, "[1002,1]").0.is_empty());
    }
}
