//! Gemini adapter and client.
//!
//! The v1 feed opens one socket per symbol and streams book changes and
//! trades on it without any subscribe frames. [`GeminiAdapter`] handles a
//! single symbol; [`GeminiClient`] keeps one [`MarketClient`] per subscribed
//! market and merges them into one event stream.
//!
//! The book is tracked from the first message on a socket whether or not
//! level-2 updates are active, so updates joining a trades-only socket start
//! from the current book instead of reopening it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use cxfeed_core::config::FeedConfig;
use cxfeed_core::types::{Capabilities, ChannelKind, Exchange, Level2Snapshot, Level2Update, Market};

use crate::adapter::{ExchangeAdapter, Session};
use crate::client::{ClientError, ClientEvent, ClientOptions, MarketClient};
use crate::decode::{frame_text, parse_json};
use crate::registry::SubscriptionRegistry;
use crate::sync::{BookSynchronizer, SequencePolicy, SyncOutcome};
use crate::watcher::Watchable;
use crate::ws::{Frame, Transport, WsTransport};

use super::types::{GeminiMessage, MessageKind};

/// Base of the per-symbol endpoint.
pub const GEMINI_WS_URL: &str = "wss://api.gemini.com/v1/marketdata";

/// Protocol handling for one symbol's socket.
pub struct GeminiAdapter {
    url: String,
    symbol: String,
    sync: BookSynchronizer,
    /// Level-2 updates were activated on an already synced book; the next
    /// update publishes the whole book as a snapshot.
    announce: bool,
}

impl GeminiAdapter {
    pub fn new(symbol: &str) -> Self {
        Self::with_base_url(GEMINI_WS_URL, symbol)
    }

    pub fn with_base_url(base_url: &str, symbol: &str) -> Self {
        let symbol = symbol.to_lowercase();
        Self {
            url: format!("{}/{}?heartbeat=true", base_url.trim_end_matches('/'), symbol),
            symbol,
            sync: BookSynchronizer::new(SequencePolicy::Contiguous { step: 1 }),
            announce: false,
        }
    }

    pub fn from_config(cfg: &FeedConfig, symbol: &str) -> Self {
        Self::with_base_url(&cfg.gemini.ws_url, symbol)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn lookup<'r>(&self, registry: &'r SubscriptionRegistry, kind: ChannelKind) -> Option<&'r Market> {
        registry.find(kind, |m| m.id.eq_ignore_ascii_case(&self.symbol))
    }

    /// Publish the applied update, or the whole book if one is owed.
    fn publish_book(
        &mut self,
        update: Level2Update,
        event_id: Option<u64>,
        market: &Market,
        session: &mut Session<'_>,
    ) {
        if !self.announce {
            if !update.is_empty() {
                session.emit(ClientEvent::L2Update(update, market.clone()));
            }
            return;
        }
        // Heartbeats carry no event id to stamp the snapshot with.
        if event_id.is_none() {
            return;
        }
        let Some(book) = self.sync.book(&self.symbol) else {
            return;
        };
        let (bids, asks) = book.snapshot();
        let mut snapshot = Level2Snapshot::new(Exchange::Gemini, market);
        snapshot.sequence_id = event_id.filter(|id| *id > 0);
        snapshot.bids = bids;
        snapshot.asks = asks;
        self.announce = false;
        session.emit(ClientEvent::L2Snapshot(snapshot, market.clone()));
    }
}

impl ExchangeAdapter for GeminiAdapter {
    const EXCHANGE: Exchange = Exchange::Gemini;
    const CAPABILITIES: Capabilities = Capabilities {
        has_tickers: false,
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
        self.announce = false;
    }

    fn subscribe_frames(
        &mut self,
        kind: ChannelKind,
        _market: &Market,
        _registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        if kind == ChannelKind::Level2Updates && self.sync.is_synced(&self.symbol) {
            self.announce = true;
        }
        Vec::new()
    }

    fn unsubscribe_frames(
        &mut self,
        _kind: ChannelKind,
        _market: &Market,
        _registry: &SubscriptionRegistry,
    ) -> Vec<Frame> {
        Vec::new()
    }

    fn on_unsubscribed(&mut self, kind: ChannelKind, _market: &Market) {
        if kind == ChannelKind::Level2Updates {
            self.announce = false;
        }
    }

    fn on_frame(&mut self, frame: &Frame, session: &mut Session<'_>) -> Result<()> {
        let text = frame_text(frame)?;
        let msg: GeminiMessage = parse_json(&text)?;
        if msg.kind == MessageKind::Other {
            return Ok(());
        }
        let seq = msg.sequence()?;

        let book_market = self.lookup(session.registry(), ChannelKind::Level2Updates).cloned();
        let trade_market = self.lookup(session.registry(), ChannelKind::Trades).cloned();
        let Some(market) = book_market.clone().or_else(|| trade_market.clone()) else {
            // Last subscription is gone; the socket is closing.
            return Ok(());
        };

        if msg.is_initial() {
            let snapshot = msg.to_snapshot(&market)?;
            self.sync.on_snapshot(&self.symbol, &snapshot, Some(seq))?;
            self.announce = false;
            if book_market.is_some() {
                session.emit(ClientEvent::L2Snapshot(snapshot, market));
            }
        } else {
            let update = msg.to_update(&market)?;
            match self.sync.on_update(&self.symbol, &update, Some(seq))? {
                SyncOutcome::Applied => {
                    if let Some(book_market) = &book_market {
                        self.publish_book(update, msg.event_id, book_market, session);
                    }
                }
                SyncOutcome::Buffered | SyncOutcome::Stale => return Ok(()),
                SyncOutcome::Gap { expected, received } => {
                    tracing::info!(
                        exchange = "Gemini",
                        market = %self.symbol,
                        expected,
                        received,
                        "socket sequence gap, reconnecting for a fresh book"
                    );
                    session.request_reconnect();
                    return Ok(());
                }
            }
        }

        if let Some(trade_market) = trade_market {
            for trade in msg.trades(&trade_market)? {
                session.emit(ClientEvent::Trade(trade, trade_market.clone()));
            }
        }
        Ok(())
    }
}

struct Socket {
    client: MarketClient<GeminiAdapter>,
    kinds: HashSet<ChannelKind>,
}

struct Shared<T> {
    base_url: String,
    transport: T,
    options: ClientOptions,
    events: broadcast::Sender<ClientEvent>,
    closed: AtomicBool,
    /// Keyed by lowercase market id.
    sockets: Mutex<HashMap<String, Socket>>,
}

/// Handle to the Gemini client.
///
/// Offers the same subscription API as [`MarketClient`]. A market's socket
/// is opened by its first subscription and closed with its last.
/// Connection events from every socket share the one stream.
pub struct GeminiClient<T: Transport + Clone = WsTransport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport + Clone> Clone for GeminiClient<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport + Clone> GeminiClient<T> {
    pub fn new(transport: T, options: ClientOptions) -> Self {
        Self::with_base_url(GEMINI_WS_URL, transport, options)
    }

    pub fn with_base_url(base_url: impl Into<String>, transport: T, options: ClientOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                base_url: base_url.into(),
                transport,
                options,
                events,
                closed: AtomicBool::new(false),
                sockets: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn from_config(cfg: &FeedConfig, transport: T) -> Self {
        Self::with_base_url(cfg.gemini.ws_url.clone(), transport, ClientOptions::from(cfg))
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn exchange(&self) -> Exchange {
        GeminiAdapter::EXCHANGE
    }

    pub fn capabilities(&self) -> Capabilities {
        GeminiAdapter::CAPABILITIES
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of market sockets currently open.
    pub fn socket_count(&self) -> usize {
        self.shared.sockets.lock().len()
    }

    pub fn subscribe_ticker(&self, market: &Market) -> Result<(), ClientError> {
        self.subscribe(ChannelKind::Ticker, market)
    }

    pub fn unsubscribe_ticker(&self, market: &Market) -> Result<(), ClientError> {
        self.unsubscribe(ChannelKind::Ticker, market)
    }

    pub fn subscribe_trades(&self, market: &Market) -> Result<(), ClientError> {
        self.subscribe(ChannelKind::Trades, market)
    }

    pub fn unsubscribe_trades(&self, market: &Market) -> Result<(), ClientError> {
        self.unsubscribe(ChannelKind::Trades, market)
    }

    pub fn subscribe_level2_snapshots(&self, market: &Market) -> Result<(), ClientError> {
        self.subscribe(ChannelKind::Level2Snapshots, market)
    }

    pub fn unsubscribe_level2_snapshots(&self, market: &Market) -> Result<(), ClientError> {
        self.unsubscribe(ChannelKind::Level2Snapshots, market)
    }

    pub fn subscribe_level2_updates(&self, market: &Market) -> Result<(), ClientError> {
        self.subscribe(ChannelKind::Level2Updates, market)
    }

    pub fn unsubscribe_level2_updates(&self, market: &Market) -> Result<(), ClientError> {
        self.unsubscribe(ChannelKind::Level2Updates, market)
    }

    pub fn subscribe_level3_snapshots(&self, market: &Market) -> Result<(), ClientError> {
        self.subscribe(ChannelKind::Level3Snapshots, market)
    }

    pub fn unsubscribe_level3_snapshots(&self, market: &Market) -> Result<(), ClientError> {
        self.unsubscribe(ChannelKind::Level3Snapshots, market)
    }

    pub fn subscribe_level3_updates(&self, market: &Market) -> Result<(), ClientError> {
        self.subscribe(ChannelKind::Level3Updates, market)
    }

    pub fn unsubscribe_level3_updates(&self, market: &Market) -> Result<(), ClientError> {
        self.unsubscribe(ChannelKind::Level3Updates, market)
    }

    /// Subscribe `market` on `kind`, opening its socket if needed.
    pub fn subscribe(&self, kind: ChannelKind, market: &Market) -> Result<(), ClientError> {
        self.check_supported(kind)?;
        let shared = &*self.shared;
        let mut sockets = shared.sockets.lock();
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let key = market.id.to_lowercase();
        if sockets.get(&key).is_some_and(|s| s.client.is_closed()) {
            // Gave up reconnecting; start a new one.
            sockets.remove(&key);
        }
        let socket = sockets.entry(key).or_insert_with(|| {
            tracing::info!(exchange = "Gemini", market = %market.id, "opening market socket");
            Socket {
                client: MarketClient::spawn_with_events(
                    GeminiAdapter::with_base_url(&shared.base_url, &market.id),
                    shared.transport.clone(),
                    shared.options.clone(),
                    shared.events.clone(),
                ),
                kinds: HashSet::new(),
            }
        });
        socket.client.subscribe(kind, market)?;
        socket.kinds.insert(kind);
        Ok(())
    }

    /// Unsubscribe `market` from `kind`. The market's socket is closed
    /// once nothing remains on it.
    pub fn unsubscribe(&self, kind: ChannelKind, market: &Market) -> Result<(), ClientError> {
        self.check_supported(kind)?;
        let mut sockets = self.shared.sockets.lock();
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let key = market.id.to_lowercase();
        let Some(socket) = sockets.get_mut(&key) else {
            return Ok(());
        };
        if !socket.kinds.remove(&kind) {
            return Ok(());
        }
        if !socket.kinds.is_empty() {
            return socket.client.unsubscribe(kind, market);
        }
        if let Some(socket) = sockets.remove(&key) {
            tracing::info!(exchange = "Gemini", market = %market.id, "closing market socket");
            shut(&key, &socket.client);
        }
        Ok(())
    }

    /// Reconnect every market socket.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        for (key, socket) in self.shared.sockets.lock().iter() {
            if let Err(e) = socket.client.reconnect() {
                tracing::debug!(exchange = "Gemini", market = %key, error = %e, "socket reconnect skipped");
            }
        }
        Ok(())
    }

    /// Close every market socket. No events are published afterwards.
    pub fn close(&self) -> Result<(), ClientError> {
        let mut sockets = self.shared.sockets.lock();
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(ClientError::Closed);
        }
        for (key, socket) in sockets.drain() {
            shut(&key, &socket.client);
        }
        Ok(())
    }

    fn check_supported(&self, kind: ChannelKind) -> Result<(), ClientError> {
        if GeminiAdapter::CAPABILITIES.supports(kind) {
            Ok(())
        } else {
            Err(ClientError::Unsupported {
                exchange: Exchange::Gemini,
                channel: kind,
            })
        }
    }
}

fn shut(key: &str, client: &MarketClient<GeminiAdapter>) {
    if let Err(e) = client.close() {
        tracing::debug!(exchange = "Gemini", market = %key, error = %e, "socket already closed");
    }
}

impl<T: Transport + Clone> Watchable for GeminiClient<T> {
    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        GeminiClient::events(self)
    }

    fn reconnect(&self) {
        if let Err(e) = GeminiClient::reconnect(self) {
            tracing::debug!(exchange = "Gemini", error = %e, "watcher reconnect skipped");
        }
    }

    fn is_closed(&self) -> bool {
        GeminiClient::is_closed(self)
    }

    fn name(&self) -> &'static str {
        GeminiAdapter::NAME
    }
}
