//! Generic exchange client.
//!
//! [`MarketClient`] is a cheap, cloneable handle. Every operation is
//! enqueued onto a single command queue consumed by one driver task, which
//! exclusively owns the subscription registry, the adapter (and with it all
//! order book state) and the live connection. Commands and inbound frames
//! are therefore processed strictly one at a time.
//!
//! Normalized events are fanned out to any number of consumers through a
//! `tokio::sync::broadcast` channel of [`ClientEvent`].

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use cxfeed_core::config::FeedConfig;
use cxfeed_core::types::{
    Capabilities, ChannelKind, Exchange, Level2Snapshot, Level2Update, Level3Snapshot,
    Level3Update, Market, Ticker, Trade,
};

use crate::adapter::{ExchangeAdapter, Session};
use crate::registry::SubscriptionRegistry;
use crate::ws::{
    calculate_backoff, Connection, ConnectionState, Frame, ReconnectConfig, Transport,
};

/// Default event broadcast capacity.
const DEFAULT_EVENT_CAPACITY: usize = 4_096;

/// Errors returned by [`MarketClient`] handle methods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The adapter does not offer this channel kind.
    #[error("{exchange} does not support {channel} subscriptions")]
    Unsupported {
        exchange: Exchange,
        channel: ChannelKind,
    },
    /// The client has been closed (or gave up reconnecting).
    #[error("client is closed")]
    Closed,
}

/// A normalized event published by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Ticker(Ticker, Market),
    Trade(Trade, Market),
    L2Snapshot(Level2Snapshot, Market),
    L2Update(Level2Update, Market),
    L3Snapshot(Level3Snapshot, Market),
    L3Update(Level3Update, Market),
    /// Connection lifecycle notification. Not market data.
    Connection(ConnectionState),
}

impl ClientEvent {
    /// Event name: `ticker`, `trade`, `l2snapshot`, `l2update`,
    /// `l3snapshot`, `l3update` or `connection`.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Ticker(..) => "ticker",
            ClientEvent::Trade(..) => "trade",
            ClientEvent::L2Snapshot(..) => "l2snapshot",
            ClientEvent::L2Update(..) => "l2update",
            ClientEvent::L3Snapshot(..) => "l3snapshot",
            ClientEvent::L3Update(..) => "l3update",
            ClientEvent::Connection(..) => "connection",
        }
    }

    /// Returns `true` for events that prove the feed is alive: trades and
    /// book events. Tickers and lifecycle notifications do not count.
    pub fn is_market_data(&self) -> bool {
        matches!(
            self,
            ClientEvent::Trade(..)
                | ClientEvent::L2Snapshot(..)
                | ClientEvent::L2Update(..)
                | ClientEvent::L3Snapshot(..)
                | ClientEvent::L3Update(..)
        )
    }

    /// The market the event belongs to, if any.
    pub fn market(&self) -> Option<&Market> {
        match self {
            ClientEvent::Ticker(_, m)
            | ClientEvent::Trade(_, m)
            | ClientEvent::L2Snapshot(_, m)
            | ClientEvent::L2Update(_, m)
            | ClientEvent::L3Snapshot(_, m)
            | ClientEvent::L3Update(_, m) => Some(m),
            ClientEvent::Connection(_) => None,
        }
    }
}

/// Client construction options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Backoff applied to failure-driven reconnects.
    pub reconnect: ReconnectConfig,
    /// Broadcast channel capacity.
    pub event_capacity: usize,
    /// Overrides the adapter keepalive interval.
    pub ping_interval: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            ping_interval: None,
        }
    }
}

impl From<&FeedConfig> for ClientOptions {
    fn from(cfg: &FeedConfig) -> Self {
        Self {
            reconnect: ReconnectConfig::from(&cfg.reconnect),
            event_capacity: cfg.client.event_capacity,
            ping_interval: (cfg.client.ping_interval_ms > 0)
                .then(|| Duration::from_millis(cfg.client.ping_interval_ms)),
        }
    }
}

#[derive(Debug)]
enum Command {
    Subscribe(ChannelKind, Market),
    Unsubscribe(ChannelKind, Market),
    Reconnect,
    Close,
}

/// Handle to a running exchange client.
pub struct MarketClient<A: ExchangeAdapter> {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ClientEvent>,
    closed: Arc<AtomicBool>,
    _adapter: PhantomData<fn() -> A>,
}

impl<A: ExchangeAdapter> Clone for MarketClient<A> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            events: self.events.clone(),
            closed: Arc::clone(&self.closed),
            _adapter: PhantomData,
        }
    }
}

impl<A: ExchangeAdapter> MarketClient<A> {
    /// Spawn the driver task on the current tokio runtime.
    ///
    /// No connection is opened until the first subscription.
    pub fn spawn<T: Transport>(adapter: A, transport: T, options: ClientOptions) -> Self {
        let (events_tx, _) = broadcast::channel(options.event_capacity.max(1));
        Self::spawn_with_events(adapter, transport, options, events_tx)
    }

    /// Like [`spawn`](Self::spawn), publishing into an existing event
    /// channel. `options.event_capacity` is ignored.
    pub fn spawn_with_events<T: Transport>(
        adapter: A,
        transport: T,
        options: ClientOptions,
        events_tx: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            adapter,
            transport,
            options,
            registry: SubscriptionRegistry::new(),
            commands: commands_rx,
            events: events_tx.clone(),
            closed: Arc::clone(&closed),
            conn: None,
            reconnect_at: None,
            attempt: 0,
            ping: None,
        };
        tokio::spawn(driver.run());

        Self {
            commands: commands_tx,
            events: events_tx,
            closed,
            _adapter: PhantomData,
        }
    }

    /// Subscribe to the event stream. Each receiver sees every event
    /// published after it was created.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn exchange(&self) -> Exchange {
        A::EXCHANGE
    }

    pub fn capabilities(&self) -> Capabilities {
        A::CAPABILITIES
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
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

    /// Subscribe `market` on `kind`. Repeated calls are no-ops on the wire.
    pub fn subscribe(&self, kind: ChannelKind, market: &Market) -> Result<(), ClientError> {
        self.check_supported(kind)?;
        self.send(Command::Subscribe(kind, market.clone()))
    }

    /// Unsubscribe `market` from `kind`. Unknown markets are ignored.
    pub fn unsubscribe(&self, kind: ChannelKind, market: &Market) -> Result<(), ClientError> {
        self.check_supported(kind)?;
        self.send(Command::Unsubscribe(kind, market.clone()))
    }

    /// Drop the current connection, open a new one and replay every active
    /// subscription. Events from the old connection are never published.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Reconnect)
    }

    /// Deactivate all subscriptions and close the connection. No events are
    /// published afterwards.
    pub fn close(&self) -> Result<(), ClientError> {
        let result = self.send(Command::Close);
        self.closed.store(true, Ordering::Release);
        result
    }

    fn check_supported(&self, kind: ChannelKind) -> Result<(), ClientError> {
        if A::CAPABILITIES.supports(kind) {
            Ok(())
        } else {
            Err(ClientError::Unsupported {
                exchange: A::EXCHANGE,
                channel: kind,
            })
        }
    }

    fn send(&self, cmd: Command) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.commands.send(cmd).map_err(|_| ClientError::Closed)
    }
}

/// What woke the driver up.
enum Step {
    Command(Option<Command>),
    Inbound(Option<anyhow::Result<Frame>>),
    Connect,
    Ping,
}

/// Whether the driver keeps running.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Driver<A: ExchangeAdapter, T: Transport> {
    adapter: A,
    transport: T,
    options: ClientOptions,
    registry: SubscriptionRegistry,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ClientEvent>,
    closed: Arc<AtomicBool>,
    conn: Option<Box<dyn Connection>>,
    /// Deadline of a pending failure-driven reconnect.
    reconnect_at: Option<Instant>,
    /// Consecutive failed attempts since the last successful connect.
    attempt: u32,
    ping: Option<Interval>,
}

impl<A: ExchangeAdapter, T: Transport> Driver<A, T> {
    async fn run(mut self) {
        tracing::debug!(exchange = A::NAME, "client driver started");

        loop {
            let step = tokio::select! {
                cmd = self.commands.recv() => Step::Command(cmd),
                frame = next_frame(&mut self.conn) => Step::Inbound(frame),
                _ = wait_until(self.reconnect_at) => Step::Connect,
                _ = next_tick(&mut self.ping) => Step::Ping,
            };

            let flow = match step {
                Step::Command(Some(cmd)) => self.handle_command(cmd).await,
                // Every handle was dropped.
                Step::Command(None) => {
                    self.shutdown("all client handles dropped").await;
                    Flow::Stop
                }
                Step::Inbound(Some(Ok(frame))) => self.handle_frame(frame).await,
                Step::Inbound(Some(Err(e))) => self.handle_failure(format!("{e:#}")),
                Step::Inbound(None) => self.handle_failure("stream closed".to_string()),
                Step::Connect => self.connect().await,
                Step::Ping => self.send_ping().await,
            };

            if flow == Flow::Stop {
                break;
            }
        }

        self.closed.store(true, Ordering::Release);
        tracing::debug!(exchange = A::NAME, "client driver stopped");
    }

    async fn handle_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Subscribe(kind, market) => {
                if !self.registry.insert(kind, market.clone()) {
                    tracing::trace!(exchange = A::NAME, channel = %kind, market = %market.id, "already subscribed");
                    return Flow::Continue;
                }
                tracing::info!(exchange = A::NAME, channel = %kind, market = %market.id, "subscribing");

                if self.conn.is_some() {
                    let frames = self.adapter.subscribe_frames(kind, &market, &self.registry);
                    self.send_frames(frames).await
                } else if self.reconnect_at.is_none() {
                    // Lazy connect; replay covers the new entry.
                    self.connect().await
                } else {
                    // Replayed when the pending reconnect fires.
                    Flow::Continue
                }
            }
            Command::Unsubscribe(kind, market) => {
                let Some(market) = self.registry.remove(kind, &market.id) else {
                    tracing::trace!(exchange = A::NAME, channel = %kind, market = %market.id, "not subscribed, ignoring unsubscribe");
                    return Flow::Continue;
                };
                tracing::info!(exchange = A::NAME, channel = %kind, market = %market.id, "unsubscribing");

                self.adapter.on_unsubscribed(kind, &market);
                if self.conn.is_some() {
                    let frames = self.adapter.unsubscribe_frames(kind, &market, &self.registry);
                    if self.send_frames(frames).await == Flow::Stop {
                        return Flow::Stop;
                    }
                }
                if self.registry.is_empty() {
                    // Idle until the next subscribe.
                    self.drop_connection("no active subscriptions").await;
                }
                Flow::Continue
            }
            Command::Reconnect => {
                if self.registry.is_empty() && self.conn.is_none() {
                    return Flow::Continue;
                }
                tracing::info!(exchange = A::NAME, "reconnect requested");
                self.drop_connection("reconnect requested").await;
                self.attempt = 0;
                self.connect().await
            }
            Command::Close => {
                self.shutdown("closed").await;
                Flow::Stop
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Flow {
        let mut session = Session::new(&self.registry);
        if let Err(e) = self.adapter.on_frame(&frame, &mut session) {
            tracing::warn!(
                exchange = A::NAME,
                error = %e,
                raw = %frame.preview(),
                "dropping malformed frame"
            );
        }
        let out = session.finish();
        for event in out.events {
            self.publish(event);
        }
        if out.reconnect {
            tracing::info!(exchange = A::NAME, "exchange requested reconnect");
            self.drop_connection("exchange requested reconnect").await;
            self.attempt = 0;
            return self.connect().await;
        }
        self.send_frames(out.outbound).await
    }

    /// Open a fresh connection and replay every active subscription.
    async fn connect(&mut self) -> Flow {
        self.conn = None;
        self.ping = None;
        self.reconnect_at = None;

        if self.registry.is_empty() {
            self.attempt = 0;
            return Flow::Continue;
        }

        let url = self.adapter.url().to_string();
        match self.transport.connect(&url).await {
            Ok(conn) => {
                tracing::info!(exchange = A::NAME, url = %url, "connected");
                self.conn = Some(conn);
                self.attempt = 0;
                self.adapter.on_connect();
                self.publish(ClientEvent::Connection(ConnectionState::Connected));

                let period = self.options.ping_interval.or_else(|| self.adapter.ping_interval());
                if let Some(period) = period {
                    let mut interval =
                        tokio::time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.ping = Some(interval);
                }

                let frames = self.adapter.replay_frames(&self.registry);
                self.send_frames(frames).await
            }
            Err(e) => {
                tracing::error!(exchange = A::NAME, url = %url, error = %e, "connection failed");
                self.handle_failure(format!("connection failed: {e:#}"))
            }
        }
    }

    async fn send_frames(&mut self, frames: Vec<Frame>) -> Flow {
        for frame in frames {
            let Some(conn) = self.conn.as_mut() else {
                return Flow::Continue;
            };
            tracing::trace!(exchange = A::NAME, frame = %frame.preview(), "sending frame");
            if let Err(e) = conn.send(frame).await {
                return self.handle_failure(format!("send failed: {e:#}"));
            }
        }
        Flow::Continue
    }

    async fn send_ping(&mut self) -> Flow {
        match self.adapter.ping_frame() {
            Some(frame) => self.send_frames(vec![frame]).await,
            None => Flow::Continue,
        }
    }

    /// The connection failed. Schedule a reconnect with backoff, or give up
    /// once the retry limit is exceeded.
    fn handle_failure(&mut self, reason: String) -> Flow {
        self.conn = None;
        self.ping = None;
        tracing::warn!(exchange = A::NAME, reason = %reason, "disconnected");
        self.publish(ClientEvent::Connection(ConnectionState::Disconnected { reason }));

        if self.registry.is_empty() {
            // Idle until the next subscribe.
            self.reconnect_at = None;
            self.attempt = 0;
            return Flow::Continue;
        }

        self.attempt = self.attempt.saturating_add(1);
        let config = &self.options.reconnect;

        if config.is_exhausted(self.attempt) {
            let reason = format!("exceeded max retries ({}) for {}", config.max_retries, A::NAME);
            tracing::error!(exchange = A::NAME, reason = %reason, "giving up reconnecting");
            self.closed.store(true, Ordering::Release);
            self.publish(ClientEvent::Connection(ConnectionState::Failed { reason }));
            return Flow::Stop;
        }

        if self.attempt >= config.alert_after {
            tracing::warn!(
                exchange = A::NAME,
                attempt = self.attempt,
                "reconnection attempts exceeded alert threshold"
            );
        }

        let backoff = calculate_backoff(&config.initial_backoff, &config.max_backoff, self.attempt - 1);
        tracing::info!(
            exchange = A::NAME,
            attempt = self.attempt,
            backoff_ms = backoff.as_millis() as u64,
            "reconnecting"
        );
        self.publish(ClientEvent::Connection(ConnectionState::Reconnecting {
            attempt: self.attempt,
        }));
        self.reconnect_at = Some(Instant::now() + backoff);
        Flow::Continue
    }

    /// Close the live connection without treating it as a failure.
    async fn drop_connection(&mut self, reason: &str) {
        self.reconnect_at = None;
        self.ping = None;
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(exchange = A::NAME, error = %e, "error closing connection");
            }
            self.publish(ClientEvent::Connection(ConnectionState::Disconnected {
                reason: reason.to_string(),
            }));
        }
    }

    async fn shutdown(&mut self, reason: &str) {
        tracing::info!(exchange = A::NAME, reason = reason, "closing client");
        self.closed.store(true, Ordering::Release);
        for (kind, market) in self.registry.iter_replay() {
            self.adapter.on_unsubscribed(kind, market);
        }
        self.registry.clear();
        self.drop_connection(reason).await;
    }

    fn publish(&self, event: ClientEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }
}

/// Next inbound frame, or never if there is no connection.
async fn next_frame(conn: &mut Option<Box<dyn Connection>>) -> Option<anyhow::Result<Frame>> {
    match conn {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxfeed_core::types::Side;

    fn market() -> Market {
        Market::new("btcusd", "BTC", "USD")
    }

    fn trade() -> Trade {
        Trade {
            exchange: Exchange::Bitstamp,
            base: "BTC".to_string(),
            quote: "USD".to_string(),
            trade_id: None,
            unix: 1_706_000_000_000,
            side: Side::Buy,
            price: "1".to_string(),
            amount: "1".to_string(),
        }
    }

    #[test]
    fn test_event_names() {
        let m = market();
        assert_eq!(ClientEvent::Trade(trade(), m.clone()).name(), "trade");
        assert_eq!(
            ClientEvent::L2Update(Level2Update::new(Exchange::Bitstamp, &m), m.clone()).name(),
            "l2update"
        );
        assert_eq!(
            ClientEvent::Connection(ConnectionState::Connected).name(),
            "connection"
        );
    }

    #[test]
    fn test_market_data_classification() {
        let m = market();
        assert!(ClientEvent::Trade(trade(), m.clone()).is_market_data());
        assert!(
            ClientEvent::L3Snapshot(Level3Snapshot::new(Exchange::Bitstamp, &m), m.clone())
                .is_market_data()
        );
        assert!(!ClientEvent::Ticker(Ticker::new(Exchange::Bitstamp, &m), m.clone()).is_market_data());
        assert!(!ClientEvent::Connection(ConnectionState::Connected).is_market_data());
    }

    #[test]
    fn test_event_market() {
        let m = market();
        assert_eq!(ClientEvent::Trade(trade(), m.clone()).market(), Some(&m));
        assert_eq!(ClientEvent::Connection(ConnectionState::Connected).market(), None);
    }

    #[test]
    fn test_options_from_config() {
        let mut cfg = FeedConfig::load(None).unwrap();
        cfg.client.event_capacity = 16;
        cfg.client.ping_interval_ms = 5_000;
        let opts = ClientOptions::from(&cfg);
        assert_eq!(opts.event_capacity, 16);
        assert_eq!(opts.ping_interval, Some(Duration::from_secs(5)));
        assert_eq!(opts.reconnect.initial_backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Unsupported {
            exchange: Exchange::Huobi,
            channel: ChannelKind::Level2Updates,
        };
        assert_eq!(err.to_string(), "Huobi does not support l2update subscriptions");
    }
}
