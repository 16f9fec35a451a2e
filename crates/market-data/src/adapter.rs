//! The exchange adapter contract.
//!
//! An adapter owns everything exchange-specific: endpoint, subscribe and
//! unsubscribe frame encoding, inbound frame decoding and any per-market
//! book state. It never touches the socket. The generic
//! [`MarketClient`](crate::client::MarketClient) driver owns the connection
//! and the [`SubscriptionRegistry`], and calls into the adapter one frame or
//! command at a time.

use std::time::Duration;

use cxfeed_core::types::{Capabilities, ChannelKind, Exchange, Market};

use crate::client::ClientEvent;
use crate::registry::SubscriptionRegistry;
use crate::ws::Frame;

/// Per-frame context handed to [`ExchangeAdapter::on_frame`].
///
/// Events and outbound frames are collected and flushed by the driver once
/// the adapter returns.
pub struct Session<'a> {
    registry: &'a SubscriptionRegistry,
    events: Vec<ClientEvent>,
    outbound: Vec<Frame>,
    reconnect: bool,
}

/// Everything an adapter produced for one inbound frame.
#[derive(Debug, Default)]
pub struct SessionOutput {
    pub events: Vec<ClientEvent>,
    pub outbound: Vec<Frame>,
    /// The exchange asked us to reconnect.
    pub reconnect: bool,
}

impl<'a> Session<'a> {
    pub fn new(registry: &'a SubscriptionRegistry) -> Self {
        Self {
            registry,
            events: Vec::new(),
            outbound: Vec::new(),
            reconnect: false,
        }
    }

    /// Active subscriptions at the time the frame arrived.
    pub fn registry(&self) -> &SubscriptionRegistry {
        self.registry
    }

    /// Publish a normalized event.
    pub fn emit(&mut self, event: ClientEvent) {
        self.events.push(event);
    }

    /// Queue a frame to send on the current connection.
    pub fn send(&mut self, frame: Frame) {
        self.outbound.push(frame);
    }

    /// Ask the driver to drop the connection and reconnect once this frame
    /// has been handled. Frames queued with [`send`](Self::send) are
    /// discarded.
    pub fn request_reconnect(&mut self) {
        self.reconnect = true;
    }

    pub fn finish(self) -> SessionOutput {
        SessionOutput {
            events: self.events,
            outbound: self.outbound,
            reconnect: self.reconnect,
        }
    }
}

/// Exchange-specific protocol logic plugged into the generic client.
///
/// Registry arguments always reflect the state *after* the change being
/// encoded: on subscribe the new entry is present, on unsubscribe it has been
/// removed. Adapters whose wire channels are shared between several channel
/// kinds, or whose subscribe call replaces the whole subscription set, derive
/// what to send from that view.
pub trait ExchangeAdapter: Send + 'static {
    const EXCHANGE: Exchange;

    /// Static support matrix.
    const CAPABILITIES: Capabilities;

    /// Exchange display name attached to every payload.
    const NAME: &'static str = Self::EXCHANGE.name();

    /// WebSocket endpoint.
    fn url(&self) -> &str;

    /// A new connection is open. Per-connection state (books, id tables
    /// learnt from the wire) must be reset here.
    fn on_connect(&mut self) {}

    /// Frames that activate `kind` for `market`.
    fn subscribe_frames(
        &mut self,
        kind: ChannelKind,
        market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame>;

    /// Frames that deactivate `kind` for `market`.
    fn unsubscribe_frames(
        &mut self,
        kind: ChannelKind,
        market: &Market,
        registry: &SubscriptionRegistry,
    ) -> Vec<Frame>;

    /// Frames that restore every active subscription on a fresh connection.
    ///
    /// The default rebuilds the registry entry by entry in replay order and
    /// asks [`subscribe_frames`](Self::subscribe_frames) for each, so shared
    /// wire channels are subscribed once.
    fn replay_frames(&mut self, registry: &SubscriptionRegistry) -> Vec<Frame> {
        let mut rebuilt = SubscriptionRegistry::new();
        let mut frames = Vec::new();
        for (kind, market) in registry.iter_replay() {
            rebuilt.insert(kind, market.clone());
            frames.extend(self.subscribe_frames(kind, market, &rebuilt));
        }
        frames
    }

    /// Decode one inbound frame, emitting normalized events through
    /// `session`. Errors are logged by the driver and the frame is dropped.
    fn on_frame(&mut self, frame: &Frame, session: &mut Session<'_>) -> anyhow::Result<()>;

    /// `kind` was deactivated for `market`; drop any state kept for it.
    fn on_unsubscribed(&mut self, _kind: ChannelKind, _market: &Market) {}

    /// Application-level keepalive period, if the exchange needs one.
    fn ping_interval(&self) -> Option<Duration> {
        None
    }

    fn ping_frame(&mut self) -> Option<Frame> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One wire topic per (kind, market), echoing the registry it saw.
    struct Echo;

    impl ExchangeAdapter for Echo {
        const EXCHANGE: Exchange = Exchange::Gemini;
        const CAPABILITIES: Capabilities = Capabilities {
            has_tickers: true,
            has_trades: true,
            has_level2_snapshots: false,
            has_level2_updates: true,
            has_level3_snapshots: false,
            has_level3_updates: false,
        };

        fn url(&self) -> &str {
            "wss://example.invalid"
        }

        fn subscribe_frames(
            &mut self,
            kind: ChannelKind,
            market: &Market,
            registry: &SubscriptionRegistry,
        ) -> Vec<Frame> {
            vec![Frame::text(format!(
                "{}:{}:{}",
                kind,
                market.id,
                registry.len()
            ))]
        }

        fn unsubscribe_frames(
            &mut self,
            _kind: ChannelKind,
            _market: &Market,
            _registry: &SubscriptionRegistry,
        ) -> Vec<Frame> {
            Vec::new()
        }

        fn on_frame(&mut self, _frame: &Frame, _session: &mut Session<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_name_follows_exchange() {
        assert_eq!(Echo::NAME, "Gemini");
    }

    #[test]
    fn test_default_replay_rebuilds_incrementally() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert(ChannelKind::Level2Updates, Market::new("btcusd", "BTC", "USD"));
        reg.insert(ChannelKind::Ticker, Market::new("ethusd", "ETH", "USD"));

        let frames = Echo.replay_frames(&reg);
        assert_eq!(
            frames,
            vec![
                Frame::text("ticker:ethusd:1"),
                Frame::text("l2update:btcusd:2"),
            ]
        );
    }

    #[test]
    fn test_session_collects_output() {
        let reg = SubscriptionRegistry::new();
        let mut session = Session::new(&reg);
        session.send(Frame::text("pong"));
        let out = session.finish();
        assert!(out.events.is_empty());
        assert_eq!(out.outbound, vec![Frame::text("pong")]);
        assert!(!out.reconnect);
    }
}
