//! # cxfeed-market-data
//!
//! Realtime WebSocket market data clients for Bitstamp, Coinex, Gemini,
//! Huobi, Poloniex and Upbit, all exposing the same subscription API and
//! emitting the normalized payloads from [`cxfeed_core::types`].
//!
//! Each exchange is an [`ExchangeAdapter`] plugged into the generic
//! [`MarketClient`] driver, which owns the connection, the subscription
//! registry and reconnection. A [`Watcher`] can be attached to any client
//! to force a reconnect when market data stops flowing.
//!
//! ```no_run
//! use cxfeed_core::types::Market;
//! use cxfeed_market_data::bitstamp::BitstampClient;
//! use cxfeed_market_data::{BitstampAdapter, ClientEvent, ClientOptions, WsTransport};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = BitstampClient::spawn(BitstampAdapter::new(), WsTransport, ClientOptions::default());
//! let mut events = client.events();
//! client.subscribe_trades(&Market::new("btcusd", "BTC", "USD"))?;
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Trade(trade, _) = event {
//!         println!("{} {} @ {}", trade.side, trade.amount, trade.price);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod bitstamp;
pub mod client;
pub mod coinex;
pub mod decode;
pub mod gemini;
pub mod huobi;
pub mod orderbook;
pub mod poloniex;
pub mod registry;
pub mod sync;
pub mod upbit;
pub mod watcher;
pub mod ws;

pub use adapter::{ExchangeAdapter, Session};
pub use bitstamp::BitstampAdapter;
pub use client::{ClientError, ClientEvent, ClientOptions, MarketClient};
pub use coinex::CoinexAdapter;
pub use gemini::GeminiAdapter;
pub use huobi::HuobiAdapter;
pub use orderbook::{Level3Book, OrderBook, OrderBookError};
pub use poloniex::PoloniexAdapter;
pub use registry::SubscriptionRegistry;
pub use sync::{BookSynchronizer, SequencePolicy, SyncOutcome};
pub use upbit::UpbitAdapter;
pub use watcher::{Watchable, Watcher};
pub use ws::{ConnectionState, Frame, ReconnectConfig, Transport, WsTransport};
