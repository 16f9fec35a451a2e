//! Core types for the cxfeed market data layer.
//!
//! Market identity, normalized payloads, channel kinds and capability
//! descriptors, plus the timestamp and decimal-string helpers the exchange
//! decoders share.

pub mod channel;
pub mod decimal;
pub mod market;
pub mod market_data;
pub mod timestamp;

// Re-export primary types for convenient access via `cxfeed_core::types::*`.
pub use channel::{Capabilities, ChannelKind};
pub use market::{Exchange, Market, Side};
pub use market_data::{
    Level2Point, Level2Snapshot, Level2Update, Level3Point, Level3Snapshot, Level3Update,
    Ticker, Trade,
};
