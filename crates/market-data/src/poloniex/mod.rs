//! Poloniex market data.

pub mod client;
pub mod types;

pub use client::{PoloniexAdapter, PoloniexClient, POLONIEX_WS_URL};
