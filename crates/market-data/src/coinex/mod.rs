//! Coinex market data.

pub mod client;
pub mod types;

pub use client::{CoinexAdapter, CoinexClient, COINEX_WS_URL};
