//! Huobi market data.

pub mod client;
pub mod types;

pub use client::{HuobiAdapter, HuobiClient, HUOBI_WS_URL};
