//! Upbit market data.

pub mod client;
pub mod types;

pub use client::{UpbitAdapter, UpbitClient, UPBIT_WS_URL};
