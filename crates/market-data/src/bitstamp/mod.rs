//! Bitstamp market data.

pub mod client;
pub mod types;

pub use client::{BitstampAdapter, BitstampClient, BITSTAMP_WS_URL};
