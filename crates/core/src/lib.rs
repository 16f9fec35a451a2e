//! # cxfeed-core
//!
//! Shared types and utilities for the cxfeed market data layer.
//!
//! This crate provides the building blocks used by the exchange clients:
//! normalized ticker/trade/book payloads, channel kinds and static capability
//! descriptors, millisecond timestamp and decimal-string helpers, layered
//! configuration, and tracing initialization.

pub mod config;
pub mod logging;
pub mod types;
