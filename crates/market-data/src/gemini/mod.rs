//! Gemini market data.

pub mod client;
pub mod types;

pub use client::{GeminiAdapter, GeminiClient, GEMINI_WS_URL};
