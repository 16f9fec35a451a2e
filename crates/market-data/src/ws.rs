//! WebSocket transport collaborator and reconnection policy.
//!
//! The exchange client never talks to a socket directly. It opens a
//! [`Connection`] through a [`Transport`], which lets tests substitute an
//! in-memory transport. [`WsTransport`] is the production implementation on
//! top of `tokio-tungstenite`.
//!
//! Reconnection is owned by the client driver; this module provides the
//! [`ReconnectConfig`] parameters, the [`ConnectionState`] notifications and
//! the exponential backoff calculation.

use std::borrow::Cow;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use cxfeed_core::logging::truncate_for_log;

/// Maximum number of characters of a raw frame included in log lines.
pub const LOG_PREVIEW_CHARS: usize = 256;

/// A single WebSocket data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Convenience constructor for text frames.
    pub fn text(s: impl Into<String>) -> Self {
        Frame::Text(s.into())
    }

    /// Text content, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(s) => Some(s),
            Frame::Binary(_) => None,
        }
    }

    /// Bounded, lossy rendering of the frame for log lines.
    pub fn preview(&self) -> Cow<'_, str> {
        match self {
            Frame::Text(s) => Cow::Borrowed(truncate_for_log(s, LOG_PREVIEW_CHARS)),
            Frame::Binary(b) => {
                let lossy = String::from_utf8_lossy(b);
                Cow::Owned(truncate_for_log(&lossy, LOG_PREVIEW_CHARS).to_string())
            }
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(s) => Message::Text(s),
            Frame::Binary(b) => Message::Binary(b),
        }
    }
}

/// Opens connections to a WebSocket endpoint.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>>;
}

/// One open connection.
///
/// Dropping a connection must stop delivery of its frames; the client relies
/// on this to discard traffic from a superseded connection.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Send one frame.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Receive the next data frame. `None` means the connection is closed.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<()>;
}

/// [`Transport`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        tracing::debug!(url = %url, "WebSocket connected");
        Ok(Box::new(WsConnection { stream }))
    }
}

/// A live `tokio-tungstenite` stream.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.stream
            .send(Message::from(frame))
            .await
            .context("WebSocket send failed")
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data))),
                Ok(Message::Ping(_)) => {
                    // tungstenite queues the pong; it is flushed on the next read or write.
                    tracing::trace!("received WebSocket ping");
                }
                Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    tracing::info!(frame = ?frame, "received WebSocket close frame");
                    return None;
                }
                Err(e) => {
                    return Some(Err(anyhow::Error::new(e).context("WebSocket read error")));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .context("WebSocket close failed")
    }
}

/// Connection state events emitted by the exchange client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Successfully connected to the remote endpoint.
    Connected,
    /// Disconnected from the remote endpoint.
    Disconnected {
        /// Human-readable reason for disconnection.
        reason: String,
    },
    /// Waiting to reconnect after a failure.
    Reconnecting {
        /// Current reconnection attempt number (1-based).
        attempt: u32,
    },
    /// Reconnection has permanently failed. The client is closed.
    Failed {
        /// Human-readable reason for failure.
        reason: String,
    },
}

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Initial backoff duration before the first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration (backoff is capped at this value).
    pub max_backoff: Duration,
    /// Maximum number of consecutive reconnection attempts before emitting
    /// `Failed` (0 = unlimited).
    pub max_retries: u32,
    /// Emit a warning log after this many consecutive failures.
    pub alert_after: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            max_retries: 0, // unlimited
            alert_after: 5,
        }
    }
}

impl From<&cxfeed_core::config::ReconnectConfig> for ReconnectConfig {
    fn from(cfg: &cxfeed_core::config::ReconnectConfig) -> Self {
        Self {
            initial_backoff: cfg.initial_backoff(),
            max_backoff: cfg.max_backoff(),
            max_retries: cfg.max_retries,
            alert_after: cfg.alert_after,
        }
    }
}

impl ReconnectConfig {
    /// Returns `true` once `attempt` exceeds the retry limit.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_retries > 0 && attempt > self.max_retries
    }
}

/// Calculate exponential backoff with jitter.
///
/// `backoff = initial * 2^attempt`, capped at `max`. Jitter adds a random
/// amount in `[0, 0.5 * backoff]`.
pub(crate) fn calculate_backoff(initial: &Duration, max: &Duration, attempt: u32) -> Duration {
    let base = initial
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(*max);

    // Add jitter: random 0-50% of the base backoff.
    let jitter_frac = rand::random::<f64>() * 0.5;
    let jitter = Duration::from_secs_f64(base.as_secs_f64() * jitter_frac);

    base + jitter
}
