//! In-memory transport and helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::{broadcast, mpsc};

use cxfeed_market_data::ws::{Connection, Frame, ReconnectConfig, Transport};
use cxfeed_market_data::{ClientEvent, ClientOptions};

/// How long a test waits for something to happen before failing.
pub const WAIT: Duration = Duration::from_secs(2);

enum Inbound {
    Frame(Frame),
    Close,
}

#[derive(Default)]
struct State {
    connects: usize,
    /// Connections closed by the client.
    closes: usize,
    /// Remaining connect attempts that fail.
    failures: usize,
    /// Frames sent, tagged with the 1-based connection number.
    sent: Vec<(usize, Frame)>,
    urls: Vec<String>,
    current: Option<mpsc::UnboundedSender<Inbound>>,
}

/// Transport whose connections are driven by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_connects(&self, n: usize) {
        self.lock().failures = n;
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }

    /// Deliver a frame on the current connection.
    pub fn push(&self, frame: Frame) {
        let state = self.lock();
        let tx = state.current.as_ref().expect("no open connection");
        tx.send(Inbound::Frame(frame)).expect("connection dropped");
    }

    pub fn push_text(&self, text: &str) {
        self.push(Frame::text(text));
    }

    /// Close the current connection from the server side.
    pub fn disconnect(&self) {
        if let Some(tx) = self.lock().current.take() {
            let _ = tx.send(Inbound::Close);
        }
    }

    /// Every text frame sent, across all connections.
    pub fn sent(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter_map(|(_, f)| f.as_text().map(str::to_string))
            .collect()
    }

    /// Text frames sent on connection `n` (1-based).
    pub fn sent_on(&self, n: usize) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter(|(conn, _)| *conn == n)
            .filter_map(|(_, f)| f.as_text().map(str::to_string))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    pub async fn wait_for_connects(&self, n: usize) {
        wait_until(|| self.connects() >= n).await;
    }

    pub async fn wait_for_closes(&self, n: usize) {
        wait_until(|| self.closes() >= n).await;
    }

    pub async fn wait_for_sent(&self, n: usize) {
        wait_until(|| self.lock().sent.len() >= n).await;
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>> {
        let mut state = self.lock();
        state.urls.push(url.to_string());
        if state.failures > 0 {
            state.failures -= 1;
            bail!("connection refused");
        }
        state.connects += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.current = Some(tx);
        Ok(Box::new(MockConnection {
            id: state.connects,
            rx,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    id: usize,
    rx: mpsc::UnboundedReceiver<Inbound>,
    state: Arc<Mutex<State>>,
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.state.lock().unwrap().sent.push((self.id, frame));
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        match self.rx.recv().await? {
            Inbound::Frame(frame) => Some(Ok(frame)),
            Inbound::Close => None,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.rx.close();
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Client options with short backoff so reconnect tests stay fast.
pub fn fast_options() -> ClientOptions {
    ClientOptions {
        reconnect: ReconnectConfig {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            max_retries: 0,
            alert_after: 5,
        },
        ..ClientOptions::default()
    }
}

/// Poll `cond` until it holds, failing the test after [`WAIT`].
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within {WAIT:?}");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Next event of any kind.
pub async fn next_event(rx: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// Next trade, ticker or book event, skipping connection notifications.
pub async fn next_data_event(rx: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    loop {
        let event = next_event(rx).await;
        if !matches!(event, ClientEvent::Connection(_)) {
            return event;
        }
    }
}

/// Assert that no data event arrives within `window`.
pub async fn assert_no_data_event(rx: &mut broadcast::Receiver<ClientEvent>, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match rx.recv().await {
                Ok(ClientEvent::Connection(_)) => continue,
                other => return other,
            }
        }
    })
    .await;
    if let Ok(event) = result {
        panic!("unexpected event: {event:?}");
    }
}
