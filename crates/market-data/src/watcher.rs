//! Staleness watchdog.
//!
//! Some exchanges silently stop delivering data on an open socket. The
//! [`Watcher`] observes a client's event stream and forces a reconnect when
//! no market data (trades or book events) has arrived within a timeout.
//! Tickers do not count: a ticker-only trickle is not proof the book and
//! trade feeds are alive.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::adapter::ExchangeAdapter;
use crate::client::{ClientEvent, MarketClient};

/// Something the watcher can observe and restart.
pub trait Watchable: Send + Sync + 'static {
    /// A fresh receiver on the target's event stream.
    fn events(&self) -> broadcast::Receiver<ClientEvent>;

    /// Restart the target's connection.
    fn reconnect(&self);

    /// Returns `true` once the target will never produce events again.
    fn is_closed(&self) -> bool {
        false
    }

    /// Label used in log lines.
    fn name(&self) -> &'static str {
        "client"
    }
}

impl<A: ExchangeAdapter> Watchable for MarketClient<A> {
    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        MarketClient::events(self)
    }

    fn reconnect(&self) {
        if let Err(e) = MarketClient::reconnect(self) {
            tracing::debug!(exchange = A::NAME, error = %e, "watcher reconnect skipped");
        }
    }

    fn is_closed(&self) -> bool {
        MarketClient::is_closed(self)
    }

    fn name(&self) -> &'static str {
        A::NAME
    }
}

/// Liveness monitor for one client.
///
/// Idle until [`start`](Self::start); while watching, a background task
/// checks staleness every check interval.
pub struct Watcher<W: Watchable + Clone> {
    target: W,
    timeout: Duration,
    check_interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl<W: Watchable + Clone> Watcher<W> {
    /// Watch `target`, reconnecting after `timeout` without market data.
    ///
    /// Staleness is checked every `timeout / 4` (at least 1 ms).
    pub fn new(target: W, timeout: Duration) -> Self {
        let check_interval = (timeout / 4).max(Duration::from_millis(1));
        Self::with_check_interval(target, timeout, check_interval)
    }

    pub fn with_check_interval(target: W, timeout: Duration, check_interval: Duration) -> Self {
        Self {
            target,
            timeout,
            check_interval: check_interval.max(Duration::from_millis(1)),
            task: None,
        }
    }

    /// Build from the `watcher` configuration section.
    pub fn from_config(target: W, cfg: &cxfeed_core::config::WatcherConfig) -> Self {
        Self::with_check_interval(target, cfg.timeout(), cfg.check_interval())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Start watching. Restarts from scratch if already watching.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&mut self) {
        self.stop();

        let events = self.target.events();
        let target = self.target.clone();
        let timeout = self.timeout;
        let check_interval = self.check_interval;

        tracing::debug!(
            target_name = target.name(),
            timeout_ms = timeout.as_millis() as u64,
            "watcher started"
        );
        self.task = Some(tokio::spawn(watch(target, events, timeout, check_interval)));
    }

    /// Stop watching. A no-op when idle.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(target_name = self.target.name(), "watcher stopped");
        }
    }

    /// Returns `true` while the background task is running.
    pub fn is_watching(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<W: Watchable + Clone> Drop for Watcher<W> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn watch<W: Watchable>(
    target: W,
    mut events: broadcast::Receiver<ClientEvent>,
    timeout: Duration,
    check_interval: Duration,
) {
    let mut last_message = Instant::now();
    let mut ticker = tokio::time::interval_at(Instant::now() + check_interval, check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    if event.is_market_data() {
                        last_message = Instant::now();
                    }
                }
                // Events were produced faster than we read them: traffic.
                Err(RecvError::Lagged(_)) => last_message = Instant::now(),
                Err(RecvError::Closed) => {
                    tracing::debug!(target_name = target.name(), "event stream closed, watcher exiting");
                    return;
                }
            },
            _ = ticker.tick() => {
                if target.is_closed() {
                    tracing::debug!(target_name = target.name(), "target closed, watcher exiting");
                    return;
                }
                let elapsed = last_message.elapsed();
                if elapsed > timeout {
                    tracing::warn!(
                        target_name = target.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        timeout_ms = timeout.as_millis() as u64,
                        "no market data within timeout, reconnecting"
                    );
                    target.reconnect();
                    last_message = Instant::now();
                }
            }
        }
    }
}
