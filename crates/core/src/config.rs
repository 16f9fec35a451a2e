//! Layered configuration for cxfeed clients.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (production endpoints, reconnect and watcher
//!    parameters)
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `CXFEED_`, nested with `__`)
//!
//! Only public market data is consumed, so there are no credentials to load.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::Exchange;

// ── Default value functions ────────────────────────────────────────────

/// Default initial reconnect backoff: 100 ms.
fn default_initial_backoff_ms() -> u64 {
    100
}

/// Default maximum reconnect backoff: 30 000 ms.
fn default_max_backoff_ms() -> u64 {
    30_000
}

/// Default maximum reconnect retries: unlimited.
fn default_max_retries() -> u32 {
    0
}

/// Default consecutive-failure count before a warning is logged.
fn default_alert_after() -> u32 {
    5
}

/// Default staleness timeout: 90 000 ms.
fn default_watcher_timeout_ms() -> u64 {
    90_000
}

/// Default event broadcast capacity per client.
fn default_event_capacity() -> usize {
    4_096
}

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level configuration.
///
/// One endpoint section per exchange plus the shared reconnect, watcher and
/// client parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub bitstamp: ExchangeConfig,
    pub coinex: ExchangeConfig,
    pub gemini: ExchangeConfig,
    pub huobi: ExchangeConfig,
    pub poloniex: ExchangeConfig,
    pub upbit: ExchangeConfig,
    /// Reconnect parameters shared by all clients.
    pub reconnect: ReconnectConfig,
    /// Staleness watchdog parameters.
    pub watcher: WatcherConfig,
    /// Per-client event fan-out settings.
    pub client: ClientConfig,
}

/// Exchange connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// WebSocket endpoint URL.
    pub ws_url: String,
}

/// WebSocket reconnect parameters with exponential backoff.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Maximum consecutive reconnect attempts before giving up (0 = unlimited).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Log a warning after this many consecutive failures.
    #[serde(default = "default_alert_after")]
    pub alert_after: u32,
}

/// Staleness watchdog parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Reconnect when no market data arrived for this long.
    #[serde(default = "default_watcher_timeout_ms")]
    pub timeout_ms: u64,
    /// How often staleness is checked. `0` selects `timeout_ms / 4`.
    #[serde(default)]
    pub check_interval_ms: u64,
}

/// Per-client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Capacity of the event broadcast channel. Slow consumers that fall
    /// further behind than this observe a lag error and skip ahead.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Override for the adapter keepalive interval in milliseconds
    /// (`0` keeps the adapter default).
    #[serde(default)]
    pub ping_interval_ms: u64,
}

impl ReconnectConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retries: default_max_retries(),
            alert_after: default_alert_after(),
        }
    }
}

impl WatcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Effective check interval; a quarter of the timeout unless set.
    pub fn check_interval(&self) -> Duration {
        if self.check_interval_ms > 0 {
            Duration::from_millis(self.check_interval_ms)
        } else {
            (self.timeout() / 4).max(Duration::from_millis(1))
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_watcher_timeout_ms(),
            check_interval_ms: 0,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            ping_interval_ms: 0,
        }
    }
}

impl FeedConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in defaults (production endpoints).
    /// 2. TOML file at `config_path` (if `Some`).
    /// 3. Environment variable overrides with prefix `CXFEED_` and `__` as
    ///    the nesting separator (e.g., `CXFEED_WATCHER__TIMEOUT_MS=30000`).
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            // ── Layer 1: compiled-in defaults ───────────────────────
            .set_default("bitstamp.ws_url", "wss://ws.bitstamp.net")?
            .set_default("coinex.ws_url", "wss://socket.coinex.com/")?
            .set_default("gemini.ws_url", "wss://api.gemini.com/v1/marketdata")?
            .set_default("huobi.ws_url", "wss://api.huobi.pro/ws")?
            .set_default("poloniex.ws_url", "wss://api2.poloniex.com")?
            .set_default("upbit.ws_url", "wss://api.upbit.com/websocket/v1")?
            // Reconnect
            .set_default("reconnect.initial_backoff_ms", 100i64)?
            .set_default("reconnect.max_backoff_ms", 30_000i64)?
            .set_default("reconnect.max_retries", 0i64)?
            .set_default("reconnect.alert_after", 5i64)?
            // Watcher
            .set_default("watcher.timeout_ms", 90_000i64)?
            .set_default("watcher.check_interval_ms", 0i64)?
            // Client
            .set_default("client.event_capacity", 4_096i64)?
            .set_default("client.ping_interval_ms", 0i64)?;

        // ── Layer 2: TOML file ─────────────────────────────────────
        if let Some(path) = config_path {
            let path_str = path
                .to_str()
                .context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // ── Layer 3: env var overrides (CXFEED_ prefix) ───────────
        // The prefix separator is set explicitly to `_`; otherwise the
        // `config` crate reuses the nesting separator and would expect
        // `CXFEED__WATCHER__TIMEOUT_MS`.
        builder = builder.add_source(
            Environment::with_prefix("CXFEED")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: FeedConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Endpoint configuration for `exchange`.
    pub fn exchange(&self, exchange: Exchange) -> &ExchangeConfig {
        match exchange {
            Exchange::Bitstamp => &self.bitstamp,
            Exchange::Coinex => &self.coinex,
            Exchange::Gemini => &self.gemini,
            Exchange::Huobi => &self.huobi,
            Exchange::Poloniex => &self.poloniex,
            Exchange::Upbit => &self.upbit,
        }
    }

    /// Validate configuration invariants.
    fn validate(&self) -> Result<()> {
        for exchange in Exchange::ALL {
            let url = &self.exchange(exchange).ws_url;
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                bail!("{exchange} ws_url must be a ws:// or wss:// URL, got {url:?}");
            }
        }
        if self.watcher.timeout_ms == 0 {
            bail!("watcher.timeout_ms must be greater than zero");
        }
        if self.client.event_capacity == 0 {
            bail!("client.event_capacity must be greater than zero");
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            bail!(
                "reconnect.initial_backoff_ms ({}) exceeds reconnect.max_backoff_ms ({})",
                self.reconnect.initial_backoff_ms,
                self.reconnect.max_backoff_ms
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Global mutex to serialize tests that manipulate environment variables.
    /// Uses `unwrap_or_else` to recover from poisoned state so a panic in one
    /// test does not cascade to all others.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clear all env vars that could interfere with config loading.
    fn clear_env() {
        std::env::remove_var("CXFEED_WATCHER__TIMEOUT_MS");
        std::env::remove_var("CXFEED_HUOBI__WS_URL");
        std::env::remove_var("CXFEED_CLIENT__EVENT_CAPACITY");
    }

    /// Helper: create a temporary TOML config file and return its path.
    ///
    /// Uses `.toml` suffix so the `config` crate auto-detects the format.
    fn write_temp_toml(content: &str) -> (tempfile::NamedTempFile, PathBuf) {
        let mut f = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp file");
        write!(f, "{}", content).expect("write temp file");
        let path = f.path().to_path_buf();
        (f, path)
    }

    #[test]
    fn test_load_defaults_only() {
        let _lock = lock_env();
        clear_env();

        let cfg = FeedConfig::load(None).expect("load defaults");
        assert_eq!(cfg.bitstamp.ws_url, "wss://ws.bitstamp.net");
        assert_eq!(cfg.upbit.ws_url, "wss://api.upbit.com/websocket/v1");
        assert_eq!(cfg.reconnect.initial_backoff_ms, 100);
        assert_eq!(cfg.reconnect.max_backoff_ms, 30_000);
        assert_eq!(cfg.reconnect.max_retries, 0);
        assert_eq!(cfg.watcher.timeout_ms, 90_000);
        assert_eq!(cfg.client.event_capacity, 4_096);
    }

    #[test]
    fn test_load_from_toml() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[gemini]
ws_url = "wss://api.sandbox.gemini.com/v1/marketdata"

[reconnect]
initial_backoff_ms = 500
max_backoff_ms = 60000
max_retries = 20

[watcher]
timeout_ms = 30000
check_interval_ms = 1000

[client]
event_capacity = 128
"#;
        let (_f, path) = write_temp_toml(toml_content);
        let cfg = FeedConfig::load(Some(path)).expect("load from toml");

        assert_eq!(cfg.gemini.ws_url, "wss://api.sandbox.gemini.com/v1/marketdata");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.huobi.ws_url, "wss://api.huobi.pro/ws");
        assert_eq!(cfg.reconnect.max_retries, 20);
        assert_eq!(cfg.watcher.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.watcher.check_interval(), Duration::from_secs(1));
        assert_eq!(cfg.client.event_capacity, 128);
    }

    #[test]
    fn test_env_var_overrides() {
        let _lock = lock_env();
        clear_env();
        std::env::set_var("CXFEED_WATCHER__TIMEOUT_MS", "1234");
        std::env::set_var("CXFEED_HUOBI__WS_URL", "wss://api-aws.huobi.pro/ws");

        let cfg = FeedConfig::load(None).expect("load with env override");
        assert_eq!(cfg.watcher.timeout_ms, 1234);
        assert_eq!(cfg.huobi.ws_url, "wss://api-aws.huobi.pro/ws");

        clear_env();
    }

    #[test]
    fn test_default_check_interval_is_quarter_timeout() {
        let watcher = WatcherConfig {
            timeout_ms: 100,
            check_interval_ms: 0,
        };
        assert_eq!(watcher.check_interval(), Duration::from_millis(25));

        let tiny = WatcherConfig {
            timeout_ms: 2,
            check_interval_ms: 0,
        };
        assert_eq!(tiny.check_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_invalid_url_fails() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[bitstamp]
ws_url = "https://www.bitstamp.net"
"#;
        let (_f, path) = write_temp_toml(toml_content);
        let err = FeedConfig::load(Some(path)).unwrap_err();
        assert!(format!("{err}").contains("Bitstamp ws_url"));
    }

    #[test]
    fn test_zero_capacity_fails() {
        let _lock = lock_env();
        clear_env();
        std::env::set_var("CXFEED_CLIENT__EVENT_CAPACITY", "0");

        let result = FeedConfig::load(None);
        assert!(result.is_err());

        clear_env();
    }

    #[test]
    fn test_backoff_bounds_validated() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[reconnect]
initial_backoff_ms = 5000
max_backoff_ms = 100
"#;
        let (_f, path) = write_temp_toml(toml_content);
        let err = FeedConfig::load(Some(path)).unwrap_err();
        assert!(format!("{err}").contains("initial_backoff_ms"));
    }
}
