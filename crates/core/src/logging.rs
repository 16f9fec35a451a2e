//! Logging and tracing initialization.
//!
//! Provides [`init_tracing`] to configure structured logging with two modes:
//! - **JSON mode** (`json = true`): machine-readable output with millisecond
//!   RFC 3339 timestamps, suitable for log aggregation.
//! - **Pretty mode** (`json = false`): human-readable colored output for
//!   local development.
//!
//! Both modes respect the `RUST_LOG` environment variable for filtering
//! (e.g., `RUST_LOG=cxfeed_market_data=debug,cxfeed_market_data::huobi=trace`).

use std::fmt;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Initialize the global tracing subscriber.
///
/// # Arguments
///
/// * `json` - When `true`, emit structured JSON logs with millisecond
///   timestamps. When `false`, emit pretty-printed logs with ANSI colors.
///
/// # Panics
///
/// Panics if the global subscriber has already been set. Use
/// [`try_init_tracing`] when that is possible.
///
/// # Examples
///
/// ```no_run
/// cxfeed_core::logging::init_tracing(false);
/// ```
pub fn init_tracing(json: bool) {
    if let Err(e) = try_init_tracing(json) {
        panic!("failed to install tracing subscriber: {e}");
    }
}

/// Initialize the global tracing subscriber, returning an error instead of
/// panicking if one is already installed.
pub fn try_init_tracing(json: bool) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(MillisecondTimer)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(json_layer).try_init()
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false);

        registry.with(pretty_layer).try_init()
    }
}

/// Timer that emits millisecond-precision UTC timestamps, matching the
/// precision of exchange event times.
#[derive(Debug, Clone)]
struct MillisecondTimer;

impl tracing_subscriber::fmt::time::FormatTime for MillisecondTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

/// Truncate a raw frame for inclusion in a log line.
///
/// Malformed frames are logged before being dropped; exchange payloads can be
/// hundreds of kilobytes, so only a bounded prefix is kept.
pub fn truncate_for_log(raw: &str, max_chars: usize) -> &str {
    match raw.char_indices().nth(max_chars) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::fmt::time::FormatTime;

    #[test]
    fn test_truncate_short_input_unchanged() {
        assert_eq!(truncate_for_log("hello", 256), "hello");
    }

    #[test]
    fn test_truncate_long_input() {
        let raw = "x".repeat(1000);
        assert_eq!(truncate_for_log(&raw, 256).len(), 256);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let raw = "원화마켓";
        assert_eq!(truncate_for_log(raw, 2), "원화");
    }

    #[test]
    fn test_millisecond_timer_format() {
        let mut out = String::new();
        let mut writer = tracing_subscriber::fmt::format::Writer::new(&mut out);
        MillisecondTimer.format_time(&mut writer).unwrap();
        // 2024-01-23T08:53:20.123Z
        assert_eq!(out.len(), 24);
        assert!(out.ends_with('Z'));
    }

    #[test]
    fn test_try_init_twice_is_an_error() {
        let _ = try_init_tracing(false);
        assert!(try_init_tracing(true).is_err());
    }
}
