//! Logging and tracing initialization.
//!
//! Pretty console output for operators, JSON for log shippers. Workflow
//! events reach the log through `TracingSink`, so one filter controls both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

/// Configuration for the logging system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            json: config.json_logs,
            verbose: config.verbose,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once, after config is loaded. `RUST_LOG` overrides the level.
///
/// ```ignore
/// mediad::logging::init(LogConfig { verbose: true, ..Default::default() })?;
/// ```
pub fn init(config: LogConfig) -> anyhow::Result<()> {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("mediad={}", default_level.as_str().to_lowercase()))
    });

    if config.json {
        // Span close events carry per-workflow timing
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()?;
    }

    Ok(())
}

/// Rate limiter for a repeating log message.
///
/// The drive watcher uses one so a persistently failing enumeration logs
/// once per interval instead of every poll, with a count of what was skipped.
pub struct LogThrottle {
    interval_ms: u64,
    /// Last log time in ms since `start`, or [`NEVER_LOGGED`].
    last_log_ms: AtomicU64,
    suppressed: AtomicU64,
    start: Instant,
}

const NEVER_LOGGED: u64 = u64::MAX;

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            suppressed: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// `Some(skipped)` if the caller should log now, where `skipped` is how
    /// many calls were suppressed since the previous log; `None` otherwise.
    pub fn check(&self) -> Option<u64> {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        let due = last == NEVER_LOGGED || now_ms.saturating_sub(last) >= self.interval_ms;
        // Losing the exchange means another thread just logged
        if due
            && self
                .last_log_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return Some(self.suppressed.swap(0, Ordering::Relaxed));
        }

        self.suppressed.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Allow the next log immediately.
    pub fn reset(&self) {
        self.last_log_ms.store(NEVER_LOGGED, Ordering::Relaxed);
        self.suppressed.store(0, Ordering::Relaxed);
    }
}
