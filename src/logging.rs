use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, time::SystemTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Level {
        self.level.parse().unwrap_or(Level::INFO)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
/// Returns false if a subscriber was already installed.
pub fn init_logging(level: Level, json_output: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("resilient_dataset={},warn", level)));

    if json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).try_init().is_ok()
    } else {
        let fmt_layer = fmt::layer()
            .with_timer(SystemTime)
            .with_target(true)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).try_init().is_ok()
    }
}

pub fn init_from_config(config: &LoggingConfig) -> bool {
    init_logging(config.level(), config.json)
}

#[macro_export]
macro_rules! log_cache_event {
    ($event:expr, $cache:expr, $key:expr, $hit:expr) => {
        tracing::debug!(
            event = $event,
            cache = %$cache,
            key = ?$key,
            cache_hit = $hit,
            "Cache event"
        )
    };
}

#[macro_export]
macro_rules! log_layer_switch {
    ($from:expr, $to:expr, $reason:expr) => {
        tracing::warn!(
            from = %$from,
            to = %$to,
            reason = %$reason,
            "Redundancy layer switch"
        )
    };
}

#[macro_export]
macro_rules! log_recovery {
    ($category:expr, $strategy:expr, $success:expr, $duration:expr) => {
        tracing::info!(
            category = ?$category,
            strategy = ?$strategy,
            success = $success,
            duration_ms = $duration.as_millis() as u64,
            "Recovery attempt finished"
        )
    };
}
