//! Subscriber initialization.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration, typically nested inside a server's top-level
/// config struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `RUST_LOG`-style filter directive, e.g. "info,mediactrl_cfw=debug".
    pub filter: String,
    /// Emit JSON instead of the compact human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Install a global `tracing` subscriber. Safe to call once per process;
/// a second call is a no-op (the error from `tracing_subscriber` is
/// swallowed since it only fires when a subscriber is already set, which
/// happens in tests that call this more than once).
pub fn setup_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter).with_target(true);

    let result = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(e) = result {
        tracing::trace!("tracing subscriber already installed: {}", e);
    }
}
