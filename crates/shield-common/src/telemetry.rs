//! Tracing setup for hosts embedding the overlay.
//!
//! # Usage
//!
//! ```ignore
//! use shield_common::telemetry::{self, TelemetryConfig};
//!
//! telemetry::init(TelemetryConfig::from_env("shield-demo"));
//! tracing::info!("overlay ready");
//! ```
//!
//! Counters from the detection client go through the `metrics` facade and
//! reach whichever recorder the host installs.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Console log level (default: INFO, DEBUG in debug builds)
    pub console_level: Level,
}

impl TelemetryConfig {
    /// Load config from environment variables.
    ///
    /// - `RUST_LOG`: Standard env filter (optional, overrides console_level)
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let console_level = if cfg!(debug_assertions) {
            Level::DEBUG
        } else {
            Level::INFO
        };

        Self {
            service_name: service_name.into(),
            console_level,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.console_level.as_str().to_lowercase()))
    }
}

/// Install a compact console subscriber.
///
/// Returns `false` when a global subscriber was already set, in which case
/// the existing one is kept.
pub fn init(config: TelemetryConfig) -> bool {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(config.env_filter());

    match tracing_subscriber::registry().with(console_layer).try_init() {
        Ok(()) => {
            tracing::debug!(service = %config.service_name, "telemetry initialized");
            true
        }
        Err(e) => {
            tracing::debug!(error = %e, "subscriber already installed, keeping it");
            false
        }
    }
}

// Re-export the metrics macros for convenience
pub use metrics::{counter, histogram};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_level() {
        let config = TelemetryConfig::from_env("shield-test");
        assert_eq!(config.service_name, "shield-test");
        if cfg!(debug_assertions) {
            assert_eq!(config.console_level, Level::DEBUG);
        } else {
            assert_eq!(config.console_level, Level::INFO);
        }
    }

    #[test]
    fn test_second_init_keeps_existing() {
        init(TelemetryConfig::from_env("shield-test"));
        assert!(!init(TelemetryConfig::from_env("shield-test")));
    }
}
