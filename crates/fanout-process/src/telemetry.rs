//! Tracing subscriber setup
//!
//! ```rust
//! use fanout_process::{telemetry, LoggingConfig};
//!
//! telemetry::init_tracing(&LoggingConfig::default().with_filter("fanout_scatter=debug"));
//! tracing::info!(instances = 2, "Scatter configured");
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Filter from `RUST_LOG`, else the configured directive, else `info`
#[must_use]
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber
///
/// Returns `false` when a subscriber was already installed; calling this
/// more than once is harmless.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = env_filter(config);
    let result = if config.json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true).with_target(true));
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(true));
        tracing::subscriber::set_global_default(subscriber)
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let config = LoggingConfig::default().with_filter("debug");
        let first = init_tracing(&config);
        let second = init_tracing(&config.with_json(true));
        assert!(!second);
        // another test in this binary may have installed it first
        let _ = first;
    }

    #[test]
    fn bad_directive_falls_back() {
        let filter = env_filter(&LoggingConfig::default().with_filter("=[bad"));
        let _ = filter.to_string();
    }
}
