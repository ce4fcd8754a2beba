//! Tracing subscriber setup for binaries and tests that embed the runner.
//!
//! The library crates only emit events; installing a subscriber is the
//! caller's choice. `RUST_LOG` wins over the configured filter.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a global fmt subscriber. Returns `false` if one was already set.
pub fn init_tracing(logging: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let logging = LoggingConfig {
            filter: "not a valid [filter".into(),
        };
        let _ = init_tracing(&logging);
        assert!(!init_tracing(&LoggingConfig::default()));
    }
}
