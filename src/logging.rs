//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level when set, so a single run can be
//! made noisier without touching `config.toml`.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a global fmt subscriber when logging is enabled.
///
/// Returns `false` if logging is disabled or a subscriber was already
/// installed (tests, or an embedding application with its own setup).
pub fn init_logging(config: &LoggingConfig) -> bool {
    if !config.enabled {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
