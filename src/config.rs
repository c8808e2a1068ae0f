//! Configuration system for Tether.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `<user config dir>/tether/config.toml`
//! 3. `config.toml` in the working directory
//! 4. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `TETHER_API_BASE_URL` - Backend base URL
//! - `TETHER_APP_KEY` - Application key sent on entitlement checks
//! - `TETHER_API_TIMEOUT_SECS` - Per-request timeout
//! - `TETHER_CONNECT_URL` - Prefix of the URL encoded in pairing QR codes
//! - `TETHER_DISPLAY_NAME` - Name this device announces when pairing
//! - `TETHER_POLL_INTERVAL_MS` - Pairing status poll interval
//! - `TETHER_CHECKOUT_MAX_RETRIES` - Payment verification retry budget
//! - `TETHER_CHECKOUT_BASE_DELAY_MS` - First payment verification backoff
//! - `TETHER_LOGGING_ENABLED` - Enable the tracing subscriber
//! - `TETHER_LOG_LEVEL` - Log level (trace, debug, info, warn, error)

use config::{Config, ConfigBuilder, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::{TetherError, TetherResult};

/// Global configuration singleton.
static CONFIG: OnceLock<TetherConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Backend connection settings
    pub api: ApiConfig,
    /// Device pairing timings
    pub pairing: PairingConfig,
    /// Payment verification retry policy
    pub checkout: CheckoutConfig,
    /// Entitlement monitoring
    pub entitlement: EntitlementConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every endpoint path is appended to
    pub base_url: String,
    /// Application key for `GET /entitlement/verify`
    pub app_key: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            app_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Device pairing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// URL prefix the pairing code is appended to for the QR payload
    pub connect_url: String,
    /// Name announced to the backend when requesting a code
    pub display_name: String,
    /// Interval between connection-status polls
    pub poll_interval_ms: u64,
    /// Countdown granularity; one tick removes one second
    pub countdown_tick_ms: u64,
    /// Lifetime used when the server omits `expiresIn`
    pub default_expires_in_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            connect_url: "https://webview.tether.app/?code=".to_string(),
            display_name: "Desktop".to_string(),
            poll_interval_ms: 2000,
            countdown_tick_ms: 1000,
            default_expires_in_secs: 300,
        }
    }
}

impl PairingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }
}

/// Payment verification retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay_ms: u64,
    /// How long to wait for sign-in before the first attempt
    pub identity_wait_ms: u64,
    /// A finished session id asked for again within this window gets the
    /// finished result instead of a new verification
    pub callback_debounce_ms: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 2000,
            identity_wait_ms: 1000,
            callback_debounce_ms: 2000,
        }
    }
}

/// Entitlement monitoring settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntitlementConfig {
    /// Trials with this many days or fewer left raise a warning
    pub trial_warning_days: i64,
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            trial_warning_days: 7,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".to_string(),
        }
    }
}

fn config_err(e: config::ConfigError) -> TetherError {
    TetherError::ConfigError(e.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

/// Per-user config file, e.g. `~/.config/tether/config.toml` on Linux.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tether").join("config.toml"))
}

impl TetherConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` in the working directory (optional)
    /// 3. The per-user config file (optional)
    /// 4. Environment variables
    pub fn load() -> TetherResult<Self> {
        let mut builder = Self::defaults()?
            .add_source(File::with_name("config").required(false));

        if let Some(path) = user_config_path() {
            builder = builder.add_source(File::from(path).required(false));
        }

        Self::finish(Self::apply_env(builder)?)
    }

    /// Load configuration from an explicit file plus environment overrides.
    pub fn load_from(path: impl Into<PathBuf>) -> TetherResult<Self> {
        let builder = Self::defaults()?.add_source(File::from(path.into()).required(true));
        Self::finish(Self::apply_env(builder)?)
    }

    fn defaults() -> TetherResult<ConfigBuilder<config::builder::DefaultState>> {
        let d = TetherConfig::default();

        Config::builder()
            .set_default("api.base_url", d.api.base_url)
            .map_err(config_err)?
            .set_default("api.app_key", d.api.app_key)
            .map_err(config_err)?
            .set_default("api.timeout_secs", d.api.timeout_secs as i64)
            .map_err(config_err)?
            .set_default("pairing.connect_url", d.pairing.connect_url)
            .map_err(config_err)?
            .set_default("pairing.display_name", d.pairing.display_name)
            .map_err(config_err)?
            .set_default("pairing.poll_interval_ms", d.pairing.poll_interval_ms as i64)
            .map_err(config_err)?
            .set_default("pairing.countdown_tick_ms", d.pairing.countdown_tick_ms as i64)
            .map_err(config_err)?
            .set_default(
                "pairing.default_expires_in_secs",
                d.pairing.default_expires_in_secs as i64,
            )
            .map_err(config_err)?
            .set_default("checkout.max_retries", d.checkout.max_retries as i64)
            .map_err(config_err)?
            .set_default("checkout.base_delay_ms", d.checkout.base_delay_ms as i64)
            .map_err(config_err)?
            .set_default("checkout.identity_wait_ms", d.checkout.identity_wait_ms as i64)
            .map_err(config_err)?
            .set_default(
                "checkout.callback_debounce_ms",
                d.checkout.callback_debounce_ms as i64,
            )
            .map_err(config_err)?
            .set_default(
                "entitlement.trial_warning_days",
                d.entitlement.trial_warning_days,
            )
            .map_err(config_err)?
            .set_default("logging.enabled", d.logging.enabled)
            .map_err(config_err)?
            .set_default("logging.level", d.logging.level)
            .map_err(config_err)
    }

    fn apply_env(
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> TetherResult<ConfigBuilder<config::builder::DefaultState>> {
        builder
            .set_override_option("api.base_url", env::var("TETHER_API_BASE_URL").ok())
            .map_err(config_err)?
            .set_override_option("api.app_key", env::var("TETHER_APP_KEY").ok())
            .map_err(config_err)?
            .set_override_option(
                "api.timeout_secs",
                env_parsed::<i64>("TETHER_API_TIMEOUT_SECS"),
            )
            .map_err(config_err)?
            .set_override_option("pairing.connect_url", env::var("TETHER_CONNECT_URL").ok())
            .map_err(config_err)?
            .set_override_option(
                "pairing.display_name",
                env::var("TETHER_DISPLAY_NAME").ok(),
            )
            .map_err(config_err)?
            .set_override_option(
                "pairing.poll_interval_ms",
                env_parsed::<i64>("TETHER_POLL_INTERVAL_MS"),
            )
            .map_err(config_err)?
            .set_override_option(
                "checkout.max_retries",
                env_parsed::<i64>("TETHER_CHECKOUT_MAX_RETRIES"),
            )
            .map_err(config_err)?
            .set_override_option(
                "checkout.base_delay_ms",
                env_parsed::<i64>("TETHER_CHECKOUT_BASE_DELAY_MS"),
            )
            .map_err(config_err)?
            .set_override_option(
                "logging.enabled",
                env_parsed::<bool>("TETHER_LOGGING_ENABLED"),
            )
            .map_err(config_err)?
            .set_override_option("logging.level", env::var("TETHER_LOG_LEVEL").ok())
            .map_err(config_err)
    }

    fn finish(builder: ConfigBuilder<config::builder::DefaultState>) -> TetherResult<Self> {
        let settings = builder
            .build()
            .map_err(|e| TetherError::ConfigError(format!("failed to build config: {e}")))?;

        let config: TetherConfig = settings
            .try_deserialize()
            .map_err(|e| TetherError::ConfigError(format!("failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TetherResult<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(TetherError::ConfigError(
                "api.base_url cannot be empty".to_string(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(TetherError::ConfigError(
                "api.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.pairing.connect_url.trim().is_empty() {
            return Err(TetherError::ConfigError(
                "pairing.connect_url cannot be empty".to_string(),
            ));
        }
        if self.pairing.poll_interval_ms == 0 || self.pairing.countdown_tick_ms == 0 {
            return Err(TetherError::ConfigError(
                "pairing intervals must be greater than 0".to_string(),
            ));
        }
        if self.pairing.default_expires_in_secs == 0 {
            return Err(TetherError::ConfigError(
                "pairing.default_expires_in_secs must be greater than 0".to_string(),
            ));
        }

        // 2^retry must stay representable when computing the backoff.
        if self.checkout.max_retries > 16 {
            return Err(TetherError::ConfigError(format!(
                "checkout.max_retries must be at most 16, got {}",
                self.checkout.max_retries
            )));
        }
        if self.checkout.base_delay_ms == 0 {
            return Err(TetherError::ConfigError(
                "checkout.base_delay_ms must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(TetherError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
pub fn get_config() -> TetherResult<&'static TetherConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = TetherConfig::load()?;

    // Another thread may have won the race; either value is equivalent.
    Ok(CONFIG.get_or_init(|| config))
}
