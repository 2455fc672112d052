//! Tracing subscriber setup.
//!
//! The renderer itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can call [`init_logging`] with the `[logging]` table
//! of [`RendererConfig`](crate::config::RendererConfig), or
//! [`init_minimal_logging`] before any configuration is available. Both honour
//! `RUST_LOG` when it is set.

use crate::config::LoggingConfig;
use crate::error::ConfigError;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a stderr subscriber at `info`, unless one is already installed.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));
    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Installs a stderr subscriber configured from `config`.
///
/// Returns `Ok(false)` when another subscriber was already installed, in
/// which case that one stays in effect.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let level = parse_level(&config.level)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let installed = match config.format.to_lowercase().as_str() {
        "json" => fmt::Subscriber::builder()
            .json()
            .with_ansi(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok(),
        "text" => fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok(),
        other => {
            return Err(ConfigError::Validation(format!(
                "unknown log format '{other}'"
            )))
        }
    };
    if installed {
        tracing::debug!(level = %level, format = %config.format, "logging initialised");
    }
    Ok(installed)
}

fn parse_level(level: &str) -> Result<Level, ConfigError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(ConfigError::Validation(format!(
            "unknown log level '{other}'"
        ))),
    }
}
