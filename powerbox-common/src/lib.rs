//! Powerbox Common Library
//!
//! Shared types and utilities for the powerbox Zenoh bridge:
//!
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Key expression helpers
//! - [`origin`] - Self-origin tagging carried in sample attachments
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod origin;
pub mod session;

// Re-export commonly used types at the crate root
pub use config::{AuthConfig, LogFormat, LoggingConfig, ZenohConfig, parse_config};
pub use error::{Error, Result};
pub use keyexpr::{DEFAULT_KEY_PREFIX, status_key, topic};
pub use origin::{Origin, SELF_PROPERTY, UserProperties};
pub use session::connect;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two
/// output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
