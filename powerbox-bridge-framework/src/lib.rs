//! Powerbox Bridge Framework
//!
//! Lifecycle plumbing for bridges that relay between Zenoh and a device.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Publisher`] for publishing self-originated samples to Zenoh
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use powerbox_bridge_framework::{BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MyBridgeConfig::load("mybridge.json5")?;
//!     let mut runner = BridgeRunner::new("mybridge", config).await?;
//!
//!     let shutdown = runner.shutdown_signal();
//!     runner.spawn("worker", my_worker(runner.publisher(), shutdown));
//!
//!     // Run until Ctrl+C
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use publisher::Publisher;
pub use runner::{BridgeRunner, DEFAULT_SHUTDOWN_TIMEOUT};
pub use status::{BridgeStatus, StatusPublisher};

// Re-export commonly used types from powerbox-common
pub use powerbox_common::{LoggingConfig, Origin, UserProperties, ZenohConfig};
