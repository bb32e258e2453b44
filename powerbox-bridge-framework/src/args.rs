//! CLI argument parsing shared by bridges.

use std::path::PathBuf;

use clap::Args;

/// Common CLI arguments, meant to be flattened into a bridge's own parser.
#[derive(Args, Debug, Clone, Default)]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5). Built-in defaults are used when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}
