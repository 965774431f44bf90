//! CLI argument parsing for the bridge.

use std::path::PathBuf;

use clap::Parser;

use crate::config::BridgeConfig;

/// Directory used for session log files when `--log` is given.
pub const DEFAULT_LOG_DIR: &str = "log";

/// Polls an RTD sensor array, streams readings and stores history batches.
#[derive(Parser, Debug, Clone)]
#[command(name = "rtdlink-bridge")]
#[command(version)]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "rtdlink.json5")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Also write logs to `log/<session>_log.txt`.
    #[arg(long)]
    pub log: bool,

    /// Persist batches even if `store.enabled` is false.
    #[arg(long)]
    pub db: bool,
}

impl BridgeArgs {
    /// Overlay command-line overrides onto a loaded configuration.
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.log && config.logging.directory.is_none() {
            config.logging.directory = Some(PathBuf::from(DEFAULT_LOG_DIR));
        }
        if self.db {
            config.store.enabled = true;
        }
    }
}
