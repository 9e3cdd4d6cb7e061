//! Common command-line arguments for all bridge services
//!
//! Provides a unified argument structure that can be flattened into
//! service-specific argument parsers.

use clap::Parser;
use std::path::PathBuf;

/// Common service startup arguments
#[derive(Debug, Clone, Parser)]
#[clap(author, version, about)]
pub struct ServiceArgs {
    /// Configuration file (YAML, TOML or JSON)
    #[clap(short = 'c', long, env = "BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[clap(short = 'l', long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Log directory override
    #[clap(long, env = "BRIDGE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Disable colored output (useful for log files)
    #[clap(long)]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[clap(long)]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            config: None,
            log_level: "info".to_string(),
            log_dir: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.log_level == "debug" || self.log_level == "trace"
    }
}
