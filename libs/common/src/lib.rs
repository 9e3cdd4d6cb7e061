//! PLC bridge basic library
//!
//! Provides functions shared by all bridge services:
//! - logging bootstrap
//! - shutdown signal handling
//! - common command-line arguments
//! - layered configuration loading

pub mod bootstrap_args;
pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use config_loader::load_layered;
pub use logging::{LogConfig, LOG_DIR_ENV};
pub use shutdown::{cancel_on_signal, ShutdownSignal};

// Re-export common dependencies
pub use clap;
pub use clap::Parser;
pub use serde;
pub use tokio;
