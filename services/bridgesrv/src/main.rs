//! PLC Bridge Service
//!
//! Loads the configuration, starts the pipeline and runs until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use bridgesrv::core::config::{AppConfig, DEFAULT_CONFIG_PATH};
use bridgesrv::protocols::{create_link, create_publisher};
use bridgesrv::Pipeline;
use common::logging::{self, LogConfig};
use common::{Parser, ServiceArgs};
use errors::{BridgeErrorTrait, BridgeResult};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const SERVICE_NAME: &str = "bridgesrv";

#[tokio::main]
async fn main() {
    let args = ServiceArgs::parse();

    if let Err(e) = run(args).await {
        error!(
            code = e.error_code(),
            retryable = e.is_retryable(),
            "bridgesrv failed: {}",
            e
        );
        eprintln!("bridgesrv: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(args: ServiceArgs) -> BridgeResult<()> {
    let config_path = args
        .config
        .clone()
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|p| p.exists()));
    let config = AppConfig::load(config_path.as_deref())?;

    // --log-dir / BRIDGE_LOG_DIR, then the config file, then `logs`
    let config_log_dir = config.logging.dir.as_deref().map(|d| config.resolve(d));
    logging::init_log_root(args.log_dir.as_deref().or(config_log_dir.as_deref()));
    logging::init_with_config(LogConfig {
        service_name: SERVICE_NAME.to_string(),
        log_dir: logging::get_log_root(),
        console_level: args.parse_log_level(),
        ansi: !args.no_color,
        enable_json: config.logging.json,
    })?;

    info!(
        "Starting {} v{} ({} devices, {} groups)",
        config.service.name,
        env!("CARGO_PKG_VERSION"),
        config.devices.len(),
        config.groups.len()
    );

    let publisher = Arc::new(create_publisher(&config, &config.publisher)?);
    let pipeline = Pipeline::from_config(&config, publisher, create_link)?;

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let handle = pipeline.start(cancel.clone());

    let signal = common::cancel_on_signal(&cancel).await;
    handle.shutdown().await;

    info!("{} stopped ({})", SERVICE_NAME, signal);
    Ok(())
}
