//! Shared CLI and bootstrap code for the rung binaries

use anyhow::{Context, Result};
use clap::Args;
use rung_core::config::Config;
use rung_core::monitoring::{serve_metrics, MetricsRegistry, MetricsServerConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Common CLI arguments, flattened into each binary's parser
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config/rung.json")]
    pub config: PathBuf,

    /// Override the config's log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Override the config to emit JSON log lines
    #[arg(long)]
    pub json_logs: bool,
}

/// Config-driven logging setup, with CLI flags taking precedence
pub fn init_logging(args: &CommonArgs, config: &Config) {
    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    if args.json_logs {
        logging.json = true;
    }
    rung_core::utils::init_logger(&logging);
}

pub fn load_config(args: &CommonArgs) -> Result<Config> {
    Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))
}

/// Ctrl-C flips the returned flag; the tick loop watches it
pub fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("installing ctrl-c handler")?;
    Ok(flag)
}

/// Spawn the /metrics exporter when the config enables it
pub fn spawn_metrics(config: &Config, metrics: MetricsRegistry) -> Result<()> {
    if !config.monitoring.enabled {
        return Ok(());
    }
    let server_config = MetricsServerConfig {
        listen_addr: config
            .monitoring
            .listen_addr
            .parse()
            .context("parsing monitoring.listen_addr")?,
    };
    tokio::spawn(async move {
        if let Err(e) = serve_metrics(server_config, metrics).await {
            tracing::error!("metrics server exited: {e}");
        }
    });
    Ok(())
}
