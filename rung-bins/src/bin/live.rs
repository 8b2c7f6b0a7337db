//! Live trading entry point
//!
//! Wires the orchestrator, metrics exporter and shutdown handling around a
//! broker adapter. The MT-style bridge adapter is deployment-specific and
//! lives out of tree; until one is linked in, this binary runs against the
//! in-process simulated venue so the full stack (engines, registry,
//! group logs, metrics) can be exercised end to end.

#[path = "../common.rs"]
mod common;

use anyhow::Result;
use clap::Parser;
use common::CommonArgs;
use rung_core::execution::{BrokerAdapter, SimulatedBroker};
use rung_core::monitoring::MetricsRegistry;
use rung_core::orchestrator::Orchestrator;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Broker poll interval in milliseconds
    #[arg(long, default_value = "20")]
    poll_ms: u64,
}

fn build_broker() -> Arc<dyn BrokerAdapter> {
    // TODO(mt-bridge): swap in the MT bridge adapter once its crate is
    // linked; the contract is rung_core::execution::BrokerAdapter
    tracing::warn!("no broker bridge linked, using the simulated venue");
    Arc::new(SimulatedBroker::new())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = common::load_config(&args.common)?;
    common::init_logging(&args.common, &config);

    let metrics = MetricsRegistry::new()?;
    common::spawn_metrics(&config, metrics.clone())?;

    let broker = build_broker();
    for symbol in config.enabled_symbols() {
        if !broker.select_symbol(&symbol).await {
            anyhow::bail!("broker cannot select symbol {symbol}");
        }
    }

    let orchestrator = Arc::new(Orchestrator::new(config, broker, metrics.engine()));
    orchestrator.sync_symbols().await;
    orchestrator.start_all().await;

    let shutdown = common::shutdown_flag()?;
    orchestrator
        .run_tick_loop(shutdown, Duration::from_millis(args.poll_ms))
        .await;

    let status = orchestrator.status().await;
    tracing::info!(
        "stopping: {} engines, {} open positions",
        status.active_count,
        status.open_positions
    );
    orchestrator.stop_all().await;
    Ok(())
}
