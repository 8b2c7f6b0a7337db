//! Paper-trading session against the simulated venue
//!
//! Drives a random-walk market into the orchestrator at a fixed cadence and
//! prints the aggregate engine status on shutdown. Useful for watching the
//! group progression (INIT, expansions, cap, rollover) without a broker.

#[path = "../common.rs"]
mod common;

use anyhow::Result;
use clap::Parser;
use common::CommonArgs;
use rand::Rng;
use rung_core::execution::{BrokerAdapter, SimulatedBroker};
use rung_core::monitoring::MetricsRegistry;
use rung_core::orchestrator::Orchestrator;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Starting mid price for every simulated symbol
    #[arg(long, default_value = "1000.0")]
    start_price: f64,

    /// Quote spread of the simulated venue
    #[arg(long, default_value = "0.2")]
    quote_spread: f64,

    /// Random-walk step size per tick
    #[arg(long, default_value = "1.5")]
    walk_step: f64,

    /// Milliseconds between simulated ticks
    #[arg(long, default_value = "50")]
    tick_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = common::load_config(&args.common)?;
    common::init_logging(&args.common, &config);

    let metrics = MetricsRegistry::new()?;
    common::spawn_metrics(&config, metrics.clone())?;

    let broker = Arc::new(SimulatedBroker::new());
    let symbols = config.enabled_symbols();
    anyhow::ensure!(!symbols.is_empty(), "no enabled symbols in config");
    for symbol in &symbols {
        broker.select_symbol(symbol).await;
        broker.set_quote(
            symbol,
            args.start_price + args.quote_spread / 2.0,
            args.start_price - args.quote_spread / 2.0,
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        Arc::clone(&broker) as Arc<dyn BrokerAdapter>,
        metrics.engine(),
    ));
    orchestrator.sync_symbols().await;
    orchestrator.start_all().await;

    let shutdown = common::shutdown_flag()?;

    // Market task: one random-walk step per tick interval
    let market_broker = Arc::clone(&broker);
    let market_symbols = symbols.clone();
    let market_shutdown = Arc::clone(&shutdown);
    let start_price = args.start_price;
    let quote_spread = args.quote_spread;
    let walk_step = args.walk_step;
    let tick_ms = args.tick_ms;
    let market = tokio::spawn(async move {
        let mut mids: Vec<f64> = market_symbols.iter().map(|_| start_price).collect();
        while !market_shutdown.load(Ordering::Relaxed) {
            for (i, symbol) in market_symbols.iter().enumerate() {
                let step = rand::thread_rng().gen_range(-walk_step..walk_step);
                mids[i] += step;
                market_broker.set_quote(
                    symbol,
                    mids[i] + quote_spread / 2.0,
                    mids[i] - quote_spread / 2.0,
                );
            }
            tokio::time::sleep(Duration::from_millis(tick_ms)).await;
        }
    });

    orchestrator
        .run_tick_loop(Arc::clone(&shutdown), Duration::from_millis(args.tick_ms))
        .await;
    let _ = market.await;

    let status = orchestrator.status().await;
    tracing::info!("=== session summary ===");
    tracing::info!("active engines: {}", status.active_count);
    tracing::info!("open positions: {}", status.open_positions);
    for (symbol, s) in &status.strategies {
        tracing::info!(
            "{symbol}: phase={} group={} pairs={} price={:.2}",
            s.phase,
            s.current_group,
            s.pairs,
            s.current_price
        );
    }

    orchestrator.stop_all().await;
    Ok(())
}
