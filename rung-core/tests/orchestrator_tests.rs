//! Orchestrator fanout: config sync, per-symbol dispatch, aggregate status

use rung_core::core::TickQuote;
use rung_core::execution::{BrokerAdapter, SimulatedBroker};
use rung_core::monitoring::EngineMetrics;
use rung_core::orchestrator::Orchestrator;
use rung_core::testing::{test_config, TEST_SYMBOL};
use std::sync::Arc;
use std::time::Duration;

async fn wait_for_pairs(orchestrator: &Orchestrator, symbol: &str) -> usize {
    for _ in 0..100 {
        let status = orchestrator.status().await;
        if let Some(s) = status.strategies.get(symbol) {
            if s.pairs > 0 {
                return s.pairs;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    0
}

#[tokio::test]
async fn sync_spawns_enabled_symbols_and_dispatch_reaches_them() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let broker = Arc::new(SimulatedBroker::with_symbol(TEST_SYMBOL, 1000.0, 999.8));

    let orchestrator = Orchestrator::new(
        config,
        Arc::clone(&broker) as Arc<dyn BrokerAdapter>,
        EngineMetrics::detached(),
    );
    orchestrator.sync_symbols().await;
    assert_eq!(orchestrator.active_symbols(), vec![TEST_SYMBOL.to_string()]);

    orchestrator.start_all().await;
    let status = orchestrator.status().await;
    assert!(status.running);
    assert_eq!(status.active_count, 1);

    // One dispatched tick drives the engine through INIT
    orchestrator.dispatch_tick(TEST_SYMBOL, TickQuote::new(1000.0, 999.8, 0));
    let pairs = wait_for_pairs(&orchestrator, TEST_SYMBOL).await;
    assert_eq!(pairs, 2, "INIT opened the anchor pairs");
    assert_eq!(broker.position_count(TEST_SYMBOL), 2);

    // Unknown symbols are ignored, known ones keep flowing
    orchestrator.dispatch_tick("NOPE", TickQuote::new(1.0, 1.0, 0));
    let status = orchestrator.status().await;
    assert_eq!(status.strategies.len(), 1);

    orchestrator.shutdown_all().await;
    assert!(orchestrator.active_symbols().is_empty());
}
