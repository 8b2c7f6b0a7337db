//! Builders for engine + simulated-broker rigs
//!
//! Integration tests drive the engine exactly the way production does: push a
//! quote into the simulated broker (which applies server-side stops), then
//! hand the same quote to the engine as a tick.

use crate::config::{Config, SymbolSettings};
use crate::core::TickQuote;
use crate::engine::{EngineDeps, SymbolEngine};
use crate::execution::{BrokerAdapter, SimulatedBroker};
use crate::grouplog::GroupLog;
use crate::monitoring::EngineMetrics;
use std::path::Path;
use std::sync::Arc;

pub const TEST_SYMBOL: &str = "VIX75";

/// The literal spec constants every scenario test assumes
pub fn test_settings() -> SymbolSettings {
    SymbolSettings {
        enabled: true,
        spread: 20.0,
        lot_sizes: vec![0.01, 0.02, 0.03, 0.04, 0.05],
        max_positions: 5,
        buy_tp_pips: 20.0,
        buy_sl_pips: 20.0,
        sell_tp_pips: 20.0,
        sell_sl_pips: 20.0,
        tolerance: 5.0,
        hedge_enabled: true,
        hedge_lot_size: 0.01,
        deviation: 200,
    }
}

/// Stops far enough away that no position ever closes on its own; isolates
/// structural behavior (expansion, cap, toggling) from TP/SL events
pub fn wide_stop_settings() -> SymbolSettings {
    SymbolSettings {
        buy_tp_pips: 500.0,
        buy_sl_pips: 500.0,
        sell_tp_pips: 500.0,
        sell_sl_pips: 500.0,
        ..test_settings()
    }
}

pub fn test_config(data_dir: &Path) -> Config {
    let mut cfg = Config::sim_profile(TEST_SYMBOL);
    cfg.data_dir = data_dir.to_path_buf();
    cfg.log_dir = data_dir.join("logs");
    cfg.symbols.insert(TEST_SYMBOL.to_string(), test_settings());
    cfg
}

/// One engine wired to one simulated broker
pub struct TestRig {
    pub broker: Arc<SimulatedBroker>,
    pub engine: Arc<SymbolEngine>,
    settings: SymbolSettings,
}

impl TestRig {
    /// Rig with the default initial quote 1000.0 / 999.8
    pub fn new(data_dir: &Path) -> Self {
        Self::with_quote(data_dir, 1000.0, 999.8)
    }

    pub fn with_quote(data_dir: &Path, ask: f64, bid: f64) -> Self {
        Self::with_settings(data_dir, ask, bid, test_settings())
    }

    pub fn with_settings(data_dir: &Path, ask: f64, bid: f64, settings: SymbolSettings) -> Self {
        let broker = Arc::new(SimulatedBroker::with_symbol(TEST_SYMBOL, ask, bid));
        let engine = Arc::new(SymbolEngine::new(
            TEST_SYMBOL,
            settings.clone(),
            EngineDeps {
                broker: Arc::clone(&broker) as Arc<dyn BrokerAdapter>,
                group_log: GroupLog::disabled(),
                metrics: EngineMetrics::detached(),
                data_dir: data_dir.to_path_buf(),
                fresh_session: false,
            },
        ));
        Self {
            broker,
            engine,
            settings,
        }
    }

    /// A fresh engine against the same broker and registry, as after a
    /// process restart
    pub fn restart(&self, data_dir: &Path) -> Arc<SymbolEngine> {
        Arc::new(SymbolEngine::new(
            TEST_SYMBOL,
            self.settings.clone(),
            EngineDeps {
                broker: Arc::clone(&self.broker) as Arc<dyn BrokerAdapter>,
                group_log: GroupLog::disabled(),
                metrics: EngineMetrics::detached(),
                data_dir: data_dir.to_path_buf(),
                fresh_session: false,
            },
        ))
    }

    /// Advance the market and let the engine see the tick
    pub async fn tick(&self, ask: f64, bid: f64) {
        drive_tick(&self.broker, &self.engine, ask, bid).await;
    }
}

/// Advance the simulated market (applying server-side stops), then feed the
/// quote to the engine
pub async fn drive_tick(broker: &SimulatedBroker, engine: &SymbolEngine, ask: f64, bid: f64) {
    broker.set_quote(TEST_SYMBOL, ask, bid);
    let count = broker.position_count(TEST_SYMBOL) as u32;
    engine.inject_tick(ask, bid, count).await;
}
