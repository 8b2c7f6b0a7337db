//! Strategy orchestrator: one engine per active symbol
//!
//! Owns the symbol -> engine registry, keeps it in sync with the config's
//! enabled set, and fans inbound ticks out to per-symbol consumer tasks. Each
//! engine gets a bounded channel of depth 1: while an engine is mid-tick, new
//! ticks for it are dropped, never queued, matching the engine's own busy
//! guard.

use crate::config::Config;
use crate::core::TickQuote;
use crate::engine::{EngineDeps, EngineStatus, SymbolEngine};
use crate::execution::BrokerAdapter;
use crate::grouplog::{writer::GroupLogWorker, GroupLog};
use crate::monitoring::EngineMetrics;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

struct EngineHandle {
    engine: Arc<SymbolEngine>,
    tx: mpsc::Sender<TickQuote>,
    consumer: tokio::task::JoinHandle<()>,
    _log_worker: Option<GroupLogWorker>,
}

/// Aggregate view over every active engine
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub active_count: usize,
    pub open_positions: u32,
    pub strategies: BTreeMap<String, EngineStatus>,
}

pub struct Orchestrator {
    config: Config,
    broker: Arc<dyn BrokerAdapter>,
    metrics: Arc<EngineMetrics>,
    engines: DashMap<String, EngineHandle>,
}

impl Orchestrator {
    pub fn new(config: Config, broker: Arc<dyn BrokerAdapter>, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            config,
            broker,
            metrics,
            engines: DashMap::new(),
        }
    }

    pub fn active_symbols(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.key().clone()).collect()
    }

    pub fn engine(&self, symbol: &str) -> Option<Arc<SymbolEngine>> {
        self.engines.get(symbol).map(|h| Arc::clone(&h.engine))
    }

    /// Sync the engine set with the config: spawn newly enabled symbols,
    /// remove disabled ones
    pub async fn sync_symbols(&self) {
        let enabled = self.config.enabled_symbols();

        let current: Vec<String> = self.active_symbols();
        for symbol in current {
            if !enabled.contains(&symbol) {
                info!(symbol, "removing disabled symbol");
                if let Some((_, handle)) = self.engines.remove(&symbol) {
                    handle.consumer.abort();
                    if let Err(e) = handle.engine.stop().await {
                        warn!(symbol = %handle.engine.symbol(), "stop failed: {e}");
                    }
                }
            }
        }

        for symbol in enabled {
            if self.engines.contains_key(&symbol) {
                continue;
            }
            let Some(settings) = self.config.symbols.get(&symbol).cloned() else {
                continue;
            };
            info!(symbol, "spawning engine");

            let (group_log, log_worker) = match GroupLog::open(&self.config.log_dir, &symbol) {
                Ok((log, worker)) => (log, Some(worker)),
                Err(e) => {
                    warn!(symbol, "group log unavailable, disabling: {e}");
                    (GroupLog::disabled(), None)
                }
            };
            let engine = Arc::new(SymbolEngine::new(
                &symbol,
                settings,
                EngineDeps {
                    broker: Arc::clone(&self.broker),
                    group_log,
                    metrics: Arc::clone(&self.metrics),
                    data_dir: self.config.data_dir.clone(),
                    fresh_session: self.config.fresh_session,
                },
            ));

            let (tx, mut rx) = mpsc::channel::<TickQuote>(1);
            let consumer_engine = Arc::clone(&engine);
            let consumer = tokio::spawn(async move {
                while let Some(quote) = rx.recv().await {
                    consumer_engine.on_tick(quote).await;
                }
            });

            self.engines.insert(
                symbol,
                EngineHandle {
                    engine,
                    tx,
                    consumer,
                    _log_worker: log_worker,
                },
            );
        }
    }

    /// Start every registered engine; fatal errors remove the engine
    pub async fn start_all(&self) {
        for symbol in self.active_symbols() {
            self.start_symbol(&symbol).await;
        }
    }

    pub async fn start_symbol(&self, symbol: &str) {
        let Some(engine) = self.engine(symbol) else {
            return;
        };
        if let Err(e) = engine.start().await {
            error!(symbol, "engine failed to start: {e}");
            if let Some((_, handle)) = self.engines.remove(symbol) {
                handle.consumer.abort();
            }
        }
    }

    pub async fn stop_all(&self) {
        for symbol in self.active_symbols() {
            if let Some(engine) = self.engine(&symbol) {
                if let Err(e) = engine.stop().await {
                    warn!(symbol, "stop failed: {e}");
                }
            }
        }
    }

    pub async fn terminate_symbol(&self, symbol: &str) {
        if let Some(engine) = self.engine(symbol) {
            if let Err(e) = engine.terminate().await {
                warn!(symbol, "terminate failed: {e}");
            }
        }
    }

    pub async fn shutdown_all(&self) {
        for symbol in self.active_symbols() {
            if let Some((_, handle)) = self.engines.remove(&symbol) {
                handle.consumer.abort();
                if let Err(e) = handle.engine.shutdown().await {
                    warn!(symbol, "shutdown failed: {e}");
                }
            }
        }
    }

    /// Route one tick to its symbol's engine. Full channel means the engine
    /// is still chewing the previous tick: the quote is dropped, not queued.
    pub fn dispatch_tick(&self, symbol: &str, quote: TickQuote) {
        if let Some(handle) = self.engines.get(symbol) {
            let _ = handle.tx.try_send(quote);
        }
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let mut strategies = BTreeMap::new();
        let mut open_positions = 0;
        let mut running = false;
        for symbol in self.active_symbols() {
            if let Some(engine) = self.engine(&symbol) {
                let status = engine.status().await;
                running |= status.running;
                open_positions += status.open_positions;
                strategies.insert(symbol, status);
            }
        }
        OrchestratorStatus {
            running,
            active_count: strategies.len(),
            open_positions,
            strategies,
        }
    }

    /// The broker tick loop: poll each active symbol's quote and dispatch
    /// until `shutdown` flips. Polling pace is the broker's effective tick
    /// granularity.
    pub async fn run_tick_loop(&self, shutdown: Arc<AtomicBool>, poll_interval: Duration) {
        info!(interval_ms = poll_interval.as_millis() as u64, "tick loop running");
        while !shutdown.load(Ordering::Relaxed) {
            for symbol in self.active_symbols() {
                if let Some(quote) = self.broker.tick(&symbol).await {
                    self.dispatch_tick(&symbol, quote);
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
        info!("tick loop stopped");
    }
}
