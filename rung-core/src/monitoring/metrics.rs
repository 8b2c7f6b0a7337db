//! Prometheus metrics for the grid engine

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::Arc;
use tracing::info;

/// Central registry wrapper
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    engine: Arc<EngineMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());
        let engine = Arc::new(EngineMetrics::new(&registry)?);
        info!("metrics registry initialized");
        Ok(Self { registry, engine })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn engine(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.engine)
    }
}

/// Per-engine activity, labeled by symbol
pub struct EngineMetrics {
    pub ticks_total: IntCounterVec,
    /// Ticks rejected by the busy guard while a prior tick was executing
    pub ticks_dropped: IntCounterVec,
    pub orders_opened: IntCounterVec,
    pub orders_refused: IntCounterVec,
    pub tp_hits: IntCounterVec,
    pub sl_hits: IntCounterVec,
    /// Drop classifications that needed the nearest-distance fallback
    pub inferred_classifications: IntCounterVec,
    pub expansions: IntCounterVec,
    pub group_inits: IntCounterVec,
    pub hedges: IntCounterVec,
    pub step_errors: IntCounterVec,
    pub active_pairs: IntGaugeVec,
    pub live_completed: IntGaugeVec,
}

impl EngineMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let make_counter = |name: &str, help: &str, labels: &[&str]| {
            let c = IntCounterVec::new(Opts::new(name, help), labels)?;
            registry.register(Box::new(c.clone()))?;
            Ok::<_, prometheus::Error>(c)
        };
        let make_gauge = |name: &str, help: &str, labels: &[&str]| {
            let g = IntGaugeVec::new(Opts::new(name, help), labels)?;
            registry.register(Box::new(g.clone()))?;
            Ok::<_, prometheus::Error>(g)
        };

        Ok(Self {
            ticks_total: make_counter("rung_ticks_total", "Ticks processed", &["symbol"])?,
            ticks_dropped: make_counter(
                "rung_ticks_dropped_total",
                "Ticks rejected by the busy guard",
                &["symbol"],
            )?,
            orders_opened: make_counter(
                "rung_orders_opened_total",
                "Market orders filled",
                &["symbol", "side"],
            )?,
            orders_refused: make_counter(
                "rung_orders_refused_total",
                "Orders refused before submission",
                &["symbol", "reason"],
            )?,
            tp_hits: make_counter("rung_tp_hits_total", "Take-profit classifications", &["symbol"])?,
            sl_hits: make_counter("rung_sl_hits_total", "Stop-loss classifications", &["symbol"])?,
            inferred_classifications: make_counter(
                "rung_inferred_classifications_total",
                "Drop classifications that used nearest-distance inference",
                &["symbol"],
            )?,
            expansions: make_counter(
                "rung_expansions_total",
                "Grid expansions",
                &["symbol", "mode"],
            )?,
            group_inits: make_counter("rung_group_inits_total", "Group initializations", &["symbol"])?,
            hedges: make_counter("rung_hedges_total", "Hedge orders placed", &["symbol"])?,
            step_errors: make_counter(
                "rung_step_errors_total",
                "Tick steps aborted by an error",
                &["symbol"],
            )?,
            active_pairs: make_gauge("rung_active_pairs", "Pairs in the store", &["symbol"])?,
            live_completed: make_gauge(
                "rung_live_completed_pairs",
                "Live completed pairs in the current group",
                &["symbol"],
            )?,
        })
    }

    /// Metrics attached to a throwaway registry; used by tests and
    /// terminated engines
    pub fn detached() -> Arc<Self> {
        let registry = Registry::new();
        Arc::new(Self::new(&registry).expect("detached metrics"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_and_gathers() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.engine().ticks_total.with_label_values(&["VIX75"]).inc();
        let families = metrics.registry().gather();
        assert!(families.iter().any(|f| f.get_name() == "rung_ticks_total"));
    }

    #[test]
    fn detached_metrics_do_not_collide() {
        let a = EngineMetrics::detached();
        let b = EngineMetrics::detached();
        a.ticks_total.with_label_values(&["X"]).inc();
        b.ticks_total.with_label_values(&["X"]).inc();
    }
}
