//! Metrics and the HTTP exporter
//!
//! Prometheus counters for everything the engine decides (orders, refusals,
//! TP/SL classifications, expansions, group inits) plus a small hyper server
//! exposing `/metrics` and `/healthz`.

pub mod metrics;
pub mod server;

pub use metrics::{EngineMetrics, MetricsRegistry};
pub use server::{serve_metrics, MetricsServerConfig};
