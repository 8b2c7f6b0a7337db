//! Rung Core - Per-Symbol Grid Trading Engine
//!
//! Rung maintains a ladder of buy/sell pairs around an evolving price anchor,
//! coordinates atomic multi-leg expansions under a per-group completion cap,
//! and drives a multi-group progression triggered by TP/SL events reported by
//! the brokerage.
//!
//! ## Architecture
//! - **One engine per symbol**, every mutating operation serialized behind a
//!   single async mutex
//! - **Deterministic TP/SL classification** via touch flags latched on every
//!   tick, before drop detection runs
//! - **Price-anchored pair indexing** - a pair's ladder index is derived from
//!   price geometry, never from mutable runtime state
//! - **Durable per-symbol registry** - SQLite upserts after every mutating
//!   decision, invariants repaired on load
//!
//! ## Core Modules
//! - `core`: Domain types (Side, Leg, Phase, TicketInfo) and error taxonomy
//! - `config`: Runtime configuration (per-symbol settings table)
//! - `grid`: Grid geometry and the pair store
//! - `engine`: The symbol engine state machine, ticket registry, accounting
//! - `execution`: Broker adapter contract + simulated broker
//! - `persistence`: SQLite repository (symbol state, pairs, tickets, history)
//! - `grouplog`: Structured per-group log writer
//! - `orchestrator`: Per-symbol engine registry and tick fanout
//! - `monitoring`: Prometheus metrics and the /metrics HTTP exporter

pub mod config;
pub mod core;
pub mod engine;
pub mod execution;
pub mod grid;
pub mod grouplog;
pub mod monitoring;
pub mod orchestrator;
pub mod persistence;
pub mod testing;
pub mod utils;

// Re-export the domain types most callers need
pub use crate::core::{Leg, Phase, Side, TickQuote, TicketInfo};
pub use config::{Config, SymbolSettings};
pub use engine::SymbolEngine;
pub use execution::{BrokerAdapter, SimulatedBroker};
pub use orchestrator::Orchestrator;
pub use persistence::Repository;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{Config, SymbolSettings};
    pub use crate::core::{Leg, Phase, Side, TickQuote, TicketInfo};
    pub use crate::engine::SymbolEngine;
    pub use crate::execution::{BrokerAdapter, SimulatedBroker};
    pub use crate::grid::{pair_index_for_price, prices_for_index};
    pub use crate::monitoring::MetricsRegistry;
    pub use crate::orchestrator::Orchestrator;
    pub use crate::persistence::Repository;
}
