//! Durable per-symbol state registry
//!
//! One SQLite database per symbol. Four tables: `symbol_state` (one row),
//! `grid_pairs` (one row per ladder slot), `ticket_map` (one row per open
//! position, including its latched touch flags) and the append-only
//! `trade_history`. Every write is a single-row upsert committed immediately;
//! there are no multi-row transactions - engine-level invariants are
//! restored by the repair passes on load.

pub mod repository;
pub mod schema;

pub use repository::{HistoryEvent, Repository, StateRow};
