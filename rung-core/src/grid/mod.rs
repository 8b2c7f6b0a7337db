//! Grid structure: price geometry and the pair store
//!
//! `geometry` is the single source of truth for ladder indexing - every pair
//! index in the crate is derived from `(anchor, spread, price, direction)`
//! through it, never from mutable runtime state. `pair` holds the per-slot
//! records and the indexed store the engine owns.

pub mod geometry;
pub mod pair;

pub use geometry::{pair_index_for_price, prices_for_index, PairPrices};
pub use pair::{GridPair, PairStore};
