//! Domain types shared across the crate
//!
//! - `types`: sides, legs, phases, quotes, ticket records
//! - `errors`: the error taxonomy (broker / store / engine)

pub mod errors;
pub mod types;

pub use errors::{BrokerError, EngineError, StoreError};
pub use types::{
    Leg, OrderOutcome, OrderReason, Phase, RefusalReason, Side, TickQuote, TicketInfo, TouchFlags,
    Trend,
};
