//! The symbol engine
//!
//! One engine per symbol, owning its pair store, ticket registry, completion
//! accounting and repository handle. Every mutating operation runs behind the
//! engine's async mutex; a busy guard additionally drops re-entrant ticks
//! instead of queueing them.
//!
//! Per-tick order in `Running` is fixed and load-bearing:
//!
//! 1. touch-flag latching   (`tickets`)
//! 2. drop detection        (`drops`)
//! 3. saturation check      (`drops`, group 0 only)
//! 4. step-trigger expansion (`expansion`)
//! 5. hedge supervisor      (`hedge`)
//! 6. toggle triggers       (`toggle`)
//!
//! Touch flags latch *before* drop detection so a vanished position can be
//! classified without racing the broker's history.

pub mod accounting;
pub mod drops;
pub mod expansion;
pub mod hedge;
pub mod symbol;
pub mod tickets;
pub mod toggle;

pub use accounting::CompletionAccountant;
pub use symbol::{EngineDeps, EngineSnapshot, EngineStatus, GroupMeta, SymbolEngine};
pub use tickets::TicketRegistry;
