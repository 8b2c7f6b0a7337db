//! Core domain types for the grid engine
//!
//! Small copy types shared by every module: order sides, pair legs, engine
//! phases, tick quotes and the per-ticket records the TP/SL classifier runs
//! on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Single-letter tag used in order comments and log lines ("B" / "S")
    pub fn tag(&self) -> &'static str {
        match self {
            Side::Buy => "B",
            Side::Sell => "S",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Side {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "b" | "buy" => Side::Buy,
            _ => Side::Sell,
        }
    }
}

/// Which leg of a pair a position belongs to
///
/// Semantically identical to [`Side`], kept as its own type so ticket records
/// cannot accidentally mix an order direction with pair-leg membership.
pub type Leg = Side;

/// Market direction of a group event
///
/// A group's init source is the trend that created it (buy-leg TP = bullish);
/// its pending retracement is always the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Bearish,
}

impl Trend {
    pub fn opposite(&self) -> Self {
        match self {
            Trend::Bullish => Trend::Bearish,
            Trend::Bearish => Trend::Bullish,
        }
    }

    /// The trend implied by a leg hitting its TP
    pub fn from_leg(leg: Side) -> Self {
        match leg {
            Side::Buy => Trend::Bullish,
            Side::Sell => Trend::Bearish,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Bullish => "BULLISH",
            Trend::Bearish => "BEARISH",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine lifecycle phase
///
/// `Init -> WaitingCenter -> Expanding -> Running`. A crash-restart re-enters
/// whatever phase was persisted; the steady-state loop is `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Init,
    WaitingCenter,
    Expanding,
    Running,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::WaitingCenter => "WAITING_CENTER",
            Phase::Expanding => "EXPANDING",
            Phase::Running => "RUNNING",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "WAITING_CENTER" => Phase::WaitingCenter,
            "EXPANDING" => Phase::Expanding,
            "RUNNING" => Phase::Running,
            _ => Phase::Init,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound quote for a symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickQuote {
    pub ask: f64,
    pub bid: f64,
    /// Broker-reported count of open positions for the symbol at quote time
    pub positions_count: u32,
}

impl TickQuote {
    pub fn new(ask: f64, bid: f64, positions_count: u32) -> Self {
        Self {
            ask,
            bid,
            positions_count,
        }
    }

    pub fn mid(&self) -> f64 {
        (self.ask + self.bid) / 2.0
    }
}

/// Per-ticket record the TP/SL classifier runs on
///
/// Registered when a market order resolves to a position ticket, removed only
/// once the ticket is confirmed gone from the broker's open set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TicketInfo {
    pub pair_index: i32,
    pub leg: Leg,
    pub entry: f64,
    pub tp: f64,
    pub sl: f64,
}

/// Monotone touch flags for one ticket
///
/// Once a flag latches true it stays true until the ticket is removed from
/// the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchFlags {
    pub tp_touched: bool,
    pub sl_touched: bool,
}

/// Why a market order was sent; recorded in trade history and log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderReason {
    Init,
    InitComplete,
    Expand,
    TpExpand,
    Toggle,
    Hedge,
}

impl OrderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderReason::Init => "INIT",
            OrderReason::InitComplete => "INIT_COMPLETE",
            OrderReason::Expand => "EXPAND",
            OrderReason::TpExpand => "TP_EXPAND",
            OrderReason::Toggle => "TOGGLE",
            OrderReason::Hedge => "HEDGE",
        }
    }
}

impl fmt::Display for OrderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the market-order contract
///
/// A refusal is normal control flow, not an error: callers branch on the
/// variant (spec'd error taxonomy keeps broker failures in `Result::Err`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    /// Order filled; carries the resolved *position* ticket
    Filled(u64),
    /// Order refused before submission
    Refused(RefusalReason),
}

impl OrderOutcome {
    pub fn ticket(&self) -> Option<u64> {
        match self {
            OrderOutcome::Filled(t) => Some(*t),
            OrderOutcome::Refused(_) => None,
        }
    }
}

/// Why the market-order gate refused to submit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// Completing this pair would push the group past the completion cap
    CompletionCap,
    /// The pair's lot ladder is exhausted (trade_count >= max_positions)
    LotLadderExhausted,
    /// Broker rejected the order with a recoverable code
    BrokerRejected,
}

impl RefusalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefusalReason::CompletionCap => "completion_cap",
            RefusalReason::LotLadderExhausted => "lot_ladder_exhausted",
            RefusalReason::BrokerRejected => "broker_rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opposite_roundtrip() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite().opposite(), Side::Sell);
    }

    #[test]
    fn phase_parse_roundtrip() {
        for phase in [
            Phase::Init,
            Phase::WaitingCenter,
            Phase::Expanding,
            Phase::Running,
        ] {
            assert_eq!(Phase::parse(phase.as_str()), phase);
        }
        // Unknown strings fall back to Init
        assert_eq!(Phase::parse("bogus"), Phase::Init);
    }

    #[test]
    fn touch_flags_default_clear() {
        let flags = TouchFlags::default();
        assert!(!flags.tp_touched);
        assert!(!flags.sl_touched);
    }
}
