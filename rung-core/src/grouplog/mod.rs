//! Structured per-group logging
//!
//! The engine reports every structural decision (INIT, expansions, TP/SL
//! classifications, hedges) as a typed event. A dedicated writer thread owns
//! the log file and a small in-memory model of each group, appending one
//! formatted line per event and a re-rendered group table whenever a group's
//! shape changes. The engine side is fire-and-forget: a bounded channel,
//! events dropped (and counted) rather than ever blocking a tick.

pub mod render;
pub mod writer;

use crate::core::Side;

/// Expansion flavors, matching the engine's two drive paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandKind {
    StepExpand,
    TpExpand,
}

impl ExpandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpandKind::StepExpand => "STEP_EXPAND",
            ExpandKind::TpExpand => "TP_EXPAND",
        }
    }
}

/// The seeded leg of an atomic expansion
#[derive(Debug, Clone, Copy)]
pub struct SeedLeg {
    pub pair_idx: i32,
    pub side: Side,
    pub entry: f64,
    pub tp: f64,
    pub sl: f64,
    pub ticket: u64,
}

/// One structured event from the engine
#[derive(Debug, Clone)]
pub enum GroupEvent {
    Init {
        group: u32,
        anchor: f64,
        bullish_source: bool,
        b_idx: i32,
        s_idx: i32,
        b_ticket: u64,
        s_ticket: u64,
        lots: f64,
    },
    Expansion {
        group: u32,
        kind: ExpandKind,
        pair_idx: i32,
        side: Side,
        entry: f64,
        tp: f64,
        sl: f64,
        lots: f64,
        ticket: u64,
        seed: Option<SeedLeg>,
        atomic: bool,
        c_count: u32,
    },
    TpHit {
        group: u32,
        pair_idx: i32,
        leg: Side,
        price: f64,
        was_incomplete: bool,
    },
    SlHit {
        group: u32,
        pair_idx: i32,
        leg: Side,
        price: f64,
    },
    /// Fallback nearest-distance classification was used; audit trail
    Inferred {
        group: u32,
        pair_idx: i32,
        leg: Side,
        classified_tp: bool,
        quote: f64,
        tp: f64,
        sl: f64,
    },
    NonAtomicComplete {
        group: u32,
        pair_idx: i32,
        leg: Side,
        entry: f64,
        reason: &'static str,
    },
    Hedge {
        group: u32,
        pair_idx: i32,
        side: Side,
        price: f64,
        lots: f64,
        tp: f64,
        sl: f64,
        ticket: u64,
    },
    ArtificialTp {
        group: u32,
        pair_idx: i32,
        price: f64,
    },
    /// Live completed-pair count changed
    CCount {
        group: u32,
        c: u32,
    },
    /// Toggle re-entry executed on a completed pair
    Reentry {
        group: u32,
        pair_idx: i32,
        side: Side,
        price: f64,
        lots: f64,
        ticket: u64,
        trade_count: u32,
    },
}

pub use writer::GroupLog;
