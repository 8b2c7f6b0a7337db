//! Process-wide constants
//!
//! Values the original deployment fixed at the process level rather than per
//! symbol. Magic numbers make broker positions attributable to a group (grid
//! legs) or a pair (hedges) without consulting local state.

/// Base magic number for grid legs; `magic = MAGIC_BASE + group_id`
pub const MAGIC_BASE: i64 = 50_000;

/// Base magic number for hedge positions; `magic = HEDGE_MAGIC_BASE + pair_index`
pub const HEDGE_MAGIC_BASE: i64 = 90_000;

/// Pair-index offset per group; group g owns indices starting at `g * GROUP_OFFSET`
pub const GROUP_OFFSET: i32 = 100;

/// A group may hold at most this many completed pairs
pub const COMPLETION_CAP: u32 = 3;

/// Minimum broker stops distance applied even when the symbol reports less,
/// in points
pub const MIN_STOPS_LEVEL_POINTS: u32 = 10;

/// Capacity of the group-log writer channel; events beyond this are dropped
/// rather than blocking the engine
pub const GROUP_LOG_QUEUE: usize = 4096;
