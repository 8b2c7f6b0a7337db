//! Pair records and the per-symbol pair store
//!
//! Each ladder slot holds a buy leg and a sell leg plus its own "brain":
//! the toggle state, the trade count that indexes the lot ladder, locked
//! entry prices for re-triggering, and the sticky retirement flag. Pairs are
//! created on INIT or expansion and never destroyed by the engine - a TP or
//! SL classification retires them via `tp_blocked` instead.

use crate::core::Side;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One ladder slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPair {
    /// Signed ladder position; 0 is the anchor slot of group 0
    pub index: i32,
    pub buy_price: f64,
    pub sell_price: f64,

    /// Broker position tickets, 0 when none
    pub buy_ticket: u64,
    pub sell_ticket: u64,
    pub buy_filled: bool,
    pub sell_filled: bool,

    /// Pending-order tickets, 0 when none
    pub buy_pending_ticket: u64,
    pub sell_pending_ticket: u64,

    /// Executed trades on this pair; indexes the lot ladder
    pub trade_count: u32,
    /// Toggle advancing after every execution
    pub next_action: Side,

    /// Re-trigger zone latches: price must leave and return before the first
    /// trade of a direction fires again
    pub buy_in_zone: bool,
    pub sell_in_zone: bool,

    /// First execution price per direction, written once
    pub locked_buy_entry: f64,
    pub locked_sell_entry: f64,

    /// Sticky retirement: set once any leg is classified TP or SL
    pub tp_blocked: bool,

    /// Group this pair belongs to; assigned on creation, never rewritten
    pub group_id: u32,

    pub hedge_ticket: u64,
    pub hedge_active: bool,
    pub hedge_direction: Option<Side>,
}

impl GridPair {
    pub fn new(index: i32, buy_price: f64, sell_price: f64, group_id: u32) -> Self {
        Self {
            index,
            buy_price,
            sell_price,
            buy_ticket: 0,
            sell_ticket: 0,
            buy_filled: false,
            sell_filled: false,
            buy_pending_ticket: 0,
            sell_pending_ticket: 0,
            trade_count: 0,
            next_action: Side::Buy,
            buy_in_zone: false,
            sell_in_zone: false,
            locked_buy_entry: 0.0,
            locked_sell_entry: 0.0,
            tp_blocked: false,
            group_id,
            hedge_ticket: 0,
            hedge_active: false,
            hedge_direction: None,
        }
    }

    /// Next lot for this pair, sequential along the ladder; `None` once the
    /// ladder is exhausted (trade_count >= max_positions)
    pub fn next_lot(&self, lot_sizes: &[f64]) -> Option<f64> {
        lot_sizes.get(self.trade_count as usize).copied()
    }

    /// Advance the toggle and count the executed trade
    pub fn advance_toggle(&mut self) {
        self.trade_count += 1;
        self.next_action = self.next_action.opposite();
    }

    pub fn is_complete(&self) -> bool {
        self.buy_filled && self.sell_filled
    }

    /// Exactly one leg filled
    pub fn is_incomplete(&self) -> bool {
        self.buy_filled != self.sell_filled
    }

    pub fn leg_filled(&self, side: Side) -> bool {
        match side {
            Side::Buy => self.buy_filled,
            Side::Sell => self.sell_filled,
        }
    }

    /// Mark a leg executed and remember its ticket
    pub fn set_filled(&mut self, side: Side, ticket: u64) {
        match side {
            Side::Buy => {
                self.buy_filled = true;
                self.buy_ticket = ticket;
                self.buy_pending_ticket = 0;
                self.buy_in_zone = true;
            }
            Side::Sell => {
                self.sell_filled = true;
                self.sell_ticket = ticket;
                self.sell_pending_ticket = 0;
                self.sell_in_zone = true;
            }
        }
    }

    /// Grid level for one side
    pub fn level(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy_price,
            Side::Sell => self.sell_price,
        }
    }

    /// Re-trigger level: the locked entry once a direction executed, the grid
    /// level before that
    pub fn trigger_level(&self, side: Side) -> f64 {
        match side {
            Side::Buy if self.locked_buy_entry > 0.0 => self.locked_buy_entry,
            Side::Sell if self.locked_sell_entry > 0.0 => self.locked_sell_entry,
            _ => self.level(side),
        }
    }

    /// Lock the first execution price of a direction; later calls are no-ops
    pub fn lock_entry(&mut self, side: Side, price: f64) {
        match side {
            Side::Buy => {
                if self.locked_buy_entry == 0.0 {
                    self.locked_buy_entry = price;
                }
            }
            Side::Sell => {
                if self.locked_sell_entry == 0.0 {
                    self.locked_sell_entry = price;
                }
            }
        }
    }
}

/// The set of pairs a symbol engine owns, keyed by signed ladder index
#[derive(Debug, Default, Clone)]
pub struct PairStore {
    pairs: BTreeMap<i32, GridPair>,
}

impl PairStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pair: GridPair) {
        self.pairs.insert(pair.index, pair);
    }

    pub fn remove(&mut self, index: i32) -> Option<GridPair> {
        self.pairs.remove(&index)
    }

    pub fn get(&self, index: i32) -> Option<&GridPair> {
        self.pairs.get(&index)
    }

    pub fn get_mut(&mut self, index: i32) -> Option<&mut GridPair> {
        self.pairs.get_mut(&index)
    }

    pub fn contains(&self, index: i32) -> bool {
        self.pairs.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i32, &GridPair)> {
        self.pairs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&i32, &mut GridPair)> {
        self.pairs.iter_mut()
    }

    pub fn values(&self) -> impl Iterator<Item = &GridPair> {
        self.pairs.values()
    }

    /// Group a pair index belongs to: the stored group when the pair exists,
    /// otherwise derived from the index offset
    pub fn group_of(&self, index: i32) -> u32 {
        if let Some(pair) = self.pairs.get(&index) {
            return pair.group_id;
        }
        if index >= 0 {
            (index / crate::config::GROUP_OFFSET) as u32
        } else {
            0
        }
    }

    /// Highest-indexed pair in `group` holding only a sell leg (the bullish
    /// expansion edge)
    pub fn highest_sell_only(&self, group: u32) -> Option<i32> {
        self.pairs
            .values()
            .filter(|p| p.group_id == group && p.sell_filled && !p.buy_filled)
            .map(|p| p.index)
            .max()
    }

    /// Lowest-indexed pair in `group` holding only a buy leg (the bearish
    /// expansion edge)
    pub fn lowest_buy_only(&self, group: u32) -> Option<i32> {
        self.pairs
            .values()
            .filter(|p| p.group_id == group && p.buy_filled && !p.sell_filled)
            .map(|p| p.index)
            .min()
    }

    /// First incomplete pair of a group, lowest index first
    pub fn incomplete_in(&self, group: u32) -> Option<i32> {
        self.pairs
            .values()
            .filter(|p| p.group_id == group && p.is_incomplete())
            .map(|p| p.index)
            .next()
    }

    /// Restore invariants after a load. Three passes, in order:
    ///
    /// 1. a filled leg latches its re-trigger zone
    /// 2. a single-filled pair's toggle points at the missing leg
    /// 3. a filled pair never carries trade_count 0
    ///
    /// Idempotent; returns the number of fields repaired.
    pub fn repair(&mut self) -> usize {
        let mut repaired = 0;
        for pair in self.pairs.values_mut() {
            if pair.buy_filled && !pair.buy_in_zone {
                pair.buy_in_zone = true;
                repaired += 1;
            }
            if pair.sell_filled && !pair.sell_in_zone {
                pair.sell_in_zone = true;
                repaired += 1;
            }
            if pair.sell_filled && !pair.buy_filled && pair.next_action != Side::Buy {
                pair.next_action = Side::Buy;
                repaired += 1;
            }
            if pair.buy_filled && !pair.sell_filled && pair.next_action != Side::Sell {
                pair.next_action = Side::Sell;
                repaired += 1;
            }
            if (pair.buy_filled || pair.sell_filled) && pair.trade_count == 0 {
                pair.trade_count = 1;
                repaired += 1;
            }
        }
        repaired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(index: i32, group: u32) -> GridPair {
        GridPair::new(index, 1000.0 + index as f64 * 20.0, 980.0 + index as f64 * 20.0, group)
    }

    #[test]
    fn lot_ladder_is_sequential_and_capped() {
        let ladder = [0.01, 0.02, 0.03];
        let mut p = pair(0, 0);
        assert_eq!(p.next_lot(&ladder), Some(0.01));
        p.advance_toggle();
        assert_eq!(p.next_lot(&ladder), Some(0.02));
        p.trade_count = 3;
        assert_eq!(p.next_lot(&ladder), None);
    }

    #[test]
    fn toggle_alternates_and_counts() {
        let mut p = pair(0, 0);
        assert_eq!(p.next_action, Side::Buy);
        p.advance_toggle();
        assert_eq!(p.next_action, Side::Sell);
        assert_eq!(p.trade_count, 1);
        p.advance_toggle();
        assert_eq!(p.next_action, Side::Buy);
        assert_eq!(p.trade_count, 2);
    }

    #[test]
    fn locked_entry_writes_once() {
        let mut p = pair(1, 0);
        p.lock_entry(Side::Buy, 1020.3);
        p.lock_entry(Side::Buy, 1040.0);
        assert_eq!(p.locked_buy_entry, 1020.3);
        assert_eq!(p.trigger_level(Side::Buy), 1020.3);
        // Sell never executed, trigger stays at the grid level
        assert_eq!(p.trigger_level(Side::Sell), p.sell_price);
    }

    #[test]
    fn edge_queries_respect_groups() {
        let mut store = PairStore::new();
        let mut a = pair(1, 0);
        a.sell_filled = true;
        let mut b = pair(2, 0);
        b.sell_filled = true;
        let mut c = pair(101, 1);
        c.sell_filled = true;
        store.insert(a);
        store.insert(b);
        store.insert(c);

        assert_eq!(store.highest_sell_only(0), Some(2));
        assert_eq!(store.highest_sell_only(1), Some(101));
        assert_eq!(store.lowest_buy_only(0), None);
    }

    #[test]
    fn repair_is_idempotent() {
        let mut store = PairStore::new();
        let mut p = pair(0, 0);
        p.buy_filled = true;
        p.next_action = Side::Buy; // wrong: buy already filled
        p.trade_count = 0; // wrong: filled but zero trades
        store.insert(p);

        let first = store.repair();
        assert!(first > 0);
        let again = store.repair();
        assert_eq!(again, 0);

        let repaired = store.get(0).unwrap();
        assert!(repaired.buy_in_zone);
        assert_eq!(repaired.next_action, Side::Sell);
        assert_eq!(repaired.trade_count, 1);
    }

    #[test]
    fn group_of_falls_back_to_offset() {
        let store = PairStore::new();
        assert_eq!(store.group_of(0), 0);
        assert_eq!(store.group_of(105), 1);
        assert_eq!(store.group_of(230), 2);
        assert_eq!(store.group_of(-2), 0);
    }
}
