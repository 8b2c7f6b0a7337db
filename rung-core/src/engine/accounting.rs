//! Completion accounting: live C and the per-group high-water mark
//!
//! C counts the pairs of a group with both legs currently open at the broker.
//! Live C can regress when legs close; the high-water mark cannot, and it is
//! the high-water value that gates expansion so a group never "forgets" how
//! far it progressed.

use crate::grid::PairStore;
use crate::engine::tickets::TicketRegistry;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct CompletionAccountant {
    highwater: BTreeMap<u32, u32>,
}

impl CompletionAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed-pair count for `group` from the broker's open set, observed
    /// through the ticket registry. Updates the high-water mark as a side
    /// effect.
    pub fn live_c(
        &mut self,
        group: u32,
        open: &HashSet<u64>,
        registry: &TicketRegistry,
        pairs: &PairStore,
    ) -> u32 {
        let mut legs: HashMap<i32, (bool, bool)> = HashMap::new();
        for (ticket, info) in registry.iter() {
            if !open.contains(ticket) {
                continue;
            }
            let entry = legs.entry(info.pair_index).or_default();
            match info.leg {
                crate::core::Side::Buy => entry.0 = true,
                crate::core::Side::Sell => entry.1 = true,
            }
        }
        let live = legs
            .iter()
            .filter(|(idx, (b, s))| *b && *s && pairs.group_of(**idx) == group)
            .count() as u32;
        self.observe(group, live);
        live
    }

    /// Record an observed C; only raises the mark
    pub fn observe(&mut self, group: u32, c: u32) {
        let entry = self.highwater.entry(group).or_insert(0);
        if c > *entry {
            *entry = c;
        }
    }

    pub fn c_highwater(&self, group: u32) -> u32 {
        self.highwater.get(&group).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> &BTreeMap<u32, u32> {
        &self.highwater
    }

    pub fn restore(&mut self, map: BTreeMap<u32, u32>) {
        self.highwater = map;
    }

    pub fn clear(&mut self) {
        self.highwater.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Side, TicketInfo};
    use crate::grid::GridPair;

    fn info(pair: i32, leg: Side) -> TicketInfo {
        TicketInfo {
            pair_index: pair,
            leg,
            entry: 0.0,
            tp: 0.0,
            sl: 0.0,
        }
    }

    fn store_with(indices: &[(i32, u32)]) -> PairStore {
        let mut store = PairStore::new();
        for (idx, group) in indices {
            store.insert(GridPair::new(*idx, 0.0, 0.0, *group));
        }
        store
    }

    #[test]
    fn counts_only_both_leg_pairs_of_group() {
        let mut acc = CompletionAccountant::new();
        let mut reg = TicketRegistry::new();
        reg.register(1, info(0, Side::Buy));
        reg.register(2, info(0, Side::Sell));
        reg.register(3, info(1, Side::Sell)); // one leg only
        reg.register(4, info(100, Side::Buy)); // other group
        reg.register(5, info(100, Side::Sell));
        let pairs = store_with(&[(0, 0), (1, 0), (100, 1)]);
        let open: HashSet<u64> = [1u64, 2, 3, 4, 5].into_iter().collect();

        assert_eq!(acc.live_c(0, &open, &reg, &pairs), 1);
        assert_eq!(acc.live_c(1, &open, &reg, &pairs), 1);
    }

    #[test]
    fn highwater_never_regresses() {
        let mut acc = CompletionAccountant::new();
        acc.observe(0, 2);
        acc.observe(0, 3);
        acc.observe(0, 1);
        assert_eq!(acc.c_highwater(0), 3);
    }

    #[test]
    fn closed_tickets_drop_out_of_live_c_but_not_highwater() {
        let mut acc = CompletionAccountant::new();
        let mut reg = TicketRegistry::new();
        reg.register(1, info(0, Side::Buy));
        reg.register(2, info(0, Side::Sell));
        let pairs = store_with(&[(0, 0)]);

        let open: HashSet<u64> = [1u64, 2].into_iter().collect();
        assert_eq!(acc.live_c(0, &open, &reg, &pairs), 1);

        let open: HashSet<u64> = [2u64].into_iter().collect();
        assert_eq!(acc.live_c(0, &open, &reg, &pairs), 0);
        assert_eq!(acc.c_highwater(0), 1);
    }
}
