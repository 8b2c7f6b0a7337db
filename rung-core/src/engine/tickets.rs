//! Ticket registry: position ticket -> pair mapping with touch latching
//!
//! The registry is the classifier's memory. `update_touch` runs at the head
//! of every tick, before drop detection, so that by the time a position
//! vanishes from the broker's open set its TP/SL crossing has already been
//! latched. Flags are monotone: they latch true and stay true until the
//! ticket is removed.

use crate::core::{Leg, Side, TicketInfo, TouchFlags};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct TicketRegistry {
    infos: HashMap<u64, TicketInfo>,
    touch: HashMap<u64, TouchFlags>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert. Re-registering an existing ticket keeps its latched
    /// touch flags.
    pub fn register(&mut self, ticket: u64, info: TicketInfo) {
        self.infos.insert(ticket, info);
        self.touch.entry(ticket).or_default();
    }

    /// Restore a ticket with persisted touch flags (recovery path)
    pub fn restore(&mut self, ticket: u64, info: TicketInfo, touch: TouchFlags) {
        self.infos.insert(ticket, info);
        self.touch.insert(ticket, touch);
    }

    /// Latch touch flags against the live quote for every registered ticket
    ///
    /// Buy legs watch the bid (that is where they close); sell legs watch the
    /// ask. Returns the tickets whose flags changed so callers can persist
    /// the new latches.
    pub fn update_touch(&mut self, ask: f64, bid: f64) -> Vec<u64> {
        let mut changed = Vec::new();
        for (ticket, info) in &self.infos {
            let flags = self.touch.entry(*ticket).or_default();
            let before = *flags;
            match info.leg {
                Side::Buy => {
                    if !flags.tp_touched && bid >= info.tp {
                        flags.tp_touched = true;
                    }
                    if !flags.sl_touched && bid <= info.sl {
                        flags.sl_touched = true;
                    }
                }
                Side::Sell => {
                    if !flags.tp_touched && ask <= info.tp {
                        flags.tp_touched = true;
                    }
                    if !flags.sl_touched && ask >= info.sl {
                        flags.sl_touched = true;
                    }
                }
            }
            if *flags != before {
                changed.push(*ticket);
            }
        }
        changed
    }

    pub fn remove(&mut self, ticket: u64) -> Option<(TicketInfo, TouchFlags)> {
        let info = self.infos.remove(&ticket)?;
        let touch = self.touch.remove(&ticket).unwrap_or_default();
        Some((info, touch))
    }

    pub fn lookup(&self, ticket: u64) -> Option<&TicketInfo> {
        self.infos.get(&ticket)
    }

    pub fn touch_flags(&self, ticket: u64) -> TouchFlags {
        self.touch.get(&ticket).copied().unwrap_or_default()
    }

    pub fn contains(&self, ticket: u64) -> bool {
        self.infos.contains_key(&ticket)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn clear(&mut self) {
        self.infos.clear();
        self.touch.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &TicketInfo)> {
        self.infos.iter()
    }

    /// Tracked tickets no longer present in the broker's open set
    pub fn dropped(&self, open: &HashSet<u64>) -> Vec<u64> {
        let mut out: Vec<u64> = self
            .infos
            .keys()
            .filter(|t| !open.contains(t))
            .copied()
            .collect();
        out.sort_unstable();
        out
    }

    /// The registered position on `pair_index`'s `leg`, if any
    pub fn leg_of_pair(&self, pair_index: i32, leg: Leg) -> Option<(u64, TicketInfo)> {
        self.infos
            .iter()
            .find(|(_, info)| info.pair_index == pair_index && info.leg == leg)
            .map(|(t, info)| (*t, *info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy_info(pair: i32) -> TicketInfo {
        TicketInfo {
            pair_index: pair,
            leg: Side::Buy,
            entry: 1000.0,
            tp: 1020.0,
            sl: 980.0,
        }
    }

    fn sell_info(pair: i32) -> TicketInfo {
        TicketInfo {
            pair_index: pair,
            leg: Side::Sell,
            entry: 1000.0,
            tp: 980.0,
            sl: 1020.0,
        }
    }

    #[test]
    fn buy_tp_latches_on_bid() {
        let mut reg = TicketRegistry::new();
        reg.register(1, buy_info(0));

        reg.update_touch(1019.9, 1019.7);
        assert!(!reg.touch_flags(1).tp_touched);

        reg.update_touch(1020.3, 1020.0);
        assert!(reg.touch_flags(1).tp_touched);

        // Monotone: retreating quotes do not clear the latch
        reg.update_touch(1000.0, 999.8);
        assert!(reg.touch_flags(1).tp_touched);
    }

    #[test]
    fn sell_tp_latches_on_ask() {
        let mut reg = TicketRegistry::new();
        reg.register(2, sell_info(1));

        reg.update_touch(980.0, 979.8);
        assert!(reg.touch_flags(2).tp_touched);
        assert!(!reg.touch_flags(2).sl_touched);
    }

    #[test]
    fn reregister_keeps_latched_flags() {
        let mut reg = TicketRegistry::new();
        reg.register(1, buy_info(0));
        reg.update_touch(1020.5, 1020.2);
        assert!(reg.touch_flags(1).tp_touched);

        reg.register(1, buy_info(0));
        assert!(reg.touch_flags(1).tp_touched);
    }

    #[test]
    fn dropped_diffs_against_open_set() {
        let mut reg = TicketRegistry::new();
        reg.register(1, buy_info(0));
        reg.register(2, sell_info(1));

        let open: HashSet<u64> = [2u64].into_iter().collect();
        assert_eq!(reg.dropped(&open), vec![1]);
    }

    #[test]
    fn leg_of_pair_finds_opposing_leg() {
        let mut reg = TicketRegistry::new();
        reg.register(1, buy_info(3));
        reg.register(2, sell_info(3));

        let (ticket, info) = reg.leg_of_pair(3, Side::Sell).unwrap();
        assert_eq!(ticket, 2);
        assert_eq!(info.leg, Side::Sell);
        assert!(reg.leg_of_pair(4, Side::Buy).is_none());
    }
}
