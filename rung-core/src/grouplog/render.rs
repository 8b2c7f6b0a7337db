//! In-memory group model and table rendering

use crate::core::Side;
use crate::grouplog::{ExpandKind, GroupEvent};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;

/// One leg's row in the group table
#[derive(Debug, Clone, Default)]
pub struct LegRow {
    pub status: &'static str,
    pub entry: f64,
    pub tp: f64,
    pub sl: f64,
    pub lots: f64,
    pub ticket: u64,
    pub re_entries: u32,
}

impl LegRow {
    fn blank() -> Self {
        Self {
            status: "-",
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairRow {
    pub buy: LegRow,
    pub sell: LegRow,
}

impl Default for PairRow {
    fn default() -> Self {
        Self {
            buy: LegRow::blank(),
            sell: LegRow::blank(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupData {
    pub init_direction: &'static str,
    pub pending_retracement: &'static str,
    pub anchor: f64,
    pub c_count: u32,
    pub pairs: BTreeMap<i32, PairRow>,
}

/// The writer thread's model of every group seen this session
#[derive(Debug, Default)]
pub struct GroupBook {
    groups: BTreeMap<u32, GroupData>,
}

impl GroupBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, id: u32) -> Option<&GroupData> {
        self.groups.get(&id)
    }

    fn leg_mut(&mut self, group: u32, pair_idx: i32, side: Side) -> &mut LegRow {
        let pair = self
            .groups
            .entry(group)
            .or_default()
            .pairs
            .entry(pair_idx)
            .or_default();
        match side {
            Side::Buy => &mut pair.buy,
            Side::Sell => &mut pair.sell,
        }
    }

    /// Fold an event into the model; returns the formatted event line and
    /// whether the group table should be re-rendered
    pub fn apply(&mut self, event: &GroupEvent) -> (String, Option<u32>) {
        match event {
            GroupEvent::Init {
                group,
                anchor,
                bullish_source,
                b_idx,
                s_idx,
                b_ticket,
                s_ticket,
                lots,
            } => {
                let data = self.groups.entry(*group).or_default();
                data.anchor = *anchor;
                data.init_direction = if *bullish_source { "BULLISH" } else { "BEARISH" };
                data.pending_retracement = if *bullish_source { "BEARISH" } else { "BULLISH" };
                data.c_count = 0;
                let lots = *lots;
                let anchor = *anchor;
                *self.leg_mut(*group, *b_idx, Side::Buy) = LegRow {
                    status: "ACTIVE",
                    entry: anchor,
                    lots,
                    ticket: *b_ticket,
                    ..LegRow::blank()
                };
                *self.leg_mut(*group, *s_idx, Side::Sell) = LegRow {
                    status: "ACTIVE",
                    entry: anchor,
                    lots,
                    ticket: *s_ticket,
                    ..LegRow::blank()
                };
                (
                    format!(
                        "INIT grp={group} anchor={anchor:.2} src={} B{b_idx}+S{s_idx} \
                         tickets=({b_ticket},{s_ticket})",
                        if *bullish_source { "BULLISH" } else { "BEARISH" },
                    ),
                    Some(*group),
                )
            }
            GroupEvent::Expansion {
                group,
                kind,
                pair_idx,
                side,
                entry,
                tp,
                sl,
                lots,
                ticket,
                seed,
                atomic,
                c_count,
            } => {
                *self.leg_mut(*group, *pair_idx, *side) = LegRow {
                    status: "ACTIVE",
                    entry: *entry,
                    tp: *tp,
                    sl: *sl,
                    lots: *lots,
                    ticket: *ticket,
                    ..LegRow::blank()
                };
                if let Some(seed) = seed {
                    *self.leg_mut(*group, seed.pair_idx, seed.side) = LegRow {
                        status: "ACTIVE",
                        entry: seed.entry,
                        tp: seed.tp,
                        sl: seed.sl,
                        lots: *lots,
                        ticket: seed.ticket,
                        ..LegRow::blank()
                    };
                }
                let mut line = format!(
                    "{} grp={group} {}{pair_idx} @ {entry:.2} C={c_count} {}",
                    kind.as_str(),
                    side.tag(),
                    if *atomic { "atomic" } else { "non-atomic" },
                );
                if let Some(seed) = seed {
                    let _ = write!(
                        line,
                        " seed={}{} @ {:.2}",
                        seed.side.tag(),
                        seed.pair_idx,
                        seed.entry
                    );
                }
                (line, Some(*group))
            }
            GroupEvent::TpHit {
                group,
                pair_idx,
                leg,
                price,
                was_incomplete,
            } => {
                self.leg_mut(*group, *pair_idx, *leg).status = "TP";
                (
                    format!(
                        "TP_HIT grp={group} {}{pair_idx} @ {price:.2}{}",
                        leg.tag(),
                        if *was_incomplete { " (incomplete)" } else { "" },
                    ),
                    Some(*group),
                )
            }
            GroupEvent::SlHit {
                group,
                pair_idx,
                leg,
                price,
            } => {
                self.leg_mut(*group, *pair_idx, *leg).status = "SL";
                (
                    format!("SL_HIT grp={group} {}{pair_idx} @ {price:.2}", leg.tag()),
                    Some(*group),
                )
            }
            GroupEvent::Inferred {
                group,
                pair_idx,
                leg,
                classified_tp,
                quote,
                tp,
                sl,
            } => (
                format!(
                    "INFERRED grp={group} {}{pair_idx} -> {} (quote={quote:.2} tp={tp:.2} sl={sl:.2})",
                    leg.tag(),
                    if *classified_tp { "TP" } else { "SL" },
                ),
                None,
            ),
            GroupEvent::NonAtomicComplete {
                group,
                pair_idx,
                leg,
                entry,
                reason,
            } => {
                *self.leg_mut(*group, *pair_idx, *leg) = LegRow {
                    status: "ACTIVE",
                    entry: *entry,
                    ..LegRow::blank()
                };
                (
                    format!(
                        "NON_ATOMIC_COMPLETE grp={group} {}{pair_idx} @ {entry:.2} ({reason})",
                        leg.tag(),
                    ),
                    Some(*group),
                )
            }
            GroupEvent::Hedge {
                group,
                pair_idx,
                side,
                price,
                lots,
                tp,
                sl,
                ticket,
            } => (
                format!(
                    "HEDGE grp={group} pair={pair_idx} {} @ {price:.2} lots={lots:.2} \
                     tp={tp:.2} sl={sl:.2} ticket={ticket}",
                    side.tag(),
                ),
                None,
            ),
            GroupEvent::ArtificialTp {
                group,
                pair_idx,
                price,
            } => (
                format!("ARTIFICIAL_TP grp={group} pair={pair_idx} @ {price:.2}"),
                Some(*group),
            ),
            GroupEvent::CCount { group, c } => {
                let data = self.groups.entry(*group).or_default();
                data.c_count = *c;
                (format!("C_COUNT grp={group} C={c}"), Some(*group))
            }
            GroupEvent::Reentry {
                group,
                pair_idx,
                side,
                price,
                lots,
                ticket,
                trade_count,
            } => {
                let leg = self.leg_mut(*group, *pair_idx, *side);
                leg.re_entries += 1;
                leg.ticket = *ticket;
                leg.entry = *price;
                (
                    format!(
                        "REENTRY grp={group} {}{pair_idx} @ {price:.2} lots={lots:.2} \
                         trade#{trade_count} ticket={ticket}",
                        side.tag(),
                    ),
                    None,
                )
            }
        }
    }

    /// Fixed-width table for one group
    pub fn render_group(&self, group_id: u32) -> String {
        let Some(data) = self.groups.get(&group_id) else {
            return String::new();
        };
        let mut out = String::new();
        let _ = writeln!(out, "{}", "═".repeat(96));
        let _ = writeln!(
            out,
            "GROUP {group_id}  anchor={:.2}  init={}  retracement={}  C={}",
            data.anchor,
            if data.init_direction.is_empty() { "-" } else { data.init_direction },
            if data.pending_retracement.is_empty() { "-" } else { data.pending_retracement },
            data.c_count,
        );
        let _ = writeln!(out, "{}", "─".repeat(96));
        let _ = writeln!(
            out,
            "{:>6} │ {:<4} {:<7} {:>10} {:>10} {:>10} {:>6} {:>10} {:>4}",
            "pair", "leg", "status", "entry", "tp", "sl", "lots", "ticket", "re"
        );
        for (idx, pair) in &data.pairs {
            for (tag, leg) in [("B", &pair.buy), ("S", &pair.sell)] {
                let _ = writeln!(
                    out,
                    "{:>6} │ {:<4} {:<7} {:>10.2} {:>10.2} {:>10.2} {:>6.2} {:>10} {:>4}",
                    idx, tag, leg.status, leg.entry, leg.tp, leg.sl, leg.lots, leg.ticket,
                    leg.re_entries,
                );
            }
        }
        let _ = writeln!(out, "{}", "═".repeat(96));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_event_populates_group() {
        let mut book = GroupBook::new();
        let (line, rerender) = book.apply(&GroupEvent::Init {
            group: 0,
            anchor: 1000.0,
            bullish_source: true,
            b_idx: 0,
            s_idx: 1,
            b_ticket: 11,
            s_ticket: 12,
            lots: 0.01,
        });
        assert!(line.contains("INIT grp=0"));
        assert_eq!(rerender, Some(0));

        let data = book.group(0).unwrap();
        assert_eq!(data.init_direction, "BULLISH");
        assert_eq!(data.pending_retracement, "BEARISH");
        assert_eq!(data.pairs.len(), 2);

        let table = book.render_group(0);
        assert!(table.contains("GROUP 0"));
        assert!(table.contains("ACTIVE"));
    }

    #[test]
    fn tp_hit_marks_leg() {
        let mut book = GroupBook::new();
        book.apply(&GroupEvent::Init {
            group: 0,
            anchor: 1000.0,
            bullish_source: true,
            b_idx: 0,
            s_idx: 1,
            b_ticket: 1,
            s_ticket: 2,
            lots: 0.01,
        });
        book.apply(&GroupEvent::TpHit {
            group: 0,
            pair_idx: 0,
            leg: Side::Buy,
            price: 1020.0,
            was_incomplete: false,
        });
        let data = book.group(0).unwrap();
        assert_eq!(data.pairs.get(&0).unwrap().buy.status, "TP");
    }
}
