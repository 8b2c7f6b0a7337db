//! Drop detection and deterministic TP/SL classification
//!
//! A position's disappearance from the broker's open set is classified from
//! the touch flags latched on earlier ticks. Only when neither flag is set -
//! the position closed inside a single tick gap - does the nearest-distance
//! fallback run, and every use of it is logged and counted for audit.

use crate::config::COMPLETION_CAP;
use crate::core::{EngineError, Side, TickQuote, TicketInfo, TouchFlags, Trend};
use crate::engine::symbol::{EngineState, SymbolEngine};
use crate::grouplog::GroupEvent;
use crate::persistence::HistoryEvent;
use std::collections::HashSet;
use tracing::{info, warn};

/// Outcome of classifying one dropped ticket
#[derive(Debug, Clone, Copy)]
pub(crate) struct DropClass {
    pub is_tp: bool,
    pub event_price: f64,
    pub inferred: bool,
}

/// Classify from latched flags; fall back to nearest-distance inference
pub(crate) fn classify_drop(info: &TicketInfo, touch: TouchFlags, quote: TickQuote) -> DropClass {
    if touch.tp_touched {
        return DropClass {
            is_tp: true,
            event_price: info.tp,
            inferred: false,
        };
    }
    if touch.sl_touched {
        return DropClass {
            is_tp: false,
            event_price: info.sl,
            inferred: false,
        };
    }
    // Neither flag latched: the close happened between ticks. Pick whichever
    // exit level the current quote sits closer to.
    let reference = match info.leg {
        Side::Buy => quote.bid,
        Side::Sell => quote.ask,
    };
    let dist_tp = (reference - info.tp).abs();
    let dist_sl = (reference - info.sl).abs();
    if dist_tp < dist_sl {
        DropClass {
            is_tp: true,
            event_price: info.tp,
            inferred: true,
        }
    } else {
        DropClass {
            is_tp: false,
            event_price: info.sl,
            inferred: true,
        }
    }
}

impl SymbolEngine {
    /// Per-tick step 2: diff tracked tickets against the broker's open set,
    /// classify each dropped one, retire its pair and route the event
    pub(crate) async fn process_drops(
        &self,
        st: &mut EngineState,
        quote: TickQuote,
        open: &HashSet<u64>,
    ) -> Result<(), EngineError> {
        let dropped = st.tickets.dropped(open);
        if dropped.is_empty() {
            return Ok(());
        }

        for ticket in dropped {
            let Some(info) = st.tickets.lookup(ticket).copied() else {
                continue;
            };
            let touch = st.tickets.touch_flags(ticket);
            let class = classify_drop(&info, touch, quote);
            let pair_idx = info.pair_index;
            let group = st.pairs.group_of(pair_idx);

            if class.inferred {
                self.metrics
                    .inferred_classifications
                    .with_label_values(&[self.symbol.as_str()])
                    .inc();
                self.group_log.record(GroupEvent::Inferred {
                    group,
                    pair_idx,
                    leg: info.leg,
                    classified_tp: class.is_tp,
                    quote: match info.leg {
                        Side::Buy => quote.bid,
                        Side::Sell => quote.ask,
                    },
                    tp: info.tp,
                    sl: info.sl,
                });
                warn!(
                    symbol = %self.symbol,
                    ticket,
                    pair = pair_idx,
                    tp = class.is_tp,
                    "drop classified by nearest-distance inference"
                );
            }

            // Completeness at the moment of detection, judged from the
            // in-memory store: the sticky fill flags remember legs the broker
            // has already lost
            let was_completed = st
                .pairs
                .get(pair_idx)
                .map(|p| p.is_complete())
                .unwrap_or(false);

            // Retirement: the first classification on a pair blocks all
            // further re-entry and emits the TP/SL event
            let newly_retired = match st.pairs.get_mut(pair_idx) {
                Some(pair) if !pair.tp_blocked => {
                    pair.tp_blocked = true;
                    true
                }
                Some(_) => false,
                None => {
                    warn!(symbol = %self.symbol, ticket, pair = pair_idx, "drop for unknown pair");
                    false
                }
            };
            if newly_retired {
                if class.is_tp {
                    self.metrics
                        .tp_hits
                        .with_label_values(&[self.symbol.as_str()])
                        .inc();
                    self.group_log.record(GroupEvent::TpHit {
                        group,
                        pair_idx,
                        leg: info.leg,
                        price: class.event_price,
                        was_incomplete: !was_completed,
                    });
                } else {
                    self.metrics
                        .sl_hits
                        .with_label_values(&[self.symbol.as_str()])
                        .inc();
                    self.group_log.record(GroupEvent::SlHit {
                        group,
                        pair_idx,
                        leg: info.leg,
                        price: class.event_price,
                    });
                }
                self.append_history(
                    st,
                    HistoryEvent::now(
                        if class.is_tp { "TP_HIT" } else { "SL_HIT" },
                        pair_idx,
                        info.leg.tag(),
                        class.event_price,
                        0.0,
                        ticket,
                        format!(
                            "grp={group} completed={was_completed}{}",
                            if class.inferred { " inferred" } else { "" }
                        ),
                    ),
                )
                .await?;
            }

            info!(
                symbol = %self.symbol,
                ticket,
                pair = pair_idx,
                group,
                leg = %info.leg,
                tp = class.is_tp,
                price = class.event_price,
                completed = was_completed,
                "position drop classified"
            );

            // Routing
            if class.is_tp {
                let bullish = Trend::from_leg(info.leg);
                if !was_completed {
                    self.route_incomplete_tp(st, pair_idx, group, class.event_price, bullish)
                        .await?;
                } else {
                    self.route_completed_tp(st, pair_idx, group, class.event_price, bullish)
                        .await?;
                }
            }

            // Any hedge on the pair closes with the leg that defined it
            let hedge_ticket = st
                .pairs
                .get(pair_idx)
                .filter(|p| p.hedge_active && p.hedge_ticket != 0)
                .map(|p| p.hedge_ticket);
            if let Some(hticket) = hedge_ticket {
                match self.broker.close_position(hticket, self.settings.deviation).await {
                    Ok(()) | Err(crate::core::BrokerError::TicketNotFound(_)) => {
                        if let Some(pair) = st.pairs.get_mut(pair_idx) {
                            pair.hedge_active = false;
                            pair.hedge_ticket = 0;
                        }
                    }
                    Err(e) => {
                        warn!(symbol = %self.symbol, ticket = hticket, "hedge close failed: {e}")
                    }
                }
            }

            // The ticket is gone: registry and repository forget it
            st.tickets.remove(ticket);
            if let Some(repo) = &st.repo {
                repo.delete_ticket(ticket).await?;
            }
            self.persist_pair(st, pair_idx).await?;
        }

        self.persist_state(st).await
    }

    /// Incomplete-pair TP: the trigger for the next group's INIT, once per
    /// pair, carrying the trigger index so INIT can back-fill the abandoned
    /// partner leg
    async fn route_incomplete_tp(
        &self,
        st: &mut EngineState,
        pair_idx: i32,
        group: u32,
        event_price: f64,
        trend: Trend,
    ) -> Result<(), EngineError> {
        if st.incomplete_init_fired.contains(&pair_idx) {
            info!(symbol = %self.symbol, pair = pair_idx, "incomplete TP already fired INIT, skipping");
            return Ok(());
        }
        if st.graceful_stop {
            info!(symbol = %self.symbol, pair = pair_idx, "graceful stop active, no INIT");
            return Ok(());
        }
        st.incomplete_init_fired.insert(pair_idx);
        let next_group = st.current_group + 1;
        info!(
            symbol = %self.symbol,
            pair = pair_idx,
            group,
            next_group,
            %trend,
            "incomplete TP fires group INIT"
        );
        self.execute_group_init(st, next_group, event_price, trend, Some(pair_idx))
            .await?;
        Ok(())
    }

    /// Completed-pair TP: expansion driver for the active group (or, from the
    /// immediate predecessor group, a driver for the active group's check)
    async fn route_completed_tp(
        &self,
        st: &mut EngineState,
        pair_idx: i32,
        group: u32,
        event_price: f64,
        trend: Trend,
    ) -> Result<(), EngineError> {
        if st.pairs_tp_expanded.contains(&pair_idx) {
            info!(symbol = %self.symbol, pair = pair_idx, "pair already fired expansion, skipping");
            return Ok(());
        }
        if group == st.current_group {
            let c = st.accounting.c_highwater(st.current_group);
            self.execute_tp_expansion(st, group, event_price, trend, c)
                .await?;
            st.pairs_tp_expanded.insert(pair_idx);
        } else if group + 1 == st.current_group {
            // A predecessor pair's TP still drives the active group's check,
            // with the live count rather than the predecessor's high water
            let open = self.broker.open_tickets(&self.symbol).await;
            let current = st.current_group;
            let c = st.accounting.live_c(current, &open, &st.tickets, &st.pairs);
            if c < COMPLETION_CAP {
                self.execute_tp_expansion(st, current, event_price, trend, c)
                    .await?;
            }
            st.pairs_tp_expanded.insert(pair_idx);
        } else {
            // Ancestor groups no longer drive anything
            st.pairs_tp_expanded.insert(pair_idx);
        }
        Ok(())
    }

    /// Group-0 saturation handoff: close the lone incomplete pair's surviving
    /// leg at market and fire the next group's INIT from here
    pub(crate) async fn force_artificial_tp(
        &self,
        st: &mut EngineState,
        quote: TickQuote,
    ) -> Result<(), EngineError> {
        // Find the incomplete pair from the broker's open legs, not the
        // in-memory flags: only a leg that is actually still open can be
        // artificially closed
        let positions = self.broker.open_positions(&self.symbol).await;
        let mut incomplete: Option<(i32, u64, Side)> = None;
        {
            let mut per_pair: std::collections::HashMap<i32, Vec<(u64, Side)>> =
                std::collections::HashMap::new();
            for pos in &positions {
                if let Some(info) = st.tickets.lookup(pos.ticket) {
                    if st.pairs.group_of(info.pair_index) == st.current_group {
                        per_pair
                            .entry(info.pair_index)
                            .or_default()
                            .push((pos.ticket, info.leg));
                    }
                }
            }
            for (idx, legs) in per_pair {
                if legs.len() == 1 {
                    incomplete = Some((idx, legs[0].0, legs[0].1));
                    break;
                }
            }
        }

        let mut trigger_pair = None;
        let mut trend = Trend::Bullish;
        if let Some((pair_idx, ticket, leg)) = incomplete {
            info!(
                symbol = %self.symbol,
                pair = pair_idx,
                ticket,
                "artificial TP: closing lone incomplete leg"
            );
            self.broker
                .close_position(ticket, self.settings.deviation)
                .await?;
            st.tickets.remove(ticket);
            if let Some(repo) = &st.repo {
                repo.delete_ticket(ticket).await?;
            }
            self.group_log.record(GroupEvent::ArtificialTp {
                group: st.current_group,
                pair_idx,
                price: quote.mid(),
            });
            trigger_pair = Some(pair_idx);
            trend = Trend::from_leg(leg);
        } else {
            info!(symbol = %self.symbol, group = st.current_group, "artificial TP: no incomplete pair");
        }

        if st.graceful_stop {
            info!(symbol = %self.symbol, "graceful stop active, artificial TP skips INIT");
            return Ok(());
        }
        let next_group = st.current_group + 1;
        self.execute_group_init(st, next_group, quote.mid(), trend, trigger_pair)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy_info() -> TicketInfo {
        TicketInfo {
            pair_index: 0,
            leg: Side::Buy,
            entry: 1000.0,
            tp: 1020.0,
            sl: 980.0,
        }
    }

    #[test]
    fn latched_tp_wins_over_inference() {
        let touch = TouchFlags {
            tp_touched: true,
            sl_touched: false,
        };
        // Quote now sits near the SL; the latch still decides
        let class = classify_drop(&buy_info(), touch, TickQuote::new(981.0, 980.8, 0));
        assert!(class.is_tp);
        assert!(!class.inferred);
        assert_eq!(class.event_price, 1020.0);
    }

    #[test]
    fn tp_latch_beats_sl_latch_when_both_set() {
        let touch = TouchFlags {
            tp_touched: true,
            sl_touched: true,
        };
        let class = classify_drop(&buy_info(), touch, TickQuote::new(1000.0, 999.8, 0));
        assert!(class.is_tp);
    }

    #[test]
    fn inference_picks_nearest_exit() {
        let touch = TouchFlags::default();
        let near_tp = classify_drop(&buy_info(), touch, TickQuote::new(1018.0, 1017.8, 0));
        assert!(near_tp.is_tp);
        assert!(near_tp.inferred);

        let near_sl = classify_drop(&buy_info(), touch, TickQuote::new(983.0, 982.8, 0));
        assert!(!near_sl.is_tp);
        assert!(near_sl.inferred);
        assert_eq!(near_sl.event_price, 980.0);
    }

    #[test]
    fn sell_inference_references_the_ask() {
        let info = TicketInfo {
            pair_index: 1,
            leg: Side::Sell,
            entry: 1000.0,
            tp: 980.0,
            sl: 1020.0,
        };
        let class = classify_drop(&info, TouchFlags::default(), TickQuote::new(982.0, 981.8, 0));
        assert!(class.is_tp);
    }
}
