//! Toggle triggers: re-trading completed pairs toward max_positions
//!
//! A completed pair keeps alternating buy/sell at its locked entry levels
//! until its lot ladder is exhausted (the hedge supervisor takes over from
//! there). The first trade of a direction requires the price to leave the
//! trigger zone and return; once a pair has traded, re-entries fire while the
//! quote sits in the zone. Retired pairs never re-enter.

use crate::core::{EngineError, OrderOutcome, OrderReason, Side, TickQuote};
use crate::engine::symbol::{EngineState, SymbolEngine};
use crate::grouplog::GroupEvent;

impl SymbolEngine {
    /// Per-tick step 6
    pub(crate) async fn check_toggle_triggers(
        &self,
        st: &mut EngineState,
        quote: TickQuote,
    ) -> Result<(), EngineError> {
        let indices: Vec<i32> = st.pairs.values().map(|p| p.index).collect();
        for idx in indices {
            self.toggle_side(st, idx, Side::Buy, quote).await?;
            self.toggle_side(st, idx, Side::Sell, quote).await?;
        }
        Ok(())
    }

    /// Zone evaluation and re-entry for one side of one pair
    async fn toggle_side(
        &self,
        st: &mut EngineState,
        idx: i32,
        side: Side,
        quote: TickQuote,
    ) -> Result<(), EngineError> {
        let Some(pair) = st.pairs.get(idx) else {
            return Ok(());
        };
        if pair.tp_blocked || !pair.is_complete() {
            return Ok(());
        }
        let trade_count = pair.trade_count;
        let next_action = pair.next_action;
        let trigger = pair.trigger_level(side);
        let was_in_zone = match side {
            Side::Buy => pair.buy_in_zone,
            Side::Sell => pair.sell_in_zone,
        };

        // Positive-ladder pairs trigger on the side of the book they trade
        // against; the anchor pair follows the positive convention for buys
        // and the bid for sells
        let in_zone_now = match side {
            Side::Buy => {
                if idx < 0 {
                    quote.bid >= trigger
                } else {
                    quote.ask >= trigger
                }
            }
            Side::Sell => {
                if idx > 0 {
                    quote.ask <= trigger
                } else {
                    quote.bid <= trigger
                }
            }
        };

        // Zone exit re-arms the leave-and-return latch
        if was_in_zone && !in_zone_now {
            if let Some(pair) = st.pairs.get_mut(idx) {
                match side {
                    Side::Buy => pair.buy_in_zone = false,
                    Side::Sell => pair.sell_in_zone = false,
                }
            }
            return Ok(());
        }

        // First trade of the pair needs edge detection; later trades fire
        // while in zone
        let should_fire = if trade_count > 0 {
            in_zone_now && next_action == side
        } else {
            in_zone_now && !was_in_zone && next_action == side
        };
        if !should_fire || trade_count >= self.settings.max_positions {
            // Keep the zone latch tracking the quote
            if let Some(pair) = st.pairs.get_mut(idx) {
                match side {
                    Side::Buy => {
                        if !pair.buy_in_zone {
                            pair.buy_in_zone = in_zone_now;
                        }
                    }
                    Side::Sell => {
                        if !pair.sell_in_zone {
                            pair.sell_in_zone = in_zone_now;
                        }
                    }
                }
            }
            return Ok(());
        }

        match self
            .send_market_leg(st, side, idx, OrderReason::Toggle)
            .await?
        {
            OrderOutcome::Filled(ticket) => {
                let group = st.pairs.group_of(idx);
                let mut price = trigger;
                let mut count = trade_count + 1;
                if let Some(pair) = st.pairs.get_mut(idx) {
                    pair.set_filled(side, ticket);
                    pair.advance_toggle();
                    price = pair.trigger_level(side);
                    count = pair.trade_count;
                }
                self.persist_pair(st, idx).await?;
                self.group_log.record(GroupEvent::Reentry {
                    group,
                    pair_idx: idx,
                    side,
                    price,
                    lots: self
                        .settings
                        .lot_sizes
                        .get(trade_count as usize)
                        .copied()
                        .unwrap_or(0.0),
                    ticket,
                    trade_count: count,
                });
            }
            OrderOutcome::Refused(_) => {
                // Leave the zone latch untouched so the trigger retries on a
                // later tick
            }
        }
        Ok(())
    }
}
