//! Hedge supervisor
//!
//! State-based enforcement, re-checked every tick: any *completed* pair that
//! has traded to max_positions and carries no hedge gets one. Incomplete and
//! retired pairs are invisible here - a hedge neutralizes a both-legs
//! exposure, and a single-leg pair has nothing to neutralize (and no
//! opposing leg to mirror stops from). Supervisor placement (rather than
//! firing inside the trade path) means a failed hedge simply retries next
//! tick and a crash-restart sees the missing hedge and repairs it.
//!
//! The hedge mirrors the opposing leg: its TP is that leg's SL and its SL is
//! that leg's TP, so the hedge closes exactly when the leg it neutralizes
//! resolves. With no opposing leg on the books the stops fall back to one
//! spread around the current quote.

use crate::config::HEDGE_MAGIC_BASE;
use crate::core::{EngineError, Side, TickQuote};
use crate::engine::symbol::{clamp_stops_outward, EngineState, SymbolEngine};
use crate::execution::{FillingMode, MarketOrderRequest};
use crate::grouplog::GroupEvent;
use crate::persistence::HistoryEvent;
use tracing::{info, warn};

impl SymbolEngine {
    /// Per-tick step 5
    pub(crate) async fn enforce_hedges(
        &self,
        st: &mut EngineState,
        quote: TickQuote,
    ) -> Result<(), EngineError> {
        if !self.settings.hedge_enabled {
            return Ok(());
        }
        let candidates: Vec<i32> = st
            .pairs
            .values()
            .filter(|p| {
                p.is_complete()
                    && !p.tp_blocked
                    && !p.hedge_active
                    && p.trade_count >= self.settings.max_positions
            })
            .map(|p| p.index)
            .collect();
        for idx in candidates {
            self.place_hedge(st, idx, quote).await?;
        }
        Ok(())
    }

    /// Hedge direction is a pure function of ladder side and max_positions
    /// parity: an odd trade count leaves the pair net-long below the anchor
    /// and net-short above it.
    pub(crate) fn hedge_direction(&self, pair_idx: i32) -> Side {
        let odd = self.settings.max_positions % 2 == 1;
        match (pair_idx > 0, odd) {
            (true, true) => Side::Buy,
            (true, false) => Side::Sell,
            (false, true) => Side::Sell,
            (false, false) => Side::Buy,
        }
    }

    async fn place_hedge(
        &self,
        st: &mut EngineState,
        pair_idx: i32,
        quote: TickQuote,
    ) -> Result<(), EngineError> {
        let direction = self.hedge_direction(pair_idx);
        let spread = self.settings.spread;

        // Mirror the opposing leg's stops; fall back to a spread-based pair
        // around the current quote
        let (mut tp, mut sl) = match st.tickets.leg_of_pair(pair_idx, direction.opposite()) {
            Some((_, info)) => (info.sl, info.tp),
            None => {
                warn!(
                    symbol = %self.symbol,
                    pair = pair_idx,
                    "no opposing leg to inherit hedge stops from, using spread fallback"
                );
                match direction {
                    Side::Buy => (quote.ask + spread, quote.bid - spread),
                    Side::Sell => (quote.bid - spread, quote.ask + spread),
                }
            }
        };
        if let Some(spec) = self.broker.symbol_info(&self.symbol).await {
            (tp, sl) = clamp_stops_outward(direction, tp, sl, quote, spec.min_stop_distance());
        }

        let group = st.pairs.group_of(pair_idx);
        let price = match direction {
            Side::Buy => quote.ask,
            Side::Sell => quote.bid,
        };
        let sent = self
            .broker
            .send_market(MarketOrderRequest {
                symbol: self.symbol.clone(),
                side: direction,
                volume: self.settings.hedge_lot_size,
                price,
                sl,
                tp,
                magic: HEDGE_MAGIC_BASE + pair_idx as i64,
                comment: format!("H{pair_idx} Grp{group}"),
                deviation: self.settings.deviation,
                filling: FillingMode::FillOrKill,
            })
            .await?;
        let Some(ticket) = sent else {
            warn!(symbol = %self.symbol, pair = pair_idx, "hedge refused, retrying next tick");
            return Ok(());
        };

        if let Some(pair) = st.pairs.get_mut(pair_idx) {
            pair.hedge_active = true;
            pair.hedge_ticket = ticket;
            pair.hedge_direction = Some(direction);
        }
        self.persist_pair(st, pair_idx).await?;
        self.append_history(
            st,
            HistoryEvent::now(
                "HEDGE",
                pair_idx,
                direction.tag(),
                price,
                self.settings.hedge_lot_size,
                ticket,
                format!("tp={tp:.2} sl={sl:.2}"),
            ),
        )
        .await?;
        self.group_log.record(GroupEvent::Hedge {
            group,
            pair_idx,
            side: direction,
            price,
            lots: self.settings.hedge_lot_size,
            tp,
            sl,
            ticket,
        });
        self.metrics
            .hedges
            .with_label_values(&[self.symbol.as_str()])
            .inc();
        info!(
            symbol = %self.symbol,
            pair = pair_idx,
            side = %direction,
            ticket,
            "hedge placed"
        );
        Ok(())
    }
}
