//! Ladder expansion and group initialization
//!
//! Two symmetric algorithms carry every expansion:
//! - `expand_bullish(n)`: complete pair n with its buy leg, seed pair n+1
//!   with a sell
//! - `expand_bearish(n)`: complete pair n with its sell leg, seed pair n-1
//!   with a buy
//!
//! Both run inside the engine mutex and re-check the completion cap and the
//! directional guard after acquiring it. At pre-step C == 2 the completion is
//! deliberately non-atomic: the leg fills, no pair is seeded, and the group
//! waits for its incomplete pair's TP to drive the next group's INIT.

use crate::config::{COMPLETION_CAP, GROUP_OFFSET};
use crate::core::{EngineError, OrderOutcome, OrderReason, Side, Trend};
use crate::engine::symbol::{EngineState, GroupMeta, SymbolEngine};
use crate::grouplog::{ExpandKind, GroupEvent, SeedLeg};
use tracing::{debug, info, warn};

impl SymbolEngine {
    /// Directional guard: once a group has an init source, only its pending
    /// retracement direction may expand. Group 0 has no source and permits
    /// both.
    pub(crate) fn expansion_allowed(&self, st: &EngineState, trend: Trend) -> bool {
        match st.groups.get(&st.current_group) {
            Some(meta) if meta.init_source.is_some() => {
                meta.pending_retracement == Some(trend)
            }
            _ => true,
        }
    }

    /// Per-tick step 4: fire an expansion when the quote reaches the edge
    /// incomplete pair's missing-leg level (within tolerance)
    pub(crate) async fn check_step_triggers(
        &self,
        st: &mut EngineState,
        quote: crate::core::TickQuote,
    ) -> Result<(), EngineError> {
        if st.accounting.c_highwater(st.current_group) >= COMPLETION_CAP {
            return Ok(());
        }
        let tol = self.settings.step_tolerance();

        if let Some(n) = st.pairs.highest_sell_only(st.current_group) {
            let level = st.pairs.get(n).map(|p| p.buy_price).unwrap_or(f64::MAX);
            if quote.ask >= level - tol && self.expansion_allowed(st, Trend::Bullish) {
                debug!(
                    symbol = %self.symbol,
                    pair = n,
                    ask = quote.ask,
                    level,
                    "bullish step trigger"
                );
                self.expand_bullish(st, n).await?;
            }
        }

        if let Some(n) = st.pairs.lowest_buy_only(st.current_group) {
            let level = st.pairs.get(n).map(|p| p.sell_price).unwrap_or(f64::MIN);
            if quote.bid <= level + tol && self.expansion_allowed(st, Trend::Bearish) {
                debug!(
                    symbol = %self.symbol,
                    pair = n,
                    bid = quote.bid,
                    level,
                    "bearish step trigger"
                );
                self.expand_bearish(st, n).await?;
            }
        }
        Ok(())
    }

    /// Complete pair `n` with its buy leg; seed pair `n+1` unless this
    /// completion is the non-atomic one (pre-step C == 2)
    pub(crate) async fn expand_bullish(
        &self,
        st: &mut EngineState,
        n: i32,
    ) -> Result<(), EngineError> {
        let c = st.accounting.c_highwater(st.current_group);
        if c >= COMPLETION_CAP {
            debug!(symbol = %self.symbol, c, "bullish expansion blocked at cap");
            return Ok(());
        }
        if !self.expansion_allowed(st, Trend::Bullish) {
            return Ok(());
        }
        let Some(pair) = st.pairs.get(n) else {
            return Ok(());
        };
        let (buy_filled, entry) = (pair.buy_filled, pair.buy_price);

        if !buy_filled {
            match self
                .send_market_leg(st, Side::Buy, n, OrderReason::Expand)
                .await?
            {
                OrderOutcome::Filled(ticket) => {
                    if let Some(pair) = st.pairs.get_mut(n) {
                        pair.set_filled(Side::Buy, ticket);
                        pair.advance_toggle();
                    }
                    self.persist_pair(st, n).await?;
                }
                OrderOutcome::Refused(_) => return Ok(()),
            }
        }

        let spread = self.settings.spread;
        let lots = self.settings.lot_sizes[0];
        let ticket = st.pairs.get(n).map(|p| p.buy_ticket).unwrap_or(0);

        if c == 2 {
            // Non-atomic completion: C goes 2 -> 3, nothing is seeded; the
            // group's incomplete pair TP now owns the next-group handoff
            info!(symbol = %self.symbol, pair = n, "non-atomic completion, C now 3");
            self.group_log.record(GroupEvent::Expansion {
                group: st.current_group,
                kind: ExpandKind::StepExpand,
                pair_idx: n,
                side: Side::Buy,
                entry,
                tp: entry + spread,
                sl: entry - spread,
                lots,
                ticket,
                seed: None,
                atomic: false,
                c_count: 3,
            });
            self.metrics
                .expansions
                .with_label_values(&[self.symbol.as_str(), "non_atomic"])
                .inc();
            return Ok(());
        }

        let seed_idx = n + 1;
        if st.pairs.contains(seed_idx) {
            debug!(symbol = %self.symbol, pair = seed_idx, "seed pair already exists");
            return Ok(());
        }
        let seed_sell = entry;
        let seed_buy = seed_sell + spread;
        let mut seed = crate::grid::GridPair::new(seed_idx, seed_buy, seed_sell, st.current_group);
        seed.next_action = Side::Sell;
        st.pairs.insert(seed);

        match self
            .send_market_leg(st, Side::Sell, seed_idx, OrderReason::Expand)
            .await?
        {
            OrderOutcome::Filled(seed_ticket) => {
                if let Some(pair) = st.pairs.get_mut(seed_idx) {
                    pair.set_filled(Side::Sell, seed_ticket);
                    pair.advance_toggle();
                }
                self.persist_pair(st, n).await?;
                self.persist_pair(st, seed_idx).await?;
                self.group_log.record(GroupEvent::Expansion {
                    group: st.current_group,
                    kind: ExpandKind::StepExpand,
                    pair_idx: n,
                    side: Side::Buy,
                    entry,
                    tp: entry + spread,
                    sl: entry - spread,
                    lots,
                    ticket,
                    seed: Some(SeedLeg {
                        pair_idx: seed_idx,
                        side: Side::Sell,
                        entry: seed_sell,
                        tp: seed_sell - spread,
                        sl: seed_sell + spread,
                        ticket: seed_ticket,
                    }),
                    atomic: true,
                    c_count: c + 1,
                });
                self.metrics
                    .expansions
                    .with_label_values(&[self.symbol.as_str(), "atomic"])
                    .inc();
            }
            OrderOutcome::Refused(_) => {
                warn!(symbol = %self.symbol, pair = seed_idx, "seed leg refused, pair left unseeded");
                self.persist_pair(st, seed_idx).await?;
            }
        }
        Ok(())
    }

    /// Mirror of [`Self::expand_bullish`]: complete pair `n` with its sell
    /// leg, seed pair `n-1` with a buy
    pub(crate) async fn expand_bearish(
        &self,
        st: &mut EngineState,
        n: i32,
    ) -> Result<(), EngineError> {
        let c = st.accounting.c_highwater(st.current_group);
        if c >= COMPLETION_CAP {
            debug!(symbol = %self.symbol, c, "bearish expansion blocked at cap");
            return Ok(());
        }
        if !self.expansion_allowed(st, Trend::Bearish) {
            return Ok(());
        }
        let Some(pair) = st.pairs.get(n) else {
            return Ok(());
        };
        let (sell_filled, entry) = (pair.sell_filled, pair.sell_price);

        if !sell_filled {
            match self
                .send_market_leg(st, Side::Sell, n, OrderReason::Expand)
                .await?
            {
                OrderOutcome::Filled(ticket) => {
                    if let Some(pair) = st.pairs.get_mut(n) {
                        pair.set_filled(Side::Sell, ticket);
                        pair.advance_toggle();
                    }
                    self.persist_pair(st, n).await?;
                }
                OrderOutcome::Refused(_) => return Ok(()),
            }
        }

        let spread = self.settings.spread;
        let lots = self.settings.lot_sizes[0];
        let ticket = st.pairs.get(n).map(|p| p.sell_ticket).unwrap_or(0);

        if c == 2 {
            info!(symbol = %self.symbol, pair = n, "non-atomic completion, C now 3");
            self.group_log.record(GroupEvent::Expansion {
                group: st.current_group,
                kind: ExpandKind::StepExpand,
                pair_idx: n,
                side: Side::Sell,
                entry,
                tp: entry - spread,
                sl: entry + spread,
                lots,
                ticket,
                seed: None,
                atomic: false,
                c_count: 3,
            });
            self.metrics
                .expansions
                .with_label_values(&[self.symbol.as_str(), "non_atomic"])
                .inc();
            return Ok(());
        }

        let seed_idx = n - 1;
        if st.pairs.contains(seed_idx) {
            debug!(symbol = %self.symbol, pair = seed_idx, "seed pair already exists");
            return Ok(());
        }
        let seed_buy = entry;
        let seed_sell = seed_buy - spread;
        let mut seed = crate::grid::GridPair::new(seed_idx, seed_buy, seed_sell, st.current_group);
        seed.next_action = Side::Buy;
        st.pairs.insert(seed);

        match self
            .send_market_leg(st, Side::Buy, seed_idx, OrderReason::Expand)
            .await?
        {
            OrderOutcome::Filled(seed_ticket) => {
                if let Some(pair) = st.pairs.get_mut(seed_idx) {
                    pair.set_filled(Side::Buy, seed_ticket);
                    pair.advance_toggle();
                }
                self.persist_pair(st, n).await?;
                self.persist_pair(st, seed_idx).await?;
                self.group_log.record(GroupEvent::Expansion {
                    group: st.current_group,
                    kind: ExpandKind::StepExpand,
                    pair_idx: n,
                    side: Side::Sell,
                    entry,
                    tp: entry - spread,
                    sl: entry + spread,
                    lots,
                    ticket,
                    seed: Some(SeedLeg {
                        pair_idx: seed_idx,
                        side: Side::Buy,
                        entry: seed_buy,
                        tp: seed_buy + spread,
                        sl: seed_buy - spread,
                        ticket: seed_ticket,
                    }),
                    atomic: true,
                    c_count: c + 1,
                });
                self.metrics
                    .expansions
                    .with_label_values(&[self.symbol.as_str(), "atomic"])
                    .inc();
            }
            OrderOutcome::Refused(_) => {
                warn!(symbol = %self.symbol, pair = seed_idx, "seed leg refused, pair left unseeded");
                self.persist_pair(st, seed_idx).await?;
            }
        }
        Ok(())
    }

    /// TP-driven expansion for a completed pair's TP: find the group's edge
    /// incomplete pair in the event's direction; at pre-event C == 2 place
    /// only the completing leg, otherwise complete and seed atomically with
    /// the seeded prices measured from the event price
    pub(crate) async fn execute_tp_expansion(
        &self,
        st: &mut EngineState,
        group: u32,
        event_price: f64,
        trend: Trend,
        c: u32,
    ) -> Result<(), EngineError> {
        if st.graceful_stop {
            info!(symbol = %self.symbol, "graceful stop active, TP expansion blocked");
            return Ok(());
        }
        let spread = self.settings.spread;
        let lots = self.settings.lot_sizes[0];

        let (complete_idx, complete_side, seed_idx, seed_side) = match trend {
            Trend::Bullish => {
                let Some(edge) = st.pairs.highest_sell_only(group) else {
                    debug!(symbol = %self.symbol, group, "no bullish edge for TP expansion");
                    return Ok(());
                };
                (edge, Side::Buy, edge + 1, Side::Sell)
            }
            Trend::Bearish => {
                let Some(edge) = st.pairs.lowest_buy_only(group) else {
                    debug!(symbol = %self.symbol, group, "no bearish edge for TP expansion");
                    return Ok(());
                };
                (edge, Side::Sell, edge - 1, Side::Buy)
            }
        };

        // Completing leg
        let mut complete_ticket = 0u64;
        if !st
            .pairs
            .get(complete_idx)
            .map(|p| p.leg_filled(complete_side))
            .unwrap_or(true)
        {
            match self
                .send_market_leg(st, complete_side, complete_idx, OrderReason::TpExpand)
                .await?
            {
                OrderOutcome::Filled(ticket) => {
                    complete_ticket = ticket;
                    if let Some(pair) = st.pairs.get_mut(complete_idx) {
                        pair.set_filled(complete_side, ticket);
                        pair.advance_toggle();
                    }
                    self.persist_pair(st, complete_idx).await?;
                }
                OrderOutcome::Refused(_) => return Ok(()),
            }
        }
        let entry = st
            .pairs
            .get(complete_idx)
            .map(|p| p.level(complete_side))
            .unwrap_or(event_price);
        let (tp, sl) = match complete_side {
            Side::Buy => (entry + spread, entry - spread),
            Side::Sell => (entry - spread, entry + spread),
        };

        if c == 2 {
            info!(
                symbol = %self.symbol,
                pair = complete_idx,
                "TP expansion at C==2: completing leg only"
            );
            self.group_log.record(GroupEvent::Expansion {
                group,
                kind: ExpandKind::TpExpand,
                pair_idx: complete_idx,
                side: complete_side,
                entry,
                tp,
                sl,
                lots,
                ticket: complete_ticket,
                seed: None,
                atomic: false,
                c_count: 3,
            });
            self.metrics
                .expansions
                .with_label_values(&[self.symbol.as_str(), "non_atomic"])
                .inc();
            return Ok(());
        }

        if st.pairs.contains(seed_idx) {
            debug!(symbol = %self.symbol, pair = seed_idx, "seed pair already exists");
            return Ok(());
        }
        let (seed_buy, seed_sell) = match seed_side {
            Side::Sell => (event_price + spread, event_price),
            Side::Buy => (event_price, event_price - spread),
        };
        let seed_entry = match seed_side {
            Side::Buy => seed_buy,
            Side::Sell => seed_sell,
        };
        let mut seed = crate::grid::GridPair::new(seed_idx, seed_buy, seed_sell, group);
        seed.next_action = seed_side;
        st.pairs.insert(seed);

        match self
            .send_market_leg(st, seed_side, seed_idx, OrderReason::TpExpand)
            .await?
        {
            OrderOutcome::Filled(seed_ticket) => {
                if let Some(pair) = st.pairs.get_mut(seed_idx) {
                    pair.set_filled(seed_side, seed_ticket);
                    pair.advance_toggle();
                }
                self.persist_pair(st, seed_idx).await?;
                self.group_log.record(GroupEvent::Expansion {
                    group,
                    kind: ExpandKind::TpExpand,
                    pair_idx: complete_idx,
                    side: complete_side,
                    entry,
                    tp,
                    sl,
                    lots,
                    ticket: complete_ticket,
                    seed: Some(SeedLeg {
                        pair_idx: seed_idx,
                        side: seed_side,
                        entry: seed_entry,
                        tp: match seed_side {
                            Side::Buy => seed_buy + spread,
                            Side::Sell => seed_sell - spread,
                        },
                        sl: match seed_side {
                            Side::Buy => seed_buy - spread,
                            Side::Sell => seed_sell + spread,
                        },
                        ticket: seed_ticket,
                    }),
                    atomic: true,
                    c_count: c + 1,
                });
                self.metrics
                    .expansions
                    .with_label_values(&[self.symbol.as_str(), "atomic"])
                    .inc();
            }
            OrderOutcome::Refused(_) => {
                warn!(symbol = %self.symbol, pair = seed_idx, "TP seed refused, pair left unseeded");
                self.persist_pair(st, seed_idx).await?;
            }
        }
        Ok(())
    }

    /// Initialize a group: one buy pair and one sell pair at the anchor,
    /// committed only after both legs fill, with an optional non-atomic
    /// back-fill for the prior group's abandoned partner leg. Returns whether
    /// the group was committed.
    pub(crate) async fn execute_group_init(
        &self,
        st: &mut EngineState,
        group_id: u32,
        anchor: f64,
        source: Trend,
        trigger_pair: Option<i32>,
    ) -> Result<bool, EngineError> {
        if st.graceful_stop {
            info!(symbol = %self.symbol, group_id, "graceful stop active, INIT blocked");
            return Ok(false);
        }
        let spread = self.settings.spread;

        // Group 0 carries no init source: it is the only group allowed to
        // expand both ways
        let meta = if group_id == 0 {
            GroupMeta {
                init_source: None,
                pending_retracement: None,
                anchor,
            }
        } else {
            GroupMeta {
                init_source: Some(source),
                pending_retracement: Some(source.opposite()),
                anchor,
            }
        };
        st.groups.insert(group_id, meta);
        info!(
            symbol = %self.symbol,
            group_id,
            anchor,
            source = %source,
            "group INIT"
        );

        let offset = group_id as i32 * GROUP_OFFSET;
        let b_idx = offset;
        let s_idx = offset + 1;

        // Buy pair at the anchor
        let mut pair_b = crate::grid::GridPair::new(b_idx, anchor, anchor - spread, group_id);
        pair_b.next_action = Side::Buy;
        st.pairs.insert(pair_b);
        let ticket_b = match self
            .send_market_leg(st, Side::Buy, b_idx, OrderReason::Init)
            .await
        {
            Ok(OrderOutcome::Filled(t)) => t,
            Ok(OrderOutcome::Refused(reason)) => {
                warn!(symbol = %self.symbol, group_id, ?reason, "INIT buy refused, rolling back");
                st.pairs.remove(b_idx);
                return Ok(false);
            }
            Err(e) => {
                st.pairs.remove(b_idx);
                return Err(e);
            }
        };
        if let Some(pair) = st.pairs.get_mut(b_idx) {
            pair.set_filled(Side::Buy, ticket_b);
            pair.advance_toggle();
        }

        // Sell pair seeded at the same anchor
        let mut pair_s = crate::grid::GridPair::new(s_idx, anchor + spread, anchor, group_id);
        pair_s.next_action = Side::Sell;
        st.pairs.insert(pair_s);
        let ticket_s = match self
            .send_market_leg(st, Side::Sell, s_idx, OrderReason::Init)
            .await
        {
            Ok(OrderOutcome::Filled(t)) => Some(t),
            Ok(OrderOutcome::Refused(reason)) => {
                warn!(symbol = %self.symbol, group_id, ?reason, "INIT sell refused");
                None
            }
            Err(e) => {
                warn!(symbol = %self.symbol, group_id, "INIT sell failed: {e}");
                None
            }
        };
        let Some(ticket_s) = ticket_s else {
            // Roll back the half-initialized group: close the buy, forget
            // both pairs and the registered ticket
            if let Err(e) = self
                .broker
                .close_position(ticket_b, self.settings.deviation)
                .await
            {
                warn!(symbol = %self.symbol, ticket = ticket_b, "INIT rollback close failed: {e}");
            }
            st.tickets.remove(ticket_b);
            if let Some(repo) = &st.repo {
                repo.delete_ticket(ticket_b).await?;
            }
            st.pairs.remove(b_idx);
            st.pairs.remove(s_idx);
            return Ok(false);
        };
        if let Some(pair) = st.pairs.get_mut(s_idx) {
            pair.set_filled(Side::Sell, ticket_s);
            pair.advance_toggle();
        }

        // Commit
        st.current_group = group_id;
        st.anchor_price = anchor;
        st.center_price = anchor;
        st.iteration += 1;

        self.group_log.record(GroupEvent::Init {
            group: group_id,
            anchor,
            bullish_source: source == Trend::Bullish,
            b_idx,
            s_idx,
            b_ticket: ticket_b,
            s_ticket: ticket_s,
            lots: self.settings.lot_sizes[0],
        });
        self.metrics
            .group_inits
            .with_label_values(&[self.symbol.as_str()])
            .inc();

        self.persist_pair(st, b_idx).await?;
        self.persist_pair(st, s_idx).await?;
        self.persist_state(st).await?;

        // Non-atomic back-fill: the pair the prior group left incomplete
        // when it reached the cap gets its missing leg now
        if let Some(trigger_idx) = trigger_pair {
            if group_id > 0 {
                self.backfill_prior_group(st, group_id, trigger_idx, source)
                    .await?;
            }
        }
        Ok(true)
    }

    /// Fire the single completing leg for the prior group's abandoned pair.
    /// The cap gate still applies; a refusal leaves the pair incomplete.
    async fn backfill_prior_group(
        &self,
        st: &mut EngineState,
        group_id: u32,
        trigger_idx: i32,
        source: Trend,
    ) -> Result<(), EngineError> {
        // An atomic bullish step is B(n) + S(n+1); the non-atomic one left
        // B(n-1)'s pair without its sell. Mirrored for bearish.
        let (completing_idx, completing_leg) = match source {
            Trend::Bullish => (trigger_idx - 1, Side::Sell),
            Trend::Bearish => (trigger_idx + 1, Side::Buy),
        };
        let needs = st.pairs.get(completing_idx).map(|p| {
            p.group_id < group_id
                && p.leg_filled(completing_leg.opposite())
                && !p.leg_filled(completing_leg)
        });
        if needs != Some(true) {
            return Ok(());
        }

        match self
            .send_market_leg(st, completing_leg, completing_idx, OrderReason::InitComplete)
            .await?
        {
            OrderOutcome::Filled(ticket) => {
                let mut entry = 0.0;
                if let Some(pair) = st.pairs.get_mut(completing_idx) {
                    pair.set_filled(completing_leg, ticket);
                    pair.advance_toggle();
                    entry = pair.trigger_level(completing_leg);
                }
                self.persist_pair(st, completing_idx).await?;
                self.group_log.record(GroupEvent::NonAtomicComplete {
                    group: group_id - 1,
                    pair_idx: completing_idx,
                    leg: completing_leg,
                    entry,
                    reason: "INIT_COMPLETE",
                });
                info!(
                    symbol = %self.symbol,
                    pair = completing_idx,
                    leg = %completing_leg,
                    "prior-group back-fill placed"
                );
            }
            OrderOutcome::Refused(reason) => {
                info!(
                    symbol = %self.symbol,
                    pair = completing_idx,
                    ?reason,
                    "prior-group back-fill refused"
                );
            }
        }
        Ok(())
    }
}
