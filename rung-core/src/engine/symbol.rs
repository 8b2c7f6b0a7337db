//! Engine core: state, tick dispatch, the market-order contract, lifecycle
//!
//! The remaining per-tick machinery lives in sibling modules (`drops`,
//! `expansion`, `hedge`, `toggle`) as further `impl SymbolEngine` blocks; this
//! file owns the state definition, the phase machine, order submission and
//! persistence.

use crate::config::{SymbolSettings, COMPLETION_CAP, MAGIC_BASE};
use crate::core::{
    BrokerError, EngineError, OrderOutcome, OrderReason, Phase, RefusalReason, Side, TickQuote,
    TicketInfo, TouchFlags, Trend,
};
use crate::engine::accounting::CompletionAccountant;
use crate::engine::tickets::TicketRegistry;
use crate::execution::{BrokerAdapter, FillingMode, MarketOrderRequest};
use crate::grid::{GridPair, PairStore};
use crate::grouplog::{GroupEvent, GroupLog};
use crate::monitoring::EngineMetrics;
use crate::persistence::{HistoryEvent, Repository, StateRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared collaborators handed to each engine
#[derive(Clone)]
pub struct EngineDeps {
    pub broker: Arc<dyn BrokerAdapter>,
    pub group_log: GroupLog,
    pub metrics: Arc<EngineMetrics>,
    pub data_dir: PathBuf,
    /// Delete any stale registry file on start instead of resuming
    pub fresh_session: bool,
}

/// Derived per-group state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMeta {
    /// Which side's TP created the group; `None` for group 0
    pub init_source: Option<Trend>,
    /// Always opposite of `init_source`
    pub pending_retracement: Option<Trend>,
    /// Price at which the group's INIT fired
    pub anchor: f64,
}

/// Everything that goes into `symbol_state.metadata_json`
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateMetadata {
    groups: BTreeMap<u32, GroupMeta>,
    c_highwater: BTreeMap<u32, u32>,
    pairs_tp_expanded: BTreeSet<i32>,
    incomplete_init_fired: BTreeSet<i32>,
    triggered_groups: BTreeSet<u32>,
}

/// Mutable engine state, guarded by the engine mutex
pub(crate) struct EngineState {
    pub(crate) phase: Phase,
    pub(crate) center_price: f64,
    pub(crate) anchor_price: f64,
    pub(crate) current_group: u32,
    pub(crate) iteration: u32,
    pub(crate) graceful_stop: bool,
    pub(crate) current_price: f64,
    pub(crate) open_positions_count: u32,
    pub(crate) pairs: PairStore,
    pub(crate) tickets: TicketRegistry,
    pub(crate) accounting: CompletionAccountant,
    pub(crate) groups: BTreeMap<u32, GroupMeta>,
    /// Pairs that already fired TP-driven expansion; permanently latched
    pub(crate) pairs_tp_expanded: BTreeSet<i32>,
    /// Incomplete pairs that already fired a group INIT; permanently latched
    pub(crate) incomplete_init_fired: BTreeSet<i32>,
    /// Groups whose INIT the saturation check already forced
    pub(crate) triggered_groups: BTreeSet<u32>,
    pub(crate) last_logged_c: BTreeMap<u32, u32>,
    pub(crate) repo: Option<Repository>,
}

impl EngineState {
    fn fresh() -> Self {
        Self {
            phase: Phase::Init,
            center_price: 0.0,
            anchor_price: 0.0,
            current_group: 0,
            iteration: 1,
            graceful_stop: false,
            current_price: 0.0,
            open_positions_count: 0,
            pairs: PairStore::new(),
            tickets: TicketRegistry::new(),
            accounting: CompletionAccountant::new(),
            groups: BTreeMap::new(),
            pairs_tp_expanded: BTreeSet::new(),
            incomplete_init_fired: BTreeSet::new(),
            triggered_groups: BTreeSet::new(),
            last_logged_c: BTreeMap::new(),
            repo: None,
        }
    }
}

/// Cheap status view for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub symbol: String,
    pub running: bool,
    pub phase: String,
    pub current_price: f64,
    pub open_positions: u32,
    pub pairs: usize,
    pub iteration: u32,
    pub current_group: u32,
    pub graceful_stop: bool,
}

/// Deep state view for tests and the debug tooling
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub phase: Phase,
    pub center_price: f64,
    pub anchor_price: f64,
    pub current_group: u32,
    pub graceful_stop: bool,
    pub pairs: Vec<GridPair>,
    pub tickets: Vec<(u64, TicketInfo, TouchFlags)>,
    pub c_highwater: BTreeMap<u32, u32>,
    pub groups: BTreeMap<u32, GroupMeta>,
}

/// Per-symbol grid engine
pub struct SymbolEngine {
    pub(crate) symbol: String,
    pub(crate) settings: SymbolSettings,
    pub(crate) broker: Arc<dyn BrokerAdapter>,
    pub(crate) group_log: GroupLog,
    pub(crate) metrics: Arc<EngineMetrics>,
    data_dir: PathBuf,
    fresh_session: bool,
    pub(crate) state: Mutex<EngineState>,
    running: AtomicBool,
    busy: AtomicBool,
}

impl SymbolEngine {
    pub fn new(symbol: &str, settings: SymbolSettings, deps: EngineDeps) -> Self {
        Self {
            symbol: symbol.to_string(),
            settings,
            broker: deps.broker,
            group_log: deps.group_log,
            metrics: deps.metrics,
            data_dir: deps.data_dir,
            fresh_session: deps.fresh_session,
            state: Mutex::new(EngineState::fresh()),
            running: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn settings(&self) -> &SymbolSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    // --- lifecycle --------------------------------------------------------

    /// Open the repository, select the symbol, recover persisted state and
    /// mark the engine running. Fatal errors surface to the orchestrator.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut st = self.state.lock().await;
        let path = Repository::path_for(&self.data_dir, &self.symbol);
        if self.fresh_session {
            Repository::delete_file(&path)?;
            debug!(symbol = %self.symbol, "stale registry removed for fresh session");
        }
        let repo = Repository::open(&path, &self.symbol)
            .await
            .map_err(|e| EngineError::Fatal(format!("repository unavailable: {e}")))?;

        if !self.broker.select_symbol(&self.symbol).await {
            return Err(EngineError::Fatal(format!(
                "broker cannot select symbol {}",
                self.symbol
            )));
        }

        match repo.load_state().await? {
            Some(row) => {
                st.phase = row.phase;
                st.center_price = row.center_price;
                st.iteration = row.iteration;
                st.current_group = row.current_group;
                st.anchor_price = row.anchor_price;
                st.graceful_stop = row.graceful_stop;

                let meta: StateMetadata =
                    serde_json::from_str(&row.metadata_json).unwrap_or_default();
                st.groups = meta.groups;
                st.accounting.restore(meta.c_highwater);
                st.pairs_tp_expanded = meta.pairs_tp_expanded;
                st.incomplete_init_fired = meta.incomplete_init_fired;
                st.triggered_groups = meta.triggered_groups;

                let mut pairs = PairStore::new();
                for pair in repo.load_pairs().await? {
                    pairs.insert(pair);
                }
                let repaired = pairs.repair();
                if repaired > 0 {
                    warn!(symbol = %self.symbol, repaired, "pair invariants repaired on load");
                }
                st.pairs = pairs;
                if repaired > 0 {
                    for pair in st.pairs.values() {
                        repo.upsert_pair(pair).await?;
                    }
                }

                for (ticket, info, touch) in repo.load_tickets().await? {
                    st.tickets.restore(ticket, info, touch);
                }
                info!(
                    symbol = %self.symbol,
                    phase = %st.phase,
                    group = st.current_group,
                    pairs = st.pairs.len(),
                    tickets = st.tickets.len(),
                    "state recovered"
                );
            }
            None => {
                repo.clear_tickets().await?;
                info!(symbol = %self.symbol, "fresh start");
            }
        }
        st.repo = Some(repo);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Graceful stop: no new groups; existing pairs keep toggling until
    /// max_positions or a hedge, then the engine halts itself.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut st = self.state.lock().await;
        st.graceful_stop = true;
        info!(symbol = %self.symbol, "graceful stop initiated");
        self.persist_state(&st).await
    }

    /// Immediately close every open position and pending order, reset the
    /// in-memory state and the repository
    pub async fn terminate(&self) -> Result<(), EngineError> {
        let mut st = self.state.lock().await;
        self.running.store(false, Ordering::SeqCst);

        let positions = self.broker.open_positions(&self.symbol).await;
        let mut closed = 0usize;
        for pos in &positions {
            match self.broker.close_position(pos.ticket, self.settings.deviation).await {
                Ok(()) => closed += 1,
                Err(e) => warn!(symbol = %self.symbol, ticket = pos.ticket, "close failed: {e}"),
            }
        }
        for pair in st.pairs.values() {
            for ticket in [pair.buy_pending_ticket, pair.sell_pending_ticket] {
                if ticket != 0 {
                    let _ = self.broker.cancel_order(ticket).await;
                }
            }
        }
        info!(
            symbol = %self.symbol,
            closed,
            total = positions.len(),
            "terminate: positions closed"
        );

        let repo = st.repo.take();
        *st = EngineState::fresh();
        if let Some(repo) = repo {
            repo.reset().await?;
            st.repo = Some(repo);
        }
        Ok(())
    }

    /// Close the repository and delete its file
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let mut st = self.state.lock().await;
        self.running.store(false, Ordering::SeqCst);
        if let Some(repo) = st.repo.take() {
            let path = repo.file_path().to_path_buf();
            repo.close().await;
            Repository::delete_file(&path)?;
            info!(symbol = %self.symbol, "repository closed and removed");
        }
        Ok(())
    }

    pub async fn status(&self) -> EngineStatus {
        let st = self.state.lock().await;
        EngineStatus {
            symbol: self.symbol.clone(),
            running: self.is_running(),
            phase: st.phase.to_string(),
            current_price: st.current_price,
            open_positions: st.open_positions_count,
            pairs: st.pairs.len(),
            iteration: st.iteration,
            current_group: st.current_group,
            graceful_stop: st.graceful_stop,
        }
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let st = self.state.lock().await;
        EngineSnapshot {
            phase: st.phase,
            center_price: st.center_price,
            anchor_price: st.anchor_price,
            current_group: st.current_group,
            graceful_stop: st.graceful_stop,
            pairs: st.pairs.values().cloned().collect(),
            tickets: st
                .tickets
                .iter()
                .map(|(t, info)| (*t, *info, st.tickets.touch_flags(*t)))
                .collect(),
            c_highwater: st.accounting.snapshot().clone(),
            groups: st.groups.clone(),
        }
    }

    // --- tick entry -------------------------------------------------------

    /// Control-surface entry: identical to a broker tick
    pub async fn inject_tick(&self, ask: f64, bid: f64, positions_count: u32) {
        self.on_tick(TickQuote::new(ask, bid, positions_count)).await;
    }

    /// Process one tick. Re-entrant calls while a tick is executing are
    /// dropped without queueing; errors abort the tick and the next one
    /// retries.
    pub async fn on_tick(&self, quote: TickQuote) {
        if !self.is_running() {
            return;
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            self.metrics
                .ticks_dropped
                .with_label_values(&[self.symbol.as_str()])
                .inc();
            return;
        }
        self.metrics
            .ticks_total
            .with_label_values(&[self.symbol.as_str()])
            .inc();

        let result = self.process_tick(quote).await;
        self.busy.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            self.metrics
                .step_errors
                .with_label_values(&[self.symbol.as_str()])
                .inc();
            if e.is_fatal() {
                tracing::error!(symbol = %self.symbol, "fatal engine error, halting: {e}");
                self.running.store(false, Ordering::SeqCst);
            } else {
                warn!(symbol = %self.symbol, "tick step aborted: {e}");
            }
        }
    }

    async fn process_tick(&self, quote: TickQuote) -> Result<(), EngineError> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        st.current_price = quote.ask;
        st.open_positions_count = quote.positions_count;

        if st.graceful_stop && self.graceful_stop_complete(st).await? {
            return Ok(());
        }

        match st.phase {
            Phase::Init => self.handle_init(st, quote).await,
            Phase::WaitingCenter => self.handle_waiting_center(st, quote).await,
            Phase::Expanding => {
                // The group system expands through step triggers; nothing to
                // stage here
                st.phase = Phase::Running;
                self.persist_state(st).await
            }
            Phase::Running => self.handle_running(st, quote).await,
        }
    }

    // --- phase handlers ---------------------------------------------------

    async fn handle_init(
        &self,
        st: &mut EngineState,
        quote: TickQuote,
    ) -> Result<(), EngineError> {
        if !st.pairs.is_empty() {
            // Recovered into INIT with pairs on the books: the running loop
            // owns them from here
            info!(symbol = %self.symbol, pairs = st.pairs.len(), "init skipped, pairs recovered");
            st.phase = Phase::Running;
            return self.persist_state(st).await;
        }

        let committed = self
            .execute_group_init(st, st.current_group, quote.ask, Trend::Bullish, None)
            .await?;
        if committed {
            st.phase = Phase::Running;
        }
        self.persist_state(st).await
    }

    /// Legacy recovery phase: a persisted session from the pending-order era
    /// may re-enter here with pair 0 partially filled
    async fn handle_waiting_center(
        &self,
        st: &mut EngineState,
        quote: TickQuote,
    ) -> Result<(), EngineError> {
        let Some(pair0) = st.pairs.get(0) else {
            st.phase = Phase::Init;
            return self.persist_state(st).await;
        };
        let (buy_filled, sell_filled) = (pair0.buy_filled, pair0.sell_filled);
        let (buy_price, sell_price) = (pair0.buy_price, pair0.sell_price);

        if !buy_filled && quote.ask >= buy_price {
            if let OrderOutcome::Filled(ticket) = self
                .send_market_leg(st, Side::Buy, 0, OrderReason::Init)
                .await?
            {
                let spread = self.settings.spread;
                if let Some(pair) = st.pairs.get_mut(0) {
                    pair.set_filled(Side::Buy, ticket);
                    pair.advance_toggle();
                    if !pair.sell_filled {
                        // Re-anchor the sell one spread under the executed buy
                        pair.sell_price = pair.buy_price - spread;
                    }
                }
                self.persist_pair(st, 0).await?;
            }
        } else if !sell_filled && quote.bid <= sell_price {
            if let OrderOutcome::Filled(ticket) = self
                .send_market_leg(st, Side::Sell, 0, OrderReason::Init)
                .await?
            {
                let spread = self.settings.spread;
                if let Some(pair) = st.pairs.get_mut(0) {
                    pair.set_filled(Side::Sell, ticket);
                    pair.advance_toggle();
                    if !pair.buy_filled {
                        pair.buy_price = pair.sell_price + spread;
                    }
                }
                self.persist_pair(st, 0).await?;
            }
        }

        if let Some(pair0) = st.pairs.get(0) {
            if pair0.is_complete() {
                st.center_price = (pair0.buy_price + pair0.sell_price) / 2.0;
                st.phase = Phase::Expanding;
                info!(symbol = %self.symbol, center = st.center_price, "center pair complete");
            }
        }
        self.persist_state(st).await
    }

    /// The steady-state loop; step order is load-bearing (see module docs)
    async fn handle_running(
        &self,
        st: &mut EngineState,
        quote: TickQuote,
    ) -> Result<(), EngineError> {
        // [1] Latch touch flags before anything can drop
        let latched = st.tickets.update_touch(quote.ask, quote.bid);
        for ticket in latched {
            if let (Some(repo), Some(info)) = (&st.repo, st.tickets.lookup(ticket)) {
                repo.upsert_ticket(ticket, info, &st.tickets.touch_flags(ticket))
                    .await?;
            }
        }

        // [2] Drop detection and TP/SL routing
        let open = self.broker.open_tickets(&self.symbol).await;
        self.process_drops(st, quote, &open).await?;

        // Refresh completion accounting for the active group
        let open = self.broker.open_tickets(&self.symbol).await;
        let live = st
            .accounting
            .live_c(st.current_group, &open, &st.tickets, &st.pairs);
        self.metrics
            .live_completed
            .with_label_values(&[self.symbol.as_str()])
            .set(live as i64);
        self.metrics
            .active_pairs
            .with_label_values(&[self.symbol.as_str()])
            .set(st.pairs.len() as i64);
        if st.last_logged_c.get(&st.current_group) != Some(&live) {
            st.last_logged_c.insert(st.current_group, live);
            self.group_log.record(GroupEvent::CCount {
                group: st.current_group,
                c: live,
            });
        }

        // [3] Saturation check; the source restricts this to group 0
        if st.current_group == 0
            && st.accounting.c_highwater(0) >= COMPLETION_CAP
            && !st.triggered_groups.contains(&1)
        {
            self.force_artificial_tp(st, quote).await?;
            st.triggered_groups.insert(1);
        }

        // [4] Step-trigger expansion
        if !st.graceful_stop {
            self.check_step_triggers(st, quote).await?;
        }

        // [5] Hedge supervisor
        self.enforce_hedges(st, quote).await?;

        // [6] Toggle triggers on completed pairs
        self.check_toggle_triggers(st, quote).await?;

        self.persist_state(st).await
    }

    // --- graceful stop ----------------------------------------------------

    /// True once every pair holding a position has reached max_positions and
    /// carries no hedge; flips the engine off
    async fn graceful_stop_complete(&self, st: &mut EngineState) -> Result<bool, EngineError> {
        for pair in st.pairs.values() {
            // Retired pairs cannot toggle further; they never block the stop
            if pair.tp_blocked {
                continue;
            }
            if pair.buy_filled || pair.sell_filled {
                if pair.hedge_active || pair.hedge_ticket != 0 {
                    return Ok(false);
                }
                if pair.trade_count < self.settings.max_positions {
                    return Ok(false);
                }
            }
        }
        st.graceful_stop = false;
        self.running.store(false, Ordering::SeqCst);
        info!(symbol = %self.symbol, "graceful stop complete, engine halted");
        self.persist_state(st).await?;
        Ok(true)
    }

    // --- market-order contract --------------------------------------------

    /// Completion-cap gate: refuse an order that would newly complete a pair
    /// while the group already holds the cap. Hedging legs
    /// (trade_count + 1 >= max_positions) and re-trades on already-complete
    /// pairs pass.
    pub(crate) async fn can_place_leg(&self, st: &mut EngineState, pair_idx: i32) -> bool {
        let Some(pair) = st.pairs.get(pair_idx) else {
            // New-pair creation is gated by the callers, not here
            return true;
        };
        let (group, trade_count, incomplete) =
            (pair.group_id, pair.trade_count, pair.is_incomplete());

        let open = self.broker.open_tickets(&self.symbol).await;
        let c = st.accounting.live_c(group, &open, &st.tickets, &st.pairs);
        if c >= COMPLETION_CAP {
            if trade_count + 1 >= self.settings.max_positions {
                // The hedging leg may proceed; it neutralizes the pair
                return true;
            }
            if incomplete {
                debug!(
                    symbol = %self.symbol,
                    pair = pair_idx,
                    group,
                    c,
                    "order refused by completion cap"
                );
                return false;
            }
            // Already complete: a toggle re-trade does not raise C
        }
        true
    }

    /// Send one grid leg at market and register the resulting position.
    ///
    /// Flag updates and toggle advancement stay with the caller; this
    /// function owns the cap gate, stop computation and clamping, position
    /// ticket resolution, registry insertion and the OPEN history row.
    pub(crate) async fn send_market_leg(
        &self,
        st: &mut EngineState,
        side: Side,
        pair_idx: i32,
        reason: OrderReason,
    ) -> Result<OrderOutcome, EngineError> {
        if !self.can_place_leg(st, pair_idx).await {
            self.metrics
                .orders_refused
                .with_label_values(&[self.symbol.as_str(), RefusalReason::CompletionCap.as_str()])
                .inc();
            return Ok(OrderOutcome::Refused(RefusalReason::CompletionCap));
        }

        let quote = self
            .broker
            .tick(&self.symbol)
            .await
            .ok_or_else(|| BrokerError::NoTick {
                symbol: self.symbol.clone(),
            })?;

        let (mut volume, grid_price) = match st.pairs.get(pair_idx) {
            Some(pair) => match pair.next_lot(&self.settings.lot_sizes) {
                Some(v) => (v, pair.level(side)),
                None => {
                    self.metrics
                        .orders_refused
                        .with_label_values(&[
                            self.symbol.as_str(),
                            RefusalReason::LotLadderExhausted.as_str(),
                        ])
                        .inc();
                    return Ok(OrderOutcome::Refused(RefusalReason::LotLadderExhausted));
                }
            },
            None => (
                self.settings.lot_sizes[0],
                match side {
                    Side::Buy => quote.ask,
                    Side::Sell => quote.bid,
                },
            ),
        };

        // TP/SL from the execution price, then pushed outward to satisfy the
        // venue's stops level
        let exec = match side {
            Side::Buy => quote.ask,
            Side::Sell => quote.bid,
        };
        let (tp_pips, sl_pips) = self.settings.pips_for(side);
        let (mut tp, mut sl) = match side {
            Side::Buy => (exec + tp_pips, exec - sl_pips),
            Side::Sell => (exec - tp_pips, exec + sl_pips),
        };
        if let Some(spec) = self.broker.symbol_info(&self.symbol).await {
            (tp, sl) = clamp_stops_outward(side, tp, sl, quote, spec.min_stop_distance());
            volume = spec.normalize_lot(volume);
        }

        // The magic encodes the *pair's* group so broker positions stay
        // attributable across group transitions
        let magic_group = st
            .pairs
            .get(pair_idx)
            .map(|p| p.group_id)
            .unwrap_or(st.current_group);
        let magic = MAGIC_BASE + magic_group as i64;
        let comment = format!("{}{} Grp{}", side.tag(), pair_idx, magic_group);
        let sent = self
            .broker
            .send_market(MarketOrderRequest {
                symbol: self.symbol.clone(),
                side,
                volume,
                price: grid_price,
                sl,
                tp,
                magic,
                comment,
                deviation: self.settings.deviation,
                filling: FillingMode::FillOrKill,
            })
            .await?;
        let Some(order_ticket) = sent else {
            self.metrics
                .orders_refused
                .with_label_values(&[self.symbol.as_str(), RefusalReason::BrokerRejected.as_str()])
                .inc();
            return Ok(OrderOutcome::Refused(RefusalReason::BrokerRejected));
        };

        // Resolve the position ticket: the magic-matching open position we
        // are not tracking yet; fall back to the returned ticket
        let position_ticket = self
            .broker
            .open_positions(&self.symbol)
            .await
            .iter()
            .find(|p| p.magic == magic && !st.tickets.contains(p.ticket))
            .map(|p| p.ticket)
            .unwrap_or(order_ticket);

        let info = TicketInfo {
            pair_index: pair_idx,
            leg: side,
            entry: exec,
            tp,
            sl,
        };
        st.tickets.register(position_ticket, info);
        if let Some(pair) = st.pairs.get_mut(pair_idx) {
            pair.lock_entry(side, exec);
        }
        if let Some(repo) = &st.repo {
            repo.upsert_ticket(position_ticket, &info, &TouchFlags::default())
                .await?;
            repo.append_history(&HistoryEvent::now(
                "OPEN",
                pair_idx,
                side.tag(),
                exec,
                volume,
                position_ticket,
                format!("tp={tp:.2} sl={sl:.2} grp={} {}", st.current_group, reason),
            ))
            .await?;
        }

        info!(
            symbol = %self.symbol,
            pair = pair_idx,
            side = %side,
            price = exec,
            ticket = position_ticket,
            reason = %reason,
            "OPEN"
        );
        self.metrics
            .orders_opened
            .with_label_values(&[self.symbol.as_str(), side.as_str()])
            .inc();
        Ok(OrderOutcome::Filled(position_ticket))
    }

    // --- persistence ------------------------------------------------------

    pub(crate) async fn persist_state(&self, st: &EngineState) -> Result<(), EngineError> {
        let Some(repo) = &st.repo else {
            return Ok(());
        };
        let metadata = StateMetadata {
            groups: st.groups.clone(),
            c_highwater: st.accounting.snapshot().clone(),
            pairs_tp_expanded: st.pairs_tp_expanded.clone(),
            incomplete_init_fired: st.incomplete_init_fired.clone(),
            triggered_groups: st.triggered_groups.clone(),
        };
        let row = StateRow {
            phase: st.phase,
            center_price: st.center_price,
            iteration: st.iteration,
            current_group: st.current_group,
            anchor_price: st.anchor_price,
            graceful_stop: st.graceful_stop,
            metadata_json: serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".into()),
        };
        repo.save_state(&row).await?;
        for pair in st.pairs.values() {
            repo.upsert_pair(pair).await?;
        }
        Ok(())
    }

    pub(crate) async fn persist_pair(
        &self,
        st: &EngineState,
        pair_idx: i32,
    ) -> Result<(), EngineError> {
        if let (Some(repo), Some(pair)) = (&st.repo, st.pairs.get(pair_idx)) {
            repo.upsert_pair(pair).await?;
        }
        Ok(())
    }

    pub(crate) async fn append_history(
        &self,
        st: &EngineState,
        event: HistoryEvent,
    ) -> Result<(), EngineError> {
        if let Some(repo) = &st.repo {
            repo.append_history(&event).await?;
        }
        Ok(())
    }
}

/// Push TP/SL outward until both clear the venue's minimum stop distance.
/// "Outward" is measured from the price the position closes at: the bid for
/// buys, the ask for sells.
pub(crate) fn clamp_stops_outward(
    side: Side,
    tp: f64,
    sl: f64,
    quote: TickQuote,
    min_dist: f64,
) -> (f64, f64) {
    match side {
        Side::Buy => {
            let tp = tp.max(quote.bid + min_dist);
            let sl = sl.min(quote.bid - min_dist);
            (tp, sl)
        }
        Side::Sell => {
            let tp = tp.min(quote.ask - min_dist);
            let sl = sl.max(quote.ask + min_dist);
            (tp, sl)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_pushes_buy_stops_outward() {
        let quote = TickQuote::new(1000.2, 1000.0, 0);
        // TP too close under the bid, SL too close above the floor
        let (tp, sl) = clamp_stops_outward(Side::Buy, 1000.05, 999.95, quote, 0.5);
        assert!(tp >= 1000.5);
        assert!(sl <= 999.5);
    }

    #[test]
    fn clamp_leaves_wide_stops_alone() {
        let quote = TickQuote::new(1000.2, 1000.0, 0);
        let (tp, sl) = clamp_stops_outward(Side::Buy, 1020.0, 980.0, quote, 0.5);
        assert_eq!(tp, 1020.0);
        assert_eq!(sl, 980.0);
    }

    #[test]
    fn clamp_pushes_sell_stops_outward() {
        let quote = TickQuote::new(1000.2, 1000.0, 0);
        let (tp, sl) = clamp_stops_outward(Side::Sell, 1000.1, 1000.3, quote, 0.5);
        assert!(tp <= 999.7);
        assert!(sl >= 1000.7);
    }

    mod cap_gate {
        use super::*;
        use crate::testing::{TestRig, TEST_SYMBOL};

        async fn open_leg(rig: &TestRig, side: Side) -> u64 {
            rig.broker
                .send_market(MarketOrderRequest {
                    symbol: TEST_SYMBOL.into(),
                    side,
                    volume: 0.01,
                    price: 0.0,
                    sl: 0.0,
                    tp: 0.0,
                    magic: MAGIC_BASE,
                    comment: String::new(),
                    deviation: 200,
                    filling: FillingMode::FillOrKill,
                })
                .await
                .unwrap()
                .unwrap()
        }

        fn register(st: &mut EngineState, ticket: u64, pair: i32, leg: Side) {
            st.tickets.register(
                ticket,
                TicketInfo {
                    pair_index: pair,
                    leg,
                    entry: 1000.0,
                    tp: 0.0,
                    sl: 0.0,
                },
            );
        }

        /// Three completed pairs live at the broker plus one sell-only pair
        async fn saturated_state(rig: &TestRig) {
            let mut guard = rig.engine.state.lock().await;
            let st = &mut *guard;
            for i in 1..=3i32 {
                let buy = open_leg(rig, Side::Buy).await;
                let sell = open_leg(rig, Side::Sell).await;
                let level = 1000.0 + 20.0 * i as f64;
                let mut pair = crate::grid::GridPair::new(i, level, level - 20.0, 0);
                pair.set_filled(Side::Buy, buy);
                pair.advance_toggle();
                pair.set_filled(Side::Sell, sell);
                pair.advance_toggle();
                st.pairs.insert(pair);
                register(st, buy, i, Side::Buy);
                register(st, sell, i, Side::Sell);
            }
            let sell4 = open_leg(rig, Side::Sell).await;
            let mut pair4 = crate::grid::GridPair::new(4, 1080.0, 1060.0, 0);
            pair4.set_filled(Side::Sell, sell4);
            pair4.advance_toggle();
            st.pairs.insert(pair4);
            register(st, sell4, 4, Side::Sell);
        }

        #[tokio::test]
        async fn refuses_completing_leg_at_the_cap() {
            let dir = tempfile::tempdir().unwrap();
            let rig = TestRig::new(dir.path());
            saturated_state(&rig).await;

            let mut st = rig.engine.state.lock().await;
            assert!(
                !rig.engine.can_place_leg(&mut st, 4).await,
                "completing an incomplete pair at C=3 must be refused"
            );
        }

        #[tokio::test]
        async fn allows_toggle_on_already_complete_pair() {
            let dir = tempfile::tempdir().unwrap();
            let rig = TestRig::new(dir.path());
            saturated_state(&rig).await;

            let mut st = rig.engine.state.lock().await;
            // Pair 2 is already complete: re-trading it does not raise C
            assert!(rig.engine.can_place_leg(&mut st, 2).await);
        }

        #[tokio::test]
        async fn allows_the_hedging_leg() {
            let dir = tempfile::tempdir().unwrap();
            let rig = TestRig::new(dir.path());
            saturated_state(&rig).await;

            let mut st = rig.engine.state.lock().await;
            // trade_count + 1 reaches max_positions: this is the hedging
            // leg, which neutralizes the pair and may pass the cap
            st.pairs.get_mut(4).unwrap().trade_count = 4;
            assert!(rig.engine.can_place_leg(&mut st, 4).await);
        }

        #[tokio::test]
        async fn unknown_pairs_pass_the_gate() {
            let dir = tempfile::tempdir().unwrap();
            let rig = TestRig::new(dir.path());
            saturated_state(&rig).await;

            let mut st = rig.engine.state.lock().await;
            // New-pair creation is gated by the expansion logic, not here
            assert!(rig.engine.can_place_leg(&mut st, 99).await);
        }
    }
}
