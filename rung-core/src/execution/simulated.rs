//! Simulated broker for paper trading and integration tests
//!
//! Behaves like a stripped-down MT-style trade server:
//! - market orders fill instantly at the current ask/bid
//! - open positions carry server-side TP/SL; advancing the quote with
//!   [`SimulatedBroker::set_quote`] closes every position whose stop the new
//!   quote crossed and records a deal for it
//! - pending orders trigger on quote crossings and become positions
//!
//! This is what lets tests drive the engine's whole TP/SL pipeline: push a
//! quote past a TP, the position disappears from the open set, and the
//! engine's drop detection classifies it from its latched touch flags.

use crate::core::{BrokerError, Side, TickQuote};
use crate::execution::broker::BrokerAdapter;
use crate::execution::types::{
    BrokerDeal, BrokerPosition, DealReason, FillingMode, MarketOrderRequest, PendingKind,
    PendingOrderRequest, SymbolSpec,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
struct SimPosition {
    ticket: u64,
    symbol: String,
    side: Side,
    volume: f64,
    price_open: f64,
    sl: f64,
    tp: f64,
    magic: i64,
}

#[derive(Debug, Clone)]
struct SimPending {
    ticket: u64,
    symbol: String,
    kind: PendingKind,
    price: f64,
    volume: f64,
    magic: i64,
}

#[derive(Debug, Default)]
struct SimState {
    quotes: HashMap<String, (f64, f64)>,
    specs: HashMap<String, SymbolSpec>,
    positions: BTreeMap<u64, SimPosition>,
    pending: BTreeMap<u64, SimPending>,
    deals: Vec<BrokerDeal>,
    next_ticket: u64,
    clock: i64,
}

impl SimState {
    fn alloc_ticket(&mut self) -> u64 {
        let t = self.next_ticket;
        self.next_ticket += 1;
        t
    }

    fn close_as_deal(&mut self, ticket: u64, reason: DealReason) {
        if let Some(pos) = self.positions.remove(&ticket) {
            let exit = match reason {
                DealReason::TakeProfit => pos.tp,
                DealReason::StopLoss => pos.sl,
                DealReason::Other => {
                    let (ask, bid) = self
                        .quotes
                        .get(&pos.symbol)
                        .copied()
                        .unwrap_or((pos.price_open, pos.price_open));
                    match pos.side {
                        Side::Buy => bid,
                        Side::Sell => ask,
                    }
                }
            };
            let profit = match pos.side {
                Side::Buy => (exit - pos.price_open) * pos.volume,
                Side::Sell => (pos.price_open - exit) * pos.volume,
            };
            self.deals.push(BrokerDeal {
                ticket,
                position_id: ticket,
                side: pos.side,
                reason,
                profit,
                magic: pos.magic,
                time: self.clock,
            });
        }
    }

    /// Sweep server-side stops and pending triggers after a quote change
    fn apply_stops(&mut self, symbol: &str, ask: f64, bid: f64) {
        let hits: Vec<(u64, DealReason)> = self
            .positions
            .values()
            .filter(|p| p.symbol == symbol)
            .filter_map(|p| match p.side {
                Side::Buy => {
                    if p.tp > 0.0 && bid >= p.tp {
                        Some((p.ticket, DealReason::TakeProfit))
                    } else if p.sl > 0.0 && bid <= p.sl {
                        Some((p.ticket, DealReason::StopLoss))
                    } else {
                        None
                    }
                }
                Side::Sell => {
                    if p.tp > 0.0 && ask <= p.tp {
                        Some((p.ticket, DealReason::TakeProfit))
                    } else if p.sl > 0.0 && ask >= p.sl {
                        Some((p.ticket, DealReason::StopLoss))
                    } else {
                        None
                    }
                }
            })
            .collect();
        for (ticket, reason) in hits {
            self.close_as_deal(ticket, reason);
        }

        let triggered: Vec<u64> = self
            .pending
            .values()
            .filter(|o| o.symbol == symbol)
            .filter(|o| match o.kind {
                PendingKind::BuyStop => ask >= o.price,
                PendingKind::BuyLimit => ask <= o.price,
                PendingKind::SellStop => bid <= o.price,
                PendingKind::SellLimit => bid >= o.price,
            })
            .map(|o| o.ticket)
            .collect();
        for ticket in triggered {
            if let Some(order) = self.pending.remove(&ticket) {
                let position_ticket = self.alloc_ticket();
                self.positions.insert(
                    position_ticket,
                    SimPosition {
                        ticket: position_ticket,
                        symbol: order.symbol,
                        side: order.kind.side(),
                        volume: order.volume,
                        price_open: order.price,
                        sl: 0.0,
                        tp: 0.0,
                        magic: order.magic,
                    },
                );
            }
        }
    }
}

/// In-process broker with instant fills and server-side stops
pub struct SimulatedBroker {
    state: Mutex<SimState>,
}

impl SimulatedBroker {
    pub fn new() -> Self {
        let mut state = SimState::default();
        // Arbitrary ticket base, the way real venues hand out opaque ids
        state.next_ticket = rand::thread_rng().gen_range(100_000..900_000);
        Self {
            state: Mutex::new(state),
        }
    }

    /// Broker with one registered symbol at an initial quote
    pub fn with_symbol(symbol: &str, ask: f64, bid: f64) -> Self {
        let broker = Self::new();
        broker.register_symbol(symbol, SymbolSpec::default_spec());
        broker.set_quote(symbol, ask, bid);
        broker
    }

    pub fn register_symbol(&self, symbol: &str, spec: SymbolSpec) {
        self.state.lock().specs.insert(symbol.to_string(), spec);
    }

    /// Advance the market. Applies server-side stops and pending triggers
    /// before the new quote becomes visible to `tick()`.
    pub fn set_quote(&self, symbol: &str, ask: f64, bid: f64) {
        let mut st = self.state.lock();
        st.clock += 1;
        st.apply_stops(symbol, ask, bid);
        st.quotes.insert(symbol.to_string(), (ask, bid));
    }

    /// Number of open positions for a symbol (test observability)
    pub fn position_count(&self, symbol: &str) -> usize {
        self.state
            .lock()
            .positions
            .values()
            .filter(|p| p.symbol == symbol)
            .count()
    }

    /// Force-close a position at the current market, recording an `Other`
    /// deal (simulates a manual close from the terminal)
    pub fn force_close(&self, ticket: u64) {
        self.state.lock().close_as_deal(ticket, DealReason::Other);
    }
}

impl Default for SimulatedBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolSpec {
    /// Spec used by the simulated venue
    pub fn default_spec() -> Self {
        Self {
            point: 0.01,
            stops_level_points: 10,
            min_lot: 0.01,
            max_lot: 100.0,
            lot_step: 0.01,
            filling_modes: FillingMode::FillOrKill,
        }
    }
}

#[async_trait]
impl BrokerAdapter for SimulatedBroker {
    async fn tick(&self, symbol: &str) -> Option<TickQuote> {
        let st = self.state.lock();
        let (ask, bid) = st.quotes.get(symbol).copied()?;
        let count = st.positions.values().filter(|p| p.symbol == symbol).count() as u32;
        Some(TickQuote::new(ask, bid, count))
    }

    async fn symbol_info(&self, symbol: &str) -> Option<SymbolSpec> {
        self.state.lock().specs.get(symbol).copied()
    }

    async fn select_symbol(&self, symbol: &str) -> bool {
        let mut st = self.state.lock();
        if !st.specs.contains_key(symbol) {
            st.specs
                .insert(symbol.to_string(), SymbolSpec::default_spec());
        }
        true
    }

    async fn open_positions(&self, symbol: &str) -> Vec<BrokerPosition> {
        let st = self.state.lock();
        st.positions
            .values()
            .filter(|p| p.symbol == symbol)
            .map(|p| {
                let (ask, bid) = st.quotes.get(&p.symbol).copied().unwrap_or((0.0, 0.0));
                let mark = match p.side {
                    Side::Buy => bid,
                    Side::Sell => ask,
                };
                let profit = match p.side {
                    Side::Buy => (mark - p.price_open) * p.volume,
                    Side::Sell => (p.price_open - mark) * p.volume,
                };
                BrokerPosition {
                    ticket: p.ticket,
                    magic: p.magic,
                    side: p.side,
                    volume: p.volume,
                    price_open: p.price_open,
                    sl: p.sl,
                    tp: p.tp,
                    profit,
                }
            })
            .collect()
    }

    async fn send_market(
        &self,
        request: MarketOrderRequest,
    ) -> Result<Option<u64>, BrokerError> {
        let mut st = self.state.lock();
        let (ask, bid) = st
            .quotes
            .get(&request.symbol)
            .copied()
            .ok_or_else(|| BrokerError::NoTick {
                symbol: request.symbol.clone(),
            })?;
        if request.volume <= 0.0 {
            return Err(BrokerError::OrderRejected {
                code: 10014,
                reason: "invalid volume".into(),
            });
        }
        let exec = match request.side {
            Side::Buy => ask,
            Side::Sell => bid,
        };
        // A stop already on the wrong side of the market would be rejected by
        // a real server; the engine clamps before sending, so treat it as a
        // hard error here to surface clamping bugs in tests. Stops validate
        // against the price the position would close at: the bid for buys,
        // the ask for sells.
        let stops_ok = match request.side {
            Side::Buy => {
                (request.tp <= 0.0 || request.tp > bid) && (request.sl <= 0.0 || request.sl < bid)
            }
            Side::Sell => {
                (request.tp <= 0.0 || request.tp < ask) && (request.sl <= 0.0 || request.sl > ask)
            }
        };
        if !stops_ok {
            return Err(BrokerError::InvalidStops {
                tp: request.tp,
                sl: request.sl,
            });
        }

        let ticket = st.alloc_ticket();
        st.positions.insert(
            ticket,
            SimPosition {
                ticket,
                symbol: request.symbol,
                side: request.side,
                volume: request.volume,
                price_open: exec,
                sl: request.sl,
                tp: request.tp,
                magic: request.magic,
            },
        );
        Ok(Some(ticket))
    }

    async fn send_pending(
        &self,
        request: PendingOrderRequest,
    ) -> Result<Option<u64>, BrokerError> {
        let mut st = self.state.lock();
        if !st.quotes.contains_key(&request.symbol) {
            return Err(BrokerError::NoTick {
                symbol: request.symbol.clone(),
            });
        }
        let ticket = st.alloc_ticket();
        st.pending.insert(
            ticket,
            SimPending {
                ticket,
                symbol: request.symbol,
                kind: request.kind,
                price: request.price,
                volume: request.volume,
                magic: request.magic,
            },
        );
        Ok(Some(ticket))
    }

    async fn close_position(&self, ticket: u64, _deviation: u32) -> Result<(), BrokerError> {
        let mut st = self.state.lock();
        if !st.positions.contains_key(&ticket) {
            return Err(BrokerError::TicketNotFound(ticket));
        }
        st.close_as_deal(ticket, DealReason::Other);
        Ok(())
    }

    async fn cancel_order(&self, ticket: u64) -> Result<(), BrokerError> {
        let mut st = self.state.lock();
        st.pending
            .remove(&ticket)
            .map(|_| ())
            .ok_or(BrokerError::TicketNotFound(ticket))
    }

    async fn recent_deals(&self, since: i64, symbol: Option<&str>) -> Vec<BrokerDeal> {
        let st = self.state.lock();
        let _ = symbol; // deals carry no symbol; magic encodes the group
        st.deals
            .iter()
            .filter(|d| d.time >= since)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_buy(symbol: &str, tp: f64, sl: f64) -> MarketOrderRequest {
        MarketOrderRequest {
            symbol: symbol.into(),
            side: Side::Buy,
            volume: 0.01,
            price: 0.0,
            sl,
            tp,
            magic: 50_000,
            comment: "B0 Grp0".into(),
            deviation: 200,
            filling: FillingMode::FillOrKill,
        }
    }

    #[tokio::test]
    async fn market_order_fills_at_ask() {
        let broker = SimulatedBroker::with_symbol("VIX75", 1000.0, 999.8);
        let ticket = broker
            .send_market(market_buy("VIX75", 1020.0, 980.0))
            .await
            .unwrap()
            .unwrap();
        let open = broker.open_positions("VIX75").await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].ticket, ticket);
        assert!((open[0].price_open - 1000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn quote_advance_closes_tp_crossed_buy() {
        let broker = SimulatedBroker::with_symbol("VIX75", 1000.0, 999.8);
        broker
            .send_market(market_buy("VIX75", 1020.0, 980.0))
            .await
            .unwrap();

        broker.set_quote("VIX75", 1020.3, 1020.1);
        assert_eq!(broker.position_count("VIX75"), 0);

        let deals = broker.recent_deals(0, None).await;
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].reason, DealReason::TakeProfit);
    }

    #[tokio::test]
    async fn invalid_stops_are_rejected() {
        let broker = SimulatedBroker::with_symbol("VIX75", 1000.0, 999.8);
        // TP below the ask on a buy
        let err = broker
            .send_market(market_buy("VIX75", 999.0, 980.0))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidStops { .. }));
    }

    #[tokio::test]
    async fn pending_stop_triggers_on_cross() {
        let broker = SimulatedBroker::with_symbol("VIX75", 1000.0, 999.8);
        broker
            .send_pending(PendingOrderRequest {
                symbol: "VIX75".into(),
                kind: PendingKind::BuyStop,
                price: 1010.0,
                volume: 0.01,
                magic: 50_000,
                comment: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(broker.position_count("VIX75"), 0);

        broker.set_quote("VIX75", 1010.5, 1010.3);
        assert_eq!(broker.position_count("VIX75"), 1);
    }
}
