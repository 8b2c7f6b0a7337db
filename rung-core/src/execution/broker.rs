//! The broker adapter contract
//!
//! All methods are blocking from the caller's perspective: the adapter owns
//! any broker-library reentrancy, reconnect handling, and serialization of
//! the process-global connection. Rung calls the adapter only from inside an
//! engine's mutex, so implementations may assume one in-flight call per
//! symbol.

use crate::core::{BrokerError, TickQuote};
use crate::execution::types::{
    BrokerDeal, BrokerPosition, MarketOrderRequest, PendingOrderRequest, SymbolSpec,
};
use async_trait::async_trait;

#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Latest quote for a symbol; `None` when the venue has nothing this tick
    async fn tick(&self, symbol: &str) -> Option<TickQuote>;

    /// Static symbol properties; `None` when the symbol is unknown
    async fn symbol_info(&self, symbol: &str) -> Option<SymbolSpec>;

    /// Ensure the symbol is selected/subscribed on the venue
    async fn select_symbol(&self, symbol: &str) -> bool;

    /// Every open position for the symbol
    async fn open_positions(&self, symbol: &str) -> Vec<BrokerPosition>;

    /// Submit a market order.
    ///
    /// On success returns the resulting **position** ticket (not the order
    /// ticket); `Ok(None)` means the venue refused with a recoverable code
    /// and the caller should retry next tick.
    async fn send_market(&self, request: MarketOrderRequest)
        -> Result<Option<u64>, BrokerError>;

    /// Place a pending order; returns its order ticket
    async fn send_pending(
        &self,
        request: PendingOrderRequest,
    ) -> Result<Option<u64>, BrokerError>;

    /// Close an open position at market
    async fn close_position(&self, ticket: u64, deviation: u32) -> Result<(), BrokerError>;

    /// Cancel a pending order
    async fn cancel_order(&self, ticket: u64) -> Result<(), BrokerError>;

    /// Closed deals since `since` (unix seconds). Audit channel; engines must
    /// not depend on it for classification.
    async fn recent_deals(&self, since: i64, symbol: Option<&str>) -> Vec<BrokerDeal>;

    /// Convenience: the set of open position tickets for a symbol
    async fn open_tickets(&self, symbol: &str) -> std::collections::HashSet<u64> {
        self.open_positions(symbol)
            .await
            .into_iter()
            .map(|p| p.ticket)
            .collect()
    }
}
