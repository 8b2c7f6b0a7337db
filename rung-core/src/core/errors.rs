//! Error taxonomy for the grid engine
//!
//! Three layers: broker failures (transient unless stated otherwise), store
//! failures (fatal on open, retryable mid-flight), and engine-level failures.
//! Cap refusals are deliberately *not* errors - see
//! [`crate::core::types::OrderOutcome`].

use thiserror::Error;

/// Failures reported by a broker adapter
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No quote available for the symbol this tick
    #[error("no tick available for {symbol}")]
    NoTick { symbol: String },

    /// Symbol is unknown to the broker or could not be selected
    #[error("symbol {symbol} not available on broker")]
    SymbolUnavailable { symbol: String },

    /// Order send refused by the broker with a recoverable code
    #[error("order rejected: {reason} (code {code})")]
    OrderRejected { code: i32, reason: String },

    /// Stops-level violation that survived outward clamping
    #[error("invalid stops: tp={tp:.5} sl={sl:.5}")]
    InvalidStops { tp: f64, sl: f64 },

    /// Position to close/cancel no longer exists
    #[error("ticket {0} not found")]
    TicketNotFound(u64),

    /// Transport / library failure; retry next tick
    #[error("broker transport failure: {0}")]
    Transport(String),
}

impl BrokerError {
    /// True when the next tick may simply retry the failed step
    pub fn is_transient(&self) -> bool {
        !matches!(self, BrokerError::SymbolUnavailable { .. })
    }
}

/// Failures from the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("repository i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("repository query: {0}")]
    Query(#[from] sqlx::Error),

    #[error("repository not open")]
    NotOpen,

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Engine-level failures that abort the current step
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Repository unavailable on start or broker init failed - halts the
    /// engine and surfaces to the orchestrator
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_transience() {
        assert!(BrokerError::NoTick {
            symbol: "VIX75".into()
        }
        .is_transient());
        assert!(!BrokerError::SymbolUnavailable {
            symbol: "VIX75".into()
        }
        .is_transient());
    }

    #[test]
    fn engine_error_wraps_broker() {
        let err: EngineError = BrokerError::TicketNotFound(7).into();
        assert!(!err.is_fatal());
        assert!(matches!(err, EngineError::Broker(_)));
    }
}
