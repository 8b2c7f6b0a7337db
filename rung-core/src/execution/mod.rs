//! Broker execution layer
//!
//! The engine never talks to a broker library directly - everything goes
//! through the [`BrokerAdapter`] contract:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 BrokerAdapter (async)                  │
//! │  tick()  open_positions()  send_market()  close()  ... │
//! └────────────────────────────────────────────────────────┘
//!              │                          │
//!              v                          v
//!      ┌───────────────┐          ┌───────────────┐
//!      │   Simulated   │          │  MT-style     │
//!      │    Broker     │          │  bridge (out  │
//!      └───────────────┘          │  of tree)     │
//!       server-side stops         └───────────────┘
//!       instant market fills
//! ```
//!
//! The adapter internalizes broker-library reentrancy; the engine assumes
//! calls are serialized and makes no parallelism assumptions. `send_market`
//! resolves and returns the **position** ticket, never the order ticket.

pub mod broker;
pub mod simulated;
pub mod types;

pub use broker::BrokerAdapter;
pub use simulated::SimulatedBroker;
pub use types::{
    BrokerDeal, BrokerPosition, DealReason, FillingMode, MarketOrderRequest, PendingKind,
    PendingOrderRequest, SymbolSpec,
};
