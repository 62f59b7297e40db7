//! Broker and market-data integration.
//!
//! ## Traits
//! `MarketData` and `Broker` are the only surfaces the strategy sees.
//!
//! ## Paper broker
//! In-memory simulated account used by the backtest engine and paper mode:
//! - Immediate market fills with a per-trade commission
//! - Resting stop orders triggered by price updates
//! - Halted and stuck securities for exercising the exit retry path

pub mod paper;
mod traits;
mod types;

pub use paper::{PaperAccountState, PaperBroker, PaperFill, PaperPosition};
pub use traits::{Broker, HostContext, MarketData};
pub use types::*;

#[cfg(test)]
pub use traits::{MockBroker, MockMarketData};
