//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Long/short candidate classification
//! - Holding-period tracking and time-based exits
//! - Equal-weight sizing and order issuance
//! - Stop placement and the end-of-day position log

mod classifier;
mod holdings;
mod order_engine;
mod reporter;
mod session;
mod sizer;
mod stop_loss;

pub use classifier::SignalClassifier;
pub use holdings::{HoldingAction, HoldingsTracker, SweepReport};
pub use order_engine::{EntryOrder, OrderCycleReport, OrderEngine, Side};
pub use reporter::{PositionLogger, PositionRow};
pub use session::{CallbackReport, CandidateReport, EarningsStrategy, SessionState};
pub use sizer::PositionSizer;
pub use stop_loss::{PlacedStop, StopLossManager, StopLossReport};
