//! Domain error types.
//!
//! None of these abort a trading day. They are logged and carried in the
//! callback reports so the host can see what was skipped.

use crate::broker::Security;
use thiserror::Error;

/// Classification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// A row qualified on both sides; thresholds no longer separate them.
    #[error("{0} is flagged both long and short")]
    ConflictingSides(Security),
}

/// Why an order was not submitted for a security this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("no price available")]
    MissingPrice,
    #[error("security cannot be traded")]
    Untradeable,
    #[error("sized share count is zero")]
    ZeroShares,
    #[error("broker rejected order: {0}")]
    Rejected(String),
}
