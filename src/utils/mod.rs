//! Shared utilities.

mod decimal;

pub use decimal::{floor_shares, percentage_change, round_to_tick, safe_div};
