//! Equal-weight position sizing under a shared cash constraint.

use crate::utils::{floor_shares, safe_div};
use rust_decimal::Decimal;
use tracing::debug;

/// Splits available cash evenly across the day's candidates.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    commission_per_trade: Decimal,
}

impl PositionSizer {
    /// Create a new sizer.
    pub fn new(commission_per_trade: Decimal) -> Self {
        Self {
            commission_per_trade,
        }
    }

    /// Cash allotted to each candidate after reserving one commission per trade.
    ///
    /// Zero candidates give zero. A negative result (commissions exceed cash)
    /// is returned as is; `shares_for` turns it into zero shares.
    pub fn cash_per_candidate(&self, available_cash: Decimal, candidate_count: usize) -> Decimal {
        let count = Decimal::from(candidate_count);
        let cash_to_allocate = available_cash - self.commission_per_trade * count;
        let cash_per_candidate = safe_div(cash_to_allocate, count);

        debug!(
            %available_cash,
            candidate_count,
            %cash_to_allocate,
            %cash_per_candidate,
            "Sized candidates"
        );

        cash_per_candidate
    }

    /// Whole shares affordable at `price`, truncated toward zero and never negative.
    pub fn shares_for(&self, cash_per_candidate: Decimal, price: Decimal) -> i64 {
        floor_shares(cash_per_candidate, price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sizer() -> PositionSizer {
        PositionSizer::new(dec!(6.95))
    }

    #[test]
    fn test_single_candidate_scenario() {
        let cash = sizer().cash_per_candidate(dec!(10000), 1);
        assert_eq!(cash, dec!(9993.05));
        assert_eq!(sizer().shares_for(cash, dec!(50)), 199);
    }

    #[test]
    fn test_zero_candidates_gives_zero() {
        assert_eq!(sizer().cash_per_candidate(dec!(10000), 0), Decimal::ZERO);
    }

    #[test]
    fn test_allocation_plus_commissions_within_cash() {
        let sizer = sizer();
        for cash in [dec!(0.01), dec!(100), dec!(10000), dec!(123456.78)] {
            for count in 1..=25usize {
                let per = sizer.cash_per_candidate(cash, count);
                let n = Decimal::from(count);
                assert!(per * n + dec!(6.95) * n <= cash + dec!(0.000001));
            }
        }
    }

    #[test]
    fn test_negative_cash_propagates_and_sizes_zero() {
        let per = sizer().cash_per_candidate(dec!(10), 3);
        assert!(per < Decimal::ZERO);
        assert_eq!(sizer().shares_for(per, dec!(5)), 0);
    }

    #[test]
    fn test_shares_truncate_not_round() {
        assert_eq!(sizer().shares_for(dec!(99.99), dec!(10)), 9);
        assert_eq!(sizer().shares_for(dec!(9.99), dec!(10)), 0);
    }
}
