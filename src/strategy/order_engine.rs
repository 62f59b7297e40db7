//! Daily entry and exit order issuance.

use crate::broker::{HostContext, Security};
use crate::error::SkipReason;
use crate::signal::CandidateSet;
use crate::strategy::holdings::{HoldingsTracker, SweepReport};
use crate::strategy::sizer::PositionSizer;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Direction of a candidate entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for longs, -1 for shorts.
    pub fn sign(&self) -> i64 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// An entry order submitted this cycle.
#[derive(Debug, Clone, Serialize)]
pub struct EntryOrder {
    pub security: Security,
    pub side: Side,
    /// Signed share count submitted
    pub shares: i64,
    pub price: Decimal,
    pub order_id: u64,
    pub filled: bool,
}

/// Everything the market-open cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderCycleReport {
    pub candidate_count: usize,
    pub available_funds: Decimal,
    pub cash_per_candidate: Decimal,
    pub leverage: Decimal,
    pub sweep: SweepReport,
    pub entries: Vec<EntryOrder>,
    #[serde(skip)]
    pub skipped: Vec<(Security, SkipReason)>,
}

/// Runs the market-open cycle: age out held positions, then enter candidates.
#[derive(Debug, Clone)]
pub struct OrderEngine {
    sizer: PositionSizer,
    commission_per_trade: Decimal,
}

impl OrderEngine {
    /// Create a new order engine.
    pub fn new(commission_per_trade: Decimal) -> Self {
        Self {
            sizer: PositionSizer::new(commission_per_trade),
            commission_per_trade,
        }
    }

    /// Run one market-open cycle.
    ///
    /// Sizing uses today's candidates and the cash available before any
    /// flatten fills. Exits always go out before entries, so a security that
    /// ages out and qualifies again on the same day is re-entered fresh.
    pub async fn run(
        &self,
        holdings: &mut HoldingsTracker,
        candidates: &CandidateSet,
        ctx: &HostContext<'_>,
    ) -> OrderCycleReport {
        let leverage = ctx.broker.leverage().await;
        let candidate_count = candidates.len();
        let available_funds = ctx.broker.available_funds().await;
        let cash_per_candidate = self
            .sizer
            .cash_per_candidate(available_funds, candidate_count);

        info!(
            %leverage,
            longs = candidates.longs.len(),
            shorts = candidates.shorts.len(),
            %available_funds,
            %cash_per_candidate,
            "Starting market-open order cycle"
        );

        let live_positions = ctx.broker.live_positions().await;
        let sweep = holdings.advance_and_sweep(ctx, &live_positions).await;

        let mut report = OrderCycleReport {
            candidate_count,
            available_funds,
            cash_per_candidate,
            leverage,
            sweep,
            ..Default::default()
        };

        if candidates.is_empty() {
            debug!("No candidates today");
            return report;
        }

        let entries = candidates
            .sorted_shorts()
            .into_iter()
            .map(|s| (s, Side::Short))
            .chain(candidates.sorted_longs().into_iter().map(|s| (s, Side::Long)));

        for (security, side) in entries {
            match self
                .enter_position(holdings, ctx, security, side, cash_per_candidate)
                .await
            {
                Ok(entry) => report.entries.push(entry),
                Err(reason) => {
                    debug!(%security, %side, %reason, "Skipping entry");
                    report.skipped.push((security.clone(), reason));
                }
            }
        }

        report
    }

    /// Size and submit one entry, registering it with the tracker.
    async fn enter_position(
        &self,
        holdings: &mut HoldingsTracker,
        ctx: &HostContext<'_>,
        security: &Security,
        side: Side,
        cash_per_candidate: Decimal,
    ) -> Result<EntryOrder, SkipReason> {
        if !ctx.market.can_trade(security).await {
            return Err(SkipReason::Untradeable);
        }

        let price = ctx
            .market
            .current_price(security)
            .await
            .filter(|p| *p > Decimal::ZERO)
            .ok_or(SkipReason::MissingPrice)?;

        let shares = self.sizer.shares_for(cash_per_candidate, price);
        if shares == 0 {
            return Err(SkipReason::ZeroShares);
        }

        let signed_shares = shares * side.sign();
        let ticket = ctx
            .broker
            .submit_order(security, signed_shares)
            .await
            .map_err(|e| {
                warn!(%security, %side, error = %e, "Entry order rejected");
                SkipReason::Rejected(e.to_string())
            })?;

        info!(
            %security,
            %side,
            shares,
            price = %price,
            value = %(Decimal::from(shares) * price),
            commission = %self.commission_per_trade,
            order_id = ticket.order_id,
            "Entry order submitted"
        );

        holdings.register_new_entry(security);

        Ok(EntryOrder {
            security: security.clone(),
            side,
            shares: signed_shares,
            price,
            order_id: ticket.order_id,
            filled: ticket.is_filled(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{
        Broker, LivePosition, MockBroker, MockMarketData, OrderKind, OrderStatus, OrderTicket,
        PaperBroker,
    };
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, HashSet};

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn sec(symbol: &str) -> Security {
        Security::new(symbol, "NYSE")
    }

    fn engine() -> OrderEngine {
        OrderEngine::new(dec!(6.95))
    }

    fn candidates(longs: &[&str], shorts: &[&str]) -> CandidateSet {
        CandidateSet {
            longs: longs.iter().map(|s| sec(s)).collect(),
            shorts: shorts.iter().map(|s| sec(s)).collect(),
        }
    }

    async fn paper_with_prices(prices: &[(&str, Decimal)]) -> PaperBroker {
        let broker = PaperBroker::new(dec!(10000), dec!(6.95));
        broker
            .update_market_data(
                prices.iter().map(|(s, p)| (sec(s), *p)).collect(),
                HashSet::new(),
            )
            .await;
        broker
    }

    fn market_ticket(security: &Security, shares: i64) -> OrderTicket {
        OrderTicket {
            order_id: 7,
            security: security.clone(),
            kind: OrderKind::Market,
            status: OrderStatus::Filled,
            requested_shares: shares,
            filled_shares: shares,
            fill_price: Some(dec!(50)),
        }
    }

    // =========================================================================
    // Entry Tests
    // =========================================================================

    #[tokio::test]
    async fn test_single_long_scenario_orders_199_shares() {
        let mut market = MockMarketData::new();
        market.expect_can_trade().return_const(true);
        market.expect_current_price().return_const(Some(dec!(50)));

        let mut broker = MockBroker::new();
        broker.expect_leverage().return_const(Decimal::ZERO);
        broker.expect_available_funds().return_const(dec!(10000));
        broker.expect_live_positions().returning(HashMap::new);
        broker
            .expect_submit_order()
            .withf(|security, shares| security.symbol == "XXX" && *shares == 199)
            .times(1)
            .returning(|security, shares| Ok(market_ticket(security, shares)));

        let ctx = HostContext::new(&market, &broker);
        let mut holdings = HoldingsTracker::new(2);
        let report = engine()
            .run(&mut holdings, &candidates(&["XXX"], &[]), &ctx)
            .await;

        assert_eq!(report.cash_per_candidate, dec!(9993.05));
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].shares, 199);
        assert_eq!(holdings.days_held(&sec("XXX")), Some(0));
    }

    #[tokio::test]
    async fn test_short_candidates_counted_for_sizing() {
        let broker = paper_with_prices(&[("LLL", dec!(10)), ("SSS", dec!(10))]).await;
        let ctx = HostContext::new(&broker, &broker);
        let mut holdings = HoldingsTracker::new(2);

        let report = engine()
            .run(&mut holdings, &candidates(&["LLL"], &["SSS"]), &ctx)
            .await;

        // (10000 - 2 * 6.95) / 2
        assert_eq!(report.candidate_count, 2);
        assert_eq!(report.cash_per_candidate, dec!(4993.05));

        let positions = broker.live_positions().await;
        assert_eq!(positions[&sec("LLL")].amount, 499);
        assert_eq!(positions[&sec("SSS")].amount, -499);
    }

    #[tokio::test]
    async fn test_zero_candidates_submits_nothing() {
        let mut market = MockMarketData::new();
        market.expect_can_trade().never();

        let mut broker = MockBroker::new();
        broker.expect_leverage().return_const(Decimal::ZERO);
        broker.expect_available_funds().return_const(dec!(10000));
        broker.expect_live_positions().returning(HashMap::new);
        broker.expect_submit_order().never();

        let ctx = HostContext::new(&market, &broker);
        let mut holdings = HoldingsTracker::new(2);
        let report = engine()
            .run(&mut holdings, &CandidateSet::default(), &ctx)
            .await;

        assert_eq!(report.cash_per_candidate, Decimal::ZERO);
        assert!(report.entries.is_empty());
        assert!(holdings.is_empty());
    }

    #[tokio::test]
    async fn test_untradeable_and_unpriced_candidates_skipped() {
        let broker = paper_with_prices(&[("HALT", dec!(20)), ("OK", dec!(20))]).await;
        broker.set_halted(&sec("HALT"), true).await;
        let ctx = HostContext::new(&broker, &broker);
        let mut holdings = HoldingsTracker::new(2);

        let report = engine()
            .run(&mut holdings, &candidates(&["HALT", "NOPRICE", "OK"], &[]), &ctx)
            .await;

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].security, sec("OK"));
        assert!(report
            .skipped
            .contains(&(sec("HALT"), SkipReason::Untradeable)));
        // Without a price the paper broker also reports the security untradeable
        assert_eq!(report.skipped.len(), 2);
        assert!(!holdings.contains(&sec("HALT")));
    }

    #[tokio::test]
    async fn test_missing_price_skipped() {
        let mut market = MockMarketData::new();
        market.expect_can_trade().return_const(true);
        market.expect_current_price().return_const(None);

        let mut broker = MockBroker::new();
        broker.expect_leverage().return_const(Decimal::ZERO);
        broker.expect_available_funds().return_const(dec!(10000));
        broker.expect_live_positions().returning(HashMap::new);
        broker.expect_submit_order().never();

        let ctx = HostContext::new(&market, &broker);
        let mut holdings = HoldingsTracker::new(2);
        let report = engine()
            .run(&mut holdings, &candidates(&["XXX"], &[]), &ctx)
            .await;

        assert_eq!(report.skipped, vec![(sec("XXX"), SkipReason::MissingPrice)]);
    }

    #[tokio::test]
    async fn test_insufficient_cash_sizes_zero_and_skips() {
        let broker = PaperBroker::new(dec!(10), dec!(6.95));
        broker
            .update_market_data(HashMap::from([(sec("AAA"), dec!(5))]), HashSet::new())
            .await;
        let ctx = HostContext::new(&broker, &broker);
        let mut holdings = HoldingsTracker::new(2);

        let report = engine()
            .run(&mut holdings, &candidates(&["AAA", "BBB"], &[]), &ctx)
            .await;

        assert!(report.cash_per_candidate < Decimal::ZERO);
        assert!(report.entries.is_empty());
        assert!(holdings.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_entry_not_registered() {
        let mut market = MockMarketData::new();
        market.expect_can_trade().return_const(true);
        market.expect_current_price().return_const(Some(dec!(50)));

        let mut broker = MockBroker::new();
        broker.expect_leverage().return_const(Decimal::ZERO);
        broker.expect_available_funds().return_const(dec!(10000));
        broker.expect_live_positions().returning(HashMap::new);
        broker
            .expect_submit_order()
            .returning(|_, _| Err(anyhow::anyhow!("short locate unavailable")));

        let ctx = HostContext::new(&market, &broker);
        let mut holdings = HoldingsTracker::new(2);
        let report = engine()
            .run(&mut holdings, &candidates(&[], &["SSS"]), &ctx)
            .await;

        assert!(matches!(report.skipped[0].1, SkipReason::Rejected(_)));
        assert!(holdings.is_empty());
    }

    // =========================================================================
    // Exit Tests
    // =========================================================================

    #[tokio::test]
    async fn test_aged_position_flattened_regardless_of_signal() {
        let broker = paper_with_prices(&[("YYY", dec!(25))]).await;
        broker.submit_order(&sec("YYY"), 100).await.unwrap();
        let ctx = HostContext::new(&broker, &broker);
        let mut holdings = HoldingsTracker::from_entries(2, [(sec("YYY"), 1)]);

        let report = engine()
            .run(&mut holdings, &candidates(&[], &[]), &ctx)
            .await;

        assert_eq!(report.sweep.flattened, vec![sec("YYY")]);
        assert!(!holdings.contains(&sec("YYY")));
        assert!(broker.live_positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_flatten_precedes_reentry_of_same_security() {
        let broker = paper_with_prices(&[("YYY", dec!(25))]).await;
        broker.submit_order(&sec("YYY"), 100).await.unwrap();
        let ctx = HostContext::new(&broker, &broker);
        let mut holdings = HoldingsTracker::from_entries(2, [(sec("YYY"), 1)]);

        let report = engine()
            .run(&mut holdings, &candidates(&["YYY"], &[]), &ctx)
            .await;

        assert_eq!(report.sweep.flattened, vec![sec("YYY")]);
        assert_eq!(report.entries.len(), 1);
        // Re-entered as a fresh position
        assert_eq!(holdings.days_held(&sec("YYY")), Some(0));
        let position = broker.live_positions().await[&sec("YYY")];
        assert_eq!(position.amount, report.entries[0].shares);
    }

    #[tokio::test]
    async fn test_held_candidate_keeps_its_day_count() {
        let broker = paper_with_prices(&[("AAA", dec!(10))]).await;
        broker.submit_order(&sec("AAA"), 10).await.unwrap();
        let ctx = HostContext::new(&broker, &broker);
        let mut holdings = HoldingsTracker::from_entries(3, [(sec("AAA"), 0)]);

        engine()
            .run(&mut holdings, &candidates(&["AAA"], &[]), &ctx)
            .await;

        assert_eq!(holdings.days_held(&sec("AAA")), Some(1));
    }

    #[tokio::test]
    async fn test_orphan_position_reflattened_and_left_untracked() {
        let mut market = MockMarketData::new();
        market.expect_can_trade().return_const(true);

        let mut broker = MockBroker::new();
        broker.expect_leverage().return_const(dec!(0.5));
        broker.expect_available_funds().return_const(dec!(5000));
        broker.expect_live_positions().returning(|| {
            HashMap::from([(
                Security::new("ZZZ", "NYSE"),
                LivePosition {
                    amount: 30,
                    cost_basis: dec!(40),
                },
            )])
        });
        broker
            .expect_submit_order_target_percent()
            .withf(|security, pct| security.symbol == "ZZZ" && pct.is_zero())
            .times(1)
            .returning(|security, _| {
                Ok(OrderTicket {
                    order_id: 3,
                    security: security.clone(),
                    kind: OrderKind::TargetPercent,
                    status: OrderStatus::Open,
                    requested_shares: -30,
                    filled_shares: 0,
                    fill_price: None,
                })
            });

        let ctx = HostContext::new(&market, &broker);
        let mut holdings = HoldingsTracker::new(2);
        let report = engine()
            .run(&mut holdings, &CandidateSet::default(), &ctx)
            .await;

        assert_eq!(report.sweep.orphans, vec![sec("ZZZ")]);
        assert!(holdings.is_empty());
    }
}
