//! Stop orders for the day's freshly entered candidates.

use crate::broker::{HostContext, Security, StopOrderRequest, StopTrigger};
use crate::config::StrategyConfig;
use crate::error::SkipReason;
use crate::signal::CandidateSet;
use crate::strategy::order_engine::Side;
use crate::utils::round_to_tick;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, warn};

const PRICE_TICK: Decimal = dec!(0.01);

/// A stop order placed this cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PlacedStop {
    pub security: Security,
    pub side: Side,
    pub cost_basis: Decimal,
    pub stop_price: Decimal,
    pub trigger: StopTrigger,
    pub order_id: u64,
}

/// Outcome of one stop-placement pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopLossReport {
    pub placed: Vec<PlacedStop>,
    #[serde(skip)]
    pub skipped: Vec<(Security, SkipReason)>,
}

/// Places one stop per candidate that now has a position with a cost basis.
#[derive(Debug, Clone)]
pub struct StopLossManager {
    long_multiplier: Decimal,
    short_multiplier: Decimal,
}

impl StopLossManager {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            long_multiplier: config.long_stop_multiplier,
            short_multiplier: config.short_stop_multiplier,
        }
    }

    /// Stop price and trigger for a position of `side` entered at `cost_basis`.
    ///
    /// Longs exit on a decline and shorts on a rise, whatever the multiplier.
    pub fn stop_for(&self, side: Side, cost_basis: Decimal) -> (Decimal, StopTrigger) {
        let (multiplier, trigger) = match side {
            Side::Long => (self.long_multiplier, StopTrigger::AtOrBelow),
            Side::Short => (self.short_multiplier, StopTrigger::AtOrAbove),
        };
        let stop_price = round_to_tick(cost_basis * multiplier, PRICE_TICK);

        (stop_price, trigger)
    }

    /// Submit stops for today's candidates.
    ///
    /// Candidates without a live position or with a non-positive cost basis
    /// are passed over. No de-duplication against stops already resting.
    pub async fn place_stops(
        &self,
        candidates: &CandidateSet,
        ctx: &HostContext<'_>,
    ) -> StopLossReport {
        let mut report = StopLossReport::default();
        let positions = ctx.broker.live_positions().await;

        let sides = candidates
            .sorted_longs()
            .into_iter()
            .map(|s| (s, Side::Long))
            .chain(candidates.sorted_shorts().into_iter().map(|s| (s, Side::Short)));

        for (security, side) in sides {
            let Some(position) = positions.get(security) else {
                debug!(%security, %side, "No position for candidate, no stop");
                continue;
            };
            if position.cost_basis <= Decimal::ZERO {
                continue;
            }

            let (stop_price, trigger) = self.stop_for(side, position.cost_basis);
            let request = StopOrderRequest {
                security: security.clone(),
                target_value: Decimal::ZERO,
                stop_price,
                trigger,
            };

            match ctx.broker.submit_stop_order(&request).await {
                Ok(ticket) => {
                    info!(
                        %security,
                        %side,
                        cost_basis = %position.cost_basis,
                        %stop_price,
                        ?trigger,
                        order_id = ticket.order_id,
                        "Stop order placed"
                    );
                    report.placed.push(PlacedStop {
                        security: security.clone(),
                        side,
                        cost_basis: position.cost_basis,
                        stop_price,
                        trigger,
                        order_id: ticket.order_id,
                    });
                }
                Err(e) => {
                    warn!(%security, error = %e, "Stop order rejected");
                    report
                        .skipped
                        .push((security.clone(), SkipReason::Rejected(e.to_string())));
                }
            }
        }

        report
    }
}
