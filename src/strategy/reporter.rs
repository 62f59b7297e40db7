//! End-of-day position log.

use crate::broker::{HostContext, Security};
use crate::strategy::holdings::HoldingsTracker;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

/// One live position as seen shortly before the close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRow {
    pub security: Security,
    pub amount: i64,
    pub cost_basis: Decimal,
    pub last_price: Option<Decimal>,
    /// `None` for positions the tracker does not know about
    pub days_held: Option<u32>,
}

/// Logs every live position with its tracked holding age.
#[derive(Debug, Clone, Default)]
pub struct PositionLogger;

impl PositionLogger {
    pub fn new() -> Self {
        Self
    }

    /// Emit one log line per nonzero position, sorted by security.
    pub async fn log_positions(
        &self,
        holdings: &HoldingsTracker,
        ctx: &HostContext<'_>,
    ) -> Vec<PositionRow> {
        let positions = ctx.broker.live_positions().await;

        let mut securities: Vec<&Security> = positions
            .iter()
            .filter(|(_, p)| p.amount != 0)
            .map(|(s, _)| s)
            .collect();
        securities.sort();

        let mut rows = Vec::with_capacity(securities.len());
        for security in securities {
            let position = &positions[security];
            let row = PositionRow {
                security: security.clone(),
                amount: position.amount,
                cost_basis: position.cost_basis,
                last_price: ctx.market.current_price(security).await,
                days_held: holdings.days_held(security),
            };

            info!(
                symbol = %row.security.symbol,
                exchange = %row.security.exchange,
                amount = row.amount,
                cost_basis = %row.cost_basis,
                last_price = ?row.last_price,
                days_held = ?row.days_held,
                "Position"
            );
            rows.push(row);
        }

        info!(positions = rows.len(), tracked = holdings.len(), "Position log complete");
        rows
    }
}
