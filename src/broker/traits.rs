//! Collaborator interfaces consumed by the strategy.
//!
//! The strategy never talks to a concrete broker. A backtest, a paper session
//! or a live gateway all plug in by implementing these two traits:
//! - `MarketData` for prices and tradability
//! - `Broker` for order submission and portfolio state

use super::types::{LivePosition, OrderTicket, Security, StopOrderRequest};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Price and tradability lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Latest price for the security, `None` when no price is available.
    async fn current_price(&self, security: &Security) -> Option<Decimal>;

    /// Whether the security can be traded right now.
    async fn can_trade(&self, security: &Security) -> bool;
}

/// Order submission and portfolio queries.
///
/// Submissions return as soon as the broker acknowledges the order. Fills are
/// the broker's business; callers never wait for them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Submit a market order for a signed share delta (negative = sell/short).
    async fn submit_order(&self, security: &Security, shares: i64) -> anyhow::Result<OrderTicket>;

    /// Submit an order that moves the position to `pct` of net liquidation value.
    async fn submit_order_target_percent(
        &self,
        security: &Security,
        pct: Decimal,
    ) -> anyhow::Result<OrderTicket>;

    /// Submit a stop order.
    async fn submit_stop_order(&self, order: &StopOrderRequest) -> anyhow::Result<OrderTicket>;

    /// All positions with a nonzero amount.
    async fn live_positions(&self) -> HashMap<Security, LivePosition>;

    /// Cash available for new orders.
    async fn available_funds(&self) -> Decimal;

    /// Gross exposure divided by net liquidation value.
    async fn leverage(&self) -> Decimal;
}

/// The collaborators handed to every scheduled callback.
#[derive(Clone, Copy)]
pub struct HostContext<'a> {
    pub market: &'a dyn MarketData,
    pub broker: &'a dyn Broker,
}

impl<'a> HostContext<'a> {
    pub fn new(market: &'a dyn MarketData, broker: &'a dyn Broker) -> Self {
        Self { market, broker }
    }
}
