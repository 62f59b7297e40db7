//! Paper broker for backtesting and paper trading.

use super::traits::{Broker, MarketData};
use super::types::*;
use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Simulated position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    pub security: Security,
    pub amount: i64,
    pub cost_basis: Decimal,
    /// Last price seen for mark-to-market
    pub last_price: Decimal,
    /// Realized P&L since the position was opened on its current side
    pub realized_pnl: Decimal,
}

impl PaperPosition {
    fn new(security: Security) -> Self {
        Self {
            security,
            amount: 0,
            cost_basis: Decimal::ZERO,
            last_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }
}

/// Simulated account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperAccountState {
    pub initial_cash: Decimal,
    pub cash: Decimal,
    pub positions: HashMap<Security, PaperPosition>,
    pub total_commission: Decimal,
    pub realized_pnl: Decimal,
    pub order_count: u64,
    /// Positions taken back to zero (or flipped)
    pub round_trips: u64,
    /// Round trips closed with positive realized P&L
    pub winning_round_trips: u64,
}

impl PaperAccountState {
    fn new(initial_cash: Decimal) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            positions: HashMap::new(),
            total_commission: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            order_count: 0,
            round_trips: 0,
            winning_round_trips: 0,
        }
    }

    /// Cash plus marked value of all positions.
    pub fn net_liquidation(&self) -> Decimal {
        self.cash
            + self
                .positions
                .values()
                .map(|p| Decimal::from(p.amount) * p.last_price)
                .sum::<Decimal>()
    }

    /// Sum of absolute position values.
    pub fn gross_exposure(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| Decimal::from(p.amount.abs()) * p.last_price)
            .sum()
    }

    /// Cash that can fund new positions.
    ///
    /// Short-sale proceeds sit in `cash` but back the open short, so the
    /// marked value of every short is held back.
    pub fn available_funds(&self) -> Decimal {
        let short_value: Decimal = self
            .positions
            .values()
            .filter(|p| p.amount < 0)
            .map(|p| Decimal::from(p.amount.abs()) * p.last_price)
            .sum();
        self.cash - short_value
    }

    /// Mark-to-market P&L of open positions.
    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| (p.last_price - p.cost_basis) * Decimal::from(p.amount))
            .sum()
    }
}

/// A filled order, kept for the order log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperFill {
    pub order_id: u64,
    pub security: Security,
    pub kind: OrderKind,
    pub shares: i64,
    pub price: Decimal,
    pub commission: Decimal,
}

#[derive(Debug, Clone)]
struct RestingStop {
    order_id: u64,
    request: StopOrderRequest,
}

/// In-memory broker that fills market orders immediately at the last price.
pub struct PaperBroker {
    state: Arc<RwLock<PaperAccountState>>,
    order_id_counter: AtomicU64,
    prices: Arc<RwLock<HashMap<Security, Decimal>>>,
    /// Securities that reject all orders
    halted: Arc<RwLock<HashSet<Security>>>,
    /// Securities whose orders are accepted but never fill
    stuck: Arc<RwLock<HashSet<Security>>>,
    resting_stops: Arc<RwLock<Vec<RestingStop>>>,
    open_orders: Arc<RwLock<Vec<OrderTicket>>>,
    fills: Arc<RwLock<Vec<PaperFill>>>,
    commission_per_trade: Decimal,
}

impl PaperBroker {
    /// Create a paper broker with starting cash and a flat per-trade commission.
    pub fn new(initial_cash: Decimal, commission_per_trade: Decimal) -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperAccountState::new(initial_cash))),
            order_id_counter: AtomicU64::new(1),
            prices: Arc::new(RwLock::new(HashMap::new())),
            halted: Arc::new(RwLock::new(HashSet::new())),
            stuck: Arc::new(RwLock::new(HashSet::new())),
            resting_stops: Arc::new(RwLock::new(Vec::new())),
            open_orders: Arc::new(RwLock::new(Vec::new())),
            fills: Arc::new(RwLock::new(Vec::new())),
            commission_per_trade,
        }
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Apply a new set of prices and the day's halted set, then fire any
    /// resting stops the new prices cross.
    ///
    /// Prices merge into the existing book: a security missing from `prices`
    /// keeps its last known price.
    pub async fn update_market_data(
        &self,
        prices: HashMap<Security, Decimal>,
        halted: HashSet<Security>,
    ) -> Vec<OrderTicket> {
        {
            let mut state = self.state.write().await;
            for (security, price) in &prices {
                if let Some(position) = state.positions.get_mut(security) {
                    position.last_price = *price;
                }
            }
        }

        self.prices.write().await.extend(prices);
        *self.halted.write().await = halted;

        self.trigger_stops().await
    }

    /// Mark a security as halted (orders rejected) or tradable again.
    pub async fn set_halted(&self, security: &Security, halted: bool) {
        let mut set = self.halted.write().await;
        if halted {
            set.insert(security.clone());
        } else {
            set.remove(security);
        }
    }

    /// Mark a security as stuck: orders are accepted but never fill.
    pub async fn set_stuck(&self, security: &Security, stuck: bool) {
        let mut set = self.stuck.write().await;
        if stuck {
            set.insert(security.clone());
        } else {
            set.remove(security);
        }
    }

    /// Cancel all open orders and resting stops. Returns how many were cancelled.
    pub async fn end_of_day(&self) -> usize {
        let mut open_orders = self.open_orders.write().await;
        let mut stops = self.resting_stops.write().await;
        let cancelled = open_orders.len() + stops.len();

        if cancelled > 0 {
            info!(
                open_orders = open_orders.len(),
                resting_stops = stops.len(),
                "Cancelling unfilled orders at end of day"
            );
        }

        open_orders.clear();
        stops.clear();
        cancelled
    }

    /// Get a snapshot of the account.
    pub async fn get_state(&self) -> PaperAccountState {
        self.state.read().await.clone()
    }

    /// Number of stop orders waiting to trigger.
    #[cfg(test)]
    pub async fn resting_stop_count(&self) -> usize {
        self.resting_stops.read().await.len()
    }

    /// Number of accepted orders waiting to fill.
    #[cfg(test)]
    pub async fn open_order_count(&self) -> usize {
        self.open_orders.read().await.len()
    }

    /// Drain fills recorded since the last call.
    pub async fn take_fills(&self) -> Vec<PaperFill> {
        std::mem::take(&mut *self.fills.write().await)
    }

    /// Export account state for persistence.
    pub async fn export_state(&self) -> PaperAccountState {
        self.get_state().await
    }

    /// Restore account state from persistence.
    ///
    /// Positions seed the price book with their last marked price so the
    /// account values correctly before the first market data update.
    pub async fn restore_state(&self, persisted: PaperAccountState) {
        let seeded: Vec<(Security, Decimal)> = persisted
            .positions
            .values()
            .filter(|p| p.last_price > Decimal::ZERO)
            .map(|p| (p.security.clone(), p.last_price))
            .collect();

        self.order_id_counter
            .store(persisted.order_count + 1, Ordering::SeqCst);

        info!(
            cash = %persisted.cash,
            positions = persisted.positions.len(),
            "Restored paper account"
        );

        *self.state.write().await = persisted;
        self.prices.write().await.extend(seeded);
    }

    /// Check the order is allowed and return the price it would fill at.
    async fn fill_price(&self, security: &Security) -> Result<Decimal> {
        if self.halted.read().await.contains(security) {
            bail!("{} is not tradable", security);
        }
        match self.prices.read().await.get(security) {
            Some(&price) if price > Decimal::ZERO => Ok(price),
            _ => bail!("no price available for {}", security),
        }
    }

    /// Fill (or park, if stuck) a market order for a signed share delta.
    async fn execute(
        &self,
        security: &Security,
        shares: i64,
        price: Decimal,
        kind: OrderKind,
    ) -> OrderTicket {
        let order_id = self.next_order_id();
        let mut ticket = OrderTicket {
            order_id,
            security: security.clone(),
            kind,
            status: OrderStatus::Open,
            requested_shares: shares,
            filled_shares: 0,
            fill_price: None,
        };

        let mut state = self.state.write().await;
        state.order_count += 1;

        if self.stuck.read().await.contains(security) {
            warn!(order_id, %security, shares, "Paper order accepted but not filling");
            self.open_orders.write().await.push(ticket.clone());
            return ticket;
        }

        let fill = apply_fill(&mut state, security, shares, price, self.commission_per_trade);
        if let Some(fill) = fill {
            info!(
                order_id,
                %security,
                shares,
                price = %price,
                commission = %fill.commission,
                cash = %state.cash,
                "Paper order filled"
            );
            self.fills.write().await.push(PaperFill {
                order_id,
                kind,
                ..fill
            });
        }

        ticket.status = OrderStatus::Filled;
        ticket.filled_shares = shares;
        ticket.fill_price = Some(price);
        ticket
    }

    /// Fire resting stops crossed by current prices.
    async fn trigger_stops(&self) -> Vec<OrderTicket> {
        let mut state = self.state.write().await;
        let prices = self.prices.read().await;
        let stuck = self.stuck.read().await;
        let mut stops = self.resting_stops.write().await;

        let mut remaining = Vec::with_capacity(stops.len());
        let mut fired_securities: HashSet<Security> = HashSet::new();
        let mut triggered = Vec::new();

        for stop in stops.drain(..) {
            let security = stop.request.security.clone();

            // One trigger per security; the rest are replaced by it
            if fired_securities.contains(&security) {
                debug!(order_id = stop.order_id, %security, "Cancelling sibling stop");
                continue;
            }

            let Some(&price) = prices.get(&security) else {
                remaining.push(stop);
                continue;
            };

            if stuck.contains(&security)
                || !stop.request.trigger.is_triggered(price, stop.request.stop_price)
            {
                remaining.push(stop);
                continue;
            }

            let current = state.positions.get(&security).map(|p| p.amount).unwrap_or(0);
            let target = (stop.request.target_value / price)
                .trunc()
                .to_i64()
                .unwrap_or(0);
            let delta = target - current;

            fired_securities.insert(security.clone());

            if delta != 0 {
                if let Some(fill) =
                    apply_fill(&mut state, &security, delta, price, self.commission_per_trade)
                {
                    self.fills.write().await.push(PaperFill {
                        order_id: stop.order_id,
                        kind: OrderKind::Stop,
                        ..fill
                    });
                }
            }

            info!(
                order_id = stop.order_id,
                %security,
                stop_price = %stop.request.stop_price,
                price = %price,
                shares = delta,
                "Stop order triggered"
            );

            triggered.push(OrderTicket {
                order_id: stop.order_id,
                security,
                kind: OrderKind::Stop,
                status: OrderStatus::Filled,
                requested_shares: delta,
                filled_shares: delta,
                fill_price: Some(price),
            });
        }

        *stops = remaining;
        triggered
    }
}

/// Apply a fill to the account. Returns `None` for a zero-share fill.
fn apply_fill(
    state: &mut PaperAccountState,
    security: &Security,
    shares: i64,
    price: Decimal,
    commission: Decimal,
) -> Option<PaperFill> {
    if shares == 0 {
        return None;
    }

    state.cash -= Decimal::from(shares) * price + commission;
    state.total_commission += commission;

    let position = state
        .positions
        .entry(security.clone())
        .or_insert_with(|| PaperPosition::new(security.clone()));

    let old = position.amount;
    let new = old + shares;
    let mut closed_round_trip = false;

    if old == 0 || old.signum() == shares.signum() {
        // Opening or adding: running average
        let old_abs = Decimal::from(old.abs());
        let add_abs = Decimal::from(shares.abs());
        position.cost_basis =
            (position.cost_basis * old_abs + price * add_abs) / (old_abs + add_abs);
    } else {
        let closed = shares.abs().min(old.abs());
        let realized =
            (price - position.cost_basis) * Decimal::from(closed) * Decimal::from(old.signum());
        position.realized_pnl += realized;
        state.realized_pnl += realized;

        if new == 0 || new.signum() != old.signum() {
            closed_round_trip = true;
        }
    }

    position.amount = new;
    position.last_price = price;

    if closed_round_trip {
        let won = position.realized_pnl > Decimal::ZERO;
        state.round_trips += 1;
        if won {
            state.winning_round_trips += 1;
        }

        if new == 0 {
            state.positions.remove(security);
        } else if let Some(position) = state.positions.get_mut(security) {
            // Flipped sides: the remainder opens at this price
            position.cost_basis = price;
            position.realized_pnl = Decimal::ZERO;
        }
    }

    Some(PaperFill {
        order_id: 0,
        security: security.clone(),
        kind: OrderKind::Market,
        shares,
        price,
        commission,
    })
}

#[async_trait]
impl MarketData for PaperBroker {
    async fn current_price(&self, security: &Security) -> Option<Decimal> {
        self.prices.read().await.get(security).copied()
    }

    async fn can_trade(&self, security: &Security) -> bool {
        !self.halted.read().await.contains(security)
            && self.prices.read().await.contains_key(security)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn submit_order(&self, security: &Security, shares: i64) -> Result<OrderTicket> {
        if shares == 0 {
            bail!("refusing zero-share order for {}", security);
        }
        let price = self.fill_price(security).await?;
        Ok(self.execute(security, shares, price, OrderKind::Market).await)
    }

    async fn submit_order_target_percent(
        &self,
        security: &Security,
        pct: Decimal,
    ) -> Result<OrderTicket> {
        let price = self.fill_price(security).await?;

        let (current, net_liquidation) = {
            let state = self.state.read().await;
            let current = state.positions.get(security).map(|p| p.amount).unwrap_or(0);
            (current, state.net_liquidation())
        };

        let target = (net_liquidation * pct / price).trunc().to_i64().unwrap_or(0);
        let delta = target - current;

        if delta == 0 {
            debug!(%security, %pct, "Position already at target");
            return Ok(OrderTicket {
                order_id: self.next_order_id(),
                security: security.clone(),
                kind: OrderKind::TargetPercent,
                status: OrderStatus::Filled,
                requested_shares: 0,
                filled_shares: 0,
                fill_price: None,
            });
        }

        Ok(self
            .execute(security, delta, price, OrderKind::TargetPercent)
            .await)
    }

    async fn submit_stop_order(&self, order: &StopOrderRequest) -> Result<OrderTicket> {
        if self.halted.read().await.contains(&order.security) {
            bail!("{} is not tradable", order.security);
        }
        if order.stop_price <= Decimal::ZERO {
            bail!("invalid stop price {} for {}", order.stop_price, order.security);
        }

        let order_id = self.next_order_id();
        self.state.write().await.order_count += 1;
        self.resting_stops.write().await.push(RestingStop {
            order_id,
            request: order.clone(),
        });

        debug!(
            order_id,
            security = %order.security,
            stop_price = %order.stop_price,
            trigger = ?order.trigger,
            "Paper stop order resting"
        );

        Ok(OrderTicket {
            order_id,
            security: order.security.clone(),
            kind: OrderKind::Stop,
            status: OrderStatus::Open,
            requested_shares: 0,
            filled_shares: 0,
            fill_price: None,
        })
    }

    async fn live_positions(&self) -> HashMap<Security, LivePosition> {
        self.state
            .read()
            .await
            .positions
            .iter()
            .filter(|(_, p)| p.amount != 0)
            .map(|(security, p)| {
                (
                    security.clone(),
                    LivePosition {
                        amount: p.amount,
                        cost_basis: p.cost_basis,
                    },
                )
            })
            .collect()
    }

    async fn available_funds(&self) -> Decimal {
        self.state.read().await.available_funds()
    }

    async fn leverage(&self) -> Decimal {
        let state = self.state.read().await;
        let net_liquidation = state.net_liquidation();
        if net_liquidation <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        state.gross_exposure() / net_liquidation
    }
}
