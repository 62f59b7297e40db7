//! Order, position and security types shared by the strategy and brokers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tradable instrument.
///
/// Equality and hashing cover both fields, so the same ticker listed on two
/// exchanges is two distinct securities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Security {
    /// Ticker symbol (e.g., "AAPL")
    pub symbol: String,
    /// Primary listing exchange (e.g., "NASDAQ")
    pub exchange: String,
}

impl Security {
    /// Create a new security.
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// A live position as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePosition {
    /// Signed share count (negative = short)
    pub amount: i64,
    /// Average price paid per share
    pub cost_basis: Decimal,
}

/// Order kind, used for logging and the order log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    TargetPercent,
    Stop,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::TargetPercent => write!(f, "TARGET_PERCENT"),
            OrderKind::Stop => write!(f, "STOP"),
        }
    }
}

/// Order status as acknowledged by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted, not yet filled
    Open,
    Filled,
    Canceled,
}

/// Which side of the stop price fires the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopTrigger {
    /// Fires once the price trades at or below the stop price
    AtOrBelow,
    /// Fires once the price trades at or above the stop price
    AtOrAbove,
}

impl StopTrigger {
    /// Check whether `price` fires a stop at `stop_price`.
    pub fn is_triggered(&self, price: Decimal, stop_price: Decimal) -> bool {
        match self {
            StopTrigger::AtOrBelow => price <= stop_price,
            StopTrigger::AtOrAbove => price >= stop_price,
        }
    }
}

/// Stop order request: once triggered, move the position to `target_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrderRequest {
    pub security: Security,
    /// Target position value once triggered (0 = flatten)
    pub target_value: Decimal,
    pub stop_price: Decimal,
    pub trigger: StopTrigger,
}

/// Broker acknowledgement for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub order_id: u64,
    pub security: Security,
    pub kind: OrderKind,
    pub status: OrderStatus,
    /// Signed share delta requested (0 for stops until triggered)
    pub requested_shares: i64,
    /// Signed share delta filled so far
    pub filled_shares: i64,
    /// Fill price, if filled
    pub fill_price: Option<Decimal>,
}

impl OrderTicket {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}
