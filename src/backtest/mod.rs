//! Backtesting module for replaying the strategy over historical data.
//!
//! This module provides:
//! - Historical daily data loading (CSV import)
//! - Day-by-day simulation engine driven by the daily schedule
//! - Performance metrics calculation
//!
//! # Example
//!
//! ```rust,ignore
//! use earnings_sentiment_trader::backtest::{BacktestConfig, BacktestEngine, CsvDataLoader};
//!
//! let loader = CsvDataLoader::new("data/signals.csv")?;
//! let mut engine = BacktestEngine::new(loader, Config::default(), BacktestConfig::default());
//!
//! let result = engine.run(start, end).await?;
//! println!("Return: {:.2}%", result.metrics.total_return_pct);
//! ```

mod data;
mod engine;
mod metrics;

pub use data::{CsvDataLoader, DailySnapshot, DataLoader, SecurityDay};
pub use engine::{BacktestEngine, BacktestResult, DayResult};
pub use metrics::{ActivityCounts, BacktestMetrics, EquityPoint};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Initial capital for the backtest
    pub initial_balance: Decimal,

    /// Whether to keep the equity curve in the result
    pub record_equity_curve: bool,

    /// Path to output results (optional)
    pub output_path: Option<String>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::new(10000, 0), // $10,000
            record_equity_curve: true,
            output_path: None,
        }
    }
}
