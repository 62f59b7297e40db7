//! # Earnings Sentiment Trader
//!
//! A daily equity strategy that goes long on strong positive earnings
//! surprises confirmed by positive news sentiment, and short on the mirror
//! case, holding each position for a fixed number of trading days.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `broker`: Broker and market-data interfaces plus the paper broker
//! - `signal`: Daily signal metrics and the long/short screen
//! - `strategy`: Classification, holding-period tracking, sizing and orders
//! - `schedule`: Trading-day callback calendar
//! - `persistence`: SQLite-based state persistence for paper trading
//! - `backtest`: Historical backtesting over daily data
//! - `utils`: Shared utilities and decimal arithmetic

pub mod backtest;
pub mod broker;
pub mod config;
pub mod error;
pub mod persistence;
pub mod schedule;
pub mod signal;
pub mod strategy;
pub mod utils;

pub use config::Config;
