//! Configuration management for the earnings sentiment trader.
//!
//! Loads settings from environment variables and config files. Values are
//! fixed at start-up; nothing here is reconfigured while a session runs.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Signal thresholds, holding period and stop multipliers
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Trading-day callback timing
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Paper account settings
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Flat commission charged per trade, reserved out of cash before sizing
    #[serde(default = "default_commission_per_trade")]
    pub commission_per_trade: Decimal,
    /// Trading days a position is held before it is flattened
    #[serde(default = "default_hold_period_days")]
    pub hold_period_days: u32,
    /// Minimum earnings surprise (percent) for a long candidate
    #[serde(default = "default_surprise_long_threshold")]
    pub surprise_long_threshold: Decimal,
    /// Maximum earnings surprise (percent) for a short candidate
    #[serde(default = "default_surprise_short_threshold")]
    pub surprise_short_threshold: Decimal,
    /// Minimum article sentiment for a long candidate
    #[serde(default = "default_sentiment_long_threshold")]
    pub sentiment_long_threshold: Decimal,
    /// Maximum article sentiment for a short candidate
    #[serde(default = "default_sentiment_short_threshold")]
    pub sentiment_short_threshold: Decimal,
    /// Earliest business day after the announcement to enter
    #[serde(default = "default_min_days_since_announcement")]
    pub min_days_since_announcement: u32,
    /// Latest business day after the announcement to enter
    #[serde(default = "default_max_days_since_announcement")]
    pub max_days_since_announcement: u32,
    /// Stop price = cost basis x multiplier, for long candidates
    #[serde(default = "default_long_stop_multiplier")]
    pub long_stop_multiplier: Decimal,
    /// Stop price = cost basis x multiplier, for short candidates
    #[serde(default = "default_short_stop_multiplier")]
    pub short_stop_multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Exchange open (local exchange time)
    #[serde(default = "default_market_open")]
    pub market_open: NaiveTime,
    /// Exchange close (local exchange time)
    #[serde(default = "default_market_close")]
    pub market_close: NaiveTime,
    /// Minutes after the open before stops are placed (lets entries fill)
    #[serde(default = "default_stop_loss_delay_minutes")]
    pub stop_loss_delay_minutes: u32,
    /// Minutes before the close when positions are logged
    #[serde(default = "default_log_positions_before_close_minutes")]
    pub log_positions_before_close_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Starting cash for a fresh paper account
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    /// SQLite database holding the paper session
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_commission_per_trade() -> Decimal {
    Decimal::new(695, 2) // $6.95 per trade
}

fn default_hold_period_days() -> u32 {
    2
}

fn default_surprise_long_threshold() -> Decimal {
    Decimal::new(75, 0)
}

fn default_surprise_short_threshold() -> Decimal {
    Decimal::new(-75, 0)
}

fn default_sentiment_long_threshold() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_sentiment_short_threshold() -> Decimal {
    Decimal::new(-1, 2) // -0.01
}

fn default_min_days_since_announcement() -> u32 {
    1
}

fn default_max_days_since_announcement() -> u32 {
    4
}

fn default_long_stop_multiplier() -> Decimal {
    Decimal::new(96, 2) // 0.96, sell stop 4% under cost
}

fn default_short_stop_multiplier() -> Decimal {
    Decimal::new(104, 2) // 1.04, buy stop 4% over cost
}

fn default_market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default()
}

fn default_market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default()
}

fn default_stop_loss_delay_minutes() -> u32 {
    60
}

fn default_log_positions_before_close_minutes() -> u32 {
    30
}

fn default_initial_cash() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_db_path() -> String {
    "data/paper_state.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("EST"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let strategy = &self.strategy;

        // Overlapping thresholds would let one security qualify on both sides
        anyhow::ensure!(
            strategy.surprise_long_threshold > strategy.surprise_short_threshold,
            "surprise_long_threshold must be greater than surprise_short_threshold"
        );

        anyhow::ensure!(
            strategy.sentiment_long_threshold > strategy.sentiment_short_threshold,
            "sentiment_long_threshold must be greater than sentiment_short_threshold"
        );

        anyhow::ensure!(
            strategy.min_days_since_announcement <= strategy.max_days_since_announcement,
            "min_days_since_announcement must be <= max_days_since_announcement"
        );

        anyhow::ensure!(
            strategy.hold_period_days >= 1,
            "hold_period_days must be at least 1"
        );

        anyhow::ensure!(
            strategy.commission_per_trade >= Decimal::ZERO,
            "commission_per_trade must not be negative"
        );

        // Long stops trigger on a decline and short stops on a rise, so a
        // multiplier on the wrong side of 1.0 would fire on the next tick
        anyhow::ensure!(
            strategy.long_stop_multiplier > Decimal::ZERO
                && strategy.long_stop_multiplier < Decimal::ONE,
            "long_stop_multiplier must be between 0 and 1"
        );
        anyhow::ensure!(
            strategy.short_stop_multiplier > Decimal::ONE,
            "short_stop_multiplier must be greater than 1"
        );

        let schedule = &self.schedule;
        anyhow::ensure!(
            schedule.market_open < schedule.market_close,
            "market_open must be before market_close"
        );

        let session_minutes = (schedule.market_close - schedule.market_open).num_minutes();
        anyhow::ensure!(
            i64::from(schedule.stop_loss_delay_minutes) < session_minutes,
            "stop_loss_delay_minutes must fall inside the trading session"
        );
        anyhow::ensure!(
            i64::from(schedule.log_positions_before_close_minutes) < session_minutes,
            "log_positions_before_close_minutes must fall inside the trading session"
        );

        anyhow::ensure!(
            self.paper.initial_cash > Decimal::ZERO,
            "paper initial_cash must be positive"
        );

        Ok(())
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            commission_per_trade: default_commission_per_trade(),
            hold_period_days: default_hold_period_days(),
            surprise_long_threshold: default_surprise_long_threshold(),
            surprise_short_threshold: default_surprise_short_threshold(),
            sentiment_long_threshold: default_sentiment_long_threshold(),
            sentiment_short_threshold: default_sentiment_short_threshold(),
            min_days_since_announcement: default_min_days_since_announcement(),
            max_days_since_announcement: default_max_days_since_announcement(),
            long_stop_multiplier: default_long_stop_multiplier(),
            short_stop_multiplier: default_short_stop_multiplier(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            market_open: default_market_open(),
            market_close: default_market_close(),
            stop_loss_delay_minutes: default_stop_loss_delay_minutes(),
            log_positions_before_close_minutes: default_log_positions_before_close_minutes(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            db_path: default_db_path(),
        }
    }
}
