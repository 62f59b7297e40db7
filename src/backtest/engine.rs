//! Backtesting simulation engine.
//!
//! Replays historical daily data through the strategy callbacks against a
//! paper broker, one scheduled event at a time.

use crate::backtest::data::{DailySnapshot, DataLoader};
use crate::backtest::metrics::{ActivityCounts, BacktestMetrics, EquityPoint};
use crate::backtest::BacktestConfig;
use crate::broker::{Broker, HostContext, PaperAccountState, PaperBroker};
use crate::config::Config;
use crate::schedule::{DailySchedule, ScheduledEvent};
use crate::strategy::{CallbackReport, EarningsStrategy, SessionState};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{debug, info, warn};

/// Result of a single simulated trading day.
#[derive(Debug, Clone)]
pub struct DayResult {
    pub date: NaiveDate,
    pub net_liquidation: Decimal,
    pub position_count: usize,
    pub entries: usize,
    pub flattens: usize,
    pub stops_triggered: usize,
}

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub config: Config,
    pub backtest_config: BacktestConfig,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days_processed: usize,
}

impl BacktestResult {
    /// Export equity curve to CSV.
    pub fn equity_to_csv(&self, path: &str) -> Result<()> {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create equity CSV: {}", path))?;
        writeln!(
            file,
            "date,cash,positions_value,net_liquidation,drawdown,positions,leverage"
        )?;

        for point in &self.equity_curve {
            writeln!(
                file,
                "{},{},{},{},{},{},{}",
                point.date.format("%Y-%m-%d"),
                point.cash,
                point.positions_value,
                point.net_liquidation,
                point.drawdown,
                point.position_count,
                point.leverage,
            )?;
        }

        Ok(())
    }

    /// Write the full result as pretty-printed JSON.
    pub fn export_json(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize result")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results: {}", path))?;
        Ok(())
    }

    /// Get a summary string.
    pub fn summary(&self) -> String {
        format!(
            "{}\n\nBacktest Period: {} to {}\nTrading Days: {}",
            self.metrics.summary(),
            self.start_date.format("%Y-%m-%d"),
            self.end_date.format("%Y-%m-%d"),
            self.days_processed,
        )
    }
}

/// The backtesting simulation engine.
pub struct BacktestEngine<D: DataLoader> {
    data_loader: D,
    config: Config,
    backtest_config: BacktestConfig,
    broker: PaperBroker,
    strategy: EarningsStrategy,
    schedule: DailySchedule,
    session: SessionState,

    // Tracking for metrics
    equity_curve: Vec<EquityPoint>,
    peak_equity: Decimal,
    activity: ActivityCounts,
}

impl<D: DataLoader> BacktestEngine<D> {
    /// Create a new backtest engine.
    pub fn new(data_loader: D, config: Config, backtest_config: BacktestConfig) -> Self {
        let initial_balance = backtest_config.initial_balance;
        let broker = PaperBroker::new(initial_balance, config.strategy.commission_per_trade);

        Self {
            data_loader,
            strategy: EarningsStrategy::new(&config.strategy),
            schedule: DailySchedule::new(&config.schedule),
            session: SessionState::new(config.strategy.hold_period_days),
            config,
            backtest_config,
            broker,
            equity_curve: Vec::new(),
            peak_equity: initial_balance,
            activity: ActivityCounts::default(),
        }
    }

    /// Continue from an existing paper account and session, for paper mode.
    pub fn resume(
        data_loader: D,
        config: Config,
        backtest_config: BacktestConfig,
        broker: PaperBroker,
        session: SessionState,
    ) -> Self {
        let mut engine = Self::new(data_loader, config, backtest_config);
        engine.broker = broker;
        engine.session = session;
        engine
    }

    /// Run the backtest over the inclusive date range.
    pub async fn run(&mut self, start: NaiveDate, end: NaiveDate) -> Result<BacktestResult> {
        info!(%start, %end, "Starting backtest");

        let days = self.data_loader.load_days(start, end)?;
        if days.is_empty() {
            anyhow::bail!("No data available for the specified date range");
        }

        info!(days = days.len(), "Loaded trading days");

        for (i, day) in days.iter().enumerate() {
            let result = self.step(day).await;

            if i % 20 == 0 {
                debug!(
                    "Progress: {}/{} ({:.1}%), Equity: ${:.2}",
                    i,
                    days.len(),
                    (i as f64 / days.len() as f64) * 100.0,
                    result.net_liquidation
                );
            }
        }

        let final_state = self.broker.get_state().await;
        self.activity.total_commission = final_state.total_commission;
        self.activity.realized_pnl = final_state.realized_pnl;
        self.activity.round_trips = final_state.round_trips;
        self.activity.winning_round_trips = final_state.winning_round_trips;

        let metrics = BacktestMetrics::calculate(
            &self.equity_curve,
            self.backtest_config.initial_balance,
            self.activity.clone(),
        );

        info!(
            net_liquidation = %final_state.net_liquidation(),
            cash = %final_state.cash,
            "Backtest complete"
        );

        let equity_curve = if self.backtest_config.record_equity_curve {
            self.equity_curve.clone()
        } else {
            Vec::new()
        };

        Ok(BacktestResult {
            config: self.config.clone(),
            backtest_config: self.backtest_config.clone(),
            metrics,
            equity_curve,
            start_date: days[0].date,
            end_date: days[days.len() - 1].date,
            days_processed: days.len(),
        })
    }

    /// Simulate one trading day.
    ///
    /// Opening prices apply before the market-open callback; closing prices
    /// apply before the position log, which is when resting stops can fire.
    /// Unfilled orders and stops are cancelled after the close.
    pub async fn step(&mut self, day: &DailySnapshot) -> DayResult {
        let events = self.schedule.events_for(day.date);
        if events.is_empty() {
            warn!(date = %day.date, "Data row on a non-trading day, marking only");
        }

        let metrics = day.signal_metrics();
        let halted = day.halted();
        let mut entries = 0;
        let mut flattens = 0;
        let mut stops_triggered = 0;

        for (time, event) in events {
            match event {
                ScheduledEvent::MarketOpen => {
                    let fired = self
                        .broker
                        .update_market_data(day.open_prices(), halted.clone())
                        .await;
                    stops_triggered += fired.len();
                }
                ScheduledEvent::LogPositions => {
                    let fired = self
                        .broker
                        .update_market_data(day.close_prices(), halted.clone())
                        .await;
                    stops_triggered += fired.len();
                }
                ScheduledEvent::BeforeTradingStart | ScheduledEvent::PlaceStops => {}
            }

            debug!(%time, %event, "Dispatching");
            let ctx = HostContext::new(&self.broker, &self.broker);
            let report = self
                .strategy
                .dispatch(event, &mut self.session, day.date, &metrics, &ctx)
                .await;

            tally(&mut self.activity, &report);
            if let CallbackReport::Orders(orders) = &report {
                entries += orders.entries.len();
                flattens += orders.sweep.flattened.len() + orders.sweep.orphans.len();
            }
        }

        if !self.schedule.is_trading_day(day.date) {
            stops_triggered += self
                .broker
                .update_market_data(day.close_prices(), halted)
                .await
                .len();
        }

        self.broker.end_of_day().await;
        self.activity.stops_triggered += stops_triggered as u64;

        let state = self.broker.get_state().await;
        let point = self.record_equity(day.date, &state).await;

        DayResult {
            date: day.date,
            net_liquidation: point.net_liquidation,
            position_count: point.position_count,
            entries,
            flattens,
            stops_triggered,
        }
    }

    async fn record_equity(&mut self, date: NaiveDate, state: &PaperAccountState) -> EquityPoint {
        let net_liquidation = state.net_liquidation();
        let point = EquityPoint::new(
            date,
            state.cash,
            net_liquidation - state.cash,
            state.positions.len(),
            self.broker.leverage().await,
            self.peak_equity,
        );

        if net_liquidation > self.peak_equity {
            self.peak_equity = net_liquidation;
        }

        self.equity_curve.push(point.clone());
        point
    }

    /// Get the equity curve.
    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Get the current session state.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Get the paper broker.
    pub fn broker(&self) -> &PaperBroker {
        &self.broker
    }
}

/// Fold one callback report into the run's counters.
fn tally(activity: &mut ActivityCounts, report: &CallbackReport) {
    match report {
        CallbackReport::Candidates(candidates) => {
            if candidates.conflict.is_some() {
                activity.classification_conflicts += 1;
            }
        }
        CallbackReport::Orders(orders) => {
            activity.entries += orders.entries.len() as u64;
            activity.skipped_entries += orders.skipped.len() as u64;
            activity.flattens += orders.sweep.flattened.len() as u64;
            activity.orphan_retries += orders.sweep.orphans.len() as u64;
        }
        CallbackReport::Stops(stops) => {
            activity.stops_placed += stops.placed.len() as u64;
        }
        CallbackReport::Positions { .. } => {}
    }
}
