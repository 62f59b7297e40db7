//! Performance metrics calculation for backtesting.
//!
//! Provides returns, drawdown, Sharpe and Sortino ratios on the daily equity
//! curve, plus the strategy's activity counters.

use crate::utils::percentage_change;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Trading days per year used for annualizing daily figures.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// A point on the equity curve, taken after the close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub cash: Decimal,
    /// Signed market value of all positions
    pub positions_value: Decimal,
    pub net_liquidation: Decimal,
    pub drawdown: Decimal,
    pub position_count: usize,
    pub leverage: Decimal,
}

impl EquityPoint {
    /// Create a new equity point.
    pub fn new(
        date: NaiveDate,
        cash: Decimal,
        positions_value: Decimal,
        position_count: usize,
        leverage: Decimal,
        peak_equity: Decimal,
    ) -> Self {
        let net_liquidation = cash + positions_value;
        let drawdown = if peak_equity > Decimal::ZERO && net_liquidation < peak_equity {
            (peak_equity - net_liquidation) / peak_equity
        } else {
            Decimal::ZERO
        };

        Self {
            date,
            cash,
            positions_value,
            net_liquidation,
            drawdown,
            position_count,
            leverage,
        }
    }
}

/// Counters accumulated by the engine over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub entries: u64,
    pub skipped_entries: u64,
    pub flattens: u64,
    pub orphan_retries: u64,
    pub stops_placed: u64,
    pub stops_triggered: u64,
    pub classification_conflicts: u64,
    pub round_trips: u64,
    pub winning_round_trips: u64,
    pub total_commission: Decimal,
    pub realized_pnl: Decimal,
}

/// Backtest performance metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Returns
    /// Total absolute return (final - initial)
    pub total_return: Decimal,
    /// Total return as percentage
    pub total_return_pct: Decimal,
    /// Annualized return percentage
    pub annualized_return: Decimal,

    // Risk
    /// Maximum drawdown (fraction of peak)
    pub max_drawdown: Decimal,
    /// Longest stretch below a prior peak, in trading days
    pub max_drawdown_duration_days: usize,
    /// Annualized volatility of daily returns
    pub volatility: Decimal,
    /// Highest end-of-day leverage
    pub peak_leverage: Decimal,

    // Risk-adjusted
    /// Sharpe ratio on daily returns (zero risk-free rate)
    pub sharpe_ratio: Decimal,
    /// Sortino ratio (downside deviation only)
    pub sortino_ratio: Decimal,

    // Activity
    pub activity: ActivityCounts,
    /// Win rate of closed round trips, percent
    pub win_rate: Decimal,

    // Time
    pub trading_days: usize,
}

impl BacktestMetrics {
    /// Calculate metrics from the equity curve and activity counters.
    pub fn calculate(
        equity_curve: &[EquityPoint],
        initial_balance: Decimal,
        activity: ActivityCounts,
    ) -> Self {
        let (Some(_), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
            return Self::empty(activity);
        };

        let trading_days = equity_curve.len();
        let years = trading_days as f64 / TRADING_DAYS_PER_YEAR;

        let total_return = last.net_liquidation - initial_balance;
        let total_return_pct = percentage_change(initial_balance, last.net_liquidation);

        let annualized_return = if years > 0.0 {
            let factor = 1.0 + to_f64(total_return_pct) / 100.0;
            if factor > 0.0 {
                from_f64((factor.powf(1.0 / years) - 1.0) * 100.0)
            } else {
                dec!(-100)
            }
        } else {
            Decimal::ZERO
        };

        let (max_drawdown, max_drawdown_duration_days) = calculate_max_drawdown(equity_curve);

        let returns = calculate_daily_returns(equity_curve, initial_balance);
        let volatility = calculate_volatility(&returns);
        let sharpe_ratio = calculate_sharpe(&returns);
        let sortino_ratio = calculate_sortino(&returns);

        let peak_leverage = equity_curve
            .iter()
            .map(|p| p.leverage)
            .max()
            .unwrap_or(Decimal::ZERO);

        let win_rate = if activity.round_trips > 0 {
            Decimal::from(activity.winning_round_trips) / Decimal::from(activity.round_trips)
                * dec!(100)
        } else {
            Decimal::ZERO
        };

        Self {
            total_return,
            total_return_pct,
            annualized_return,
            max_drawdown,
            max_drawdown_duration_days,
            volatility,
            peak_leverage,
            sharpe_ratio,
            sortino_ratio,
            activity,
            win_rate,
            trading_days,
        }
    }

    /// Metrics for a run with no trading days.
    pub fn empty(activity: ActivityCounts) -> Self {
        Self {
            total_return: Decimal::ZERO,
            total_return_pct: Decimal::ZERO,
            annualized_return: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_drawdown_duration_days: 0,
            volatility: Decimal::ZERO,
            peak_leverage: Decimal::ZERO,
            sharpe_ratio: Decimal::ZERO,
            sortino_ratio: Decimal::ZERO,
            activity,
            win_rate: Decimal::ZERO,
            trading_days: 0,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS ({} trading days)
═══════════════════════════════════════════════
RETURNS
  Total Return:      ${:.2} ({:.2}%)
  Annualized:        {:.2}%
  Realized P&L:      ${:.2}
  Commissions:       ${:.2}

RISK
  Max Drawdown:      {:.2}% ({} days)
  Volatility:        {:.2}%
  Peak Leverage:     {:.2}x

RISK-ADJUSTED
  Sharpe Ratio:      {:.3}
  Sortino Ratio:     {:.3}

ACTIVITY
  Entries:           {} ({} skipped)
  Flattens:          {}
  Orphan Retries:    {}
  Stops Placed:      {}
  Stops Triggered:   {}
  Round Trips:       {}
  Win Rate:          {:.1}%
═══════════════════════════════════════════════"#,
            self.trading_days,
            self.total_return,
            self.total_return_pct,
            self.annualized_return,
            self.activity.realized_pnl,
            self.activity.total_commission,
            self.max_drawdown * dec!(100),
            self.max_drawdown_duration_days,
            self.volatility * dec!(100),
            self.peak_leverage,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.activity.entries,
            self.activity.skipped_entries,
            self.activity.flattens,
            self.activity.orphan_retries,
            self.activity.stops_placed,
            self.activity.stops_triggered,
            self.activity.round_trips,
            self.win_rate,
        )
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn from_f64(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
}

/// Daily returns, the first measured against the starting balance.
fn calculate_daily_returns(equity_curve: &[EquityPoint], initial_balance: Decimal) -> Vec<Decimal> {
    let mut previous = initial_balance;
    equity_curve
        .iter()
        .map(|point| {
            let r = if previous > Decimal::ZERO {
                (point.net_liquidation - previous) / previous
            } else {
                Decimal::ZERO
            };
            previous = point.net_liquidation;
            r
        })
        .collect()
}

/// Maximum drawdown and the longest run of days spent below a peak.
fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> (Decimal, usize) {
    let Some(first) = equity_curve.first() else {
        return (Decimal::ZERO, 0);
    };

    let mut peak = first.net_liquidation;
    let mut max_dd = Decimal::ZERO;
    let mut underwater_days = 0usize;
    let mut max_underwater = 0usize;

    for point in equity_curve {
        if point.net_liquidation >= peak {
            peak = point.net_liquidation;
            underwater_days = 0;
            continue;
        }

        underwater_days += 1;
        max_underwater = max_underwater.max(underwater_days);

        if peak > Decimal::ZERO {
            let dd = (peak - point.net_liquidation) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    (max_dd, max_underwater)
}

fn mean_and_std(returns: &[f64]) -> (f64, f64) {
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Annualized volatility of daily returns.
fn calculate_volatility(returns: &[Decimal]) -> Decimal {
    if returns.len() < 2 {
        return Decimal::ZERO;
    }
    let returns: Vec<f64> = returns.iter().copied().map(to_f64).collect();
    let (_, std_dev) = mean_and_std(&returns);
    from_f64(std_dev * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Annualized Sharpe ratio (zero risk-free rate).
fn calculate_sharpe(returns: &[Decimal]) -> Decimal {
    if returns.len() < 2 {
        return Decimal::ZERO;
    }
    let returns: Vec<f64> = returns.iter().copied().map(to_f64).collect();
    let (mean, std_dev) = mean_and_std(&returns);

    if std_dev < 1e-10 {
        return Decimal::ZERO;
    }

    from_f64(mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Annualized Sortino ratio (downside deviation only).
fn calculate_sortino(returns: &[Decimal]) -> Decimal {
    if returns.len() < 2 {
        return Decimal::ZERO;
    }
    let returns: Vec<f64> = returns.iter().copied().map(to_f64).collect();
    let (mean, _) = mean_and_std(&returns);

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        // No losing days: cap instead of dividing by zero
        return dec!(100);
    }

    let downside_deviation =
        (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt();
    if downside_deviation < 1e-10 {
        return dec!(100);
    }

    from_f64(mean / downside_deviation * TRADING_DAYS_PER_YEAR.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 3, d).unwrap()
    }

    fn point(d: u32, equity: Decimal, peak: Decimal) -> EquityPoint {
        EquityPoint::new(day(d), equity, Decimal::ZERO, 0, Decimal::ZERO, peak)
    }

    #[test]
    fn test_equity_point_drawdown() {
        let point = EquityPoint::new(day(1), dec!(9000), dec!(500), 2, dec!(0.5), dec!(10000));

        assert_eq!(point.net_liquidation, dec!(9500));
        assert_eq!(point.drawdown, dec!(0.05));
    }

    #[test]
    fn test_max_drawdown_calculation() {
        let curve = vec![
            point(1, dec!(10000), dec!(10000)),
            point(2, dec!(10500), dec!(10500)),
            point(3, dec!(9500), dec!(10500)),
            point(4, dec!(10000), dec!(10500)),
            point(7, dec!(11000), dec!(11000)),
        ];

        let (max_dd, duration) = calculate_max_drawdown(&curve);
        // 10500 -> 9500
        assert!(max_dd > dec!(0.09) && max_dd < dec!(0.10));
        assert_eq!(duration, 2);
    }

    #[test]
    fn test_daily_returns_start_from_initial_balance() {
        let curve = vec![
            point(1, dec!(10100), dec!(10100)),
            point(2, dec!(10100), dec!(10100)),
        ];

        let returns = calculate_daily_returns(&curve, dec!(10000));
        assert_eq!(returns, vec![dec!(0.01), Decimal::ZERO]);
    }

    #[test]
    fn test_calculate_counts_and_leverage() {
        let curve = vec![
            EquityPoint::new(day(1), dec!(5000), dec!(5050), 1, dec!(0.5), dec!(10050)),
            EquityPoint::new(day(2), dec!(10200), Decimal::ZERO, 0, Decimal::ZERO, dec!(10200)),
        ];
        let activity = ActivityCounts {
            entries: 1,
            flattens: 1,
            round_trips: 1,
            winning_round_trips: 1,
            total_commission: dec!(13.90),
            ..Default::default()
        };

        let metrics = BacktestMetrics::calculate(&curve, dec!(10000), activity);
        assert_eq!(metrics.total_return, dec!(200));
        assert_eq!(metrics.total_return_pct, dec!(2));
        assert_eq!(metrics.peak_leverage, dec!(0.5));
        assert_eq!(metrics.win_rate, dec!(100));
        assert_eq!(metrics.trading_days, 2);
    }

    #[test]
    fn test_empty_curve() {
        let metrics = BacktestMetrics::calculate(&[], dec!(10000), ActivityCounts::default());
        assert_eq!(metrics.total_return, Decimal::ZERO);
        assert_eq!(metrics.trading_days, 0);
    }

    #[test]
    fn test_metrics_summary() {
        let metrics = BacktestMetrics {
            total_return: dec!(500),
            total_return_pct: dec!(5),
            annualized_return: dec!(20),
            max_drawdown: dec!(0.02),
            max_drawdown_duration_days: 3,
            volatility: dec!(0.15),
            peak_leverage: dec!(1.1),
            sharpe_ratio: dec!(1.5),
            sortino_ratio: dec!(2.0),
            activity: ActivityCounts {
                entries: 12,
                orphan_retries: 1,
                ..Default::default()
            },
            win_rate: dec!(70),
            trading_days: 60,
        };

        let summary = metrics.summary();
        assert!(summary.contains("500.00"));
        assert!(summary.contains("Orphan Retries:    1"));
        assert!(summary.contains("Sharpe"));
    }
}
