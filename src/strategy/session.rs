//! Per-session state and the scheduled strategy callbacks.

use crate::broker::HostContext;
use crate::config::StrategyConfig;
use crate::schedule::ScheduledEvent;
use crate::signal::{CandidateSet, SignalMetrics, SignalScreen};
use crate::strategy::classifier::SignalClassifier;
use crate::strategy::holdings::HoldingsTracker;
use crate::strategy::order_engine::{OrderCycleReport, OrderEngine};
use crate::strategy::reporter::{PositionLogger, PositionRow};
use crate::strategy::stop_loss::{StopLossManager, StopLossReport};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

/// Everything the strategy carries between callbacks.
///
/// Owned by the host and passed by `&mut` into each callback.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub holdings: HoldingsTracker,
    /// Today's candidates, replaced every `before_trading_start`
    pub candidates: CandidateSet,
    pub trading_day: Option<NaiveDate>,
}

impl SessionState {
    /// Fresh session with nothing held.
    pub fn new(hold_period_days: u32) -> Self {
        Self::with_holdings(HoldingsTracker::new(hold_period_days))
    }

    /// Resume a session from restored holdings.
    pub fn with_holdings(holdings: HoldingsTracker) -> Self {
        Self {
            holdings,
            candidates: CandidateSet::default(),
            trading_day: None,
        }
    }
}

/// Result of the pre-market candidate refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateReport {
    pub rows_screened: usize,
    pub longs: usize,
    pub shorts: usize,
    /// Set when classification failed and the day runs without candidates
    pub conflict: Option<String>,
}

/// What a dispatched callback produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallbackReport {
    Candidates(CandidateReport),
    Orders(OrderCycleReport),
    Stops(StopLossReport),
    Positions { rows: Vec<PositionRow> },
}

/// Earnings-surprise and sentiment strategy.
///
/// Stateless itself: all carried state lives in `SessionState`.
#[derive(Debug, Clone)]
pub struct EarningsStrategy {
    screen: SignalScreen,
    classifier: SignalClassifier,
    engine: OrderEngine,
    stop_loss: StopLossManager,
    logger: PositionLogger,
}

impl EarningsStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            screen: SignalScreen::new(config),
            classifier: SignalClassifier::new(config),
            engine: OrderEngine::new(config.commission_per_trade),
            stop_loss: StopLossManager::new(config),
            logger: PositionLogger::new(),
        }
    }

    /// Screen and classify the day's signal metrics into the candidate set.
    ///
    /// A classification conflict leaves the day with no candidates; held
    /// positions still age out at the open.
    #[instrument(skip_all, fields(%date))]
    pub fn before_trading_start(
        &self,
        state: &mut SessionState,
        date: NaiveDate,
        metrics: &[SignalMetrics],
    ) -> CandidateReport {
        let rows = self.screen.screen(metrics);
        let mut report = CandidateReport {
            rows_screened: rows.len(),
            ..Default::default()
        };

        state.candidates = match self.classifier.classify(&rows) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Signal classification failed, no entries today");
                report.conflict = Some(e.to_string());
                CandidateSet::default()
            }
        };
        state.trading_day = Some(date);

        report.longs = state.candidates.longs.len();
        report.shorts = state.candidates.shorts.len();

        info!(
            rows = report.rows_screened,
            longs = report.longs,
            shorts = report.shorts,
            "Candidates refreshed"
        );
        report
    }

    /// Market-open callback: exits then entries.
    pub async fn on_market_open(
        &self,
        state: &mut SessionState,
        ctx: &HostContext<'_>,
    ) -> OrderCycleReport {
        if state.trading_day.is_none() {
            warn!("Market open before any candidate refresh, running exits only");
        }
        self.engine
            .run(&mut state.holdings, &state.candidates, ctx)
            .await
    }

    /// Callback a configured delay after the open: stop orders.
    pub async fn on_market_open_plus(
        &self,
        state: &SessionState,
        ctx: &HostContext<'_>,
    ) -> StopLossReport {
        self.stop_loss.place_stops(&state.candidates, ctx).await
    }

    /// Callback a configured offset before the close: position log.
    pub async fn on_market_close(
        &self,
        state: &SessionState,
        ctx: &HostContext<'_>,
    ) -> Vec<PositionRow> {
        self.logger.log_positions(&state.holdings, ctx).await
    }

    /// Route a scheduled event to its callback.
    pub async fn dispatch(
        &self,
        event: ScheduledEvent,
        state: &mut SessionState,
        date: NaiveDate,
        metrics: &[SignalMetrics],
        ctx: &HostContext<'_>,
    ) -> CallbackReport {
        match event {
            ScheduledEvent::BeforeTradingStart => {
                CallbackReport::Candidates(self.before_trading_start(state, date, metrics))
            }
            ScheduledEvent::MarketOpen => CallbackReport::Orders(self.on_market_open(state, ctx).await),
            ScheduledEvent::PlaceStops => {
                CallbackReport::Stops(self.on_market_open_plus(state, ctx).await)
            }
            ScheduledEvent::LogPositions => CallbackReport::Positions {
                rows: self.on_market_close(state, ctx).await,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, PaperBroker, Security};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn sec(symbol: &str) -> Security {
        Security::new(symbol, "NYSE")
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 3, d).unwrap()
    }

    fn metric(symbol: &str, surprise: Decimal, sentiment: Decimal) -> SignalMetrics {
        SignalMetrics {
            security: sec(symbol),
            days_since_announcement: 2,
            surprise_factor: Some(surprise),
            sentiment_score: Some(sentiment),
            in_base_universe: true,
        }
    }

    async fn broker_with(prices: &[(&str, Decimal)]) -> PaperBroker {
        let broker = PaperBroker::new(dec!(10000), dec!(6.95));
        broker
            .update_market_data(
                prices.iter().map(|(s, p)| (sec(s), *p)).collect(),
                HashSet::new(),
            )
            .await;
        broker
    }

    // =========================================================================
    // Callback Tests
    // =========================================================================

    #[test]
    fn test_before_trading_start_replaces_candidates() {
        let strategy = EarningsStrategy::new(&StrategyConfig::default());
        let mut state = SessionState::new(2);

        strategy.before_trading_start(&mut state, day(1), &[metric("AAA", dec!(80), dec!(0.2))]);
        assert!(state.candidates.longs.contains(&sec("AAA")));

        let report = strategy.before_trading_start(
            &mut state,
            day(2),
            &[metric("BBB", dec!(-90), dec!(-0.3))],
        );
        assert_eq!(report.longs, 0);
        assert_eq!(report.shorts, 1);
        assert!(state.candidates.longs.is_empty());
        assert_eq!(state.trading_day, Some(day(2)));
    }

    #[test]
    fn test_conflicting_config_runs_day_without_candidates() {
        // Overlapping thresholds let one row qualify on both sides
        let config = StrategyConfig {
            surprise_long_threshold: dec!(-100),
            surprise_short_threshold: dec!(100),
            sentiment_long_threshold: dec!(-1),
            sentiment_short_threshold: dec!(1),
            ..StrategyConfig::default()
        };
        let strategy = EarningsStrategy::new(&config);
        let mut state = SessionState::new(2);

        let report =
            strategy.before_trading_start(&mut state, day(1), &[metric("AAA", dec!(0), dec!(0))]);
        assert!(report.conflict.is_some());
        assert!(state.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_full_day_enters_places_stop_and_logs() {
        let strategy = EarningsStrategy::new(&StrategyConfig::default());
        let mut state = SessionState::new(2);
        let broker = broker_with(&[("XXX", dec!(50))]).await;
        let ctx = HostContext::new(&broker, &broker);

        strategy.before_trading_start(&mut state, day(1), &[metric("XXX", dec!(80), dec!(0.02))]);

        let orders = strategy.on_market_open(&mut state, &ctx).await;
        assert_eq!(orders.entries[0].shares, 199);

        let stops = strategy.on_market_open_plus(&state, &ctx).await;
        assert_eq!(stops.placed[0].stop_price, dec!(48));

        let rows = strategy.on_market_close(&state, &ctx).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].days_held, Some(0));
    }

    #[tokio::test]
    async fn test_position_held_for_hold_period_then_flattened() {
        let strategy = EarningsStrategy::new(&StrategyConfig::default());
        let mut state = SessionState::new(2);
        let broker = broker_with(&[("XXX", dec!(50))]).await;
        let ctx = HostContext::new(&broker, &broker);

        // Day 1: enter
        strategy.before_trading_start(&mut state, day(1), &[metric("XXX", dec!(80), dec!(0.02))]);
        strategy.on_market_open(&mut state, &ctx).await;
        broker.end_of_day().await;

        // Day 2: no longer a candidate, held one day
        strategy.before_trading_start(&mut state, day(2), &[]);
        let report = strategy.on_market_open(&mut state, &ctx).await;
        assert_eq!(report.sweep.held, vec![(sec("XXX"), 1)]);

        // Day 3: hold period reached
        strategy.before_trading_start(&mut state, day(3), &[]);
        let report = strategy.on_market_open(&mut state, &ctx).await;
        assert_eq!(report.sweep.flattened, vec![sec("XXX")]);
        assert!(state.holdings.is_empty());
        assert!(broker.live_positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_stuck_flatten_becomes_orphan_next_day() {
        let strategy = EarningsStrategy::new(&StrategyConfig {
            hold_period_days: 1,
            ..StrategyConfig::default()
        });
        let mut state = SessionState::new(1);
        let broker = broker_with(&[("XXX", dec!(50))]).await;
        let ctx = HostContext::new(&broker, &broker);

        strategy.before_trading_start(&mut state, day(1), &[metric("XXX", dec!(80), dec!(0.02))]);
        strategy.on_market_open(&mut state, &ctx).await;

        broker.set_stuck(&sec("XXX"), true).await;
        strategy.before_trading_start(&mut state, day(2), &[]);
        let report = strategy.on_market_open(&mut state, &ctx).await;
        assert_eq!(report.sweep.flattened, vec![sec("XXX")]);
        assert_eq!(broker.end_of_day().await, 1);

        broker.set_stuck(&sec("XXX"), false).await;
        strategy.before_trading_start(&mut state, day(3), &[]);
        let report = strategy.on_market_open(&mut state, &ctx).await;
        assert_eq!(report.sweep.orphans, vec![sec("XXX")]);
        assert!(state.holdings.is_empty());
        assert!(broker.live_positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_routes_events() {
        let strategy = EarningsStrategy::new(&StrategyConfig::default());
        let mut state = SessionState::new(2);
        let broker = broker_with(&[]).await;
        let ctx = HostContext::new(&broker, &broker);
        let metrics = vec![metric("AAA", dec!(80), dec!(0.5))];

        let report = strategy
            .dispatch(ScheduledEvent::BeforeTradingStart, &mut state, day(1), &metrics, &ctx)
            .await;
        assert!(matches!(report, CallbackReport::Candidates(ref c) if c.longs == 1));

        let report = strategy
            .dispatch(ScheduledEvent::MarketOpen, &mut state, day(1), &metrics, &ctx)
            .await;
        // No price for AAA in the book
        assert!(matches!(report, CallbackReport::Orders(ref o) if o.entries.is_empty()));

        let report = strategy
            .dispatch(ScheduledEvent::LogPositions, &mut state, day(1), &metrics, &ctx)
            .await;
        assert!(matches!(report, CallbackReport::Positions { ref rows } if rows.is_empty()));
    }
}
