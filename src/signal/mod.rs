//! Daily signal data and the pre-classification screen.
//!
//! The upstream pipeline delivers one `SignalMetrics` per security per day.
//! `SignalScreen` drops rows without a surprise factor and evaluates the
//! long/short predicates, producing the `DailySignalRow`s the classifier reads.

use crate::broker::Security;
use crate::config::StrategyConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Raw per-security metrics for one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub security: Security,
    /// Business days since the earnings surprise was announced
    pub days_since_announcement: u32,
    /// Percent difference between reported and expected EPS
    pub surprise_factor: Option<Decimal>,
    /// Latest article sentiment score
    pub sentiment_score: Option<Decimal>,
    /// Member of the liquid base universe
    pub in_base_universe: bool,
}

/// Screened signal row with its long/short flags evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySignalRow {
    pub security: Security,
    pub days_since_announcement: u32,
    pub surprise_factor: Decimal,
    pub sentiment_score: Option<Decimal>,
    pub is_long: bool,
    pub is_short: bool,
}

/// The day's entry candidates. Replaced wholesale every trading day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub longs: HashSet<Security>,
    pub shorts: HashSet<Security>,
}

impl CandidateSet {
    /// Total number of candidates on both sides.
    pub fn len(&self) -> usize {
        self.longs.len() + self.shorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.longs.is_empty() && self.shorts.is_empty()
    }

    /// Longs in a stable order, so order submission is deterministic.
    pub fn sorted_longs(&self) -> Vec<&Security> {
        let mut longs: Vec<&Security> = self.longs.iter().collect();
        longs.sort();
        longs
    }

    /// Shorts in a stable order, so order submission is deterministic.
    pub fn sorted_shorts(&self) -> Vec<&Security> {
        let mut shorts: Vec<&Security> = self.shorts.iter().collect();
        shorts.sort();
        shorts
    }
}

/// Evaluates the long/short predicates on raw metrics.
#[derive(Debug, Clone)]
pub struct SignalScreen {
    surprise_long_threshold: Decimal,
    surprise_short_threshold: Decimal,
    sentiment_long_threshold: Decimal,
    sentiment_short_threshold: Decimal,
}

impl SignalScreen {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            surprise_long_threshold: config.surprise_long_threshold,
            surprise_short_threshold: config.surprise_short_threshold,
            sentiment_long_threshold: config.sentiment_long_threshold,
            sentiment_short_threshold: config.sentiment_short_threshold,
        }
    }

    /// Screen a day's metrics. Rows missing a surprise factor are dropped.
    pub fn screen(&self, metrics: &[SignalMetrics]) -> Vec<DailySignalRow> {
        metrics.iter().filter_map(|m| self.evaluate(m)).collect()
    }

    fn evaluate(&self, metrics: &SignalMetrics) -> Option<DailySignalRow> {
        let surprise = metrics.surprise_factor?;
        let sentiment = metrics.sentiment_score;

        let is_long = metrics.in_base_universe
            && surprise >= self.surprise_long_threshold
            && sentiment.is_some_and(|s| s >= self.sentiment_long_threshold);
        let is_short = metrics.in_base_universe
            && surprise <= self.surprise_short_threshold
            && sentiment.is_some_and(|s| s <= self.sentiment_short_threshold);

        Some(DailySignalRow {
            security: metrics.security.clone(),
            days_since_announcement: metrics.days_since_announcement,
            surprise_factor: surprise,
            sentiment_score: sentiment,
            is_long,
            is_short,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn metrics(
        symbol: &str,
        surprise: Option<Decimal>,
        sentiment: Option<Decimal>,
        in_universe: bool,
    ) -> SignalMetrics {
        SignalMetrics {
            security: Security::new(symbol, "NYSE"),
            days_since_announcement: 2,
            surprise_factor: surprise,
            sentiment_score: sentiment,
            in_base_universe: in_universe,
        }
    }

    fn screen() -> SignalScreen {
        SignalScreen::new(&StrategyConfig::default())
    }

    #[test]
    fn test_missing_surprise_dropped() {
        let rows = screen().screen(&[metrics("AAA", None, Some(dec!(0.5)), true)]);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_long_predicate() {
        let rows = screen().screen(&[
            metrics("AAA", Some(dec!(80)), Some(dec!(0.02)), true),
            metrics("BBB", Some(dec!(75)), Some(dec!(0.01)), true),
            metrics("CCC", Some(dec!(74.99)), Some(dec!(0.5)), true),
            metrics("DDD", Some(dec!(80)), Some(dec!(0.009)), true),
            metrics("EEE", Some(dec!(80)), None, true),
            metrics("FFF", Some(dec!(80)), Some(dec!(0.5)), false),
        ]);

        let longs: Vec<&str> = rows
            .iter()
            .filter(|r| r.is_long)
            .map(|r| r.security.symbol.as_str())
            .collect();
        assert_eq!(longs, vec!["AAA", "BBB"]);
        assert!(rows.iter().all(|r| !r.is_short));
    }

    #[test]
    fn test_short_predicate() {
        let rows = screen().screen(&[
            metrics("AAA", Some(dec!(-80)), Some(dec!(-0.02)), true),
            metrics("BBB", Some(dec!(-75)), Some(dec!(-0.01)), true),
            metrics("CCC", Some(dec!(-80)), Some(dec!(0)), true),
            metrics("DDD", Some(dec!(-80)), None, true),
        ]);

        let shorts: Vec<&str> = rows
            .iter()
            .filter(|r| r.is_short)
            .map(|r| r.security.symbol.as_str())
            .collect();
        assert_eq!(shorts, vec!["AAA", "BBB"]);
    }

    #[test]
    fn test_candidate_set_sorted_views() {
        let mut set = CandidateSet::default();
        set.longs.insert(Security::new("ZZZ", "NYSE"));
        set.longs.insert(Security::new("AAA", "NYSE"));
        set.shorts.insert(Security::new("MMM", "NYSE"));

        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
        assert_eq!(set.sorted_longs()[0].symbol, "AAA");
        assert_eq!(set.sorted_shorts()[0].symbol, "MMM");
    }
}
