//! Daily long/short classification.

use crate::config::StrategyConfig;
use crate::error::SignalError;
use crate::signal::{CandidateSet, DailySignalRow};
use tracing::debug;

/// Partitions screened signal rows into the day's long and short candidates.
#[derive(Debug, Clone)]
pub struct SignalClassifier {
    min_days: u32,
    max_days: u32,
}

impl SignalClassifier {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            min_days: config.min_days_since_announcement,
            max_days: config.max_days_since_announcement,
        }
    }

    /// Build today's candidate set.
    ///
    /// Keeps rows inside the announcement window with exactly one side
    /// flagged. A row flagged on both sides is an error, never a tie-break.
    pub fn classify(&self, rows: &[DailySignalRow]) -> Result<CandidateSet, SignalError> {
        let mut candidates = CandidateSet::default();

        for row in rows {
            if row.is_long && row.is_short {
                return Err(SignalError::ConflictingSides(row.security.clone()));
            }

            if !(self.min_days..=self.max_days).contains(&row.days_since_announcement) {
                continue;
            }

            if row.is_long {
                candidates.longs.insert(row.security.clone());
            } else if row.is_short {
                candidates.shorts.insert(row.security.clone());
            }
        }

        // A duplicated row can still land one security on both sides
        if let Some(security) = candidates.longs.intersection(&candidates.shorts).next() {
            return Err(SignalError::ConflictingSides(security.clone()));
        }

        debug!(
            longs = candidates.longs.len(),
            shorts = candidates.shorts.len(),
            rows = rows.len(),
            "Classified signal rows"
        );

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Security;
    use crate::signal::{SignalMetrics, SignalScreen};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn row(symbol: &str, days: u32, is_long: bool, is_short: bool) -> DailySignalRow {
        DailySignalRow {
            security: Security::new(symbol, "NYSE"),
            days_since_announcement: days,
            surprise_factor: if is_long { dec!(80) } else { dec!(-80) },
            sentiment_score: Some(dec!(0.02)),
            is_long,
            is_short,
        }
    }

    fn classifier() -> SignalClassifier {
        SignalClassifier::new(&StrategyConfig::default())
    }

    #[test]
    fn test_announcement_window_inclusive() {
        let rows = vec![
            row("D0", 0, true, false),
            row("D1", 1, true, false),
            row("D4", 4, false, true),
            row("D5", 5, true, false),
        ];

        let set = classifier().classify(&rows).unwrap();
        assert_eq!(set.longs.len(), 1);
        assert!(set.longs.contains(&Security::new("D1", "NYSE")));
        assert_eq!(set.shorts.len(), 1);
        assert!(set.shorts.contains(&Security::new("D4", "NYSE")));
    }

    #[test]
    fn test_unflagged_rows_ignored() {
        let set = classifier().classify(&[row("AAA", 2, false, false)]).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_conflicting_row_is_an_error() {
        let result = classifier().classify(&[row("AAA", 2, true, true)]);
        assert_eq!(
            result,
            Err(SignalError::ConflictingSides(Security::new("AAA", "NYSE")))
        );
    }

    #[test]
    fn test_duplicate_rows_on_opposite_sides_is_an_error() {
        let rows = vec![row("AAA", 2, true, false), row("AAA", 3, false, true)];
        assert!(classifier().classify(&rows).is_err());
    }

    #[test]
    fn test_empty_input_gives_empty_set() {
        let set = classifier().classify(&[]).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_scenario_positive_surprise_classified_long() {
        let config = StrategyConfig::default();
        let rows = SignalScreen::new(&config).screen(&[SignalMetrics {
            security: Security::new("XXX", "NYSE"),
            days_since_announcement: 2,
            surprise_factor: Some(dec!(80)),
            sentiment_score: Some(dec!(0.02)),
            in_base_universe: true,
        }]);

        let set = SignalClassifier::new(&config).classify(&rows).unwrap();
        assert!(set.longs.contains(&Security::new("XXX", "NYSE")));
        assert!(set.shorts.is_empty());
    }

    #[test]
    fn test_longs_and_shorts_disjoint_across_grid() {
        let config = StrategyConfig::default();
        let screen = SignalScreen::new(&config);
        let classifier = SignalClassifier::new(&config);

        let surprises = [dec!(-200), dec!(-75), dec!(-10), dec!(0), dec!(75), dec!(300)];
        let sentiments = [None, Some(dec!(-1)), Some(dec!(-0.01)), Some(Decimal::ZERO), Some(dec!(0.01)), Some(dec!(1))];

        let mut metrics = Vec::new();
        for (i, surprise) in surprises.iter().enumerate() {
            for (j, sentiment) in sentiments.iter().enumerate() {
                for days in 0..6 {
                    metrics.push(SignalMetrics {
                        security: Security::new(format!("S{i}{j}{days}"), "NYSE"),
                        days_since_announcement: days,
                        surprise_factor: Some(*surprise),
                        sentiment_score: *sentiment,
                        in_base_universe: true,
                    });
                }
            }
        }

        let set = classifier.classify(&screen.screen(&metrics)).unwrap();
        assert!(set.longs.is_disjoint(&set.shorts));
        assert!(!set.longs.is_empty());
        assert!(!set.shorts.is_empty());
    }
}
