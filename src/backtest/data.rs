//! Historical data loading for backtesting.
//!
//! One CSV row per security per trading day carries both the signal inputs
//! and the day's open/close prices.

use crate::broker::Security;
use crate::signal::SignalMetrics;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

/// Everything known about one security on one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityDay {
    pub security: Security,
    pub days_since_announcement: Option<u32>,
    pub surprise_factor: Option<Decimal>,
    pub sentiment: Option<Decimal>,
    pub in_base_universe: bool,
    pub tradable: bool,
    pub open_price: Option<Decimal>,
    pub close_price: Option<Decimal>,
}

/// All rows for one trading day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub rows: Vec<SecurityDay>,
}

impl DailySnapshot {
    /// Create an empty snapshot for the given date.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            rows: Vec::new(),
        }
    }

    /// Signal metrics for the pre-market callback.
    ///
    /// Rows without an announcement age cannot fall inside any window and
    /// are left out.
    pub fn signal_metrics(&self) -> Vec<SignalMetrics> {
        self.rows
            .iter()
            .filter_map(|row| {
                Some(SignalMetrics {
                    security: row.security.clone(),
                    days_since_announcement: row.days_since_announcement?,
                    surprise_factor: row.surprise_factor,
                    sentiment_score: row.sentiment,
                    in_base_universe: row.in_base_universe,
                })
            })
            .collect()
    }

    /// Opening prices, for market-open fills.
    pub fn open_prices(&self) -> HashMap<Security, Decimal> {
        self.rows
            .iter()
            .filter_map(|row| Some((row.security.clone(), row.open_price?)))
            .collect()
    }

    /// Closing prices, for marking and stop triggers.
    pub fn close_prices(&self) -> HashMap<Security, Decimal> {
        self.rows
            .iter()
            .filter_map(|row| Some((row.security.clone(), row.close_price?)))
            .collect()
    }

    /// Securities that cannot be traded today.
    pub fn halted(&self) -> HashSet<Security> {
        self.rows
            .iter()
            .filter(|row| !row.tradable)
            .map(|row| row.security.clone())
            .collect()
    }

    pub fn get(&self, security: &Security) -> Option<&SecurityDay> {
        self.rows.iter().find(|row| &row.security == security)
    }
}

/// Trait for loading historical daily data.
pub trait DataLoader: Send + Sync {
    /// Load all trading days in the inclusive range.
    fn load_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailySnapshot>>;

    /// First and last trading day in the data.
    fn available_range(&self) -> Option<(NaiveDate, NaiveDate)>;

    /// All securities that appear in the data.
    fn available_securities(&self) -> Vec<Security>;
}

/// CSV data loader for historical backtesting.
///
/// Expected CSV format (empty or `NaN` numeric cells mean missing):
/// ```csv
/// date,symbol,exchange,days_since_announcement,surprise_factor,sentiment,in_base_universe,tradable,open_price,close_price
/// 2016-03-01,AAPL,NASDAQ,2,80.5,0.02,true,true,100.10,101.25
/// ```
#[derive(Clone)]
pub struct CsvDataLoader {
    /// Snapshots sorted by date
    snapshots: Vec<DailySnapshot>,
    securities: Vec<Security>,
}

impl CsvDataLoader {
    /// Load data from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Load data from CSV content string.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut by_date: BTreeMap<NaiveDate, Vec<SecurityDay>> = BTreeMap::new();

        for (line_num, line) in content.lines().enumerate() {
            if line_num == 0 && line.starts_with("date") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let (date, row) = parse_row(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            by_date.entry(date).or_default().push(row);
        }

        if by_date.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        let snapshots = by_date
            .into_iter()
            .map(|(date, rows)| DailySnapshot { date, rows })
            .collect();

        Ok(Self::from_snapshots(snapshots))
    }

    /// Create a loader from in-memory snapshots.
    pub fn from_snapshots(mut snapshots: Vec<DailySnapshot>) -> Self {
        snapshots.sort_by_key(|s| s.date);

        let securities: BTreeSet<Security> = snapshots
            .iter()
            .flat_map(|s| s.rows.iter().map(|row| row.security.clone()))
            .collect();

        Self {
            snapshots,
            securities: securities.into_iter().collect(),
        }
    }

    /// Number of trading days loaded.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl DataLoader for CsvDataLoader {
    fn load_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailySnapshot>> {
        Ok(self
            .snapshots
            .iter()
            .filter(|s| s.date >= start && s.date <= end)
            .cloned()
            .collect())
    }

    fn available_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let start = self.snapshots.first()?.date;
        let end = self.snapshots.last()?.date;
        Some((start, end))
    }

    fn available_securities(&self) -> Vec<Security> {
        self.securities.clone()
    }
}

const COLUMNS: &str = "date,symbol,exchange,days_since_announcement,surprise_factor,sentiment,in_base_universe,tradable,open_price,close_price";

fn parse_row(line: &str) -> Result<(NaiveDate, SecurityDay)> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 10 {
        anyhow::bail!("Expected 10 columns ({}), got {}", COLUMNS, parts.len());
    }

    let date = NaiveDate::parse_from_str(parts[0], "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {}", parts[0]))?;

    let row = SecurityDay {
        security: Security::new(parts[1], parts[2]),
        days_since_announcement: optional_cell(parts[3], "days_since_announcement")?,
        surprise_factor: optional_cell(parts[4], "surprise_factor")?,
        sentiment: optional_cell(parts[5], "sentiment")?,
        in_base_universe: parse_bool(parts[6], "in_base_universe")?,
        tradable: parse_bool(parts[7], "tradable")?,
        open_price: optional_cell(parts[8], "open_price")?,
        close_price: optional_cell(parts[9], "close_price")?,
    };

    Ok((date, row))
}

/// Parse a numeric cell where empty or `NaN` means missing.
fn optional_cell<T>(cell: &str, column: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    cell.parse()
        .map(Some)
        .with_context(|| format!("Invalid {}: {}", column, cell))
}

fn parse_bool(cell: &str, column: &str) -> Result<bool> {
    match cell.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => anyhow::bail!("Invalid {}: {}", column, cell),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const CSV: &str = r#"date,symbol,exchange,days_since_announcement,surprise_factor,sentiment,in_base_universe,tradable,open_price,close_price
2016-03-01,AAA,NYSE,2,80,0.02,true,true,50,51
2016-03-01,BBB,NASDAQ,NaN,,NaN,true,false,20,
2016-03-02,AAA,NYSE,3,80,0.02,true,true,51,52.5
"#;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 3, d).unwrap()
    }

    #[test]
    fn test_csv_parsing() {
        let loader = CsvDataLoader::from_csv_content(CSV).unwrap();

        assert_eq!(loader.len(), 2);
        assert_eq!(loader.available_range(), Some((date(1), date(2))));
        assert_eq!(
            loader.available_securities(),
            vec![Security::new("AAA", "NYSE"), Security::new("BBB", "NASDAQ")]
        );
    }

    #[test]
    fn test_missing_cells_parse_as_none() {
        let loader = CsvDataLoader::from_csv_content(CSV).unwrap();
        let day = &loader.load_days(date(1), date(1)).unwrap()[0];
        let bbb = day.get(&Security::new("BBB", "NASDAQ")).unwrap();

        assert_eq!(bbb.days_since_announcement, None);
        assert_eq!(bbb.surprise_factor, None);
        assert_eq!(bbb.sentiment, None);
        assert_eq!(bbb.close_price, None);
        assert!(!bbb.tradable);
    }

    #[test]
    fn test_snapshot_views() {
        let loader = CsvDataLoader::from_csv_content(CSV).unwrap();
        let day = &loader.load_days(date(1), date(1)).unwrap()[0];

        // BBB has no announcement age
        assert_eq!(day.signal_metrics().len(), 1);
        assert_eq!(day.open_prices().len(), 2);
        assert_eq!(
            day.close_prices().get(&Security::new("AAA", "NYSE")),
            Some(&dec!(51))
        );
        assert!(day.halted().contains(&Security::new("BBB", "NASDAQ")));
    }

    #[test]
    fn test_filter_by_date_range() {
        let loader = CsvDataLoader::from_csv_content(CSV).unwrap();
        let days = loader.load_days(date(2), date(9)).unwrap();

        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, date(2));
    }

    #[test]
    fn test_bad_rows_rejected() {
        assert!(CsvDataLoader::from_csv_content("date,symbol\n").is_err());
        assert!(CsvDataLoader::from_csv_content("2016-03-01,AAA,NYSE,2,80\n").is_err());
        assert!(CsvDataLoader::from_csv_content(
            "2016-03-01,AAA,NYSE,2,abc,0.1,true,true,1,1\n"
        )
        .is_err());
    }
}
