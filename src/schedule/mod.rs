//! Trading-day calendar for the strategy callbacks.
//!
//! Each trading day fires four events in a fixed order:
//! - `BeforeTradingStart`: refresh the day's candidates
//! - `MarketOpen`: age out positions and enter candidates
//! - `PlaceStops`: stop orders, a configured delay after the open
//! - `LogPositions`: position log, a configured offset before the close

use crate::config::ScheduleConfig;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::Serialize;
use std::fmt;

/// Pre-market callback lead time before the open.
const PRE_MARKET_LEAD_MINUTES: i64 = 45;

/// A strategy callback slot within the trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ScheduledEvent {
    BeforeTradingStart,
    MarketOpen,
    PlaceStops,
    LogPositions,
}

impl fmt::Display for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduledEvent::BeforeTradingStart => write!(f, "before_trading_start"),
            ScheduledEvent::MarketOpen => write!(f, "market_open"),
            ScheduledEvent::PlaceStops => write!(f, "place_stops"),
            ScheduledEvent::LogPositions => write!(f, "log_positions"),
        }
    }
}

/// Computes when each callback fires on a given date.
#[derive(Debug, Clone)]
pub struct DailySchedule {
    market_open: NaiveTime,
    market_close: NaiveTime,
    stop_loss_delay: Duration,
    log_before_close: Duration,
}

impl DailySchedule {
    pub fn new(config: &ScheduleConfig) -> Self {
        Self {
            market_open: config.market_open,
            market_close: config.market_close,
            stop_loss_delay: Duration::minutes(i64::from(config.stop_loss_delay_minutes)),
            log_before_close: Duration::minutes(i64::from(
                config.log_positions_before_close_minutes,
            )),
        }
    }

    /// Weekdays are trading days. Exchange holidays come from the data host.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// When `event` fires on `date`.
    pub fn time_of(&self, date: NaiveDate, event: ScheduledEvent) -> NaiveDateTime {
        let open = date.and_time(self.market_open);
        let close = date.and_time(self.market_close);

        match event {
            ScheduledEvent::BeforeTradingStart => open - Duration::minutes(PRE_MARKET_LEAD_MINUTES),
            ScheduledEvent::MarketOpen => open,
            ScheduledEvent::PlaceStops => open + self.stop_loss_delay,
            ScheduledEvent::LogPositions => close - self.log_before_close,
        }
    }

    /// All events for `date` in firing order. Empty on non-trading days.
    pub fn events_for(&self, date: NaiveDate) -> Vec<(NaiveDateTime, ScheduledEvent)> {
        if !self.is_trading_day(date) {
            return Vec::new();
        }

        let mut events: Vec<(NaiveDateTime, ScheduledEvent)> = [
            ScheduledEvent::BeforeTradingStart,
            ScheduledEvent::MarketOpen,
            ScheduledEvent::PlaceStops,
            ScheduledEvent::LogPositions,
        ]
        .into_iter()
        .map(|event| (self.time_of(date, event), event))
        .collect();

        // A long stop delay on a short session can land after the log slot
        events.sort();
        events
    }

    pub fn market_close(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.market_close)
    }
}
