//! Holding-period tracking and time-based exits.
//!
//! Tracks how many trading days each position has been held:
//! - Entries start at zero when the entry order is first submitted
//! - Every live position is advanced once per trading day
//! - Positions reaching the hold period are flattened and dropped
//! - Live positions with no record (orphans) are flattened again, untracked

use crate::broker::{HostContext, LivePosition, Security};
use crate::error::SkipReason;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// What the daily advance decided for one live position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldingAction {
    /// Still inside the hold period.
    Hold { days_held: u32 },
    /// Hold period reached; record already removed.
    Flatten { days_held: u32 },
    /// Live at the broker but not tracked; flatten again without re-tracking.
    FlattenOrphan,
}

/// Outcome of one daily sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Positions still held, with their new day count
    pub held: Vec<(Security, u32)>,
    /// Positions whose hold period expired this cycle
    pub flattened: Vec<Security>,
    /// Untracked live positions whose flatten was resubmitted
    pub orphans: Vec<Security>,
    /// Positions not touched this cycle
    #[serde(skip)]
    pub skipped: Vec<(Security, SkipReason)>,
}

/// Security → trading days held, for the current session.
#[derive(Debug, Clone)]
pub struct HoldingsTracker {
    hold_period_days: u32,
    days_held: HashMap<Security, u32>,
}

impl HoldingsTracker {
    /// Create an empty tracker.
    pub fn new(hold_period_days: u32) -> Self {
        Self {
            hold_period_days,
            days_held: HashMap::new(),
        }
    }

    /// Rebuild a tracker from persisted day counters.
    pub fn from_entries(
        hold_period_days: u32,
        entries: impl IntoIterator<Item = (Security, u32)>,
    ) -> Self {
        Self {
            hold_period_days,
            days_held: entries.into_iter().collect(),
        }
    }

    pub fn hold_period_days(&self) -> u32 {
        self.hold_period_days
    }

    /// Start tracking a new entry at day zero. Existing counters are left alone.
    pub fn register_new_entry(&mut self, security: &Security) {
        if self.days_held.contains_key(security) {
            debug!(%security, "Entry already tracked, keeping day count");
            return;
        }
        self.days_held.insert(security.clone(), 0);
    }

    /// Advance one live position by one trading day.
    ///
    /// Removes the record in the same step that decides to flatten, so the
    /// caller must submit the flatten order for any `requires_flatten` action.
    pub fn advance(&mut self, security: &Security) -> HoldingAction {
        let Some(days) = self.days_held.get_mut(security) else {
            return HoldingAction::FlattenOrphan;
        };

        *days += 1;
        let days_held = *days;

        if days_held >= self.hold_period_days {
            self.days_held.remove(security);
            HoldingAction::Flatten { days_held }
        } else {
            HoldingAction::Hold { days_held }
        }
    }

    /// Advance every tradable live position and submit the resulting flattens.
    ///
    /// Iterates the broker's positions rather than the tracker so positions
    /// that lost their record are still found. Flatten orders are not
    /// confirmed; a position that fails to close shows up as an orphan on the
    /// next sweep and is flattened again.
    pub async fn advance_and_sweep(
        &mut self,
        ctx: &HostContext<'_>,
        live_positions: &HashMap<Security, LivePosition>,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        let mut securities: Vec<&Security> = live_positions
            .iter()
            .filter(|(_, p)| p.amount != 0)
            .map(|(security, _)| security)
            .collect();
        securities.sort();

        for security in securities {
            if !ctx.market.can_trade(security).await {
                debug!(%security, "Held position not tradable today, not advancing");
                report.skipped.push((security.clone(), SkipReason::Untradeable));
                continue;
            }

            match self.advance(security) {
                HoldingAction::Hold { days_held } => {
                    debug!(%security, days_held, "Holding position");
                    report.held.push((security.clone(), days_held));
                }
                HoldingAction::Flatten { days_held } => {
                    info!(%security, days_held, "Hold period reached, flattening");
                    submit_flatten(ctx, security).await;
                    report.flattened.push(security.clone());
                }
                HoldingAction::FlattenOrphan => {
                    warn!(%security, "Position not yet exited, ordering flatten again");
                    submit_flatten(ctx, security).await;
                    report.orphans.push(security.clone());
                }
            }
        }

        report
    }

    /// Days held for a tracked security.
    pub fn days_held(&self, security: &Security) -> Option<u32> {
        self.days_held.get(security).copied()
    }

    pub fn contains(&self, security: &Security) -> bool {
        self.days_held.contains_key(security)
    }

    /// Read-only view of all tracked entries.
    pub fn iter(&self) -> impl Iterator<Item = (&Security, u32)> {
        self.days_held.iter().map(|(security, days)| (security, *days))
    }

    pub fn len(&self) -> usize {
        self.days_held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days_held.is_empty()
    }
}

async fn submit_flatten(ctx: &HostContext<'_>, security: &Security) {
    if let Err(e) = ctx
        .broker
        .submit_order_target_percent(security, Decimal::ZERO)
        .await
    {
        error!(%security, error = %e, "Flatten order rejected, will retry next cycle");
    }
}
