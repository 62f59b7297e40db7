//! SQLite persistence for the paper trading session.
//!
//! Persists session state so one trading day can run per process invocation:
//! - Paper account cash and running totals
//! - Open positions with cost basis
//! - Holding-day counters
//! - Order fill history

use crate::broker::{OrderKind, PaperAccountState, PaperFill, PaperPosition, Security};
use crate::strategy::HoldingsTracker;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Session state as loaded from the database.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub account: PaperAccountState,
    /// Tracked securities and their day counters
    pub holdings: Vec<(Security, u32)>,
    pub last_trading_day: Option<NaiveDate>,
    pub last_saved: DateTime<Utc>,
}

/// One row of the order log.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLogEntry {
    pub trading_day: NaiveDate,
    pub order_id: u64,
    pub security: Security,
    pub kind: String,
    pub shares: i64,
    pub price: Decimal,
    pub commission: Decimal,
}

impl OrderLogEntry {
    /// Whether this fill came from a triggered stop.
    pub fn is_stop(&self) -> bool {
        self.kind == OrderKind::Stop.to_string()
    }
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Create a new persistence manager, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", path);
        Ok(manager)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Paper account (singleton row)
            CREATE TABLE IF NOT EXISTS paper_account (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                initial_cash TEXT NOT NULL,
                cash TEXT NOT NULL,
                total_commission TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                order_count INTEGER NOT NULL,
                round_trips INTEGER NOT NULL,
                winning_round_trips INTEGER NOT NULL,
                last_trading_day TEXT,
                last_saved TEXT NOT NULL
            );

            -- Positions
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                amount INTEGER NOT NULL,
                cost_basis TEXT NOT NULL,
                last_price TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                PRIMARY KEY (symbol, exchange)
            );

            -- Holding-day counters
            CREATE TABLE IF NOT EXISTS holdings (
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                days_held INTEGER NOT NULL,
                PRIMARY KEY (symbol, exchange)
            );

            -- Order fill history
            CREATE TABLE IF NOT EXISTS order_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trading_day TEXT NOT NULL,
                order_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                kind TEXT NOT NULL,
                shares INTEGER NOT NULL,
                price TEXT NOT NULL,
                commission TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_order_log_day ON order_log(trading_day);
            CREATE INDEX IF NOT EXISTS idx_order_log_symbol ON order_log(symbol);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Save the paper account and holding counters in one transaction.
    pub fn save_session(
        &self,
        account: &PaperAccountState,
        holdings: &HoldingsTracker,
        last_trading_day: Option<NaiveDate>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO paper_account (id, initial_cash, cash, total_commission, realized_pnl,
                                       order_count, round_trips, winning_round_trips,
                                       last_trading_day, last_saved)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                initial_cash = ?1,
                cash = ?2,
                total_commission = ?3,
                realized_pnl = ?4,
                order_count = ?5,
                round_trips = ?6,
                winning_round_trips = ?7,
                last_trading_day = ?8,
                last_saved = ?9
            "#,
            params![
                account.initial_cash.to_string(),
                account.cash.to_string(),
                account.total_commission.to_string(),
                account.realized_pnl.to_string(),
                account.order_count,
                account.round_trips,
                account.winning_round_trips,
                last_trading_day.map(|d| d.format("%Y-%m-%d").to_string()),
                Utc::now().to_rfc3339(),
            ],
        )?;

        // Clear and reinsert positions and counters
        tx.execute("DELETE FROM positions", [])?;
        for pos in account.positions.values() {
            tx.execute(
                r#"
                INSERT INTO positions (symbol, exchange, amount, cost_basis, last_price, realized_pnl)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    pos.security.symbol,
                    pos.security.exchange,
                    pos.amount,
                    pos.cost_basis.to_string(),
                    pos.last_price.to_string(),
                    pos.realized_pnl.to_string(),
                ],
            )?;
        }

        tx.execute("DELETE FROM holdings", [])?;
        for (security, days_held) in holdings.iter() {
            tx.execute(
                "INSERT INTO holdings (symbol, exchange, days_held) VALUES (?1, ?2, ?3)",
                params![security.symbol, security.exchange, days_held],
            )?;
        }

        tx.commit()?;

        debug!(
            cash = %account.cash,
            positions = account.positions.len(),
            holdings = holdings.len(),
            "Session saved to database"
        );
        Ok(())
    }

    /// Load the paper session from the database.
    pub fn load_session(&self) -> Result<Option<PersistedSession>> {
        let account_row = self
            .conn
            .query_row(
                r#"
                SELECT initial_cash, cash, total_commission, realized_pnl, order_count,
                       round_trips, winning_round_trips, last_trading_day, last_saved
                FROM paper_account WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        PaperAccountState {
                            initial_cash: decimal_column(row, 0)?,
                            cash: decimal_column(row, 1)?,
                            positions: HashMap::new(),
                            total_commission: decimal_column(row, 2)?,
                            realized_pnl: decimal_column(row, 3)?,
                            order_count: row.get(4)?,
                            round_trips: row.get(5)?,
                            winning_round_trips: row.get(6)?,
                        },
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((mut account, last_trading_day, last_saved)) = account_row else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT symbol, exchange, amount, cost_basis, last_price, realized_pnl FROM positions",
        )?;
        account.positions = stmt
            .query_map([], |row| {
                let security = Security::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
                Ok((
                    security.clone(),
                    PaperPosition {
                        security,
                        amount: row.get(2)?,
                        cost_basis: decimal_column(row, 3)?,
                        last_price: decimal_column(row, 4)?,
                        realized_pnl: decimal_column(row, 5)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<_>>()
            .context("Failed to load positions")?;

        let mut stmt = self
            .conn
            .prepare("SELECT symbol, exchange, days_held FROM holdings ORDER BY symbol, exchange")?;
        let holdings: Vec<(Security, u32)> = stmt
            .query_map([], |row| {
                Ok((
                    Security::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    row.get(2)?,
                ))
            })?
            .collect::<rusqlite::Result<_>>()
            .context("Failed to load holdings")?;

        let last_trading_day = last_trading_day
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
            .transpose()
            .context("Invalid last_trading_day")?;

        let last_saved = DateTime::parse_from_rfc3339(&last_saved)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        info!(
            cash = %account.cash,
            positions = account.positions.len(),
            holdings = holdings.len(),
            last_trading_day = ?last_trading_day,
            "Loaded session from database"
        );

        Ok(Some(PersistedSession {
            account,
            holdings,
            last_trading_day,
            last_saved,
        }))
    }

    /// Append fills to the order log. Returns the number of rows written.
    pub fn record_fills(&self, trading_day: NaiveDate, fills: &[PaperFill]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let recorded_at = Utc::now().to_rfc3339();
        let day = trading_day.format("%Y-%m-%d").to_string();

        for fill in fills {
            tx.execute(
                r#"
                INSERT INTO order_log (trading_day, order_id, symbol, exchange, kind, shares,
                                       price, commission, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    day,
                    fill.order_id,
                    fill.security.symbol,
                    fill.security.exchange,
                    fill.kind.to_string(),
                    fill.shares,
                    fill.price.to_string(),
                    fill.commission.to_string(),
                    recorded_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(fills.len())
    }

    /// Most recent order log rows, newest first.
    pub fn recent_orders(&self, limit: usize) -> Result<Vec<OrderLogEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT trading_day, order_id, symbol, exchange, kind, shares, price, commission
            FROM order_log
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let entries = stmt
            .query_map([limit], |row| {
                let day: String = row.get(0)?;
                Ok(OrderLogEntry {
                    trading_day: NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                        .map_err(|e| conversion_error(0, e))?,
                    order_id: row.get(1)?,
                    security: Security::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
                    kind: row.get(4)?,
                    shares: row.get(5)?,
                    price: decimal_column(row, 6)?,
                    commission: decimal_column(row, 7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    /// Count of order log rows by kind.
    pub fn order_counts(&self) -> Result<HashMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM order_log GROUP BY kind")?;

        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;

        Ok(counts)
    }

    /// Check if we have any saved state.
    pub fn has_state(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM paper_account WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Clear all data (for testing or reset).
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing all persistence data");
        self.conn.execute_batch(
            r#"
            DELETE FROM paper_account;
            DELETE FROM positions;
            DELETE FROM holdings;
            DELETE FROM order_log;
            "#,
        )?;
        Ok(())
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a Decimal stored as TEXT.
fn decimal_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e))
}
