//! Earnings Sentiment Trader - Main Entry Point
//!
//! Backtests over historical daily data and runs a persisted paper account
//! one trading day at a time.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use earnings_sentiment_trader::backtest::{
    BacktestConfig, BacktestEngine, CsvDataLoader, DataLoader,
};
use earnings_sentiment_trader::broker::PaperBroker;
use earnings_sentiment_trader::config::Config;
use earnings_sentiment_trader::persistence::PersistenceManager;
use earnings_sentiment_trader::strategy::{HoldingsTracker, SessionState};
use earnings_sentiment_trader::utils::percentage_change;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Earnings Sentiment Trader CLI
#[derive(Parser)]
#[command(name = "earnings-sentiment-trader")]
#[command(version, about = "Earnings surprise and news sentiment equity strategy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest simulation on historical data
    Backtest {
        /// Path to CSV data file
        #[arg(short, long)]
        data: String,

        /// Start date (YYYY-MM-DD), defaults to the first day in the data
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), defaults to the last day in the data
        #[arg(short, long)]
        end: Option<String>,

        /// Initial balance for simulation
        #[arg(short = 'b', long, default_value = "10000")]
        initial_balance: f64,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run one trading day against the persisted paper account
    Paper {
        /// Path to CSV data file containing the day's signals and prices
        #[arg(short, long)]
        data: String,

        /// Trading day (YYYY-MM-DD), defaults to the day after the last run
        #[arg(long)]
        date: Option<String>,

        /// Path to SQLite database (defaults to paper.db_path from config)
        #[arg(long)]
        db: Option<String>,
    },

    /// Show the paper account from persisted state
    Status {
        /// Path to SQLite database (default: data/paper_state.db)
        #[arg(long, default_value = "data/paper_state.db")]
        db: String,

        /// Show the recent order log
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Commands::Backtest {
            data,
            start,
            end,
            initial_balance,
            output,
        } => {
            run_backtest(
                &data,
                start.as_deref(),
                end.as_deref(),
                initial_balance,
                output.as_deref(),
            )
            .await
        }
        Commands::Paper { data, date, db } => {
            run_paper_day(&data, date.as_deref(), db.as_deref()).await
        }
        Commands::Status { db, verbose } => show_status(&db, verbose),
    }
}

/// Initialize logging to stdout and a daily log file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "earnings-trader.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("earnings_sentiment_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Load and validate configuration.
fn load_config() -> Result<Config> {
    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;
    log_config(&config);
    Ok(config)
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let strategy = &config.strategy;
    info!("📋 Configuration:");
    info!("   Commission per Trade: ${}", strategy.commission_per_trade);
    info!("   Hold Period: {} days", strategy.hold_period_days);
    info!(
        "   Surprise Thresholds: long >= {}, short <= {}",
        strategy.surprise_long_threshold, strategy.surprise_short_threshold
    );
    info!(
        "   Sentiment Thresholds: long >= {}, short <= {}",
        strategy.sentiment_long_threshold, strategy.sentiment_short_threshold
    );
    info!(
        "   Announcement Window: {}..={} days",
        strategy.min_days_since_announcement, strategy.max_days_since_announcement
    );
    info!(
        "   Stop Multipliers: long {}x, short {}x",
        strategy.long_stop_multiplier, strategy.short_stop_multiplier
    );
    info!(
        "   Schedule: open {}, stops +{}m, log -{}m before {}",
        config.schedule.market_open,
        config.schedule.stop_loss_delay_minutes,
        config.schedule.log_positions_before_close_minutes,
        config.schedule.market_close
    );
}

fn parse_date(value: &str, label: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid {} date '{}': {}", label, value, e))
}

/// Run a single backtest with the given parameters.
async fn run_backtest(
    data_path: &str,
    start: Option<&str>,
    end: Option<&str>,
    initial_balance: f64,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    info!("📊 Loading data from: {}", data_path);
    let data_loader = CsvDataLoader::new(data_path)?;

    let (data_start, data_end) = data_loader
        .available_range()
        .context("Data file has no trading days")?;
    info!(
        "   Data range: {} to {}",
        data_start.format("%Y-%m-%d"),
        data_end.format("%Y-%m-%d")
    );
    info!("   Securities: {}", data_loader.available_securities().len());
    info!("   Trading days: {}", data_loader.len());

    let start = start.map(|s| parse_date(s, "start")).transpose()?.unwrap_or(data_start);
    let end = end.map(|s| parse_date(s, "end")).transpose()?.unwrap_or(data_end);
    anyhow::ensure!(start <= end, "start date {} is after end date {}", start, end);

    let config = load_config()?;

    let backtest_config = BacktestConfig {
        initial_balance: Decimal::from_f64_retain(initial_balance).unwrap_or(dec!(10000)),
        record_equity_curve: true,
        output_path: output_dir.map(String::from),
    };

    info!("💰 Initial balance: ${:.2}", initial_balance);
    info!("📅 Period: {} to {}", start, end);

    let mut engine = BacktestEngine::new(data_loader, config, backtest_config);
    let result = engine.run(start, end).await?;

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let equity_path = format!("{}/equity_curve.csv", dir);
        result.equity_to_csv(&equity_path)?;
        info!("📁 Equity curve saved to: {}", equity_path);

        let results_path = format!("{}/results.json", dir);
        result.export_json(&results_path)?;
        info!("📁 Results saved to: {}", results_path);
    }

    Ok(())
}

/// Run one trading day against the persisted paper account.
async fn run_paper_day(data_path: &str, date: Option<&str>, db: Option<&str>) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              PAPER TRADING DAY                             ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = load_config()?;
    let db_path = db.unwrap_or(&config.paper.db_path).to_string();
    let persistence = PersistenceManager::new(&db_path)?;
    let hold_period = config.strategy.hold_period_days;

    let broker = PaperBroker::new(
        config.paper.initial_cash,
        config.strategy.commission_per_trade,
    );

    let (session, last_day) = match persistence.load_session()? {
        Some(saved) => {
            info!(
                "📂 Resuming paper account saved {}",
                saved.last_saved.format("%Y-%m-%d %H:%M:%S UTC")
            );
            broker.restore_state(saved.account).await;
            let holdings = HoldingsTracker::from_entries(hold_period, saved.holdings);
            (SessionState::with_holdings(holdings), saved.last_trading_day)
        }
        None => {
            info!("🆕 Starting fresh paper account with ${}", config.paper.initial_cash);
            (SessionState::new(hold_period), None)
        }
    };

    let data_loader = CsvDataLoader::new(data_path)?;
    let (data_start, data_end) = data_loader
        .available_range()
        .context("Data file has no trading days")?;

    let day = match date {
        Some(d) => parse_date(d, "trading")?,
        None => {
            let from = last_day.and_then(|d| d.succ_opt()).unwrap_or(data_start);
            data_loader
                .load_days(from, data_end)?
                .first()
                .map(|s| s.date)
                .with_context(|| format!("No trading day in data after {}", from))?
        }
    };

    if let Some(last) = last_day {
        anyhow::ensure!(
            day > last,
            "Paper account already ran through {}; refusing to replay {}",
            last,
            day
        );
    }

    let snapshot = data_loader
        .load_days(day, day)?
        .into_iter()
        .next()
        .with_context(|| format!("No data for {}", day))?;

    info!("📅 Trading day: {}", day);

    let backtest_config = BacktestConfig {
        initial_balance: config.paper.initial_cash,
        ..BacktestConfig::default()
    };
    let mut engine =
        BacktestEngine::resume(data_loader, config, backtest_config, broker, session);
    let result = engine.step(&snapshot).await;

    let fills = engine.broker().take_fills().await;
    let recorded = persistence.record_fills(day, &fills)?;
    let account = engine.broker().export_state().await;
    persistence.save_session(&account, &engine.session().holdings, Some(day))?;

    info!(
        entries = result.entries,
        flattens = result.flattens,
        stops_triggered = result.stops_triggered,
        fills = recorded,
        "Paper day complete"
    );

    println!("\n📊 Paper Day {}", day);
    println!("   ├─ Entries:          {}", result.entries);
    println!("   ├─ Flattens:         {}", result.flattens);
    println!("   ├─ Stops Triggered:  {}", result.stops_triggered);
    println!("   ├─ Open Positions:   {}", result.position_count);
    println!("   └─ Net Liquidation:  ${:.2}", result.net_liquidation);
    println!();

    Ok(())
}

/// Show the paper account from persisted state.
fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              PAPER ACCOUNT STATUS                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   No paper day has run yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let Some(session) = persistence.load_session()? else {
        println!("\n❌ No saved state found in database.");
        return Ok(());
    };

    let account = &session.account;
    let net_liquidation = account.net_liquidation();
    let pnl = net_liquidation - account.initial_cash;
    let pnl_pct = percentage_change(account.initial_cash, net_liquidation);

    println!("\n📊 Account Summary");
    println!("   ├─ Initial Cash:     ${:.2}", account.initial_cash);
    println!("   ├─ Cash:             ${:.2}", account.cash);
    println!("   ├─ Net Liquidation:  ${:.2}", net_liquidation);
    println!("   ├─ PnL:              ${:.2} ({:+.2}%)", pnl, pnl_pct);
    match session.last_trading_day {
        Some(day) => println!("   ├─ Last Trading Day: {}", day),
        None => println!("   ├─ Last Trading Day: -"),
    }
    println!(
        "   └─ Last Updated:     {}",
        session.last_saved.format("%Y-%m-%d %H:%M:%S UTC")
    );

    println!("\n💰 Costs & Results");
    println!("   ├─ Commissions:      ${:.2}", account.total_commission);
    println!("   ├─ Realized P&L:     ${:.2}", account.realized_pnl);
    println!("   └─ Unrealized P&L:   ${:.2}", account.unrealized_pnl());

    println!("\n📈 Activity");
    println!("   ├─ Total Orders:     {}", account.order_count);
    println!(
        "   ├─ Round Trips:      {} ({} winning)",
        account.round_trips, account.winning_round_trips
    );
    println!("   └─ Open Positions:   {}", account.positions.len());

    if !account.positions.is_empty() {
        let days_held: std::collections::HashMap<_, _> =
            session.holdings.iter().cloned().collect();

        let mut positions: Vec<_> = account.positions.values().collect();
        positions.sort_by(|a, b| a.security.cmp(&b.security));

        println!("\n🔓 Open Positions");
        for pos in positions {
            println!("   ┌─ {}", pos.security);
            println!("   ├─ Amount:     {} @ ${:.2}", pos.amount, pos.cost_basis);
            println!("   ├─ Last Price: ${:.2}", pos.last_price);
            match days_held.get(&pos.security) {
                Some(days) => println!("   └─ Days Held:  {}", days),
                None => {
                    warn!(security = %pos.security, "Position has no holding record");
                    println!("   └─ Days Held:  untracked (flattened at next open)");
                }
            }
        }
    }

    if verbose {
        if let Ok(counts) = persistence.order_counts() {
            if !counts.is_empty() {
                println!("\n🧾 Fills by Kind");
                for (kind, count) in &counts {
                    println!("   ├─ {}: {}", kind, count);
                }
            }
        }

        let recent = persistence.recent_orders(10)?;
        if !recent.is_empty() {
            println!("\n📜 Recent Fills");
            for entry in &recent {
                println!(
                    "   ├─ {} #{} {} {:+} @ ${:.2} ({})",
                    entry.trading_day,
                    entry.order_id,
                    entry.security,
                    entry.shares,
                    entry.price,
                    entry.kind
                );
            }
        }
    }

    println!();
    Ok(())
}
