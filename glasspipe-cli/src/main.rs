//! Glasspipe CLI — collect Coinglass futures metrics into SQLite.
//!
//! Commands:
//! - `collect` — fetch open interest, funding rate, long/short ratio, and
//!   liquidations for a list of symbols and store them durably
//! - `status` — report per-table row counts and database size
//!
//! A completed run exits 0 even when individual symbol/metric fetches
//! failed; only fatal startup or storage errors exit non-zero.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glasspipe_core::{
    run_collection, CoinglassClient, CollectOptions, Metric, MetricStore, StdoutProgress,
    RunReport,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "glasspipe",
    about = "Glasspipe — Coinglass futures-metrics collection pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the four futures metrics for each symbol and store them.
    Collect {
        /// Coinglass API key. Falls back to the COINGLASS_API_KEY env var.
        #[arg(long, env = "COINGLASS_API_KEY", hide_env_values = true)]
        api_key: String,

        /// Comma-separated symbols to collect.
        #[arg(long, default_value = "BTC,ETH")]
        symbols: String,

        /// Exchange name for the long/short ratio endpoint.
        #[arg(long, default_value = "Binance")]
        exchange: String,

        /// Sampling interval (the hobbyist plan allows 4h and coarser).
        #[arg(long, default_value = "4h")]
        interval: String,

        /// SQLite database file.
        #[arg(long, default_value = "coinglass_data.db")]
        db: PathBuf,

        /// Delay between successive API calls, in milliseconds.
        /// The default stays under the 20 req/min provider budget.
        #[arg(long, default_value_t = 3100)]
        pace_ms: u64,
    },
    /// Report row counts per table and database file size.
    Status {
        /// SQLite database file.
        #[arg(long, default_value = "coinglass_data.db")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            api_key,
            symbols,
            exchange,
            interval,
            db,
            pace_ms,
        } => run_collect(&api_key, &symbols, exchange, interval, &db, pace_ms),
        Commands::Status { db } => run_status(&db),
    }
}

fn run_collect(
    api_key: &str,
    symbols: &str,
    exchange: String,
    interval: String,
    db: &Path,
    pace_ms: u64,
) -> Result<()> {
    let symbols = parse_symbols(symbols);
    if symbols.is_empty() {
        anyhow::bail!("no symbols given");
    }

    let client = CoinglassClient::new(api_key).context("failed to build API client")?;

    let mut store = MetricStore::open(db)
        .with_context(|| format!("failed to open store at {}", db.display()))?;
    store.ensure_schema().context("failed to initialise schema")?;

    let options = CollectOptions {
        exchange,
        interval,
        pace: Duration::from_millis(pace_ms),
    };

    let report = run_collection(&client, &mut store, &symbols, &options, &StdoutProgress)
        .context("collection run aborted")?;

    print_report(&report);

    // Per-unit failures are already in the report; the run itself completed.
    Ok(())
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn print_report(report: &RunReport) {
    println!();
    println!("=== Collection Report ===");

    let mut current_symbol: Option<&str> = None;
    for outcome in &report.outcomes {
        if current_symbol != Some(outcome.symbol.as_str()) {
            current_symbol = Some(outcome.symbol.as_str());
            println!("{}:", outcome.symbol);
        }
        match &outcome.result {
            Ok(summary) => println!(
                "  {:<18} OK    {} inserted, {} skipped",
                outcome.metric.to_string(),
                summary.inserted,
                summary.skipped
            ),
            Err(err) => println!(
                "  {:<18} FAIL  [{}] {err}",
                outcome.metric.to_string(),
                err.kind()
            ),
        }
    }

    println!();
    println!(
        "Totals: {} rows inserted, {} duplicates skipped; {}/{} units succeeded",
        report.totals.inserted,
        report.totals.skipped,
        report.succeeded(),
        report.outcomes.len()
    );
}

fn run_status(db: &Path) -> Result<()> {
    if !db.exists() {
        println!("Database does not exist: {}", db.display());
        return Ok(());
    }

    let store = MetricStore::open(db)
        .with_context(|| format!("failed to open store at {}", db.display()))?;
    store.ensure_schema().context("failed to initialise schema")?;

    let size = std::fs::metadata(db).map(|m| m.len()).unwrap_or(0);

    println!("Database: {}", db.display());
    println!("Size: {}", format_size(size));
    println!();
    println!("{:<18} {:>10}", "Table", "Rows");
    println!("{}", "-".repeat(29));
    for metric in Metric::ALL {
        let rows = store.count(metric)?;
        println!("{:<18} {:>10}", metric.table_name(), rows);
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::parse_symbols;

    #[test]
    fn symbols_are_trimmed_uppercased_and_deduped_of_blanks() {
        assert_eq!(parse_symbols("btc, eth ,,sol"), vec!["BTC", "ETH", "SOL"]);
        assert!(parse_symbols(" , ").is_empty());
    }
}
