//! SQLite-backed time-series store.
//!
//! One table per metric, keyed by the record's natural key. Writes go
//! through `INSERT OR IGNORE` inside a transaction: the PRIMARY KEY
//! constraint enforces uniqueness in the engine itself, so a duplicate key
//! is skipped (first write wins) rather than checked with a read-then-write
//! that could race, and a batch either commits whole or not at all.

use crate::endpoint::Metric;
use crate::record::{LiquidationRecord, OhlcRecord, RatioRecord, RecordBatch};
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use thiserror::Error;

/// Errors from the persistence layer. Fatal for a collection run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Outcome of one batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: u64,
    pub skipped: u64,
}

impl InsertSummary {
    pub fn merge(&mut self, other: InsertSummary) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}

/// Owns the SQLite connection. No other component touches the tables.
pub struct MetricStore {
    conn: Connection,
}

impl MetricStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Create the four tables if absent. Safe to call on every startup.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS open_interest (
                 symbol TEXT,
                 time   INTEGER,
                 open   REAL,
                 high   REAL,
                 low    REAL,
                 close  REAL,
                 PRIMARY KEY (symbol, time)
             );
             CREATE TABLE IF NOT EXISTS funding_rate (
                 symbol TEXT,
                 time   INTEGER,
                 open   REAL,
                 high   REAL,
                 low    REAL,
                 close  REAL,
                 PRIMARY KEY (symbol, time)
             );
             CREATE TABLE IF NOT EXISTS long_short_ratio (
                 symbol        TEXT,
                 exchange      TEXT,
                 time          INTEGER,
                 long_percent  REAL,
                 short_percent REAL,
                 ratio         REAL,
                 PRIMARY KEY (symbol, exchange, time)
             );
             CREATE TABLE IF NOT EXISTS liquidations (
                 symbol                 TEXT,
                 time                   INTEGER,
                 long_liquidation_usd   REAL,
                 short_liquidation_usd  REAL,
                 PRIMARY KEY (symbol, time)
             );",
        )?;
        Ok(())
    }

    /// Insert a decoded batch. Rows whose natural key already exists are
    /// skipped without error; everything else is written atomically.
    pub fn insert_batch(&mut self, batch: &RecordBatch) -> Result<InsertSummary, StoreError> {
        let tx = self.conn.transaction()?;
        let summary = match batch {
            RecordBatch::OpenInterest(rows) => insert_ohlc(&tx, "open_interest", rows)?,
            RecordBatch::FundingRate(rows) => insert_ohlc(&tx, "funding_rate", rows)?,
            RecordBatch::LongShortRatio(rows) => insert_ratios(&tx, rows)?,
            RecordBatch::Liquidations(rows) => insert_liquidations(&tx, rows)?,
        };
        tx.commit()?;
        Ok(summary)
    }

    /// Row count for a metric's table.
    pub fn count(&self, metric: Metric) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", metric.table_name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn insert_ohlc(
    tx: &Transaction<'_>,
    table: &str,
    rows: &[OhlcRecord],
) -> Result<InsertSummary, StoreError> {
    let sql = format!(
        "INSERT OR IGNORE INTO {table} (symbol, time, open, high, low, close)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    );
    let mut stmt = tx.prepare(&sql)?;
    let mut summary = InsertSummary::default();
    for row in rows {
        let changed = stmt.execute(params![
            row.symbol, row.time, row.open, row.high, row.low, row.close
        ])?;
        tally(&mut summary, changed);
    }
    Ok(summary)
}

fn insert_ratios(tx: &Transaction<'_>, rows: &[RatioRecord]) -> Result<InsertSummary, StoreError> {
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO long_short_ratio
             (symbol, exchange, time, long_percent, short_percent, ratio)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut summary = InsertSummary::default();
    for row in rows {
        let changed = stmt.execute(params![
            row.symbol,
            row.exchange,
            row.time,
            row.long_percent,
            row.short_percent,
            row.ratio
        ])?;
        tally(&mut summary, changed);
    }
    Ok(summary)
}

fn insert_liquidations(
    tx: &Transaction<'_>,
    rows: &[LiquidationRecord],
) -> Result<InsertSummary, StoreError> {
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO liquidations
             (symbol, time, long_liquidation_usd, short_liquidation_usd)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut summary = InsertSummary::default();
    for row in rows {
        let changed = stmt.execute(params![
            row.symbol,
            row.time,
            row.long_liquidation_usd,
            row.short_liquidation_usd
        ])?;
        tally(&mut summary, changed);
    }
    Ok(summary)
}

// INSERT OR IGNORE reports 0 changed rows when the key already exists.
fn tally(summary: &mut InsertSummary, changed: usize) {
    if changed == 0 {
        summary.skipped += 1;
    } else {
        summary.inserted += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ohlc(symbol: &str, time: i64, close: f64) -> OhlcRecord {
        OhlcRecord {
            symbol: symbol.to_string(),
            time,
            open: 1.0,
            high: 1.2,
            low: 0.9,
            close,
        }
    }

    fn store() -> MetricStore {
        let store = MetricStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let mut store = store();
        let batch = RecordBatch::OpenInterest(vec![ohlc("BTC", 100, 1.1)]);
        store.insert_batch(&batch).unwrap();

        // Re-running schema creation must not error or drop data.
        store.ensure_schema().unwrap();
        assert_eq!(store.count(Metric::OpenInterest).unwrap(), 1);
    }

    #[test]
    fn double_insert_skips_every_duplicate() {
        let mut store = store();
        let batch =
            RecordBatch::OpenInterest(vec![ohlc("BTC", 100, 1.1), ohlc("BTC", 200, 1.3)]);

        let first = store.insert_batch(&batch).unwrap();
        assert_eq!(first, InsertSummary { inserted: 2, skipped: 0 });

        let second = store.insert_batch(&batch).unwrap();
        assert_eq!(second, InsertSummary { inserted: 0, skipped: 2 });
        assert_eq!(store.count(Metric::OpenInterest).unwrap(), 2);
    }

    #[test]
    fn colliding_key_never_overwrites() {
        let mut store = store();
        store
            .insert_batch(&RecordBatch::OpenInterest(vec![ohlc("BTC", 100, 1.1)]))
            .unwrap();
        // Same key, different value — must be dropped, not applied.
        store
            .insert_batch(&RecordBatch::OpenInterest(vec![ohlc("BTC", 100, 9.9)]))
            .unwrap();

        let close: f64 = store
            .conn
            .query_row(
                "SELECT close FROM open_interest WHERE symbol = ?1 AND time = ?2",
                params!["BTC", 100],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(close, 1.1);
    }

    #[test]
    fn ratio_key_includes_exchange() {
        let mut store = store();
        let row = |exchange: &str| RatioRecord {
            symbol: "BTC".to_string(),
            exchange: exchange.to_string(),
            time: 100,
            long_percent: 60.0,
            short_percent: 40.0,
            ratio: 1.5,
        };
        let summary = store
            .insert_batch(&RecordBatch::LongShortRatio(vec![
                row("Binance"),
                row("OKX"),
                row("Binance"),
            ]))
            .unwrap();
        // Same (symbol, time) on two exchanges is two rows; the repeat is not.
        assert_eq!(summary, InsertSummary { inserted: 2, skipped: 1 });
        assert_eq!(store.count(Metric::LongShortRatio).unwrap(), 2);
    }

    #[test]
    fn liquidations_round_trip() {
        let mut store = store();
        let batch = RecordBatch::Liquidations(vec![LiquidationRecord {
            symbol: "ETH".to_string(),
            time: 500,
            long_liquidation_usd: 1_000_000.0,
            short_liquidation_usd: 250_000.0,
        }]);
        let summary = store.insert_batch(&batch).unwrap();
        assert_eq!(summary.inserted, 1);

        let (long_usd, short_usd): (f64, f64) = store
            .conn
            .query_row(
                "SELECT long_liquidation_usd, short_liquidation_usd
                 FROM liquidations WHERE symbol = 'ETH' AND time = 500",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(long_usd, 1_000_000.0);
        assert_eq!(short_usd, 250_000.0);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut store = store();
        let summary = store
            .insert_batch(&RecordBatch::FundingRate(Vec::new()))
            .unwrap();
        assert_eq!(summary, InsertSummary::default());
        assert_eq!(store.count(Metric::FundingRate).unwrap(), 0);
    }
}
