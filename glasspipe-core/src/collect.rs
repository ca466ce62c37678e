//! Collection loop — drives symbols × metrics through fetch, decode, and
//! store, with per-unit failure isolation.
//!
//! One request is in flight at a time and a fixed pacing delay separates
//! successive calls, which keeps the provider's request budget trivially
//! respected. A failed (symbol, metric) unit is logged and recorded in the
//! report; the run continues. Store failures are fatal: continuing after
//! one risks silently losing data.

use crate::client::{FetchError, FetchRequest, MetricSource};
use crate::endpoint::Metric;
use crate::record::decode_batch;
use crate::store::{InsertSummary, MetricStore, StoreError};
use std::time::Duration;
use tracing::{error, info};

/// Pacing between successive API calls: the provider's published budget is
/// 20 requests per minute on the hobbyist tier.
pub const DEFAULT_PACE: Duration = Duration::from_millis(3100);

/// Run-wide settings shared by every unit of work.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub exchange: String,
    pub interval: String,
    /// Sleep between successive API calls.
    pub pace: Duration,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            exchange: "Binance".to_string(),
            interval: "4h".to_string(),
            pace: DEFAULT_PACE,
        }
    }
}

/// Outcome of one (symbol, metric) unit of work.
#[derive(Debug)]
pub struct UnitOutcome {
    pub symbol: String,
    pub metric: Metric,
    pub result: Result<InsertSummary, FetchError>,
}

/// Summary of a whole collection run.
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<UnitOutcome>,
    pub totals: InsertSummary,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

/// Progress callbacks for a collection run.
pub trait CollectProgress: Send {
    /// Called before fetching a unit.
    fn on_start(&self, symbol: &str, metric: Metric, index: usize, total: usize);

    /// Called when a unit completes.
    fn on_complete(&self, symbol: &str, metric: Metric, result: &Result<InsertSummary, FetchError>);

    /// Called once the whole run is done.
    fn on_run_complete(&self, report: &RunReport);
}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl CollectProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, metric: Metric, index: usize, total: usize) {
        println!("[{}/{}] Fetching {metric} for {symbol}...", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        metric: Metric,
        result: &Result<InsertSummary, FetchError>,
    ) {
        match result {
            Ok(summary) => println!(
                "  OK: {symbol}/{metric}: {} inserted, {} duplicates skipped",
                summary.inserted, summary.skipped
            ),
            Err(err) => println!("  FAIL: {symbol}/{metric}: {err}"),
        }
    }

    fn on_run_complete(&self, report: &RunReport) {
        println!(
            "\nRun complete: {}/{} units succeeded, {} rows inserted, {} skipped",
            report.succeeded(),
            report.outcomes.len(),
            report.totals.inserted,
            report.totals.skipped
        );
    }
}

/// Collect the four metrics for every symbol, sequentially.
///
/// Fetch and decode failures are isolated per (symbol, metric) unit; a
/// `StoreError` aborts the run. The store is consistent at every pacing
/// boundary — each batch commits before the next fetch starts, so aborting
/// the process between units cannot violate the uniqueness invariant.
pub fn run_collection(
    source: &dyn MetricSource,
    store: &mut MetricStore,
    symbols: &[String],
    options: &CollectOptions,
    progress: &dyn CollectProgress,
) -> Result<RunReport, StoreError> {
    let total = symbols.len() * Metric::ALL.len();
    let mut outcomes = Vec::with_capacity(total);
    let mut totals = InsertSummary::default();
    let mut index = 0usize;

    for symbol in symbols {
        for metric in Metric::ALL {
            if index > 0 && !options.pace.is_zero() {
                std::thread::sleep(options.pace);
            }
            progress.on_start(symbol, metric, index, total);

            let result = collect_unit(source, store, symbol, metric, options)?;
            match &result {
                Ok(summary) => {
                    info!(
                        symbol,
                        metric = %metric,
                        inserted = summary.inserted,
                        skipped = summary.skipped,
                        "unit stored"
                    );
                    totals.merge(*summary);
                }
                Err(err) => {
                    error!(
                        symbol,
                        metric = %metric,
                        kind = err.kind(),
                        error = %err,
                        "unit failed"
                    );
                }
            }

            progress.on_complete(symbol, metric, &result);
            outcomes.push(UnitOutcome {
                symbol: symbol.clone(),
                metric,
                result,
            });
            index += 1;
        }
    }

    let report = RunReport { outcomes, totals };
    progress.on_run_complete(&report);
    Ok(report)
}

/// Fetch, decode, and store one unit. The outer `Result` carries fatal
/// store errors; the inner one carries the unit's isolated outcome.
fn collect_unit(
    source: &dyn MetricSource,
    store: &mut MetricStore,
    symbol: &str,
    metric: Metric,
    options: &CollectOptions,
) -> Result<Result<InsertSummary, FetchError>, StoreError> {
    let request = FetchRequest {
        metric,
        symbol,
        exchange: &options.exchange,
        interval: &options.interval,
    };

    let payload = match source.fetch(&request) {
        Ok(payload) => payload,
        Err(err) => return Ok(Err(err)),
    };

    let batch = match decode_batch(metric, symbol, &options.exchange, &payload) {
        Ok(batch) => batch,
        Err(err) => return Ok(Err(err)),
    };

    Ok(Ok(store.insert_batch(&batch)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// Serves canned payloads; fails configured (symbol, metric) units.
    struct FakeSource {
        failures: HashSet<(String, Metric)>,
        calls: RefCell<Vec<(String, Metric)>>,
    }

    impl FakeSource {
        fn new(failures: &[(&str, Metric)]) -> Self {
            Self {
                failures: failures
                    .iter()
                    .map(|(s, m)| (s.to_string(), *m))
                    .collect(),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn payload_for(metric: Metric) -> Value {
            match metric {
                Metric::OpenInterest | Metric::FundingRate => json!([
                    {"time": 100, "open": 1.0, "high": 1.2, "low": 0.9, "close": 1.1},
                    {"time": 200, "open": 1.1, "high": 1.3, "low": 1.0, "close": 1.2}
                ]),
                Metric::LongShortRatio => json!([
                    {"time": 100, "top_account_long_percent": 60.0,
                     "top_account_short_percent": 40.0,
                     "top_account_long_short_ratio": 1.5}
                ]),
                Metric::Liquidations => json!([
                    {"time": 100, "aggregated_long_liquidation_usd": 5.0,
                     "aggregated_short_liquidation_usd": 6.0}
                ]),
            }
        }
    }

    impl MetricSource for FakeSource {
        fn fetch(&self, request: &FetchRequest<'_>) -> Result<Value, FetchError> {
            let unit = (request.symbol.to_string(), request.metric);
            self.calls.borrow_mut().push(unit.clone());
            if self.failures.contains(&unit) {
                return Err(FetchError::Api {
                    code: "30001".to_string(),
                    message: "plan restriction".to_string(),
                });
            }
            Ok(Self::payload_for(request.metric))
        }
    }

    struct Quiet;

    impl CollectProgress for Quiet {
        fn on_start(&self, _: &str, _: Metric, _: usize, _: usize) {}
        fn on_complete(&self, _: &str, _: Metric, _: &Result<InsertSummary, FetchError>) {}
        fn on_run_complete(&self, _: &RunReport) {}
    }

    fn options() -> CollectOptions {
        CollectOptions {
            pace: Duration::ZERO,
            ..CollectOptions::default()
        }
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn one_failing_unit_does_not_abort_the_run() {
        let source = FakeSource::new(&[("BTC", Metric::FundingRate)]);
        let mut store = MetricStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();

        let report = run_collection(
            &source,
            &mut store,
            &symbols(&["BTC", "ETH"]),
            &options(),
            &Quiet,
        )
        .unwrap();

        assert_eq!(report.outcomes.len(), 8);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_succeeded());

        let failure = report
            .outcomes
            .iter()
            .find(|o| o.result.is_err())
            .unwrap();
        assert_eq!(failure.symbol, "BTC");
        assert_eq!(failure.metric, Metric::FundingRate);

        // Every other unit landed: both symbols' open interest, only ETH's
        // funding rate, both ratios and liquidation sets.
        assert_eq!(store.count(Metric::OpenInterest).unwrap(), 4);
        assert_eq!(store.count(Metric::FundingRate).unwrap(), 2);
        assert_eq!(store.count(Metric::LongShortRatio).unwrap(), 2);
        assert_eq!(store.count(Metric::Liquidations).unwrap(), 2);
    }

    #[test]
    fn every_unit_is_attempted_exactly_once() {
        let source = FakeSource::new(&[("BTC", Metric::OpenInterest)]);
        let mut store = MetricStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();

        run_collection(&source, &mut store, &symbols(&["BTC"]), &options(), &Quiet).unwrap();

        // A failed unit is not re-fetched by the orchestrator.
        let calls = source.calls.borrow();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls
                .iter()
                .filter(|(_, m)| *m == Metric::OpenInterest)
                .count(),
            1
        );
    }

    #[test]
    fn rerun_inserts_nothing_new() {
        let source = FakeSource::new(&[]);
        let mut store = MetricStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        let syms = symbols(&["BTC"]);

        let first = run_collection(&source, &mut store, &syms, &options(), &Quiet).unwrap();
        assert_eq!(first.totals.inserted, 6);
        assert_eq!(first.totals.skipped, 0);

        let second = run_collection(&source, &mut store, &syms, &options(), &Quiet).unwrap();
        assert_eq!(second.totals.inserted, 0);
        assert_eq!(second.totals.skipped, 6);
        assert_eq!(store.count(Metric::OpenInterest).unwrap(), 2);
    }

    #[test]
    fn empty_symbol_list_yields_empty_report() {
        let source = FakeSource::new(&[]);
        let mut store = MetricStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();

        let report = run_collection(&source, &mut store, &[], &options(), &Quiet).unwrap();
        assert!(report.outcomes.is_empty());
        assert!(report.all_succeeded());
        assert_eq!(report.totals, InsertSummary::default());
    }
}
