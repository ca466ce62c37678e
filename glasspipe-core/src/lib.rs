//! Glasspipe Core — Coinglass futures-metrics collection pipeline.
//!
//! This crate contains the whole data path:
//! - Endpoint catalog (one descriptor per metric, compiled at startup)
//! - Blocking fetch client with retry/backoff and error classification
//! - Wire-payload decoding into per-table record batches
//! - SQLite store with insert-or-ignore semantics on natural keys
//! - Collection loop over symbols × metrics with per-unit failure isolation

pub mod client;
pub mod collect;
pub mod endpoint;
pub mod record;
pub mod store;

pub use client::{CoinglassClient, FetchError, FetchRequest, MetricSource};
pub use collect::{run_collection, CollectOptions, RunReport, StdoutProgress};
pub use endpoint::Metric;
pub use record::RecordBatch;
pub use store::{InsertSummary, MetricStore, StoreError};
