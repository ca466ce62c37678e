//! Wire payload decoding into per-table record batches.
//!
//! Coinglass is inconsistent about numeric encoding — the same field can
//! arrive as a JSON number or a quoted string depending on endpoint and
//! plan tier, so every numeric field goes through a lenient deserializer.

use crate::client::FetchError;
use crate::endpoint::Metric;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accepts a JSON number or a numeric string.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid number: {s:?}"))),
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = lenient_f64(deserializer)?;
    Ok(n as i64)
}

#[derive(Debug, Deserialize)]
struct OhlcPoint {
    #[serde(deserialize_with = "lenient_i64")]
    time: i64,
    #[serde(deserialize_with = "lenient_f64")]
    open: f64,
    #[serde(deserialize_with = "lenient_f64")]
    high: f64,
    #[serde(deserialize_with = "lenient_f64")]
    low: f64,
    #[serde(deserialize_with = "lenient_f64")]
    close: f64,
}

#[derive(Debug, Deserialize)]
struct RatioPoint {
    #[serde(deserialize_with = "lenient_i64")]
    time: i64,
    #[serde(default, deserialize_with = "lenient_f64")]
    top_account_long_percent: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    top_account_short_percent: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    top_account_long_short_ratio: f64,
}

#[derive(Debug, Deserialize)]
struct LiquidationPoint {
    #[serde(deserialize_with = "lenient_i64")]
    time: i64,
    #[serde(deserialize_with = "lenient_f64")]
    aggregated_long_liquidation_usd: f64,
    #[serde(deserialize_with = "lenient_f64")]
    aggregated_short_liquidation_usd: f64,
}

/// Open-interest or funding-rate row. Natural key (symbol, time).
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcRecord {
    pub symbol: String,
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Long/short account-ratio row. Natural key (symbol, exchange, time).
#[derive(Debug, Clone, PartialEq)]
pub struct RatioRecord {
    pub symbol: String,
    pub exchange: String,
    pub time: i64,
    pub long_percent: f64,
    pub short_percent: f64,
    pub ratio: f64,
}

/// Liquidation row. Natural key (symbol, time).
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationRecord {
    pub symbol: String,
    pub time: i64,
    pub long_liquidation_usd: f64,
    pub short_liquidation_usd: f64,
}

/// A decoded payload, tagged with the table it belongs to.
#[derive(Debug, Clone)]
pub enum RecordBatch {
    OpenInterest(Vec<OhlcRecord>),
    FundingRate(Vec<OhlcRecord>),
    LongShortRatio(Vec<RatioRecord>),
    Liquidations(Vec<LiquidationRecord>),
}

impl RecordBatch {
    pub fn metric(&self) -> Metric {
        match self {
            RecordBatch::OpenInterest(_) => Metric::OpenInterest,
            RecordBatch::FundingRate(_) => Metric::FundingRate,
            RecordBatch::LongShortRatio(_) => Metric::LongShortRatio,
            RecordBatch::Liquidations(_) => Metric::Liquidations,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordBatch::OpenInterest(rows) | RecordBatch::FundingRate(rows) => rows.len(),
            RecordBatch::LongShortRatio(rows) => rows.len(),
            RecordBatch::Liquidations(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a successful payload into the record variant for `metric`.
///
/// `symbol` (and `exchange` for the ratio table) come from the request, not
/// the payload — the API echoes the series without repeating them per point.
pub fn decode_batch(
    metric: Metric,
    symbol: &str,
    exchange: &str,
    payload: &Value,
) -> Result<RecordBatch, FetchError> {
    let decode_err = |err: serde_json::Error| {
        FetchError::Decode(format!("{metric} payload for {symbol}: {err}"))
    };

    let batch = match metric {
        Metric::OpenInterest | Metric::FundingRate => {
            let points: Vec<OhlcPoint> =
                serde_json::from_value(payload.clone()).map_err(decode_err)?;
            let rows = points
                .into_iter()
                .map(|p| OhlcRecord {
                    symbol: symbol.to_string(),
                    time: p.time,
                    open: p.open,
                    high: p.high,
                    low: p.low,
                    close: p.close,
                })
                .collect();
            match metric {
                Metric::OpenInterest => RecordBatch::OpenInterest(rows),
                _ => RecordBatch::FundingRate(rows),
            }
        }
        Metric::LongShortRatio => {
            let points: Vec<RatioPoint> =
                serde_json::from_value(payload.clone()).map_err(decode_err)?;
            RecordBatch::LongShortRatio(
                points
                    .into_iter()
                    .map(|p| RatioRecord {
                        symbol: symbol.to_string(),
                        exchange: exchange.to_string(),
                        time: p.time,
                        long_percent: p.top_account_long_percent,
                        short_percent: p.top_account_short_percent,
                        ratio: p.top_account_long_short_ratio,
                    })
                    .collect(),
            )
        }
        Metric::Liquidations => {
            let points: Vec<LiquidationPoint> =
                serde_json::from_value(payload.clone()).map_err(decode_err)?;
            RecordBatch::Liquidations(
                points
                    .into_iter()
                    .map(|p| LiquidationRecord {
                        symbol: symbol.to_string(),
                        time: p.time,
                        long_liquidation_usd: p.aggregated_long_liquidation_usd,
                        short_liquidation_usd: p.aggregated_short_liquidation_usd,
                    })
                    .collect(),
            )
        }
    };

    Ok(batch)
}
