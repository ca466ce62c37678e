//! Coinglass fetch client: authenticated HTTP GET with retry and
//! error classification.
//!
//! Transport failures, non-200 statuses, and unparseable bodies are retried
//! up to the attempt ceiling with a fixed per-class delay. An envelope that
//! parses but carries a non-zero `code` is an application-level rejection
//! (bad symbol, plan restriction) and is surfaced immediately — retrying it
//! would reproduce the same answer.
//!
//! The client does not pace across calls. Spacing successive requests to
//! stay inside the provider's budget is the caller's job (see `collect`).

use crate::endpoint::{Metric, BASE_URL};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const API_KEY_HEADER: &str = "CG-API-KEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(2);
const HTTP_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Structured error types for fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("http status {status}")]
    Http { status: u16 },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("api error {code}: {message}")]
    Api { code: String, message: String },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Short classification tag for logs and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidRequest(_) => "invalid-request",
            FetchError::Transport(_) => "transport",
            FetchError::Http { .. } => "http",
            FetchError::Decode(_) => "decode",
            FetchError::Api { .. } => "api",
            FetchError::Exhausted { .. } => "exhausted",
        }
    }
}

/// One resolved request: endpoint plus query parameters. Built per call,
/// not retained afterwards.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub metric: Metric,
    pub symbol: &'a str,
    pub exchange: &'a str,
    pub interval: &'a str,
}

/// Trait seam over the fetch client so the collection loop can run against
/// a fake source in tests.
pub trait MetricSource {
    /// Fetch the decoded `data` payload for one (metric, symbol) unit.
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<Value, FetchError>;
}

/// Response envelope shared by every Coinglass v4 endpoint.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Blocking Coinglass API client.
///
/// Explicitly constructed and passed by value — there is no process-wide
/// session. The underlying connection pool is reused across calls.
#[derive(Debug)]
pub struct CoinglassClient {
    http: reqwest::blocking::Client,
    base_url: String,
    max_attempts: u32,
    transport_delay: Duration,
    http_delay: Duration,
}

impl CoinglassClient {
    pub fn new(api_key: &str) -> Result<Self, FetchError> {
        Self::with_base_url(api_key, BASE_URL)
    }

    /// Point the client at a different host (mock servers in tests).
    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(api_key).map_err(|_| {
            FetchError::InvalidRequest("API key is not a valid header value".into())
        })?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_attempts: MAX_ATTEMPTS,
            transport_delay: TRANSPORT_RETRY_DELAY,
            http_delay: HTTP_RETRY_DELAY,
        })
    }

    /// Shrink the fixed retry delays. The attempt ceiling stays at 3; only
    /// the sleeps change, so retry tests run in milliseconds.
    pub fn with_retry_delays(mut self, transport: Duration, http: Duration) -> Self {
        self.transport_delay = transport;
        self.http_delay = http;
        self
    }

    fn fetch_with_retry(&self, request: &FetchRequest<'_>) -> Result<Value, FetchError> {
        let descriptor = request.metric.descriptor();
        let url = format!("{}{}", self.base_url, descriptor.path);

        let mut params: Vec<(&str, &str)> = vec![
            ("symbol", request.symbol),
            ("interval", request.interval),
        ];
        if descriptor.takes_exchange {
            params.push(("exchangeName", request.exchange));
        }

        let mut last_error: Option<FetchError> = None;

        for attempt in 1..=self.max_attempts {
            if let Some(prev) = &last_error {
                let delay = match prev {
                    FetchError::Transport(_) => self.transport_delay,
                    _ => self.http_delay,
                };
                std::thread::sleep(delay);
            }

            match self.attempt(&url, &params) {
                Ok(data) => return Ok(data),
                // Application-level rejection: retrying reproduces it.
                Err(err @ FetchError::Api { .. }) => return Err(err),
                Err(err) => {
                    match &err {
                        FetchError::Http { status: 401 } => warn!(
                            metric = %request.metric,
                            symbol = request.symbol,
                            "HTTP 401 — check the API key"
                        ),
                        FetchError::Http { status: 429 } => warn!(
                            metric = %request.metric,
                            symbol = request.symbol,
                            "HTTP 429 — provider rate limit hit"
                        ),
                        other => warn!(
                            metric = %request.metric,
                            symbol = request.symbol,
                            attempt,
                            error = %other,
                            "fetch attempt failed"
                        ),
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(FetchError::Exhausted {
            attempts: self.max_attempts,
            last: Box::new(
                last_error.unwrap_or_else(|| FetchError::Transport("no attempts made".into())),
            ),
        })
    }

    /// One HTTP round trip: send, check status, parse envelope, unwrap data.
    fn attempt(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, FetchError> {
        let response = self
            .http
            .get(url)
            .query(params)
            .send()
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(FetchError::Http { status });
        }

        let envelope: ApiEnvelope = response
            .json()
            .map_err(|err| FetchError::Decode(err.to_string()))?;

        if envelope.code != "0" {
            return Err(FetchError::Api {
                code: envelope.code,
                message: envelope.msg,
            });
        }

        // Missing `data` on a success envelope means an empty series.
        Ok(envelope.data.unwrap_or(Value::Array(Vec::new())))
    }
}

impl MetricSource for CoinglassClient {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<Value, FetchError> {
        if request.symbol.trim().is_empty() {
            return Err(FetchError::InvalidRequest(
                "symbol must not be empty".into(),
            ));
        }
        self.fetch_with_retry(request)
    }
}
