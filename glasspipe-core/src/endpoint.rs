//! Endpoint catalog for the Coinglass v4 API.
//!
//! One descriptor per collected metric. The catalog is static: descriptors
//! are compiled into the binary and never change at runtime.

use std::fmt;

/// Default API host. Overridable on the client for tests.
pub const BASE_URL: &str = "https://open-api-v4.coinglass.com/api";

/// The four futures metrics this pipeline collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    OpenInterest,
    FundingRate,
    LongShortRatio,
    Liquidations,
}

impl Metric {
    /// All metrics, in the order a collection run visits them.
    pub const ALL: [Metric; 4] = [
        Metric::OpenInterest,
        Metric::FundingRate,
        Metric::LongShortRatio,
        Metric::Liquidations,
    ];

    pub fn descriptor(self) -> &'static EndpointDescriptor {
        match self {
            Metric::OpenInterest => &OPEN_INTEREST,
            Metric::FundingRate => &FUNDING_RATE,
            Metric::LongShortRatio => &LONG_SHORT_RATIO,
            Metric::Liquidations => &LIQUIDATIONS,
        }
    }

    /// Table this metric's records land in.
    pub fn table_name(self) -> &'static str {
        match self {
            Metric::OpenInterest => "open_interest",
            Metric::FundingRate => "funding_rate",
            Metric::LongShortRatio => "long_short_ratio",
            Metric::Liquidations => "liquidations",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::OpenInterest => "open-interest",
            Metric::FundingRate => "funding-rate",
            Metric::LongShortRatio => "long-short-ratio",
            Metric::Liquidations => "liquidations",
        };
        write!(f, "{name}")
    }
}

/// Immutable description of one API endpoint.
#[derive(Debug)]
pub struct EndpointDescriptor {
    pub metric: Metric,
    /// Path appended to the base URL.
    pub path: &'static str,
    /// Whether the endpoint takes an `exchangeName` query parameter.
    pub takes_exchange: bool,
}

static OPEN_INTEREST: EndpointDescriptor = EndpointDescriptor {
    metric: Metric::OpenInterest,
    path: "/futures/open-interest/aggregated-history",
    takes_exchange: false,
};

static FUNDING_RATE: EndpointDescriptor = EndpointDescriptor {
    metric: Metric::FundingRate,
    path: "/futures/funding-rate/oi-weight-history",
    takes_exchange: false,
};

static LONG_SHORT_RATIO: EndpointDescriptor = EndpointDescriptor {
    metric: Metric::LongShortRatio,
    path: "/futures/top-long-short-account-ratio/history",
    takes_exchange: true,
};

static LIQUIDATIONS: EndpointDescriptor = EndpointDescriptor {
    metric: Metric::Liquidations,
    path: "/futures/liquidation/aggregated-history",
    takes_exchange: false,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_match_their_metric() {
        for metric in Metric::ALL {
            assert_eq!(metric.descriptor().metric, metric);
        }
    }

    #[test]
    fn only_long_short_ratio_takes_exchange() {
        for metric in Metric::ALL {
            let expected = metric == Metric::LongShortRatio;
            assert_eq!(metric.descriptor().takes_exchange, expected);
        }
    }

    #[test]
    fn paths_are_distinct() {
        let mut paths: Vec<&str> = Metric::ALL.iter().map(|m| m.descriptor().path).collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths.len(), 4);
    }
}
