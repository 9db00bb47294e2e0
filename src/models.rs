//! Shared data structures used throughout the application.

use crate::errors::{AppError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// One OHLCV candle as handed to the chart.
///
/// `time` is the bucket open time in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Set once the exchange (or the local aggregator) has closed the candle.
    pub is_final: bool,
}

/// Last traded price with its bar time, used to anchor chart annotations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatestPrice {
    /// Seconds since the Unix epoch.
    pub time: i64,
    pub price: f64,
}

impl From<&Bar> for LatestPrice {
    fn from(bar: &Bar) -> Self {
        Self {
            time: bar.time / 1000,
            price: bar.close,
        }
    }
}

/// Chart resolution. Values ending in `S` are seconds, bare numbers are minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Sec1,
    Sec5,
    Sec10,
    Sec30,
    Min1,
    Min5,
    Min15,
    Min30,
    Min60,
}

impl Resolution {
    pub const ALL: [Resolution; 9] = [
        Resolution::Sec1,
        Resolution::Sec5,
        Resolution::Sec10,
        Resolution::Sec30,
        Resolution::Min1,
        Resolution::Min5,
        Resolution::Min15,
        Resolution::Min30,
        Resolution::Min60,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Sec1 => "1S",
            Resolution::Sec5 => "5S",
            Resolution::Sec10 => "10S",
            Resolution::Sec30 => "30S",
            Resolution::Min1 => "1",
            Resolution::Min5 => "5",
            Resolution::Min15 => "15",
            Resolution::Min30 => "30",
            Resolution::Min60 => "60",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            Resolution::Sec1 => 1_000,
            Resolution::Sec5 => 5_000,
            Resolution::Sec10 => 10_000,
            Resolution::Sec30 => 30_000,
            Resolution::Min1 => 60_000,
            Resolution::Min5 => 5 * 60_000,
            Resolution::Min15 => 15 * 60_000,
            Resolution::Min30 => 30 * 60_000,
            Resolution::Min60 => 60 * 60_000,
        }
    }

    /// The feed always streams 1s klines; anything coarser is bucketed locally.
    pub fn needs_aggregation(&self) -> bool {
        self.duration_ms() > 1_000
    }
}

impl FromStr for Resolution {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AppError::UnsupportedResolution(s.to_string()))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry in the searchable symbol list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolEntry {
    pub symbol: String,
    pub full_name: String,
    pub exchange: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Fully resolved symbol description handed to the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolInfo {
    pub ticker: String,
    pub name: String,
    pub full_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub session: String,
    pub timezone: String,
    pub exchange: String,
    pub minmov: u32,
    pub pricescale: u32,
    pub has_intraday: bool,
    pub has_seconds: bool,
    pub supported_resolutions: Vec<String>,
    pub volume_precision: u32,
    pub data_status: String,
}

impl SymbolInfo {
    pub fn from_entry(entry: &SymbolEntry, supported_resolutions: &[String]) -> Self {
        Self {
            ticker: entry.full_name.clone(),
            name: entry.symbol.clone(),
            full_name: entry.full_name.clone(),
            kind: entry.kind.clone(),
            session: "24x7".into(),
            timezone: "Etc/UTC".into(),
            exchange: entry.exchange.clone(),
            minmov: 1,
            pricescale: 100,
            has_intraday: true,
            has_seconds: true,
            supported_resolutions: supported_resolutions.to_vec(),
            volume_precision: 8,
            data_status: "streaming".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeDescriptor {
    pub value: String,
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolType {
    pub name: String,
    pub value: String,
}

/// Capabilities reported to the chart when it first connects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatafeedConfiguration {
    pub supported_resolutions: Vec<String>,
    pub supports_marks: bool,
    pub supports_timescale_marks: bool,
    pub supports_time: bool,
    pub has_seconds: bool,
    pub exchanges: Vec<ExchangeDescriptor>,
    pub symbols_types: Vec<SymbolType>,
}

/// History request window, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodParams {
    pub from: i64,
    pub to: i64,
    pub first_data_request: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryResult {
    pub bars: Vec<Bar>,
    pub no_data: bool,
}
