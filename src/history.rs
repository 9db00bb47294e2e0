//! Historical bars from the chart REST backend.

use crate::errors::{AppError, Result};
use crate::models::{Bar, Resolution};
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Anything that can answer a history request for the chart.
pub trait HistorySource {
    /// Bars for `symbol` between `from` and `to` (seconds), oldest first.
    fn fetch_bars(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: i64,
        to: i64,
    ) -> impl Future<Output = Result<Vec<Bar>>> + Send;
}

/// The backend sends prices both as JSON strings and as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Num {
    Float(f64),
    Text(String),
}

impl Num {
    fn value(&self) -> Result<f64> {
        match self {
            Num::Float(v) => Ok(*v),
            Num::Text(s) => Ok(s.trim().parse()?),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    /// Seconds since the Unix epoch.
    time: i64,
    open: Num,
    high: Num,
    low: Num,
    close: Num,
    volume: Num,
}

impl HistoryRow {
    fn into_bar(self) -> Result<Bar> {
        Ok(Bar {
            time: self.time * 1000,
            open: self.open.value()?,
            high: self.high.value()?,
            low: self.low.value()?,
            close: self.close.value()?,
            volume: self.volume.value()?,
            is_final: true,
        })
    }
}

/// Decode a history response body into bars.
pub fn parse_history(body: &str) -> Result<Vec<Bar>> {
    let rows: Vec<HistoryRow> = serde_json::from_str(body)?;
    rows.into_iter().map(HistoryRow::into_bar).collect()
}

/// HTTP client for the `stockData` history endpoint.
#[derive(Clone, Debug)]
pub struct HttpHistory {
    client: Client,
    base_url: String,
}

impl HttpHistory {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/v1/stockData/", self.base_url)
    }
}

impl HistorySource for HttpHistory {
    async fn fetch_bars(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: i64,
        to: i64,
    ) -> Result<Vec<Bar>> {
        let url = self.endpoint();
        debug!(%url, symbol, %resolution, from, to, "[HISTORY] request");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("resolution", resolution.to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            return Err(AppError::HistoryStatus { status, body });
        }

        let body = response.text().await?;
        parse_history(&body)
    }
}
