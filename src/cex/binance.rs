use crate::errors::Result;
use crate::models::{Bar, Resolution};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

pub const BINANCE_WS_ENDPOINT: &str = "wss://stream.binance.com:9443/ws";

/// Interval of the upstream kline stream for a chart resolution.
///
/// Every resolution streams 1s klines; coarser candles are built locally.
pub fn binance_interval(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Sec1
        | Resolution::Sec5
        | Resolution::Sec10
        | Resolution::Sec30
        | Resolution::Min1
        | Resolution::Min5
        | Resolution::Min15
        | Resolution::Min30
        | Resolution::Min60 => "1s",
    }
}

/// "BTC/USDT" -> "btcusdt"
pub fn format_binance_symbol(symbol: &str) -> String {
    symbol.to_lowercase().replace('/', "")
}

pub fn kline_stream_url(base: &str, symbol: &str, interval: &str) -> Result<Url> {
    let base = base.trim_end_matches('/');
    Ok(Url::parse(&format!("{}/{}@kline_{}", base, symbol, interval))?)
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event: Option<String>,
    #[serde(rename = "k")]
    kline: Option<KlinePayload>,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    closed: bool,
}

/// Decode one Binance kline event into a `Bar`.
///
/// Returns `Ok(None)` for well-formed frames that are not kline events.
pub fn parse_kline_message(text: &str) -> Result<Option<Bar>> {
    let event: KlineEvent = serde_json::from_str(text)?;
    if event.event.as_deref() != Some("kline") {
        return Ok(None);
    }
    let Some(k) = event.kline else {
        return Ok(None);
    };
    Ok(Some(Bar {
        time: k.open_time,
        open: k.open.parse()?,
        high: k.high.parse()?,
        low: k.low.parse()?,
        close: k.close.parse()?,
        volume: k.volume.parse()?,
        is_final: k.closed,
    }))
}

/// Returns an asynchronous stream of `Bar`s from one kline socket.
/// The stream ends when the socket closes.
pub async fn connect_and_stream(url: &Url) -> Result<impl Stream<Item = Bar>> {
    let (ws_stream, _resp) = connect_async(url.clone()).await?;
    info!(%url, "[STREAM] socket connected");

    let mapped = ws_stream.filter_map(|msg_res| async {
        match msg_res {
            Ok(msg) if msg.is_text() => {
                let txt = match msg.into_text() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "[STREAM] text extraction failed");
                        return None;
                    }
                };
                match parse_kline_message(&txt) {
                    Ok(bar) => bar,
                    Err(e) => {
                        warn!(error = %e, "[STREAM] kline JSON parse failed");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "[STREAM] websocket message error");
                None
            }
            _ => None,
        }
    });
    Ok(mapped)
}

/// Spawn a task forwarding bars from `url` into `tx`.
///
/// A dropped or failed connection is retried after `reconnect_delay`. The task
/// exits once the receiving side of `tx` is gone.
pub fn spawn_kline_stream_watcher(
    url: Url,
    tx: mpsc::Sender<Bar>,
    reconnect_delay: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match connect_and_stream(&url).await {
                Ok(stream) => {
                    futures::pin_mut!(stream);
                    while let Some(bar) = stream.next().await {
                        if tx.send(bar).await.is_err() {
                            info!(%url, "[STREAM] receiver dropped, stopping");
                            return;
                        }
                    }
                    warn!(%url, "[STREAM] socket disconnected");
                }
                Err(e) => {
                    warn!(%url, error = %e, "[STREAM] connect failed");
                }
            }
            if tx.is_closed() {
                return;
            }
            info!(delay_ms = reconnect_delay.as_millis() as u64, "[STREAM] reconnecting");
            tokio::time::sleep(reconnect_delay).await;
        }
    })
}
