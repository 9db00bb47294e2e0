//! Real-time subscriptions keyed by subscriber id.
//!
//! Each subscription owns one kline socket and one handler task. The handler
//! filters stale ticks, tracks the latest price and, for resolutions coarser
//! than the 1s feed, folds ticks into chart candles before forwarding them.

use crate::aggregator::BucketAggregator;
use crate::cex::{
    binance_interval, format_binance_symbol, kline_stream_url, spawn_kline_stream_watcher,
};
use crate::errors::Result;
use crate::models::{Bar, LatestPrice, Resolution, SymbolInfo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Opaque id chosen by the chart for one realtime subscription.
pub type SubscriberId = String;

const FEED_CHANNEL_CAPACITY: usize = 1_024;

/// Latest observed price, shared between the feed handlers and readers such
/// as the overlay annotations.
#[derive(Debug, Clone)]
pub struct LatestPriceTracker {
    tx: Arc<watch::Sender<Option<LatestPrice>>>,
}

impl Default for LatestPriceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestPriceTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn update(&self, bar: &Bar) {
        self.tx.send_replace(Some(LatestPrice::from(bar)));
    }

    pub fn latest(&self) -> Option<LatestPrice> {
        *self.tx.borrow()
    }
}

/// Per-subscription message handling state.
#[derive(Debug)]
pub struct SubscriptionState {
    aggregator: Option<BucketAggregator>,
    min_time: Option<i64>,
}

impl SubscriptionState {
    /// `last_bar` is the newest bar the chart already has; ticks older than it
    /// are ignored and, when aggregating, its bucket seeds the forming candle.
    pub fn new(resolution: Resolution, last_bar: Option<&Bar>) -> Self {
        let aggregator = resolution.needs_aggregation().then(|| {
            let mut agg = BucketAggregator::new(resolution.duration_ms());
            if let Some(bar) = last_bar {
                agg.seed(bar);
            }
            agg
        });
        Self {
            aggregator,
            min_time: last_bar.map(|b| b.time),
        }
    }

    /// Handle one decoded tick and return the bars to push to the chart.
    /// The latest price only follows ticks that produced output.
    pub fn handle_bar(&mut self, bar: Bar, latest: &LatestPriceTracker) -> Vec<Bar> {
        if let Some(min) = self.min_time {
            if bar.time < min {
                debug!(bar_time = bar.time, min_time = min, "[STREAM] stale tick skipped");
                return Vec::new();
            }
        }
        let out = match self.aggregator.as_mut() {
            Some(agg) => agg.on_bar(bar),
            None => vec![bar],
        };
        if !out.is_empty() {
            latest.update(&bar);
        }
        out
    }
}

#[derive(Debug)]
struct Subscription {
    symbol: String,
    resolution: Resolution,
    feed: JoinHandle<()>,
    handler: JoinHandle<()>,
}

impl Subscription {
    fn cancel(&self) {
        self.handler.abort();
        self.feed.abort();
    }
}

/// Registry of live subscriptions.
#[derive(Debug)]
pub struct StreamRegistry {
    ws_base: String,
    reconnect_delay: Duration,
    subscriptions: HashMap<SubscriberId, Subscription>,
    latest: LatestPriceTracker,
}

impl StreamRegistry {
    pub fn new(ws_base: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self::with_tracker(ws_base, reconnect_delay, LatestPriceTracker::new())
    }

    pub fn with_tracker(
        ws_base: impl Into<String>,
        reconnect_delay: Duration,
        latest: LatestPriceTracker,
    ) -> Self {
        Self {
            ws_base: ws_base.into(),
            reconnect_delay,
            subscriptions: HashMap::new(),
            latest,
        }
    }

    /// Open a kline socket for `symbol_info` and forward bars at `resolution`
    /// into `sink`. An existing subscription with the same id is replaced.
    pub fn subscribe_on_stream(
        &mut self,
        symbol_info: &SymbolInfo,
        resolution: Resolution,
        sink: mpsc::Sender<Bar>,
        uid: impl Into<SubscriberId>,
        last_bar: Option<Bar>,
    ) -> Result<()> {
        let uid = uid.into();
        if self.subscriptions.contains_key(&uid) {
            self.unsubscribe_from_stream(&uid);
        }

        let symbol = format_binance_symbol(&symbol_info.name);
        let url = kline_stream_url(&self.ws_base, &symbol, binance_interval(resolution))?;
        info!(%uid, %url, %resolution, "[STREAM] subscribing");

        let (feed_tx, mut feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let feed = spawn_kline_stream_watcher(url, feed_tx, self.reconnect_delay);

        let latest = self.latest.clone();
        let mut state = SubscriptionState::new(resolution, last_bar.as_ref());
        let handler_uid = uid.clone();
        let handler = tokio::spawn(async move {
            while let Some(tick) = feed_rx.recv().await {
                for bar in state.handle_bar(tick, &latest) {
                    if sink.send(bar).await.is_err() {
                        info!(uid = %handler_uid, "[STREAM] sink closed, handler stopping");
                        return;
                    }
                }
            }
        });

        self.subscriptions.insert(
            uid,
            Subscription {
                symbol,
                resolution,
                feed,
                handler,
            },
        );
        Ok(())
    }

    /// Close the socket for `uid`. Returns false when nothing was subscribed.
    pub fn unsubscribe_from_stream(&mut self, uid: &str) -> bool {
        match self.subscriptions.remove(uid) {
            Some(sub) => {
                sub.cancel();
                info!(
                    %uid,
                    symbol = %sub.symbol,
                    resolution = %sub.resolution,
                    "[STREAM] unsubscribed"
                );
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, uid: &str) -> bool {
        self.subscriptions.contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn latest_price(&self) -> Option<LatestPrice> {
        self.latest.latest()
    }

    pub fn tracker(&self) -> &LatestPriceTracker {
        &self.latest
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        for sub in self.subscriptions.values() {
            sub.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SymbolEntry;

    const T0: i64 = 1_700_000_000_000;

    fn tick(time: i64, close: f64) -> Bar {
        Bar {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            is_final: false,
        }
    }

    fn btc() -> SymbolInfo {
        let entry = SymbolEntry {
            symbol: "BTC/USDT".into(),
            full_name: "BTC/USDT".into(),
            exchange: "Custom API".into(),
            kind: "crypto".into(),
        };
        SymbolInfo::from_entry(&entry, &["1S".to_string()])
    }

    #[test]
    fn one_second_resolution_passes_ticks_through() {
        let tracker = LatestPriceTracker::new();
        let mut state = SubscriptionState::new(Resolution::Sec1, None);
        let out = state.handle_bar(tick(T0, 10.0), &tracker);
        assert_eq!(out, vec![tick(T0, 10.0)]);
        assert_eq!(
            tracker.latest(),
            Some(LatestPrice {
                time: T0 / 1000,
                price: 10.0
            })
        );
    }

    #[test]
    fn coarse_resolution_aggregates() {
        let tracker = LatestPriceTracker::new();
        let mut state = SubscriptionState::new(Resolution::Sec10, None);
        state.handle_bar(tick(T0, 10.0), &tracker);
        state.handle_bar(tick(T0 + 1_000, 12.0), &tracker);
        let out = state.handle_bar(tick(T0 + 10_000, 11.0), &tracker);

        assert_eq!(out.len(), 2);
        assert!(out[0].is_final);
        assert_eq!(out[0].high, 12.0);
        assert_eq!(out[0].volume, 2.0);
        assert_eq!(out[1].time, T0 + 10_000);
        assert_eq!(tracker.latest().map(|l| l.price), Some(11.0));
    }

    #[test]
    fn ticks_older_than_last_bar_are_ignored() {
        let tracker = LatestPriceTracker::new();
        let last = tick(T0 + 5_000, 50.0);
        let mut state = SubscriptionState::new(Resolution::Sec1, Some(&last));

        assert!(state.handle_bar(tick(T0, 1.0), &tracker).is_empty());
        assert!(tracker.latest().is_none());
        assert_eq!(state.handle_bar(tick(T0 + 6_000, 2.0), &tracker).len(), 1);
    }

    #[test]
    fn ticks_dropped_by_aggregator_leave_latest_price_alone() {
        let tracker = LatestPriceTracker::new();
        let mut state = SubscriptionState::new(Resolution::Sec5, None);

        assert_eq!(state.handle_bar(tick(T0 + 2_000, 10.0), &tracker).len(), 1);
        assert!(state.handle_bar(tick(T0 + 1_000, 99.0), &tracker).is_empty());
        assert_eq!(
            tracker.latest(),
            Some(LatestPrice {
                time: (T0 + 2_000) / 1000,
                price: 10.0
            })
        );

        // Older bucket entirely.
        state.handle_bar(tick(T0 + 5_000, 11.0), &tracker);
        assert!(state.handle_bar(tick(T0 + 4_000, 1.0), &tracker).is_empty());
        assert_eq!(tracker.latest().map(|l| l.price), Some(11.0));
    }

    #[tokio::test]
    async fn subscribe_replaces_and_unsubscribe_removes() {
        // Nothing listens on the discard port; the feed just keeps retrying.
        let mut registry = StreamRegistry::new("ws://127.0.0.1:9", Duration::from_secs(60));
        let (tx, _rx) = mpsc::channel(8);

        registry
            .subscribe_on_stream(&btc(), Resolution::Sec5, tx.clone(), "uid-1", None)
            .unwrap();
        registry
            .subscribe_on_stream(&btc(), Resolution::Sec1, tx.clone(), "uid-1", None)
            .unwrap();
        registry
            .subscribe_on_stream(&btc(), Resolution::Min1, tx, "uid-2", None)
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.is_subscribed("uid-1"));
        assert!(registry.unsubscribe_from_stream("uid-1"));
        assert!(!registry.unsubscribe_from_stream("uid-1"));
        assert!(!registry.unsubscribe_from_stream("missing"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn subscription_forwards_bars_across_reconnects() {
        use futures::{SinkExt, StreamExt};
        use tokio::net::TcpListener;
        use tokio::time::timeout;
        use tokio_tungstenite::tungstenite::Message;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut n = 0i64;
            while let Ok((tcp, _)) = listener.accept().await {
                n += 1;
                let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                let t = T0 + n * 1_000;
                let frame = format!(
                    r#"{{"e":"kline","k":{{"t":{t},"o":"{n}","h":"{n}","l":"{n}","c":"{n}","v":"1","x":true}}}}"#
                );
                let _ = ws.send(Message::Text(frame)).await;
                let _ = ws.close(None).await;
                while let Some(Ok(_)) = ws.next().await {}
            }
        });

        let mut registry =
            StreamRegistry::new(format!("ws://{addr}"), Duration::from_millis(50));
        let (tx, mut rx) = mpsc::channel(8);
        registry
            .subscribe_on_stream(&btc(), Resolution::Sec1, tx, "uid", None)
            .unwrap();

        let wait = Duration::from_secs(5);
        let first = timeout(wait, rx.recv()).await.unwrap().unwrap();
        let second = timeout(wait, rx.recv()).await.unwrap().unwrap();
        assert_eq!((first.time, first.close), (T0 + 1_000, 1.0));
        assert_eq!((second.time, second.close), (T0 + 2_000, 2.0));
        assert!(registry.latest_price().is_some());

        assert!(registry.unsubscribe_from_stream("uid"));
        // Both tasks are aborted, so the sink sender is dropped.
        while timeout(wait, rx.recv()).await.unwrap().is_some() {}
    }

    #[tokio::test]
    async fn invalid_base_url_is_an_error() {
        let mut registry = StreamRegistry::new("not a url", Duration::from_secs(1));
        let (tx, _rx) = mpsc::channel(1);
        let res = registry.subscribe_on_stream(&btc(), Resolution::Sec1, tx, "uid", None);
        assert!(res.is_err());
        assert!(registry.is_empty());
    }
}
