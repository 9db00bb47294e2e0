use anyhow::Result;
use kline_feed::{
    config::AppConfig,
    datafeed::Datafeed,
    history::HttpHistory,
    models::{Bar, PeriodParams},
    overlay::{ExpiryLine, TradeDirection},
    utils,
};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = AppConfig::load()?;
    tracing::info!(
        symbol = %config.symbol,
        resolution = %config.resolution,
        ws_url = %config.ws_url,
        history_api_url = %config.history_api_url,
        "[INIT] kline-feed starting"
    );

    let history = HttpHistory::new(&config.history_api_url)?;
    let mut feed = Datafeed::new(history, &config.ws_url, config.reconnect_delay);
    let symbol_info = feed.resolve_symbol(&config.symbol)?;

    // Seed the last-bar cache; the live stream still starts without it.
    let to = utils::now_secs();
    let period = PeriodParams {
        from: to - config.history_lookback.as_secs() as i64,
        to,
        first_data_request: true,
    };
    match feed.get_bars(&symbol_info, config.resolution, period).await {
        Ok(res) if res.no_data => tracing::info!("[INIT] no history available"),
        Ok(res) => tracing::info!(count = res.bars.len(), "[INIT] history loaded"),
        Err(e) => tracing::warn!(error = %e, "[INIT] history unavailable, streaming only"),
    }
    if let Some(last) = feed.last_bar(&symbol_info.full_name) {
        tracing::info!(time = last.time, close = last.close, "[INIT] live stream resumes after");
    }

    let (bar_tx, mut bar_rx) = mpsc::channel::<Bar>(1_024);
    feed.subscribe_bars(&symbol_info, config.resolution, bar_tx, &config.subscriber_id)?;

    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            maybe_bar = bar_rx.recv() => {
                let Some(bar) = maybe_bar else {
                    tracing::warn!("[FEED] bar channel closed");
                    break;
                };
                tracing::info!(
                    time = bar.time,
                    open = bar.open,
                    high = bar.high,
                    low = bar.low,
                    close = bar.close,
                    volume = bar.volume,
                    is_final = bar.is_final,
                    "[BAR]"
                );
            }
            _ = heartbeat.tick() => {
                let latest = feed.latest_price();
                tracing::info!(
                    subscriptions = feed.registry().len(),
                    latest_time = latest.map(|l| l.time),
                    latest_price = latest.map(|l| l.price),
                    "[HEARTBEAT]"
                );
                let expiry_secs = i64::try_from(config.trade_expiry.as_secs()).unwrap_or(i64::MAX);
                if let Some(line) = ExpiryLine::from_latest(latest, expiry_secs, TradeDirection::Up) {
                    tracing::debug!(
                        start = line.start.time,
                        end = line.end.time,
                        price = line.start.price,
                        label = line.label,
                        "[HEARTBEAT] expiry line preview"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[SHUTDOWN] ctrl-c received");
                break;
            }
        }
    }

    feed.unsubscribe_bars(&config.subscriber_id);
    Ok(())
}
