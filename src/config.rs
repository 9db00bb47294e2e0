//! Configuration loader and application settings.

use crate::cex::binance::BINANCE_WS_ENDPOINT;
use crate::errors::{AppError, Result};
use crate::models::Resolution;
use std::time::Duration;

/// Consolidated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base WebSocket endpoint of the exchange kline feed.
    pub ws_url: String,
    /// Base URL of the chart history REST backend.
    pub history_api_url: String,
    /// Chart symbol (e.g., "BTC/USDT").
    pub symbol: String,
    pub resolution: Resolution,
    /// Wait before reopening a dropped feed.
    pub reconnect_delay: Duration,
    pub subscriber_id: String,
    /// How far back the startup history request reaches.
    pub history_lookback: Duration,
    /// Expiry of the trade line previewed on each heartbeat.
    pub trade_expiry: Duration,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults, malformed
    /// values are rejected.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let u64_or = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| AppError::Config(format!("{key}={raw:?}: {e}"))),
                None => Ok(default),
            }
        };

        let resolution = string_or("RESOLUTION", "5S")
            .parse::<Resolution>()
            .map_err(|e| AppError::Config(format!("RESOLUTION: {e}")))?;

        Ok(Self {
            ws_url: string_or("BINANCE_WS_URL", BINANCE_WS_ENDPOINT),
            history_api_url: string_or("HISTORY_API_URL", "http://localhost:8080"),
            symbol: string_or("SYMBOL", "BTC/USDT"),
            resolution,
            reconnect_delay: Duration::from_millis(u64_or("RECONNECT_DELAY_MS", 2_000)?),
            subscriber_id: string_or("SUBSCRIBER_ID", "kline-feed-main"),
            history_lookback: Duration::from_secs(u64_or("HISTORY_LOOKBACK_SECS", 3_600)?),
            trade_expiry: Duration::from_secs(u64_or("TRADE_EXPIRY_SECS", 60)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.ws_url, "wss://stream.binance.com:9443/ws");
        assert_eq!(cfg.symbol, "BTC/USDT");
        assert_eq!(cfg.resolution, Resolution::Sec5);
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(2));
        assert_eq!(cfg.history_lookback, Duration::from_secs(3_600));
        assert_eq!(cfg.subscriber_id, "kline-feed-main");
        assert_eq!(cfg.trade_expiry, Duration::from_secs(60));
    }

    #[test]
    fn reads_overrides() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("SYMBOL", "ETH/USDT"),
            ("RESOLUTION", "15"),
            ("RECONNECT_DELAY_MS", "500"),
            ("HISTORY_LOOKBACK_SECS", "600"),
            ("TRADE_EXPIRY_SECS", "300"),
        ]))
        .unwrap();
        assert_eq!(cfg.symbol, "ETH/USDT");
        assert_eq!(cfg.resolution, Resolution::Min15);
        assert_eq!(cfg.reconnect_delay, Duration::from_millis(500));
        assert_eq!(cfg.history_lookback, Duration::from_secs(600));
        assert_eq!(cfg.trade_expiry, Duration::from_secs(300));
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let err = AppConfig::from_lookup(lookup(&[("RESOLUTION", "7S")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        let err = AppConfig::from_lookup(lookup(&[("RECONNECT_DELAY_MS", "soon")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
