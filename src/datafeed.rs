//! Chart-facing datafeed: configuration, symbol lookup, history and
//! realtime subscriptions behind one handle.

use crate::errors::{AppError, Result};
use crate::history::HistorySource;
use crate::models::{
    Bar, DatafeedConfiguration, ExchangeDescriptor, HistoryResult, LatestPrice, PeriodParams,
    Resolution, SymbolEntry, SymbolInfo, SymbolType,
};
use crate::streaming::{LatestPriceTracker, StreamRegistry};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const EXCHANGE_NAME: &str = "Custom API";

fn default_configuration() -> DatafeedConfiguration {
    DatafeedConfiguration {
        supported_resolutions: Resolution::ALL.iter().map(|r| r.to_string()).collect(),
        supports_marks: false,
        supports_timescale_marks: false,
        supports_time: true,
        has_seconds: true,
        exchanges: vec![ExchangeDescriptor {
            value: EXCHANGE_NAME.into(),
            name: EXCHANGE_NAME.into(),
            desc: "Custom API Exchange".into(),
        }],
        symbols_types: vec![SymbolType {
            name: "crypto".into(),
            value: "crypto".into(),
        }],
    }
}

fn default_symbols() -> Vec<SymbolEntry> {
    ["BTC/USDT", "ETH/USDT"]
        .into_iter()
        .map(|s| SymbolEntry {
            symbol: s.into(),
            full_name: s.into(),
            exchange: EXCHANGE_NAME.into(),
            kind: "crypto".into(),
        })
        .collect()
}

pub struct Datafeed<H> {
    history: H,
    configuration: DatafeedConfiguration,
    symbols: Vec<SymbolEntry>,
    registry: StreamRegistry,
    last_bars: HashMap<String, Bar>,
}

impl<H: HistorySource> Datafeed<H> {
    pub fn new(history: H, ws_base: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            history,
            configuration: default_configuration(),
            symbols: default_symbols(),
            registry: StreamRegistry::with_tracker(
                ws_base,
                reconnect_delay,
                LatestPriceTracker::new(),
            ),
            last_bars: HashMap::new(),
        }
    }

    pub fn on_ready(&self) -> &DatafeedConfiguration {
        &self.configuration
    }

    /// Case-insensitive substring match on the full name. An empty exchange
    /// matches every exchange.
    pub fn search_symbols(&self, user_input: &str, exchange: &str) -> Vec<SymbolEntry> {
        let needle = user_input.to_lowercase();
        self.symbols
            .iter()
            .filter(|s| exchange.is_empty() || s.exchange == exchange)
            .filter(|s| s.full_name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    pub fn resolve_symbol(&self, symbol_name: &str) -> Result<SymbolInfo> {
        let Some(entry) = self.symbols.iter().find(|s| s.full_name == symbol_name) else {
            warn!(symbol_name, "[FEED] cannot resolve symbol");
            return Err(AppError::UnknownSymbol(symbol_name.to_string()));
        };
        info!(symbol_name, "[FEED] symbol resolved");
        Ok(SymbolInfo::from_entry(
            entry,
            &self.configuration.supported_resolutions,
        ))
    }

    pub async fn get_bars(
        &mut self,
        symbol_info: &SymbolInfo,
        resolution: Resolution,
        period: PeriodParams,
    ) -> Result<HistoryResult> {
        let bars = self
            .history
            .fetch_bars(&symbol_info.name, resolution, period.from, period.to)
            .await
            .inspect_err(|e| {
                warn!(
                    error = %e,
                    symbol = %symbol_info.full_name,
                    "[FEED] history request failed"
                )
            })?;

        let Some(last) = bars.last().copied() else {
            info!(symbol = %symbol_info.full_name, "[FEED] no data in requested range");
            return Ok(HistoryResult {
                bars,
                no_data: true,
            });
        };

        self.registry.tracker().update(&last);
        if period.first_data_request {
            self.last_bars.insert(symbol_info.full_name.clone(), last);
        }
        info!(symbol = %symbol_info.full_name, count = bars.len(), "[FEED] returned bars");
        Ok(HistoryResult {
            bars,
            no_data: false,
        })
    }

    pub fn subscribe_bars(
        &mut self,
        symbol_info: &SymbolInfo,
        resolution: Resolution,
        sink: mpsc::Sender<Bar>,
        uid: &str,
    ) -> Result<()> {
        info!(uid, "[FEED] subscribing bars");
        let last_bar = self.last_bars.get(&symbol_info.full_name).copied();
        self.registry
            .subscribe_on_stream(symbol_info, resolution, sink, uid, last_bar)
    }

    pub fn unsubscribe_bars(&mut self, uid: &str) -> bool {
        info!(uid, "[FEED] unsubscribing bars");
        self.registry.unsubscribe_from_stream(uid)
    }

    pub fn last_bar(&self, full_name: &str) -> Option<Bar> {
        self.last_bars.get(full_name).copied()
    }

    pub fn latest_price(&self) -> Option<LatestPrice> {
        self.registry.latest_price()
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }
}
