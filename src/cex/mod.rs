//! Exchange WebSocket client.
//!
//! Responsibilities:
//! • Connect to a centralized exchange public kline feed.
//! • Normalize kline frames into `Bar`s.
//! • Reconnect after a fixed delay when the feed drops.

pub mod binance;

pub use binance::{
    binance_interval, connect_and_stream, format_binance_symbol, kline_stream_url,
    parse_kline_message, spawn_kline_stream_watcher,
};
