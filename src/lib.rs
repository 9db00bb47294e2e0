//! Core library for the kline-feed project.
//!
//! Streams exchange klines into chart-ready bars: symbol lookup and history
//! through [`datafeed`], live subscriptions through [`streaming`], and local
//! bucketing of 1s klines through [`aggregator`].

pub mod aggregator;
pub mod cex;
pub mod config;
pub mod datafeed;
pub mod errors;
pub mod history;
pub mod models;
pub mod overlay;
pub mod streaming;
pub mod utils;
