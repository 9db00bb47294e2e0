//! Trade expiry annotations anchored at the latest price.

use crate::models::LatestPrice;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Up,
    Down,
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDirection::Up => f.write_str("up"),
            TradeDirection::Down => f.write_str("down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShapePoint {
    /// Seconds since the Unix epoch.
    pub time: i64,
    pub price: f64,
}

/// Horizontal trend line from the entry point to the trade expiry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpiryLine {
    pub start: ShapePoint,
    pub end: ShapePoint,
    pub direction: TradeDirection,
    pub label: &'static str,
    pub color: &'static str,
    pub line_width: u32,
}

impl ExpiryLine {
    /// Lock the latest time and price and extend the line by `expiry_secs`.
    /// Without a known price there is nothing to anchor to.
    pub fn from_latest(
        latest: Option<LatestPrice>,
        expiry_secs: i64,
        direction: TradeDirection,
    ) -> Option<Self> {
        let latest = latest?;
        let (label, color) = match direction {
            TradeDirection::Up => ("Up Trade", "green"),
            TradeDirection::Down => ("Down Trade", "red"),
        };
        Some(Self {
            start: ShapePoint {
                time: latest.time,
                price: latest.price,
            },
            end: ShapePoint {
                time: latest.time.saturating_add(expiry_secs),
                price: latest.price,
            },
            direction,
            label,
            color,
            line_width: 4,
        })
    }
}
