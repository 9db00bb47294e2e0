//! Time-bucket aggregation of 1s klines into coarser chart candles.

use crate::models::Bar;
use tracing::warn;

/// Start of the bucket containing `time_ms`.
pub fn bucket_start(time_ms: i64, interval_ms: i64) -> i64 {
    time_ms.div_euclid(interval_ms) * interval_ms
}

/// Fold `next` onto `acc`: keep the earlier open, take the later close.
fn merge(acc: &Bar, next: &Bar) -> Bar {
    Bar {
        time: acc.time,
        open: acc.open,
        high: acc.high.max(next.high),
        low: acc.low.min(next.low),
        close: next.close,
        volume: acc.volume + next.volume,
        is_final: false,
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    start: i64,
    /// Fold of every source bar older than `forming`.
    settled: Option<Bar>,
    /// Latest update of the newest source bar. The exchange resends the same
    /// 1s kline while it forms, so this slot is replaced, not summed.
    forming: Option<Bar>,
}

impl Bucket {
    fn new(start: i64) -> Self {
        Self {
            start,
            settled: None,
            forming: None,
        }
    }

    fn snapshot(&self, is_final: bool) -> Option<Bar> {
        let folded = match (&self.settled, &self.forming) {
            (Some(s), Some(f)) => merge(s, f),
            (Some(s), None) => *s,
            (None, Some(f)) => *f,
            (None, None) => return None,
        };
        Some(Bar {
            time: self.start,
            is_final,
            ..folded
        })
    }
}

/// Buckets source bars into fixed windows of `interval_ms`.
#[derive(Debug, Clone)]
pub struct BucketAggregator {
    interval_ms: i64,
    current: Option<Bucket>,
}

impl BucketAggregator {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            current: None,
        }
    }

    /// Start from a bar already shown on the chart, typically the last
    /// history bar, so the forming candle keeps its open/high/low.
    pub fn seed(&mut self, bar: &Bar) {
        let start = bucket_start(bar.time, self.interval_ms);
        let mut bucket = Bucket::new(start);
        bucket.settled = Some(Bar {
            time: start,
            is_final: false,
            ..*bar
        });
        self.current = Some(bucket);
    }

    /// Feed one source bar. Returns the bucket closed by this bar (if any,
    /// `is_final = true`) followed by the forming bucket.
    pub fn on_bar(&mut self, bar: Bar) -> Vec<Bar> {
        let start = bucket_start(bar.time, self.interval_ms);
        let mut out = Vec::with_capacity(2);

        let rolls = match &self.current {
            Some(b) if start < b.start => {
                warn!(
                    bar_time = bar.time,
                    bucket_start = b.start,
                    "[AGG] bar older than current bucket, dropped"
                );
                return out;
            }
            Some(b) => start > b.start,
            None => true,
        };
        if rolls {
            if let Some(done) = self.current.take().and_then(|b| b.snapshot(true)) {
                out.push(done);
            }
            self.current = Some(Bucket::new(start));
        }
        let Some(bucket) = self.current.as_mut() else {
            return out;
        };

        let forming = bucket.forming;
        match forming {
            Some(f) if bar.time == f.time => bucket.forming = Some(bar),
            Some(f) if bar.time < f.time => {
                warn!(
                    bar_time = bar.time,
                    forming_time = f.time,
                    "[AGG] out-of-order bar inside bucket, dropped"
                );
                return out;
            }
            Some(f) => {
                bucket.settled = Some(match &bucket.settled {
                    Some(s) => merge(s, &f),
                    None => f,
                });
                bucket.forming = Some(bar);
            }
            None => bucket.forming = Some(bar),
        }

        if let Some(forming) = bucket.snapshot(false) {
            out.push(forming);
        }
        out
    }

    /// The forming bucket as it would be drawn right now.
    pub fn current(&self) -> Option<Bar> {
        self.current.as_ref().and_then(|b| b.snapshot(false))
    }

    /// Close the forming bucket and reset.
    pub fn flush(&mut self) -> Option<Bar> {
        self.current.take().and_then(|b| b.snapshot(true))
    }
}
