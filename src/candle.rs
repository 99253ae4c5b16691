//! Raw and merged candles
//!
//! A [`MergedCandle`] is a synthetic candle built from a contiguous run of
//! [`RawCandle`]s: first open, last close, extreme high/low, first time.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{timeframe::Timeframe, Ohlc};

/// Candle as supplied by the price source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub time: DateTime<Utc>,
    #[serde(default = "default_complete")]
    pub complete: bool,
}

fn default_complete() -> bool {
    true
}

impl RawCandle {
    /// Completed candle
    pub fn new(open: f64, high: f64, low: f64, close: f64, time: DateTime<Utc>) -> Self {
        Self {
            open,
            high,
            low,
            close,
            time,
            complete: true,
        }
    }
}

impl Ohlc for RawCandle {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }
}

/// Synthetic candle covering `source_count` raw candles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergedCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Time of the first merged raw candle
    pub time: DateTime<Utc>,
    pub source_count: usize,
}

impl MergedCandle {
    #[inline]
    pub fn date(&self) -> NaiveDate {
        self.time.date_naive()
    }
}

impl Ohlc for MergedCandle {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }
}

/// Older (`mc1`) and newer (`mc2`) merged candles of one comparison window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandlePair {
    pub mc1: MergedCandle,
    pub mc2: MergedCandle,
}

/// Merge a contiguous run of candles into one.
///
/// Returns `None` for an empty slice; callers treat that as insufficient data.
pub fn merge_candles(candles: &[RawCandle]) -> Option<MergedCandle> {
    let first = candles.first()?;
    let last = candles.last()?;

    let (high, low) = candles
        .iter()
        .fold((f64::NEG_INFINITY, f64::INFINITY), |(h, l), c| {
            (h.max(c.high), l.min(c.low))
        });

    Some(MergedCandle {
        open: first.open,
        high,
        low,
        close: last.close,
        time: first.time,
        source_count: candles.len(),
    })
}

/// Merge the most recent MC1/MC2 window of a series.
///
/// The last `ignore_candles` candles (typically the still-forming one) are
/// dropped first; MC2 covers the last `N` remaining candles and MC1 the `N`
/// before them. Returns `None` when fewer than `2N + ignore_candles` candles
/// are available.
pub fn latest_window(
    candles: &[RawCandle],
    timeframe: Timeframe,
    ignore_candles: usize,
) -> Option<CandlePair> {
    let n = timeframe.candle_count();
    let need = n * 2 + ignore_candles;
    if candles.len() < need {
        tracing::debug!(need, got = candles.len(), %timeframe, "not enough candles for window");
        return None;
    }

    let usable = &candles[..candles.len() - ignore_candles];
    let split = usable.len() - n;
    let mc1 = merge_candles(&usable[split - n..split])?;
    let mc2 = merge_candles(&usable[split..])?;
    Some(CandlePair { mc1, mc2 })
}

/// Merge the MC1/MC2 window ending just before index `end` (exclusive).
///
/// MC1 covers `[end - 2N, end - N)`, MC2 covers `[end - N, end)`.
pub fn window_ending_at(candles: &[RawCandle], timeframe: Timeframe, end: usize) -> Option<CandlePair> {
    let n = timeframe.candle_count();
    if end < n * 2 || end > candles.len() {
        return None;
    }
    let mc1 = merge_candles(&candles[end - n * 2..end - n])?;
    let mc2 = merge_candles(&candles[end - n..end])?;
    Some(CandlePair { mc1, mc2 })
}

// ============================================================
// TESTS
// ============================================================
