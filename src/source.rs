//! Price data collaborators

use std::collections::HashMap;
use std::sync::RwLock;

use crate::{candle::RawCandle, Instrument};

/// Supplier of raw candles, oldest first.
///
/// Returning fewer candles than requested (or none) is not an error; callers
/// decide whether the series is long enough.
pub trait PriceSource: Send + Sync {
    fn candles(&self, instrument: &Instrument, granularity: &str, count: usize) -> Vec<RawCandle>;
}

/// In-memory price source keyed by instrument and granularity
#[derive(Debug, Default)]
pub struct MemoryPriceSource {
    series: RwLock<HashMap<(Instrument, String), Vec<RawCandle>>>,
}

impl MemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the series for `(instrument, granularity)`; candles are sorted by time.
    pub fn insert(&self, instrument: Instrument, granularity: &str, mut candles: Vec<RawCandle>) {
        candles.sort_by_key(|c| c.time);
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        series.insert((instrument, granularity.to_ascii_uppercase()), candles);
    }

    pub fn with_series(self, instrument: Instrument, granularity: &str, candles: Vec<RawCandle>) -> Self {
        self.insert(instrument, granularity, candles);
        self
    }
}

impl PriceSource for MemoryPriceSource {
    fn candles(&self, instrument: &Instrument, granularity: &str, count: usize) -> Vec<RawCandle> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let key = (instrument.clone(), granularity.to_ascii_uppercase());
        match series.get(&key) {
            Some(candles) => {
                let start = candles.len().saturating_sub(count);
                candles[start..].to_vec()
            }
            None => {
                tracing::debug!(%instrument, granularity, "no candles for instrument");
                Vec::new()
            }
        }
    }
}
