//! Custom daily timeframes (1D-4D)
//!
//! A timeframe of `N` days merges `N` consecutive daily candles into one
//! synthetic candle. Parsing accepts `D`, `1D`..`4D` in any case.

use std::fmt;
use std::str::FromStr;

use crate::{AnalysisError, Result};

/// Supported merged-candle timeframe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    D1,
    D2,
    D3,
    D4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::D1, Timeframe::D2, Timeframe::D3, Timeframe::D4];

    /// Upstream granularity for the raw candles being merged
    pub const GRANULARITY: &'static str = "D";

    /// Number of raw daily candles merged into one candle
    #[inline]
    pub fn candle_count(self) -> usize {
        match self {
            Timeframe::D1 => 1,
            Timeframe::D2 => 2,
            Timeframe::D3 => 3,
            Timeframe::D4 => 4,
        }
    }

    pub fn from_count(count: usize) -> Result<Self> {
        match count {
            1 => Ok(Timeframe::D1),
            2 => Ok(Timeframe::D2),
            3 => Ok(Timeframe::D3),
            4 => Ok(Timeframe::D4),
            n => Err(AnalysisError::OutOfRange {
                field: "timeframe",
                value: n as f64,
                min: 1.0,
                max: 4.0,
            }),
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::D1 => "1D",
            Timeframe::D2 => "2D",
            Timeframe::D3 => "3D",
            Timeframe::D4 => "4D",
        }
    }

    /// Candles needed for one MC1/MC2 comparison window
    #[inline]
    pub fn window_size(self) -> usize {
        self.candle_count() * 2
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        let tf = s.trim().to_ascii_uppercase();
        if tf.is_empty() {
            return Err(AnalysisError::InvalidInput("timeframe cannot be empty".into()));
        }
        if tf == "D" {
            return Ok(Timeframe::D1);
        }

        let prefix = tf.strip_suffix('D').ok_or_else(|| {
            AnalysisError::InvalidInput(format!(
                "unsupported timeframe format {s:?}, expected D or 1D-4D"
            ))
        })?;
        let count: usize = prefix
            .parse()
            .map_err(|_| AnalysisError::InvalidInput(format!("invalid timeframe format {s:?}")))?;
        Self::from_count(count)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = AnalysisError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}
