//! # engulf - merged-candle relation analysis
//!
//! Merges consecutive daily candles into custom timeframes, classifies the
//! relation between two successive merged candles and scores engulfing
//! patterns against a corpus of human-rated feedback.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use engulf::prelude::*;
//!
//! let day = |d: u32, o: f64, h: f64, l: f64, c: f64| {
//!     RawCandle::new(o, h, l, c, Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap())
//! };
//!
//! // Red candle followed by a green candle whose body covers it
//! let mc1 = merge_candles(&[day(4, 1.0950, 1.0960, 1.0910, 1.0920)]);
//! let mc2 = merge_candles(&[day(5, 1.0880, 1.1060, 1.0870, 1.1050)]);
//!
//! let relation = classify(mc1.as_ref(), mc2.as_ref(), DEFAULT_ENGULFING_THRESHOLD_PERCENT);
//! assert!(relation.contains(Signal::BullishEngulfing));
//!
//! let (mc1, mc2) = (mc1.unwrap(), mc2.unwrap());
//! let metrics = compute_metrics(&mc1, &mc2, PatternType::Bullish);
//! assert!(metrics.body_size_ratio < 1.0);
//! ```

pub mod backtest;
pub mod cache;
pub mod candle;
pub mod feedback;
pub mod learner;
pub mod metrics;
pub mod relation;
pub mod scanner;
pub mod settings;
pub mod source;
pub mod timeframe;

pub mod prelude {
    pub use crate::{
        // Backtesting
        backtest::{BacktestRequest, BacktestResult, Backtester, PatternHit},
        // Cache
        cache::TtlCache,
        // Candles
        candle::{latest_window, merge_candles, CandlePair, MergedCandle, RawCandle},
        // Feedback
        feedback::{
            feedback_statistics, AggregatedFeedback, FeedbackFilter, FeedbackKey, FeedbackRecord,
            FeedbackService, FeedbackStatistics, FeedbackStore, MemoryFeedbackStore,
            PatternObservation,
        },
        // Learning
        learner::{
            adaptive_similarity, learn, similarity, validate_against_feedback,
            DetectionThresholds, FeedbackValidation, LearnedModel,
        },
        // Metrics
        metrics::{compute_metrics, BodyPosition, MetricSet, WickRatios},
        // Relations
        relation::{classify, classify_pair, Relation, Signal, DEFAULT_ENGULFING_THRESHOLD_PERCENT},
        // Scanning
        scanner::{ConfidenceBand, InstrumentAnalysis, ScanReport, Scanner},
        // Configuration
        settings::AnalysisConfig,
        // Price data
        source::{MemoryPriceSource, PriceSource},
        // Timeframes
        timeframe::Timeframe,
        // Errors
        AnalysisError,
        // Types
        CandleColor,
        Instrument,
        // Core traits
        Ohlc,
        OhlcExt,
        PatternType,
        Rating,
        Result,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors raised at the validation boundary and by storage collaborators.
///
/// Pure analysis functions never return these: degenerate numeric input is
/// absorbed in-band (0.0, `neutral`, `outside`).
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: &'static str },

    #[error("Insufficient data: need {need} candles, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Human feedback rating in range 1..=10
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Create a new Rating, validating the value is in [1, 10]
    pub fn new(value: u8) -> Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(AnalysisError::OutOfRange {
                field: "rating",
                value: value as f64,
                min: Self::MIN as f64,
                max: Self::MAX as f64,
            });
        }
        Ok(Self(value))
    }

    /// Round an aggregated (fractional) rating to the nearest valid rating,
    /// ties to even.
    pub fn from_weighted(value: f64) -> Self {
        let rounded = value.round_ties_even().clamp(Self::MIN as f64, Self::MAX as f64);
        Self(rounded as u8)
    }

    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }
}

impl serde::Serialize for Rating {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Rating {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = u8::deserialize(d)?;
        Rating::new(value).map_err(serde::de::Error::custom)
    }
}

/// Currency pair in `BASE_QUOTE` form (e.g. `EUR_USD`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        match value.split_once('_') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok(Self(value)),
            _ => Err(AnalysisError::InvalidInput(format!(
                "instrument must be BASE_QUOTE, got {value:?}"
            ))),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base(&self) -> &str {
        self.0.split_once('_').map(|(b, _)| b).unwrap_or_default()
    }

    pub fn quote(&self) -> &str {
        self.0.split_once('_').map(|(_, q)| q).unwrap_or_default()
    }

    /// Display form without the separator, e.g. `EURUSD`
    pub fn compact(&self) -> String {
        self.0.replace('_', "")
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Instrument {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl serde::Serialize for Instrument {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Instrument {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(d)?;
        Instrument::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLC TRAITS
// ============================================================

/// Core OHLC price trait
pub trait Ohlc {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
}

/// Extension trait with computed body/wick geometry for OHLC data
pub trait OhlcExt: Ohlc {
    #[inline]
    fn body_top(&self) -> f64 {
        self.open().max(self.close())
    }

    #[inline]
    fn body_bottom(&self) -> f64 {
        self.open().min(self.close())
    }

    #[inline]
    fn body_size(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn upper_wick(&self) -> f64 {
        self.high() - self.body_top()
    }

    #[inline]
    fn lower_wick(&self) -> f64 {
        self.body_bottom() - self.low()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    fn color(&self) -> CandleColor {
        if self.is_bullish() {
            CandleColor::Green
        } else if self.is_bearish() {
            CandleColor::Red
        } else {
            CandleColor::Neutral
        }
    }

    /// Validate OHLC data consistency
    fn validate(&self) -> Result<()> {
        let values = [self.open(), self.high(), self.low(), self.close()];
        if values.iter().any(|v| v.is_nan()) {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "NaN in OHLC",
            });
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "Infinite value in OHLC",
            });
        }
        if self.high() < self.low() {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: Ohlc> OhlcExt for T {}

/// Validate every candle in a series, reporting the offending index.
pub fn validate_series<T: Ohlc>(candles: &[T]) -> Result<()> {
    for (i, candle) in candles.iter().enumerate() {
        candle.validate().map_err(|e| match e {
            AnalysisError::InvalidCandle { reason, .. } => {
                AnalysisError::InvalidCandle { index: i, reason }
            }
            other => other,
        })?;
    }
    Ok(())
}

// ============================================================
// PATTERN TYPES
// ============================================================

/// Direction of an engulfing pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Bullish,
    Bearish,
}

impl PatternType {
    pub const ALL: [PatternType; 2] = [PatternType::Bullish, PatternType::Bearish];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Bullish => "bullish",
            PatternType::Bearish => "bearish",
        }
    }

    /// True when a forward price move of `movement_pct` agrees with this direction.
    #[inline]
    pub fn agrees_with(self, movement_pct: f64) -> bool {
        match self {
            PatternType::Bullish => movement_pct > 0.0,
            PatternType::Bearish => movement_pct < 0.0,
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PatternType {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" => Ok(PatternType::Bullish),
            "bearish" => Ok(PatternType::Bearish),
            other => Err(AnalysisError::InvalidInput(format!(
                "pattern type must be bullish or bearish, got {other:?}"
            ))),
        }
    }
}

/// Candle color by close versus open
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CandleColor {
    Green,
    Red,
    Neutral,
}

// ============================================================
// TESTS
// ============================================================
