//! Analysis settings
//!
//! Every field has a default, so a partial file (or none of the optional
//! sections) deserializes to a usable configuration. Environment variables
//! prefixed with `ENGULF__` override file values, e.g.
//! `ENGULF__SIMILARITY_MATCH_THRESHOLD=0.7`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{relation::DEFAULT_ENGULFING_THRESHOLD_PERCENT, timeframe::Timeframe, AnalysisError, Rating, Result};

/// Inclusive rating band used to partition feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingBand {
    pub min: u8,
    pub max: u8,
}

impl RatingBand {
    pub const HIGH: RatingBand = RatingBand { min: 8, max: 10 };
    pub const LOW: RatingBand = RatingBand { min: 1, max: 3 };

    #[inline]
    pub fn contains(&self, rating: Rating) -> bool {
        (self.min..=self.max).contains(&rating.get())
    }
}

/// Tunables shared by the classifier, the feedback subsystem and the scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Engulfing tolerance, percent of MC1's body size or body top
    #[serde(default = "default_engulfing_threshold")]
    pub engulfing_threshold_percent: f64,
    #[serde(default = "default_timeframes")]
    pub supported_timeframes: Vec<Timeframe>,
    #[serde(default = "default_high_band")]
    pub high_rating: RatingBand,
    #[serde(default = "default_low_band")]
    pub low_rating: RatingBand,
    /// Weighted similarity above which a pattern matches feedback
    #[serde(default = "default_match_threshold")]
    pub similarity_match_threshold: f64,
    /// Maximum relative boost from learned characteristics
    #[serde(default = "default_boost_cap")]
    pub adaptive_boost_cap: f64,
    #[serde(default = "default_detail_limit")]
    pub backtest_detail_limit: usize,
    /// Trailing candles skipped when analysing the latest window
    #[serde(default = "default_ignore_candles")]
    pub ignore_candles: usize,
    /// Daily candles fetched per instrument for a scan
    #[serde(default = "default_candle_count")]
    pub candle_count: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_engulfing_threshold() -> f64 {
    DEFAULT_ENGULFING_THRESHOLD_PERCENT
}
fn default_timeframes() -> Vec<Timeframe> {
    Timeframe::ALL.to_vec()
}
fn default_high_band() -> RatingBand {
    RatingBand::HIGH
}
fn default_low_band() -> RatingBand {
    RatingBand::LOW
}
fn default_match_threshold() -> f64 {
    0.6
}
fn default_boost_cap() -> f64 {
    0.2
}
fn default_detail_limit() -> usize {
    50
}
fn default_ignore_candles() -> usize {
    1
}
fn default_candle_count() -> usize {
    30
}
fn default_cache_ttl() -> u64 {
    750
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            engulfing_threshold_percent: default_engulfing_threshold(),
            supported_timeframes: default_timeframes(),
            high_rating: default_high_band(),
            low_rating: default_low_band(),
            similarity_match_threshold: default_match_threshold(),
            adaptive_boost_cap: default_boost_cap(),
            backtest_detail_limit: default_detail_limit(),
            ignore_candles: default_ignore_candles(),
            candle_count: default_candle_count(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl AnalysisConfig {
    /// Load from a file, with `ENGULF__*` environment overrides, and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .add_source(
                ::config::Environment::with_prefix("ENGULF")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "loaded analysis config");
        Ok(settings)
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.engulfing_threshold_percent.is_finite()
            || !(0.0..=100.0).contains(&self.engulfing_threshold_percent)
        {
            return Err(AnalysisError::OutOfRange {
                field: "engulfing_threshold_percent",
                value: self.engulfing_threshold_percent,
                min: 0.0,
                max: 100.0,
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_match_threshold) {
            return Err(AnalysisError::OutOfRange {
                field: "similarity_match_threshold",
                value: self.similarity_match_threshold,
                min: 0.0,
                max: 1.0,
            });
        }
        if !(0.0..=1.0).contains(&self.adaptive_boost_cap) {
            return Err(AnalysisError::OutOfRange {
                field: "adaptive_boost_cap",
                value: self.adaptive_boost_cap,
                min: 0.0,
                max: 1.0,
            });
        }
        if self.supported_timeframes.is_empty() {
            return Err(AnalysisError::InvalidConfig(
                "supported_timeframes cannot be empty".into(),
            ));
        }
        for (name, band) in [("high_rating", self.high_rating), ("low_rating", self.low_rating)] {
            if band.min < Rating::MIN || band.max > Rating::MAX || band.min > band.max {
                return Err(AnalysisError::InvalidConfig(format!(
                    "{name} band {}..={} must lie within 1..=10",
                    band.min, band.max
                )));
            }
        }
        if self.low_rating.max >= self.high_rating.min {
            return Err(AnalysisError::InvalidConfig(
                "low_rating and high_rating bands overlap".into(),
            ));
        }
        if self.backtest_detail_limit == 0 {
            return Err(AnalysisError::InvalidConfig(
                "backtest_detail_limit must be positive".into(),
            ));
        }
        let largest = self
            .supported_timeframes
            .iter()
            .map(|tf| tf.window_size())
            .max()
            .unwrap_or(0);
        if self.candle_count < largest + self.ignore_candles {
            return Err(AnalysisError::InvalidConfig(format!(
                "candle_count {} cannot cover a {largest}-candle window plus {} ignored",
                self.candle_count, self.ignore_candles
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AnalysisConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(750));
        assert_eq!(cfg.supported_timeframes.len(), 4);
        assert_eq!(cfg.similarity_match_threshold, 0.6);
    }

    #[test]
    fn test_rating_bands() {
        let eight = Rating::new(8).unwrap();
        let three = Rating::new(3).unwrap();
        let five = Rating::new(5).unwrap();
        assert!(RatingBand::HIGH.contains(eight));
        assert!(RatingBand::LOW.contains(three));
        assert!(!RatingBand::HIGH.contains(five));
        assert!(!RatingBand::LOW.contains(five));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: AnalysisConfig =
            serde_json::from_str(r#"{"similarity_match_threshold": 0.75, "supported_timeframes": ["1D", "3d"]}"#)
                .unwrap();
        assert_eq!(cfg.similarity_match_threshold, 0.75);
        assert_eq!(cfg.supported_timeframes, vec![Timeframe::D1, Timeframe::D3]);
        assert_eq!(cfg.backtest_detail_limit, 50);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = AnalysisConfig {
            similarity_match_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AnalysisError::OutOfRange { .. })));

        let cfg = AnalysisConfig {
            low_rating: RatingBand { min: 1, max: 8 },
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AnalysisError::InvalidConfig(_))));

        let cfg = AnalysisConfig {
            supported_timeframes: vec![],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = AnalysisConfig {
            candle_count: 5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("engulf-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "engulfing_threshold_percent = 0.25\nbacktest_detail_limit = 20\n\n[high_rating]\nmin = 7\nmax = 10\n",
        )
        .unwrap();

        let cfg = AnalysisConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.engulfing_threshold_percent, 0.25);
        assert_eq!(cfg.backtest_detail_limit, 20);
        assert_eq!(cfg.high_rating, RatingBand { min: 7, max: 10 });
        assert_eq!(cfg.low_rating, RatingBand::LOW);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let path = std::env::temp_dir().join(format!("engulf-missing-{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(
            AnalysisConfig::load(&path),
            Err(AnalysisError::ConfigSource(_))
        ));
    }
}
