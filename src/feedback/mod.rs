//! Human feedback on detected engulfing patterns
//!
//! Ratings are stored per timeframe and can be folded into one merged record
//! per (instrument, date, pattern type). The merged corpus feeds the learner,
//! the scanner and the backtester.

mod aggregate;
mod store;

pub use aggregate::{
    aggregate_metrics, aggregate_rating, confidence_score, feedback_statistics, rating_variance,
    weighted_mean, weighted_mode, FeedbackStatistics,
};
pub use store::{FeedbackStore, MemoryFeedbackStore};

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    candle::{CandlePair, MergedCandle},
    learner::{self, LearnedModel},
    metrics::{compute_metrics, MetricSet, NumericMetric},
    relation::classify_pair,
    settings::AnalysisConfig,
    timeframe::Timeframe,
    AnalysisError, Instrument, OhlcExt, PatternType, Rating, Result,
};

/// An engulfing pattern as seen on one timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternObservation {
    pub instrument: Instrument,
    pub timeframe: Timeframe,
    /// Date of MC2, the engulfing candle
    pub date: NaiveDate,
    pub pattern_type: PatternType,
    pub mc1: MergedCandle,
    pub mc2: MergedCandle,
    pub metrics: MetricSet,
}

impl PatternObservation {
    pub fn new(
        instrument: Instrument,
        timeframe: Timeframe,
        pattern_type: PatternType,
        candles: CandlePair,
    ) -> Self {
        Self {
            instrument,
            timeframe,
            date: candles.mc2.date(),
            pattern_type,
            mc1: candles.mc1,
            mc2: candles.mc2,
            metrics: compute_metrics(&candles.mc1, &candles.mc2, pattern_type),
        }
    }

    /// Observation for `candles` if they form an engulfing pattern.
    pub fn detect(
        instrument: Instrument,
        timeframe: Timeframe,
        candles: CandlePair,
        engulfing_threshold_percent: f64,
    ) -> Option<Self> {
        let pattern_type =
            classify_pair(&candles.mc1, &candles.mc2, engulfing_threshold_percent).engulfing()?;
        Some(Self::new(instrument, timeframe, pattern_type, candles))
    }

    #[inline]
    pub fn candles(&self) -> CandlePair {
        CandlePair {
            mc1: self.mc1,
            mc2: self.mc2,
        }
    }
}

/// Identity shared by all feedback on one pattern occurrence
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedbackKey {
    pub instrument: Instrument,
    pub date: NaiveDate,
    pub pattern_type: PatternType,
}

/// Stored rating of a pattern, either per timeframe or merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub instrument: Instrument,
    /// `None` for merged records
    #[serde(default)]
    pub timeframe: Option<Timeframe>,
    pub date: NaiveDate,
    pub pattern_type: PatternType,
    pub rating: Rating,
    pub metrics: MetricSet,
    #[serde(default)]
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_merged: bool,
    #[serde(default)]
    pub source_timeframes: Vec<Timeframe>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub candles: Option<CandlePair>,
    /// Unrounded aggregate rating of a merged record
    #[serde(default)]
    pub weighted_rating: Option<f64>,
    #[serde(default)]
    pub feedback_count: Option<usize>,
}

impl FeedbackRecord {
    #[inline]
    pub fn key(&self) -> FeedbackKey {
        FeedbackKey {
            instrument: self.instrument.clone(),
            date: self.date,
            pattern_type: self.pattern_type,
        }
    }
}

/// Record selection; unset fields match everything.
///
/// `merged_only` picks one of the two partitions of the store: merged
/// records when `true`, timeframe-specific records when `false`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackFilter {
    pub instrument: Option<Instrument>,
    pub timeframe: Option<Timeframe>,
    pub pattern_type: Option<PatternType>,
    /// Inclusive date bounds
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub merged_only: bool,
}

impl FeedbackFilter {
    /// Filter over merged records
    pub fn merged() -> Self {
        Self {
            merged_only: true,
            ..Self::default()
        }
    }

    pub fn instrument(mut self, instrument: Instrument) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    pub fn pattern_type(mut self, pattern_type: PatternType) -> Self {
        self.pattern_type = Some(pattern_type);
        self
    }

    pub fn date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_range = Some((start, end));
        self
    }

    pub fn matches(&self, record: &FeedbackRecord) -> bool {
        if record.is_merged != self.merged_only {
            return false;
        }
        if let Some(instrument) = &self.instrument {
            if &record.instrument != instrument {
                return false;
            }
        }
        if let Some(pattern_type) = self.pattern_type {
            if record.pattern_type != pattern_type {
                return false;
            }
        }
        if let Some(tf) = self.timeframe {
            let covered = record.timeframe == Some(tf)
                || (record.is_merged && record.source_timeframes.contains(&tf));
            if !covered {
                return false;
            }
        }
        if let Some((start, end)) = self.date_range {
            if record.date < start || record.date > end {
                return false;
            }
        }
        true
    }
}

/// Result of folding per-timeframe feedback into a merged record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFeedback {
    /// The persisted merged record
    pub record: FeedbackRecord,
    pub weighted_rating: f64,
    pub rating_variance: f64,
    pub confidence_score: f64,
}

/// Feedback operations over a [`FeedbackStore`]
#[derive(Debug)]
pub struct FeedbackService<S = MemoryFeedbackStore> {
    store: S,
    config: AnalysisConfig,
}

impl<S: FeedbackStore> FeedbackService<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, AnalysisConfig::default())
    }

    pub fn with_config(store: S, config: AnalysisConfig) -> Self {
        Self { store, config }
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Persist a timeframe-specific rating for `observation`.
    pub fn store_feedback(
        &self,
        observation: &PatternObservation,
        rating: Rating,
        notes: Option<String>,
    ) -> Result<FeedbackRecord> {
        for candle in [&observation.mc1, &observation.mc2] {
            candle.validate()?;
        }
        if let Some(metric) = NumericMetric::ALL
            .iter()
            .find(|&&m| !observation.metrics.numeric(m).is_finite())
        {
            return Err(AnalysisError::InvalidInput(format!(
                "metric {metric:?} is not finite"
            )));
        }

        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            instrument: observation.instrument.clone(),
            timeframe: Some(observation.timeframe),
            date: observation.date,
            pattern_type: observation.pattern_type,
            rating,
            metrics: observation.metrics,
            notes: notes
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            timestamp: Utc::now(),
            is_merged: false,
            source_timeframes: vec![observation.timeframe],
            confidence_score: None,
            candles: Some(observation.candles()),
            weighted_rating: None,
            feedback_count: None,
        };

        self.store.save(record.clone())?;
        tracing::info!(
            id = %record.id,
            instrument = %record.instrument,
            timeframe = %observation.timeframe,
            pattern = %record.pattern_type,
            rating = rating.get(),
            "stored feedback"
        );
        Ok(record)
    }

    /// Fold every timeframe-specific record for one pattern occurrence into
    /// a merged record, persisting it in place of any earlier merge.
    ///
    /// Returns `None` when no feedback exists for the key.
    pub fn aggregate(
        &self,
        instrument: &Instrument,
        pattern_type: PatternType,
        date: NaiveDate,
        weight_by_rating: bool,
    ) -> Result<Option<AggregatedFeedback>> {
        let filter = FeedbackFilter::default()
            .instrument(instrument.clone())
            .pattern_type(pattern_type)
            .date_range(date, date);
        let records = self.store.query(&filter)?;
        if records.is_empty() {
            tracing::debug!(%instrument, %pattern_type, %date, "no feedback to aggregate");
            return Ok(None);
        }

        let ratings: Vec<f64> = records.iter().map(|r| r.rating.as_f64()).collect();
        let weighted_rating = aggregate_rating(&ratings, weight_by_rating);
        let variance = rating_variance(&ratings, weighted_rating);

        let source_timeframes: Vec<Timeframe> = records
            .iter()
            .filter_map(|r| r.timeframe)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let confidence = confidence_score(
            variance,
            source_timeframes.len(),
            self.config.supported_timeframes.len(),
            records.len(),
        );

        let Some(metrics) = aggregate_metrics(&records, weight_by_rating) else {
            return Ok(None);
        };
        let notes: Vec<&str> = records.iter().filter_map(|r| r.notes.as_deref()).collect();

        let merged = FeedbackRecord {
            id: Uuid::new_v4(),
            instrument: instrument.clone(),
            timeframe: None,
            date,
            pattern_type,
            rating: Rating::from_weighted(weighted_rating),
            metrics,
            notes: (!notes.is_empty()).then(|| notes.join("; ")),
            timestamp: Utc::now(),
            is_merged: true,
            source_timeframes,
            confidence_score: Some(confidence),
            // Query results are newest first
            candles: records[0].candles,
            weighted_rating: Some(weighted_rating),
            feedback_count: Some(records.len()),
        };

        self.store.save(merged.clone())?;
        tracing::info!(
            %instrument,
            %pattern_type,
            %date,
            records = records.len(),
            rating = merged.rating.get(),
            confidence,
            "aggregated feedback"
        );

        Ok(Some(AggregatedFeedback {
            record: merged,
            weighted_rating,
            rating_variance: variance,
            confidence_score: confidence,
        }))
    }

    pub fn query(&self, filter: &FeedbackFilter) -> Result<Vec<FeedbackRecord>> {
        self.store.query(filter)
    }

    /// Merged feedback, optionally narrowed to an instrument and direction.
    pub fn merged_corpus(
        &self,
        instrument: Option<&Instrument>,
        pattern_type: Option<PatternType>,
    ) -> Result<Vec<FeedbackRecord>> {
        let mut filter = FeedbackFilter::merged();
        filter.instrument = instrument.cloned();
        filter.pattern_type = pattern_type;
        self.store.query(&filter)
    }

    /// Learn high/low-rated characteristics from the merged (or
    /// timeframe-specific) corpus.
    pub fn learn(&self, pattern_type: Option<PatternType>, use_merged: bool) -> Result<LearnedModel> {
        let filter = FeedbackFilter {
            pattern_type,
            merged_only: use_merged,
            ..FeedbackFilter::default()
        };
        let records = self.store.query(&filter)?;
        Ok(learner::learn_with_bands(
            &records,
            self.config.high_rating,
            self.config.low_rating,
        ))
    }

    pub fn statistics(&self, filter: &FeedbackFilter) -> Result<FeedbackStatistics> {
        Ok(feedback_statistics(&self.store.query(filter)?))
    }
}

// ============================================================
// TESTS
// ============================================================
