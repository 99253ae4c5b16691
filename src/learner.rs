//! Learning from rated feedback and similarity scoring
//!
//! The corpus is split into high-rated (8-10) and low-rated (1-3) records.
//! Each partition gets a statistical profile; when both exist the model also
//! records how they differ. Candidates are scored by their metric similarity
//! to historical records, weighted by rating and boosted when they look like
//! the high-rated profile.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    feedback::{weighted_mode, FeedbackRecord},
    metrics::{BodyPosition, CategoricalMetric, MetricSet, NumericMetric},
    settings::RatingBand,
    Rating,
};

/// Default upper bound of the characteristics boost (+20%)
pub const DEFAULT_BOOST_CAP: f64 = 0.2;

/// Default weighted similarity a pattern must exceed to match feedback
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

/// Divisor floor for wick ratio comparisons
const WICK_FLOOR: f64 = 0.001;

/// Numeric metrics compared by [`similarity`]
const SIMILARITY_METRICS: [NumericMetric; 4] = [
    NumericMetric::BodySizeRatio,
    NumericMetric::BodyOverlapPct,
    NumericMetric::Mc1BodySize,
    NumericMetric::Mc2BodySize,
];

// ============================================================
// MODEL
// ============================================================

/// Summary statistics of one numeric metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    /// Sample standard deviation, `0.0` for a single value
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl MetricStats {
    /// `None` for an empty slice.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let stdev = if n > 1 {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        Some(Self {
            mean,
            stdev,
            min,
            max,
            count: n,
        })
    }
}

/// Frequency of each position bucket, with its most common value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionDistribution {
    pub distribution: BTreeMap<BodyPosition, usize>,
    pub mode: Option<BodyPosition>,
}

impl PositionDistribution {
    pub fn from_values(values: &[BodyPosition]) -> Self {
        let mut distribution = BTreeMap::new();
        for &value in values {
            *distribution.entry(value).or_insert(0) += 1;
        }
        let weights = vec![1.0; values.len()];
        Self {
            distribution,
            mode: weighted_mode(values, &weights),
        }
    }

    /// Positions accounting for at least `share` of the values
    pub fn at_least(&self, share: f64) -> Vec<BodyPosition> {
        let total: usize = self.distribution.values().sum();
        if total == 0 {
            return Vec::new();
        }
        self.distribution
            .iter()
            .filter(|(_, &count)| count as f64 / total as f64 >= share)
            .map(|(&pos, _)| pos)
            .collect()
    }
}

/// Statistical profile of one rating partition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatedProfile {
    pub numeric: BTreeMap<NumericMetric, MetricStats>,
    pub positions: BTreeMap<CategoricalMetric, PositionDistribution>,
}

impl RatedProfile {
    pub fn from_records(records: &[&FeedbackRecord]) -> Self {
        let numeric = NumericMetric::ALL
            .iter()
            .filter_map(|&metric| {
                let values: Vec<f64> = records
                    .iter()
                    .map(|r| r.metrics.numeric(metric))
                    .filter(|v| v.is_finite())
                    .collect();
                MetricStats::from_values(&values).map(|stats| (metric, stats))
            })
            .collect();
        let positions = CategoricalMetric::ALL
            .iter()
            .map(|&metric| {
                let values: Vec<BodyPosition> =
                    records.iter().map(|r| r.metrics.categorical(metric)).collect();
                (metric, PositionDistribution::from_values(&values))
            })
            .collect();
        Self { numeric, positions }
    }

    #[inline]
    pub fn stats(&self, metric: NumericMetric) -> Option<&MetricStats> {
        self.numeric.get(&metric)
    }

    #[inline]
    pub fn mode(&self, metric: CategoricalMetric) -> Option<BodyPosition> {
        self.positions.get(&metric).and_then(|d| d.mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    Significant,
    Moderate,
}

/// High- versus low-rated comparison of one numeric metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub high_rated_mean: f64,
    pub low_rated_mean: f64,
    pub difference: f64,
    pub significance: Significance,
}

/// High- versus low-rated comparison of one position metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionComparison {
    pub high_rated_mode: Option<BodyPosition>,
    pub low_rated_mode: Option<BodyPosition>,
    pub differs: bool,
}

/// What separates high-rated from low-rated patterns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Characteristics {
    pub metrics: BTreeMap<NumericMetric, MetricComparison>,
    pub positions: BTreeMap<CategoricalMetric, PositionComparison>,
}

impl Characteristics {
    fn compare(high: &RatedProfile, low: &RatedProfile) -> Self {
        let metrics = NumericMetric::ALL
            .iter()
            .filter_map(|&metric| {
                let h = high.stats(metric)?;
                let low_mean = low.stats(metric).map_or(0.0, |s| s.mean);
                let difference = h.mean - low_mean;
                // A zero spread would flag every difference
                let spread = if h.stdev == 0.0 { 1.0 } else { h.stdev };
                let significance = if difference.abs() > spread {
                    Significance::Significant
                } else {
                    Significance::Moderate
                };
                Some((
                    metric,
                    MetricComparison {
                        high_rated_mean: h.mean,
                        low_rated_mean: low_mean,
                        difference,
                        significance,
                    },
                ))
            })
            .collect();

        let positions = CategoricalMetric::ALL
            .iter()
            .map(|&metric| {
                let high_rated_mode = high.mode(metric);
                let low_rated_mode = low.mode(metric);
                (
                    metric,
                    PositionComparison {
                        high_rated_mode,
                        low_rated_mode,
                        differs: high_rated_mode != low_rated_mode,
                    },
                )
            })
            .collect();

        Self { metrics, positions }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSize {
    pub total: usize,
    pub high_rated: usize,
    pub low_rated: usize,
}

/// Profiles learned from a feedback corpus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnedModel {
    pub high_rated: Option<RatedProfile>,
    pub low_rated: Option<RatedProfile>,
    /// Present only when both partitions are non-empty
    pub characteristics: Option<Characteristics>,
    pub sample_size: SampleSize,
}

impl LearnedModel {
    pub fn is_empty(&self) -> bool {
        self.high_rated.is_none() && self.low_rated.is_none()
    }

    /// How strongly `metrics` resemble the high-rated profile, in `[0, 1]`.
    pub fn characteristics_boost(&self, metrics: &MetricSet) -> f64 {
        let mut boost = 0.0;

        let preferred = self
            .characteristics
            .as_ref()
            .and_then(|c| c.positions.get(&CategoricalMetric::BodyPosition))
            .and_then(|p| p.high_rated_mode);
        if preferred == Some(metrics.body_position) {
            boost += 0.5;
        }

        if let Some(high) = &self.high_rated {
            if let Some(ratio) = high.stats(NumericMetric::BodySizeRatio) {
                if (metrics.body_size_ratio - ratio.mean).abs() <= ratio.stdev {
                    boost += 0.3;
                }
            }
            if let Some(overlap) = high.stats(NumericMetric::BodyOverlapPct) {
                if metrics.body_overlap_pct >= overlap.mean * 0.8 {
                    boost += 0.2;
                }
            }
        }

        f64::min(1.0, boost)
    }
}

/// Learn with the default 8-10 / 1-3 rating bands.
pub fn learn(records: &[FeedbackRecord]) -> LearnedModel {
    learn_with_bands(records, RatingBand::HIGH, RatingBand::LOW)
}

/// Partition `records` by rating band and profile each partition.
///
/// An empty corpus yields an empty model with zero sample sizes.
pub fn learn_with_bands(records: &[FeedbackRecord], high: RatingBand, low: RatingBand) -> LearnedModel {
    let high_rated: Vec<&FeedbackRecord> = records.iter().filter(|r| high.contains(r.rating)).collect();
    let low_rated: Vec<&FeedbackRecord> = records.iter().filter(|r| low.contains(r.rating)).collect();

    let sample_size = SampleSize {
        total: records.len(),
        high_rated: high_rated.len(),
        low_rated: low_rated.len(),
    };

    let high_profile = (!high_rated.is_empty()).then(|| RatedProfile::from_records(&high_rated));
    let low_profile = (!low_rated.is_empty()).then(|| RatedProfile::from_records(&low_rated));
    let characteristics = match (&high_profile, &low_profile) {
        (Some(h), Some(l)) => Some(Characteristics::compare(h, l)),
        _ => None,
    };

    tracing::debug!(
        total = sample_size.total,
        high = sample_size.high_rated,
        low = sample_size.low_rated,
        "learned feedback model"
    );

    LearnedModel {
        high_rated: high_profile,
        low_rated: low_profile,
        characteristics,
        sample_size,
    }
}

// ============================================================
// SIMILARITY
// ============================================================

#[inline]
fn numeric_similarity(a: f64, b: f64) -> Option<f64> {
    if !a.is_finite() || !b.is_finite() {
        return None;
    }
    if a == 0.0 && b == 0.0 {
        return Some(1.0);
    }
    if a == 0.0 || b == 0.0 {
        return Some(0.0);
    }
    let diff = (a - b).abs() / a.abs().max(b.abs());
    Some(1.0 - diff.min(1.0))
}

#[inline]
fn wick_similarity(a: f64, b: f64) -> Option<f64> {
    if !a.is_finite() || !b.is_finite() {
        return None;
    }
    let diff = (a - b).abs() / a.abs().max(b.abs()).max(WICK_FLOOR);
    Some(1.0 - diff.min(1.0))
}

/// Mean per-metric similarity of two metric sets, in `[0, 1]`.
pub fn similarity(candidate: &MetricSet, historical: &MetricSet) -> f64 {
    let mut scores: Vec<f64> = SIMILARITY_METRICS
        .iter()
        .filter_map(|&m| numeric_similarity(candidate.numeric(m), historical.numeric(m)))
        .collect();

    scores.push(if candidate.body_position == historical.body_position {
        1.0
    } else {
        0.0
    });

    let wicks = [
        (candidate.mc1_wick_ratios, historical.mc1_wick_ratios),
        (candidate.mc2_wick_ratios, historical.mc2_wick_ratios),
    ];
    for (a, b) in wicks {
        scores.extend(wick_similarity(a.upper_wick_ratio, b.upper_wick_ratio));
        scores.extend(wick_similarity(a.lower_wick_ratio, b.lower_wick_ratio));
    }

    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Rating-weighted similarity of `candidate` to a corpus, optionally boosted
/// by a learned model. `0.0` for an empty corpus.
pub fn adaptive_similarity(
    candidate: &MetricSet,
    corpus: &[FeedbackRecord],
    model: Option<&LearnedModel>,
) -> f64 {
    adaptive_similarity_with_cap(candidate, corpus, model, DEFAULT_BOOST_CAP)
}

/// [`adaptive_similarity`] with an explicit maximum relative boost.
pub fn adaptive_similarity_with_cap(
    candidate: &MetricSet,
    corpus: &[FeedbackRecord],
    model: Option<&LearnedModel>,
    boost_cap: f64,
) -> f64 {
    if corpus.is_empty() {
        return 0.0;
    }
    let multiplier = model.map_or(1.0, |m| 1.0 + boost_cap * m.characteristics_boost(candidate));

    let total: f64 = corpus
        .iter()
        .map(|record| similarity(candidate, &record.metrics) * (record.rating.as_f64() / 10.0) * multiplier)
        .sum();
    f64::min(1.0, total / corpus.len() as f64)
}

// ============================================================
// THRESHOLDS & VALIDATION
// ============================================================

/// Detection bounds derived from the high-rated profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionThresholds {
    pub body_size_ratio_min: Option<f64>,
    pub body_size_ratio_max: Option<f64>,
    pub body_overlap_min: Option<f64>,
    /// Positions seen in at least 20% of high-rated patterns
    pub preferred_positions: Vec<BodyPosition>,
}

impl DetectionThresholds {
    pub fn from_model(model: &LearnedModel) -> Self {
        let Some(high) = &model.high_rated else {
            return Self::default();
        };

        let ratio = high.stats(NumericMetric::BodySizeRatio);
        let overlap = high.stats(NumericMetric::BodyOverlapPct);
        Self {
            body_size_ratio_min: ratio.map(|s| (s.mean - s.stdev).max(0.0)),
            body_size_ratio_max: ratio.map(|s| s.mean + s.stdev),
            body_overlap_min: overlap.map(|s| (s.mean - s.stdev).max(0.0)),
            preferred_positions: high
                .positions
                .get(&CategoricalMetric::BodyPosition)
                .map(|d| d.at_least(0.2))
                .unwrap_or_default(),
        }
    }

    /// True when `metrics` satisfy every bound that is set.
    pub fn accepts(&self, metrics: &MetricSet) -> bool {
        let ratio = metrics.body_size_ratio;
        self.body_size_ratio_min.map_or(true, |min| ratio >= min)
            && self.body_size_ratio_max.map_or(true, |max| ratio <= max)
            && self
                .body_overlap_min
                .map_or(true, |min| metrics.body_overlap_pct >= min)
            && (self.preferred_positions.is_empty()
                || self.preferred_positions.contains(&metrics.body_position))
    }
}

/// Closest feedback record to a pattern
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMatch {
    pub id: Uuid,
    pub rating: Rating,
    pub similarity: f64,
    pub weighted_similarity: f64,
}

/// Outcome of checking one pattern against a feedback corpus
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackValidation {
    pub matches: bool,
    /// Best rating-weighted similarity
    pub similarity_score: f64,
    pub best_match: Option<FeedbackMatch>,
}

/// Best rating-weighted similarity against `corpus`, matching above 0.6.
pub fn validate_against_feedback(metrics: &MetricSet, corpus: &[FeedbackRecord]) -> FeedbackValidation {
    validate_against_feedback_with(metrics, corpus, DEFAULT_MATCH_THRESHOLD)
}

pub fn validate_against_feedback_with(
    metrics: &MetricSet,
    corpus: &[FeedbackRecord],
    match_threshold: f64,
) -> FeedbackValidation {
    let mut best: Option<FeedbackMatch> = None;
    for record in corpus {
        let sim = similarity(metrics, &record.metrics);
        let weighted = sim * record.rating.as_f64() / 10.0;
        if weighted > best.map_or(0.0, |b| b.weighted_similarity) {
            best = Some(FeedbackMatch {
                id: record.id,
                rating: record.rating,
                similarity: sim,
                weighted_similarity: weighted,
            });
        }
    }

    let similarity_score = best.map_or(0.0, |b| b.weighted_similarity);
    FeedbackValidation {
        matches: similarity_score > match_threshold,
        similarity_score,
        best_match: best,
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::tests::sample_record;
    use crate::metrics::WickRatios;

    fn close_to(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn record_with(rating: u8, ratio: f64, position: BodyPosition) -> FeedbackRecord {
        let mut record = sample_record("EUR_USD", rating);
        record.metrics.body_size_ratio = ratio;
        record.metrics.body_position = position;
        record
    }

    #[test]
    fn test_metric_stats() {
        assert!(MetricStats::from_values(&[]).is_none());
        let single = MetricStats::from_values(&[2.0]).unwrap();
        assert_eq!(single.stdev, 0.0);
        let stats = MetricStats::from_values(&[1.0, 2.0, 3.0]).unwrap();
        assert!(close_to(stats.mean, 2.0));
        assert!(close_to(stats.stdev, 1.0));
        assert_eq!((stats.min, stats.max, stats.count), (1.0, 3.0, 3));
    }

    #[test]
    fn test_empty_corpus() {
        let model = learn(&[]);
        assert!(model.is_empty());
        assert_eq!(model.sample_size, SampleSize::default());
        assert!(model.characteristics.is_none());

        let candidate = sample_record("EUR_USD", 5).metrics;
        assert_eq!(adaptive_similarity(&candidate, &[], None), 0.0);
        assert_eq!(adaptive_similarity(&candidate, &[], Some(&model)), 0.0);
        assert_eq!(DetectionThresholds::from_model(&model), DetectionThresholds::default());
    }

    #[test]
    fn test_learn_partitions_and_characteristics() {
        let records = vec![
            record_with(9, 0.2, BodyPosition::Top25),
            record_with(8, 0.3, BodyPosition::Top25),
            record_with(5, 0.5, BodyPosition::Outside),
            record_with(2, 0.9, BodyPosition::Bottom25),
        ];
        let model = learn(&records);
        assert_eq!(
            model.sample_size,
            SampleSize {
                total: 4,
                high_rated: 2,
                low_rated: 1
            }
        );

        let high = model.high_rated.as_ref().unwrap();
        let ratio = high.stats(NumericMetric::BodySizeRatio).unwrap();
        assert!(close_to(ratio.mean, 0.25));
        assert_eq!(high.mode(CategoricalMetric::BodyPosition), Some(BodyPosition::Top25));

        let chars = model.characteristics.as_ref().unwrap();
        let cmp = chars.metrics[&NumericMetric::BodySizeRatio];
        assert!(close_to(cmp.difference, -0.65));
        assert_eq!(cmp.significance, Significance::Significant);
        let pos = chars.positions[&CategoricalMetric::BodyPosition];
        assert_eq!(pos.high_rated_mode, Some(BodyPosition::Top25));
        assert_eq!(pos.low_rated_mode, Some(BodyPosition::Bottom25));
        assert!(pos.differs);
    }

    #[test]
    fn test_zero_stdev_falls_back_to_unit_spread() {
        let records = vec![
            record_with(10, 0.2, BodyPosition::Top25),
            record_with(1, 0.9, BodyPosition::Top25),
        ];
        let model = learn(&records);
        let cmp = model.characteristics.unwrap().metrics[&NumericMetric::BodySizeRatio];
        assert_eq!(cmp.significance, Significance::Moderate);
    }

    #[test]
    fn test_characteristics_need_both_partitions() {
        let model = learn(&[record_with(9, 0.2, BodyPosition::Top25)]);
        assert!(model.high_rated.is_some());
        assert!(model.low_rated.is_none());
        assert!(model.characteristics.is_none());
    }

    #[test]
    fn test_similarity_identical_is_one() {
        let m = sample_record("EUR_USD", 5).metrics;
        assert!(close_to(similarity(&m, &m), 1.0));
    }

    #[test]
    fn test_similarity_zero_handling() {
        let mut a = sample_record("EUR_USD", 5).metrics;
        let mut b = a;
        a.body_size_ratio = 0.0;
        b.body_size_ratio = 0.0;
        assert!(close_to(similarity(&a, &b), 1.0));

        // One zero: that metric scores 0 out of 9 comparisons
        b.body_size_ratio = 0.5;
        assert!(close_to(similarity(&a, &b), 8.0 / 9.0));
    }

    #[test]
    fn test_wick_floor() {
        let mut a = sample_record("EUR_USD", 5).metrics;
        let mut b = a;
        a.mc1_wick_ratios = WickRatios {
            upper_wick_ratio: 0.0,
            lower_wick_ratio: 0.0,
        };
        b.mc1_wick_ratios = WickRatios {
            upper_wick_ratio: 0.0005,
            lower_wick_ratio: 0.0,
        };
        // |0 - 0.0005| / 0.001 = 0.5 on one of nine comparisons
        assert!(close_to(similarity(&a, &b), 8.5 / 9.0));
    }

    #[test]
    fn test_adaptive_similarity_weights_by_rating() {
        let candidate = sample_record("EUR_USD", 5).metrics;
        let corpus = vec![sample_record("EUR_USD", 5)];
        assert!(close_to(adaptive_similarity(&candidate, &corpus, None), 0.5));

        let corpus = vec![sample_record("EUR_USD", 10), sample_record("EUR_USD", 4)];
        assert!(close_to(adaptive_similarity(&candidate, &corpus, None), 0.7));
    }

    #[test]
    fn test_adaptive_similarity_boost_and_cap() {
        let candidate = record_with(5, 0.25, BodyPosition::Top25).metrics;
        let model = learn(&[
            record_with(9, 0.2, BodyPosition::Top25),
            record_with(8, 0.3, BodyPosition::Top25),
            record_with(2, 0.9, BodyPosition::Bottom25),
        ]);
        // Position, ratio and overlap all match the high-rated profile
        assert!(close_to(model.characteristics_boost(&candidate), 1.0));

        let corpus = vec![record_with(5, 0.25, BodyPosition::Top25)];
        assert!(close_to(adaptive_similarity(&candidate, &corpus, Some(&model)), 0.6));

        let corpus = vec![record_with(10, 0.25, BodyPosition::Top25)];
        assert!(close_to(adaptive_similarity(&candidate, &corpus, Some(&model)), 1.0));
    }

    #[test]
    fn test_detection_thresholds() {
        let model = learn(&[
            record_with(9, 0.2, BodyPosition::Top25),
            record_with(9, 0.4, BodyPosition::Top25),
            record_with(8, 0.3, BodyPosition::Top25),
            record_with(8, 0.3, BodyPosition::Top25),
            record_with(10, 0.3, BodyPosition::UpperMiddle),
            record_with(10, 0.3, BodyPosition::Bottom25),
        ]);
        let thresholds = DetectionThresholds::from_model(&model);
        let min = thresholds.body_size_ratio_min.unwrap();
        let max = thresholds.body_size_ratio_max.unwrap();
        assert!(min < 0.3 && max > 0.3);
        // 1/6 of high-rated records is below the 20% cut
        assert_eq!(thresholds.preferred_positions, vec![BodyPosition::Top25]);

        let mut ok = record_with(5, 0.3, BodyPosition::Top25).metrics;
        ok.body_overlap_pct += 1.0;
        let bad = record_with(5, 0.3, BodyPosition::Bottom25).metrics;
        assert!(thresholds.accepts(&ok));
        assert!(!thresholds.accepts(&bad));
    }

    #[test]
    fn test_validate_against_feedback() {
        let metrics = sample_record("EUR_USD", 5).metrics;
        assert_eq!(validate_against_feedback(&metrics, &[]), FeedbackValidation::default());

        let strong = sample_record("EUR_USD", 7);
        let weak = sample_record("EUR_USD", 6);
        let result = validate_against_feedback(&metrics, &[weak.clone(), strong.clone()]);
        assert!(result.matches);
        assert_eq!(result.best_match.unwrap().id, strong.id);
        assert!(close_to(result.similarity_score, 0.7));

        // Exactly 0.6 does not exceed the threshold
        assert!(!validate_against_feedback(&metrics, &[weak]).matches);
    }
}
