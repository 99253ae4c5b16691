//! Cross-timeframe aggregation and corpus statistics
//!
//! Rating-weighted means use `Σ(x·r) / Σr`; the aggregated rating itself is
//! `Σr² / Σr`, which leans toward the higher ratings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::FeedbackRecord;
use crate::{
    learner::MetricStats,
    metrics::{BodyPosition, CategoricalMetric, MetricSet, NumericMetric, WickRatios},
};

/// Rating-biased aggregate (`Σr²/Σr`) or plain mean; `0.0` when empty.
pub fn aggregate_rating(ratings: &[f64], weight_by_rating: bool) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    if weight_by_rating {
        let sum: f64 = ratings.iter().sum();
        if sum == 0.0 {
            return 0.0;
        }
        ratings.iter().map(|r| r * r).sum::<f64>() / sum
    } else {
        ratings.iter().sum::<f64>() / ratings.len() as f64
    }
}

/// `Σ(v·w) / Σw`, falling back to the plain mean when the weights sum to zero.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return values.iter().sum::<f64>() / values.len() as f64;
    }
    values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total
}

/// Bucket with the largest summed weight; ties go to the first in bucket order.
pub fn weighted_mode(values: &[BodyPosition], weights: &[f64]) -> Option<BodyPosition> {
    let mut totals: BTreeMap<BodyPosition, f64> = BTreeMap::new();
    for (&value, &weight) in values.iter().zip(weights) {
        *totals.entry(value).or_default() += weight;
    }
    totals
        .into_iter()
        .fold(None, |best: Option<(BodyPosition, f64)>, (pos, w)| match best {
            Some((_, best_w)) if best_w >= w => best,
            _ => Some((pos, w)),
        })
        .map(|(pos, _)| pos)
}

/// Population variance of `ratings` around `center`.
pub fn rating_variance(ratings: &[f64], center: f64) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    ratings.iter().map(|r| (r - center).powi(2)).sum::<f64>() / ratings.len() as f64
}

/// Weighted blend of rating consistency, timeframe coverage and feedback volume.
pub fn confidence_score(
    variance: f64,
    distinct_timeframes: usize,
    supported_timeframes: usize,
    feedback_count: usize,
) -> f64 {
    let consistency = 1.0 / (1.0 + variance);
    let coverage = if supported_timeframes == 0 {
        0.0
    } else {
        (distinct_timeframes as f64 / supported_timeframes as f64).min(1.0)
    };
    let volume = (feedback_count as f64 / 4.0).min(1.0);
    0.4 * consistency + 0.3 * coverage + 0.3 * volume
}

/// Combine the metric sets of several records into one.
///
/// Returns `None` for an empty slice.
pub fn aggregate_metrics(records: &[FeedbackRecord], weight_by_rating: bool) -> Option<MetricSet> {
    if records.is_empty() {
        return None;
    }
    let weights: Vec<f64> = if weight_by_rating {
        records.iter().map(|r| r.rating.as_f64()).collect()
    } else {
        vec![1.0; records.len()]
    };
    let mean_of = |f: fn(&MetricSet) -> f64| mean_by(records, &weights, f);
    let mode_of = |metric: CategoricalMetric| {
        let values: Vec<BodyPosition> = records.iter().map(|r| r.metrics.categorical(metric)).collect();
        weighted_mode(&values, &weights).unwrap_or(BodyPosition::LowerMiddle)
    };

    Some(MetricSet {
        body_size_ratio: mean_of(|m| m.body_size_ratio),
        body_position: mode_of(CategoricalMetric::BodyPosition),
        body_overlap_pct: mean_of(|m| m.body_overlap_pct),
        whole_body_position: mode_of(CategoricalMetric::WholeBodyPosition),
        whole_body_overlap_pct: mean_of(|m| m.whole_body_overlap_pct),
        mc1_wick_ratios: WickRatios {
            upper_wick_ratio: mean_of(|m| m.mc1_wick_ratios.upper_wick_ratio),
            lower_wick_ratio: mean_of(|m| m.mc1_wick_ratios.lower_wick_ratio),
        },
        mc2_wick_ratios: WickRatios {
            upper_wick_ratio: mean_of(|m| m.mc2_wick_ratios.upper_wick_ratio),
            lower_wick_ratio: mean_of(|m| m.mc2_wick_ratios.lower_wick_ratio),
        },
        mc1_body_size: mean_of(|m| m.mc1_body_size),
        mc2_body_size: mean_of(|m| m.mc2_body_size),
    })
}

fn mean_by(records: &[FeedbackRecord], weights: &[f64], f: fn(&MetricSet) -> f64) -> f64 {
    let values: Vec<f64> = records.iter().map(|r| f(&r.metrics)).collect();
    weighted_mean(&values, weights)
}

/// Summary of a feedback corpus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackStatistics {
    pub total_count: usize,
    /// Mean rating, rounded to two decimals
    pub average_rating: f64,
    pub position_distribution: BTreeMap<BodyPosition, usize>,
    pub metric_statistics: BTreeMap<NumericMetric, MetricStats>,
}

/// Count, average rating, position distribution and per-metric stats.
///
/// An empty corpus yields zeroed statistics.
pub fn feedback_statistics(records: &[FeedbackRecord]) -> FeedbackStatistics {
    if records.is_empty() {
        return FeedbackStatistics::default();
    }

    let total_count = records.len();
    let average_rating = records.iter().map(|r| r.rating.as_f64()).sum::<f64>() / total_count as f64;

    let mut position_distribution = BTreeMap::new();
    for record in records {
        *position_distribution.entry(record.metrics.body_position).or_insert(0) += 1;
    }

    let metric_statistics = NumericMetric::ALL
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

    FeedbackStatistics {
        total_count,
        average_rating: (average_rating * 100.0).round() / 100.0,
        position_distribution,
        metric_statistics,
    }
}
