//! Shape metrics for an engulfing pattern
//!
//! All ratios degrade to `0.0` on a zero denominator; positions on a zero
//! range fall back to [`BodyPosition::LowerMiddle`]. Percentages are 0-100.

use serde::{Deserialize, Serialize};

use crate::{candle::MergedCandle, Ohlc, OhlcExt, PatternType};

/// Bucket of a price located within a reference range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPosition {
    /// `[75, 100]`
    #[serde(rename = "top_25")]
    Top25,
    /// `[50, 75)`
    UpperMiddle,
    /// `[25, 50)`
    LowerMiddle,
    /// `[0, 25)`
    #[serde(rename = "bottom_25")]
    Bottom25,
    /// Below 0 or above 100
    Outside,
}

impl BodyPosition {
    pub const ALL: [BodyPosition; 5] = [
        BodyPosition::Top25,
        BodyPosition::UpperMiddle,
        BodyPosition::LowerMiddle,
        BodyPosition::Bottom25,
        BodyPosition::Outside,
    ];

    /// Bucket `price` within `[bottom, top]`.
    pub fn locate(price: f64, bottom: f64, top: f64) -> Self {
        let span = top - bottom;
        if span == 0.0 {
            return BodyPosition::LowerMiddle;
        }
        let pct = (price - bottom) / span * 100.0;
        match pct {
            p if !(0.0..=100.0).contains(&p) => BodyPosition::Outside,
            p if p >= 75.0 => BodyPosition::Top25,
            p if p >= 50.0 => BodyPosition::UpperMiddle,
            p if p >= 25.0 => BodyPosition::LowerMiddle,
            _ => BodyPosition::Bottom25,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BodyPosition::Top25 => "top_25",
            BodyPosition::UpperMiddle => "upper_middle",
            BodyPosition::LowerMiddle => "lower_middle",
            BodyPosition::Bottom25 => "bottom_25",
            BodyPosition::Outside => "outside",
        }
    }
}

impl std::fmt::Display for BodyPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wick lengths relative to the body
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WickRatios {
    pub upper_wick_ratio: f64,
    pub lower_wick_ratio: f64,
}

impl WickRatios {
    pub fn of<T: Ohlc>(candle: &T) -> Self {
        let body = candle.body_size();
        if body == 0.0 {
            return Self::default();
        }
        Self {
            upper_wick_ratio: candle.upper_wick() / body,
            lower_wick_ratio: candle.lower_wick() / body,
        }
    }
}

/// Shape descriptors of an (MC1, MC2) engulfing pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// MC1 body / MC2 body
    pub body_size_ratio: f64,
    /// MC1 open within MC2's body
    pub body_position: BodyPosition,
    /// Body intersection over body union, percent
    pub body_overlap_pct: f64,
    /// MC1 close within MC2's high/low range
    pub whole_body_position: BodyPosition,
    /// Range intersection over MC1's range, percent
    pub whole_body_overlap_pct: f64,
    pub mc1_wick_ratios: WickRatios,
    pub mc2_wick_ratios: WickRatios,
    pub mc1_body_size: f64,
    pub mc2_body_size: f64,
}

/// Numeric fields of a [`MetricSet`] that statistics are computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericMetric {
    BodySizeRatio,
    BodyOverlapPct,
    WholeBodyOverlapPct,
    Mc1BodySize,
    Mc2BodySize,
}

impl NumericMetric {
    pub const ALL: [NumericMetric; 5] = [
        NumericMetric::BodySizeRatio,
        NumericMetric::BodyOverlapPct,
        NumericMetric::WholeBodyOverlapPct,
        NumericMetric::Mc1BodySize,
        NumericMetric::Mc2BodySize,
    ];
}

/// Categorical fields of a [`MetricSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalMetric {
    BodyPosition,
    WholeBodyPosition,
}

impl CategoricalMetric {
    pub const ALL: [CategoricalMetric; 2] =
        [CategoricalMetric::BodyPosition, CategoricalMetric::WholeBodyPosition];
}

impl MetricSet {
    #[inline]
    pub fn numeric(&self, metric: NumericMetric) -> f64 {
        match metric {
            NumericMetric::BodySizeRatio => self.body_size_ratio,
            NumericMetric::BodyOverlapPct => self.body_overlap_pct,
            NumericMetric::WholeBodyOverlapPct => self.whole_body_overlap_pct,
            NumericMetric::Mc1BodySize => self.mc1_body_size,
            NumericMetric::Mc2BodySize => self.mc2_body_size,
        }
    }

    #[inline]
    pub fn categorical(&self, metric: CategoricalMetric) -> BodyPosition {
        match metric {
            CategoricalMetric::BodyPosition => self.body_position,
            CategoricalMetric::WholeBodyPosition => self.whole_body_position,
        }
    }
}

/// Ratio of MC1's body to MC2's body, `0.0` when MC2 has no body
#[inline]
pub fn body_size_ratio(mc1_body: f64, mc2_body: f64) -> f64 {
    if mc2_body == 0.0 {
        return 0.0;
    }
    mc1_body / mc2_body
}

/// Intersection of the two bodies over their combined span, percent
pub fn body_overlap_pct(mc1: &MergedCandle, mc2: &MergedCandle) -> f64 {
    let overlap_top = mc1.body_top().min(mc2.body_top());
    let overlap_bottom = mc1.body_bottom().max(mc2.body_bottom());
    if overlap_top <= overlap_bottom {
        return 0.0;
    }

    let union = mc1.body_top().max(mc2.body_top()) - mc1.body_bottom().min(mc2.body_bottom());
    if union == 0.0 {
        return 0.0;
    }
    (overlap_top - overlap_bottom) / union * 100.0
}

/// Intersection of the two high/low ranges over MC1's range, percent
pub fn whole_body_overlap_pct(mc1: &MergedCandle, mc2: &MergedCandle) -> f64 {
    let overlap_top = mc1.high.min(mc2.high);
    let overlap_bottom = mc1.low.max(mc2.low);
    if overlap_top <= overlap_bottom {
        return 0.0;
    }

    let mc1_range = mc1.range();
    if mc1_range == 0.0 {
        return 0.0;
    }
    (overlap_top - overlap_bottom) / mc1_range * 100.0
}

/// Compute the full metric set for an engulfing pair.
///
/// `pattern_type` does not change any formula; positions are measured from
/// the bottom of MC2 for both directions.
pub fn compute_metrics(mc1: &MergedCandle, mc2: &MergedCandle, _pattern_type: PatternType) -> MetricSet {
    let mc1_body_size = mc1.body_size();
    let mc2_body_size = mc2.body_size();

    MetricSet {
        body_size_ratio: body_size_ratio(mc1_body_size, mc2_body_size),
        body_position: BodyPosition::locate(mc1.open, mc2.body_bottom(), mc2.body_top()),
        body_overlap_pct: body_overlap_pct(mc1, mc2),
        whole_body_position: BodyPosition::locate(mc1.close, mc2.low, mc2.high),
        whole_body_overlap_pct: whole_body_overlap_pct(mc1, mc2),
        mc1_wick_ratios: WickRatios::of(mc1),
        mc2_wick_ratios: WickRatios::of(mc2),
        mc1_body_size,
        mc2_body_size,
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn mc(open: f64, high: f64, low: f64, close: f64) -> MergedCandle {
        MergedCandle {
            open,
            high,
            low,
            close,
            time: Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap(),
            source_count: 1,
        }
    }

    fn close_to(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_body_ratio_zero_guard() {
        assert_eq!(body_size_ratio(0.5, 0.0), 0.0);
        assert!(close_to(body_size_ratio(1.0, 4.0), 0.25));

        let mc1 = mc(1.0, 1.2, 0.9, 1.1);
        let doji = mc(1.0, 1.2, 0.9, 1.0);
        let metrics = compute_metrics(&mc1, &doji, PatternType::Bullish);
        assert_eq!(metrics.body_size_ratio, 0.0);
        assert_eq!(metrics.body_position, BodyPosition::LowerMiddle);
        assert_eq!(metrics.mc2_wick_ratios, WickRatios::default());
    }

    #[test]
    fn test_position_buckets() {
        assert_eq!(BodyPosition::locate(100.0, 0.0, 100.0), BodyPosition::Top25);
        assert_eq!(BodyPosition::locate(75.0, 0.0, 100.0), BodyPosition::Top25);
        assert_eq!(BodyPosition::locate(74.9, 0.0, 100.0), BodyPosition::UpperMiddle);
        assert_eq!(BodyPosition::locate(50.0, 0.0, 100.0), BodyPosition::UpperMiddle);
        assert_eq!(BodyPosition::locate(25.0, 0.0, 100.0), BodyPosition::LowerMiddle);
        assert_eq!(BodyPosition::locate(0.0, 0.0, 100.0), BodyPosition::Bottom25);
        assert_eq!(BodyPosition::locate(-1.0, 0.0, 100.0), BodyPosition::Outside);
        assert_eq!(BodyPosition::locate(100.5, 0.0, 100.0), BodyPosition::Outside);
        assert_eq!(BodyPosition::locate(5.0, 3.0, 3.0), BodyPosition::LowerMiddle);
    }

    #[test]
    fn test_body_overlap_uses_union() {
        // bodies [1.0, 2.0] and [1.5, 3.0]: overlap 0.5, union 2.0
        let mc1 = mc(1.0, 2.1, 0.9, 2.0);
        let mc2 = mc(3.0, 3.1, 1.4, 1.5);
        assert!(close_to(body_overlap_pct(&mc1, &mc2), 25.0));
    }

    #[test]
    fn test_body_overlap_disjoint_is_zero() {
        let mc1 = mc(1.0, 1.3, 0.9, 1.2);
        let mc2 = mc(1.5, 1.9, 1.4, 1.8);
        assert_eq!(body_overlap_pct(&mc1, &mc2), 0.0);
    }

    #[test]
    fn test_whole_body_overlap_uses_mc1_range() {
        // ranges [1.0, 2.0] and [1.5, 4.0]: overlap 0.5 over mc1 range 1.0
        let mc1 = mc(1.2, 2.0, 1.0, 1.8);
        let mc2 = mc(1.6, 4.0, 1.5, 3.5);
        assert!(close_to(whole_body_overlap_pct(&mc1, &mc2), 50.0));
        // Reversed, the denominator becomes the wider range
        assert!(close_to(whole_body_overlap_pct(&mc2, &mc1), 20.0));
    }

    #[test]
    fn test_whole_body_overlap_zero_range() {
        let flat = mc(1.0, 1.0, 1.0, 1.0);
        let mc2 = mc(0.9, 1.2, 0.8, 1.1);
        assert_eq!(whole_body_overlap_pct(&flat, &mc2), 0.0);
    }

    #[test]
    fn test_wick_ratios() {
        let candle = mc(1.0, 1.5, 0.8, 1.2); // body 0.2, upper 0.3, lower 0.2
        let wicks = WickRatios::of(&candle);
        assert!(close_to(wicks.upper_wick_ratio, 1.5));
        assert!(close_to(wicks.lower_wick_ratio, 1.0));
    }

    #[test]
    fn test_bullish_engulfing_metrics() {
        let mc1 = mc(1.0950, 1.0960, 1.0910, 1.0920);
        let mc2 = mc(1.0880, 1.1060, 1.0870, 1.1050);
        let m = compute_metrics(&mc1, &mc2, PatternType::Bullish);

        assert!(close_to(m.mc1_body_size, 0.0030));
        assert!(close_to(m.mc2_body_size, 0.0170));
        assert!(close_to(m.body_size_ratio, 0.0030 / 0.0170));
        // mc1 open 1.0950 sits (1.0950 - 1.0880) / 0.0170 = 41% up mc2's body
        assert_eq!(m.body_position, BodyPosition::LowerMiddle);
        // mc1 body is inside mc2 body: overlap 0.0030 over union 0.0170
        assert!(close_to(m.body_overlap_pct, 0.0030 / 0.0170 * 100.0));
        // mc1 range sits fully inside mc2 range
        assert!(close_to(m.whole_body_overlap_pct, 100.0));
        // mc1 close 1.0920 sits 26% up mc2's range
        assert_eq!(m.whole_body_position, BodyPosition::LowerMiddle);
    }

    #[test]
    fn test_metric_set_serde_names() {
        let mc1 = mc(1.0950, 1.0960, 1.0910, 1.0920);
        let mc2 = mc(1.0880, 1.1060, 1.0870, 1.1050);
        let m = compute_metrics(&mc1, &mc2, PatternType::Bullish);
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json["body_position"], "lower_middle");
        assert_eq!(json["whole_body_position"], "lower_middle");
        assert!(json["mc1_wick_ratios"]["upper_wick_ratio"].is_number());
    }
}
