//! Integration tests for merging, relation classification and metrics.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use engulf::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
}

fn day(n: i64, o: f64, h: f64, l: f64, c: f64) -> RawCandle {
    RawCandle::new(o, h, l, c, t0() + Duration::days(n))
}

fn close_to(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Two red days, then two green days whose combined body covers them,
/// then a still-forming candle.
fn two_day_bullish_series() -> Vec<RawCandle> {
    vec![
        day(0, 1.0990, 1.1000, 1.0980, 1.0995),
        day(1, 1.1000, 1.1020, 1.0960, 1.0980),
        day(2, 1.0980, 1.0990, 1.0930, 1.0940),
        day(3, 1.0930, 1.0970, 1.0910, 1.0960),
        day(4, 1.0960, 1.1060, 1.0950, 1.1050),
        day(5, 1.1050, 1.1070, 1.1040, 1.1060),
    ]
}

#[test]
fn test_two_day_window_merges_and_classifies() {
    let candles = two_day_bullish_series();
    let pair = latest_window(&candles, Timeframe::D2, 1).unwrap();

    assert_eq!(pair.mc1.source_count, 2);
    assert_eq!(pair.mc1.open, 1.1000);
    assert_eq!(pair.mc1.high, 1.1020);
    assert_eq!(pair.mc1.low, 1.0930);
    assert_eq!(pair.mc1.close, 1.0940);
    assert_eq!(pair.mc1.time, t0() + Duration::days(1));

    assert_eq!(pair.mc2.open, 1.0930);
    assert_eq!(pair.mc2.high, 1.1060);
    assert_eq!(pair.mc2.low, 1.0910);
    assert_eq!(pair.mc2.close, 1.1050);
    assert_eq!(pair.mc2.date(), NaiveDate::from_ymd_opt(2024, 4, 4).unwrap());

    let relation = classify_pair(&pair.mc1, &pair.mc2, DEFAULT_ENGULFING_THRESHOLD_PERCENT);
    assert_eq!(
        relation,
        Relation::Signals(vec![Signal::Upclose, Signal::BullishEngulfing])
    );
    assert_eq!(relation.label(), "upclose + bullish engulfing");
    assert_eq!(relation.engulfing(), Some(PatternType::Bullish));
    assert_eq!(pair.mc2.color(), CandleColor::Green);
}

#[test]
fn test_window_needs_enough_candles() {
    let candles = two_day_bullish_series();
    assert!(latest_window(&candles, Timeframe::D3, 1).is_none());
    assert!(latest_window(&candles, Timeframe::D2, 3).is_none());
    assert!(latest_window(&[], Timeframe::D1, 0).is_none());
}

#[test]
fn test_metrics_for_merged_pair() {
    let candles = two_day_bullish_series();
    let pair = latest_window(&candles, Timeframe::D2, 1).unwrap();
    let metrics = compute_metrics(&pair.mc1, &pair.mc2, PatternType::Bullish);

    // 0.0060 / 0.0120
    assert!(close_to(metrics.body_size_ratio, 0.5));
    // MC1 open sits 70 pips into a 120 pip body
    assert_eq!(metrics.body_position, BodyPosition::UpperMiddle);
    // Bodies [1.0940, 1.1000] and [1.0930, 1.1050]
    assert!(close_to(metrics.body_overlap_pct, 0.0060 / 0.0120 * 100.0));
    // MC2's range covers MC1's range completely
    assert!(close_to(metrics.whole_body_overlap_pct, 100.0));
    // MC1 close is 30 pips above a 150 pip range bottom
    assert_eq!(metrics.whole_body_position, BodyPosition::Bottom25);
    assert!(close_to(metrics.mc1_body_size, 0.0060));
    assert!(close_to(metrics.mc2_body_size, 0.0120));
}

#[test]
fn test_tolerance_decides_near_engulfing() {
    // MC2's body starts one pip above MC1's body
    let mc1 = merge_candles(&[day(0, 1.1000, 1.1010, 1.0940, 1.0950)]).unwrap();
    let mc2 = merge_candles(&[day(1, 1.0951, 1.1015, 1.0945, 1.1010)]).unwrap();

    let strict = classify_pair(&mc1, &mc2, 0.0);
    assert_eq!(strict, Relation::Neutral);
    assert_eq!(strict.label(), "neutral");

    let tolerant = classify_pair(&mc1, &mc2, DEFAULT_ENGULFING_THRESHOLD_PERCENT);
    assert_eq!(tolerant.label(), "bullish engulfing");
}

#[test]
fn test_same_color_never_engulfs() {
    let mc1 = merge_candles(&[day(0, 1.0950, 1.1010, 1.0940, 1.1000)]).unwrap();
    let mc2 = merge_candles(&[day(1, 1.0940, 1.1030, 1.0930, 1.1020)]).unwrap();

    let relation = classify_pair(&mc1, &mc2, DEFAULT_ENGULFING_THRESHOLD_PERCENT);
    assert_eq!(relation.engulfing(), None);
    assert_eq!(relation.label(), "upclose");
}

#[test]
fn test_bearish_engulfing_with_downclose() {
    let mc1 = merge_candles(&[day(0, 1.2500, 1.2540, 1.2490, 1.2530)]).unwrap();
    let mc2 = merge_candles(&[day(1, 1.2545, 1.2550, 1.2470, 1.2480)]).unwrap();

    let relation = classify(Some(&mc1), Some(&mc2), DEFAULT_ENGULFING_THRESHOLD_PERCENT);
    assert_eq!(relation.label(), "downclose + bearish engulfing");
    assert_eq!(relation.engulfing(), Some(PatternType::Bearish));
}

#[test]
fn test_missing_candle_is_error() {
    let mc = merge_candles(&[day(0, 1.0, 1.1, 0.9, 1.05)]);
    let relation = classify(mc.as_ref(), None, DEFAULT_ENGULFING_THRESHOLD_PERCENT);
    assert!(relation.is_error());
    assert_eq!(relation.label(), "error");
    assert_eq!(serde_json::to_string(&relation).unwrap(), "\"error\"");
}

#[test]
fn test_timeframe_parsing() {
    assert_eq!("d".parse::<Timeframe>().unwrap(), Timeframe::D1);
    assert_eq!("3d".parse::<Timeframe>().unwrap(), Timeframe::D3);
    assert!("5D".parse::<Timeframe>().is_err());
    assert_eq!(Timeframe::D4.window_size(), 8);
    assert_eq!(serde_json::to_string(&Timeframe::D2).unwrap(), "\"2D\"");
}

#[test]
fn test_validated_inputs() {
    assert!(Rating::new(0).is_err());
    assert!(Rating::new(11).is_err());
    assert_eq!(Rating::new(7).unwrap().get(), 7);
    assert!(serde_json::from_str::<Rating>("12").is_err());

    let inst: Instrument = "GBP_JPY".parse().unwrap();
    assert_eq!(inst.compact(), "GBPJPY");
    assert!(Instrument::new("GBPJPY").is_err());

    let bad = day(0, 1.0, 0.9, 1.1, 1.0);
    assert!(bad.validate().is_err());
}
