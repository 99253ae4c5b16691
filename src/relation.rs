//! Relation between two successive merged candles
//!
//! Signals, checked in order:
//! - **downclose**: MC2 closes below MC1's low
//! - **upclose**: MC2 closes above MC1's high
//! - **bullish / bearish engulfing**: MC2's body covers MC1's body (within a
//!   tolerance) and the two candles have opposite colors
//!
//! The tolerance is scaled to MC1 (the engulfed candle) only.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{candle::MergedCandle, OhlcExt, PatternType};

/// Default engulfing tolerance, in percent of MC1's body size or body top
pub const DEFAULT_ENGULFING_THRESHOLD_PERCENT: f64 = 0.10;

/// A single relation signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Downclose,
    Upclose,
    BullishEngulfing,
    BearishEngulfing,
}

impl Signal {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Downclose => "downclose",
            Signal::Upclose => "upclose",
            Signal::BullishEngulfing => "bullish engulfing",
            Signal::BearishEngulfing => "bearish engulfing",
        }
    }
}

/// Classification result for an (MC1, MC2) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// One of the candles was missing
    Error,
    /// No signal matched
    Neutral,
    /// Matched signals, in check order
    Signals(Vec<Signal>),
}

impl Relation {
    /// Signals joined with `" + "`, or `"neutral"` / `"error"`
    pub fn label(&self) -> String {
        match self {
            Relation::Error => "error".to_string(),
            Relation::Neutral => "neutral".to_string(),
            Relation::Signals(signals) => signals
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" + "),
        }
    }

    pub fn signals(&self) -> &[Signal] {
        match self {
            Relation::Signals(signals) => signals,
            _ => &[],
        }
    }

    #[inline]
    pub fn contains(&self, signal: Signal) -> bool {
        self.signals().contains(&signal)
    }

    /// Engulfing direction, if an engulfing signal fired
    pub fn engulfing(&self) -> Option<PatternType> {
        self.signals().iter().find_map(|s| match s {
            Signal::BullishEngulfing => Some(PatternType::Bullish),
            Signal::BearishEngulfing => Some(PatternType::Bearish),
            _ => None,
        })
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Relation::Error)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for Relation {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.label())
    }
}

/// Classify the relation of `mc2` (newer) to `mc1` (older).
///
/// Either candle missing yields [`Relation::Error`].
pub fn classify(
    mc1: Option<&MergedCandle>,
    mc2: Option<&MergedCandle>,
    engulfing_threshold_percent: f64,
) -> Relation {
    match (mc1, mc2) {
        (Some(mc1), Some(mc2)) => classify_pair(mc1, mc2, engulfing_threshold_percent),
        _ => Relation::Error,
    }
}

/// Classify a pair of present candles.
pub fn classify_pair(
    mc1: &MergedCandle,
    mc2: &MergedCandle,
    engulfing_threshold_percent: f64,
) -> Relation {
    let mut signals = Vec::with_capacity(2);

    let mc1_top = mc1.body_top();
    let mc1_bottom = mc1.body_bottom();
    let mc1_body = mc1.body_size();

    // Absolute tolerance; the body top floor keeps dojis from getting zero tolerance
    let threshold = mc1_body.max(mc1_top) * engulfing_threshold_percent / 100.0;

    if mc2.close < mc1.low {
        signals.push(Signal::Downclose);
    }
    if mc2.close > mc1.high {
        signals.push(Signal::Upclose);
    }

    let bottom_engulfs = mc2.body_bottom() <= mc1_bottom + threshold;
    let top_engulfs = mc2.body_top() >= mc1_top - threshold;

    if bottom_engulfs && top_engulfs {
        if mc2.is_bullish() && mc1.is_bearish() {
            signals.push(Signal::BullishEngulfing);
        } else if mc2.is_bearish() && mc1.is_bullish() {
            signals.push(Signal::BearishEngulfing);
        }
    }

    if signals.is_empty() {
        Relation::Neutral
    } else {
        Relation::Signals(signals)
    }
}

// ============================================================
// TESTS
// ============================================================
