//! Market scan over many instruments
//!
//! Each instrument's latest MC1/MC2 window is classified; instruments are
//! then grouped by signal combination. Engulfing hits can be annotated with
//! their similarity to merged feedback.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    cache::TtlCache,
    candle::{latest_window, MergedCandle},
    feedback::{FeedbackService, FeedbackStore},
    learner::adaptive_similarity_with_cap,
    metrics::{compute_metrics, MetricSet},
    relation::{classify_pair, Relation, Signal},
    settings::AnalysisConfig,
    source::PriceSource,
    timeframe::Timeframe,
    AnalysisError, CandleColor, Instrument, OhlcExt, PatternType, Result,
};

/// Cache of scan reports keyed by the sorted, deduplicated instrument list,
/// the timeframe and the ignored candle count
pub type ScanCache = TtlCache<(Vec<Instrument>, Timeframe, usize), Arc<ScanReport>>;

/// Qualitative reading of a feedback similarity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            ConfidenceBand::High
        } else if score > 0.4 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

/// Feedback annotation of an engulfing hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackScore {
    pub pattern_type: PatternType,
    pub metrics: MetricSet,
    pub similarity_score: f64,
    pub has_feedback_data: bool,
    pub confidence: ConfidenceBand,
}

/// Latest-window analysis of one instrument
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentAnalysis {
    pub instrument: Instrument,
    pub mc1: MergedCandle,
    pub mc2: MergedCandle,
    pub relation: Relation,
    /// Color of MC2
    pub color: CandleColor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackScore>,
}

/// Instrument that could not be analysed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanError {
    pub instrument: Instrument,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub ignore_candles: usize,
    /// Group name to sorted compact instrument names (`EURUSD`)
    pub patterns: BTreeMap<String, Vec<String>>,
    pub instruments: Vec<InstrumentAnalysis>,
    pub errors: Vec<ScanError>,
    pub feedback_enhanced: bool,
}

impl ScanReport {
    pub fn group(&self, name: &str) -> &[String] {
        self.patterns.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Scan groups an analysis belongs to.
fn pattern_groups(relation: &Relation, color: CandleColor) -> Vec<&'static str> {
    let upclose = relation.contains(Signal::Upclose);
    let downclose = relation.contains(Signal::Downclose);
    let bullish = relation.contains(Signal::BullishEngulfing);
    let bearish = relation.contains(Signal::BearishEngulfing);

    let mut groups = Vec::new();
    if bullish {
        groups.push(if upclose { "Bullish engulfing + upclose" } else { "Bullish engulfing" });
    }
    if bearish {
        groups.push(if downclose { "Bearish engulfing + downclose" } else { "Bearish engulfing" });
    }
    if !bullish && !bearish {
        if upclose {
            groups.push(if color == CandleColor::Green { "Bullish + upclose" } else { "Upclose" });
        }
        if downclose {
            groups.push(if color == CandleColor::Red { "Bearish + downclose" } else { "Downclose" });
        }
    }
    groups
}

/// Latest-window scanner over a price source
pub struct Scanner<'a, P: ?Sized> {
    source: &'a P,
    config: AnalysisConfig,
}

impl<'a, P> Scanner<'a, P>
where
    P: PriceSource + ?Sized,
{
    pub fn new(source: &'a P) -> Self {
        Self::with_config(source, AnalysisConfig::default())
    }

    pub fn with_config(source: &'a P, config: AnalysisConfig) -> Self {
        Self { source, config }
    }

    #[inline]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Classify the latest complete window of one instrument.
    pub fn analyze_instrument(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        ignore_candles: usize,
    ) -> Result<InstrumentAnalysis> {
        let need = timeframe.window_size() + ignore_candles;
        let candles = self.source.candles(
            instrument,
            Timeframe::GRANULARITY,
            self.config.candle_count.max(need),
        );
        let pair = latest_window(&candles, timeframe, ignore_candles).ok_or(
            AnalysisError::InsufficientData {
                need,
                got: candles.len(),
            },
        )?;

        let relation = classify_pair(&pair.mc1, &pair.mc2, self.config.engulfing_threshold_percent);
        Ok(InstrumentAnalysis {
            instrument: instrument.clone(),
            mc1: pair.mc1,
            mc2: pair.mc2,
            color: pair.mc2.color(),
            relation,
            feedback: None,
        })
    }

    /// Analyse every instrument in parallel and group them by signal.
    pub fn scan(&self, instruments: &[Instrument], timeframe: Timeframe, ignore_candles: usize) -> ScanReport {
        let results: Vec<_> = instruments
            .par_iter()
            .map(|instrument| {
                self.analyze_instrument(instrument, timeframe, ignore_candles)
                    .map_err(|error| ScanError {
                        instrument: instrument.clone(),
                        reason: error.to_string(),
                    })
            })
            .collect();

        let mut analyses = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(a) => analyses.push(a),
                Err(e) => {
                    tracing::warn!(instrument = %e.instrument, reason = %e.reason, "skipping instrument");
                    errors.push(e);
                }
            }
        }

        let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for analysis in &analyses {
            for group in pattern_groups(&analysis.relation, analysis.color) {
                grouped
                    .entry(group.to_string())
                    .or_default()
                    .insert(analysis.instrument.compact());
            }
        }

        tracing::info!(
            %timeframe,
            analysed = analyses.len(),
            failed = errors.len(),
            groups = grouped.len(),
            "scan complete"
        );

        ScanReport {
            timeframe,
            timestamp: Utc::now(),
            ignore_candles,
            patterns: grouped
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
            instruments: analyses,
            errors,
            feedback_enhanced: false,
        }
    }

    /// [`scan`](Self::scan), memoized in `cache` by instrument set,
    /// timeframe and ignored candle count. Order and duplicates in
    /// `instruments` do not change the key.
    pub fn scan_cached(
        &self,
        cache: &ScanCache,
        instruments: &[Instrument],
        timeframe: Timeframe,
        ignore_candles: usize,
    ) -> Arc<ScanReport> {
        let mut universe = instruments.to_vec();
        universe.sort();
        universe.dedup();
        let key = (universe, timeframe, ignore_candles);
        if let Some(report) = cache.get(&key) {
            tracing::debug!(%timeframe, ignore_candles, "scan cache hit");
            return report;
        }
        let report = Arc::new(self.scan(instruments, timeframe, ignore_candles));
        cache.insert(key, Arc::clone(&report));
        report
    }

    /// Annotate engulfing hits with similarity to merged feedback for the
    /// same instrument and direction.
    pub fn enhance<S: FeedbackStore>(
        &self,
        report: &mut ScanReport,
        feedback: &FeedbackService<S>,
        use_adaptive: bool,
    ) -> Result<()> {
        let model = if use_adaptive {
            Some(feedback.learn(None, true)?)
        } else {
            None
        };

        for analysis in &mut report.instruments {
            let Some(pattern_type) = analysis.relation.engulfing() else {
                continue;
            };
            let corpus = match feedback.merged_corpus(Some(&analysis.instrument), Some(pattern_type)) {
                Ok(corpus) => corpus,
                Err(e) => {
                    tracing::warn!(instrument = %analysis.instrument, error = %e, "feedback lookup failed");
                    continue;
                }
            };

            let metrics = compute_metrics(&analysis.mc1, &analysis.mc2, pattern_type);
            let similarity_score = adaptive_similarity_with_cap(
                &metrics,
                &corpus,
                model.as_ref(),
                self.config.adaptive_boost_cap,
            );
            analysis.feedback = Some(FeedbackScore {
                pattern_type,
                metrics,
                similarity_score,
                has_feedback_data: !corpus.is_empty(),
                confidence: ConfidenceBand::from_score(similarity_score),
            });
        }

        report.feedback_enhanced = true;
        Ok(())
    }
}
