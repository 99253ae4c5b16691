//! Historical replay of engulfing detection
//!
//! Slides the MC1/MC2 window one raw candle at a time over a daily series,
//! keeps the windows that form the requested engulfing pattern inside the
//! date range, and measures how each one relates to merged feedback and to
//! the price move that followed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    candle::{window_ending_at, MergedCandle},
    feedback::{FeedbackService, FeedbackStore},
    learner::validate_against_feedback_with,
    metrics::{compute_metrics, MetricSet},
    relation::classify_pair,
    source::PriceSource,
    timeframe::Timeframe,
    AnalysisError, Instrument, PatternType, Result,
};

/// Minimum number of daily candles fetched for a backtest
const MIN_FETCH: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub instrument: Instrument,
    pub pattern_type: PatternType,
    /// Inclusive
    pub start_date: NaiveDate,
    /// Inclusive
    pub end_date: NaiveDate,
    pub timeframe: Timeframe,
}

/// One engulfing pattern found during replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternHit {
    /// Date of MC2
    pub date: NaiveDate,
    pub instrument: Instrument,
    pub pattern_type: PatternType,
    pub metrics: MetricSet,
    pub matches_feedback: bool,
    /// Best rating-weighted similarity to merged feedback
    pub similarity_score: f64,
    /// Percent change from MC2's close to the close of the second candle
    /// after MC2's last source candle (`candles[end + 1]` for a window
    /// ending before `end`)
    pub price_movement_pct: Option<f64>,
    pub mc1: MergedCandle,
    pub mc2: MergedCandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub instrument: Instrument,
    pub pattern_type: PatternType,
    pub timeframe: Timeframe,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_patterns_found: usize,
    pub patterns_matching_feedback: usize,
    /// Percent (0-100) of feedback-matching patterns that moved the
    /// pattern's way
    pub success_rate: f64,
    pub average_price_movement: f64,
    /// First patterns found, capped at the configured detail limit
    pub details: Vec<PatternHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BacktestResult {
    fn empty(request: &BacktestRequest) -> Self {
        Self {
            instrument: request.instrument.clone(),
            pattern_type: request.pattern_type,
            timeframe: request.timeframe,
            start_date: request.start_date,
            end_date: request.end_date,
            total_patterns_found: 0,
            patterns_matching_feedback: 0,
            success_rate: 0.0,
            average_price_movement: 0.0,
            details: Vec::new(),
            error: None,
        }
    }
}

/// Runs backtests against a price source and a feedback corpus
pub struct Backtester<'a, P: ?Sized, S> {
    source: &'a P,
    feedback: &'a FeedbackService<S>,
}

impl<'a, P, S> Backtester<'a, P, S>
where
    P: PriceSource + ?Sized,
    S: FeedbackStore,
{
    pub fn new(source: &'a P, feedback: &'a FeedbackService<S>) -> Self {
        Self { source, feedback }
    }

    /// Replay the request's window over history.
    ///
    /// A series too short for one window is reported through
    /// [`BacktestResult::error`] rather than as an `Err`.
    pub fn run(&self, request: &BacktestRequest) -> Result<BacktestResult> {
        if request.start_date > request.end_date {
            return Err(AnalysisError::InvalidInput(format!(
                "start date {} is after end date {}",
                request.start_date, request.end_date
            )));
        }

        let config = self.feedback.config();
        let days = (request.end_date - request.start_date).num_days().max(0) as usize;
        let count = MIN_FETCH.max(days * 2);
        let candles = self
            .source
            .candles(&request.instrument, Timeframe::GRANULARITY, count);

        let mut result = BacktestResult::empty(request);
        let window = request.timeframe.window_size();
        if candles.len() < window {
            tracing::warn!(
                instrument = %request.instrument,
                need = window,
                got = candles.len(),
                "not enough candles for backtest"
            );
            result.error = Some("Not enough historical candles".to_string());
            return Ok(result);
        }

        let corpus = self
            .feedback
            .merged_corpus(Some(&request.instrument), Some(request.pattern_type))?;

        let mut hits = Vec::new();
        for i in window..candles.len() {
            let Some(pair) = window_ending_at(&candles, request.timeframe, i) else {
                continue;
            };
            let relation = classify_pair(&pair.mc1, &pair.mc2, config.engulfing_threshold_percent);
            if relation.engulfing() != Some(request.pattern_type) {
                continue;
            }
            let date = pair.mc2.date();
            if date < request.start_date || date > request.end_date {
                continue;
            }

            let metrics = compute_metrics(&pair.mc1, &pair.mc2, request.pattern_type);
            let validation =
                validate_against_feedback_with(&metrics, &corpus, config.similarity_match_threshold);
            let price_movement_pct = candles
                .get(i + 1)
                .filter(|_| pair.mc2.close != 0.0)
                .map(|next| (next.close - pair.mc2.close) / pair.mc2.close * 100.0);

            hits.push(PatternHit {
                date,
                instrument: request.instrument.clone(),
                pattern_type: request.pattern_type,
                metrics,
                matches_feedback: validation.matches,
                similarity_score: validation.similarity_score,
                price_movement_pct,
                mc1: pair.mc1,
                mc2: pair.mc2,
            });
        }

        let matching: Vec<&PatternHit> = hits.iter().filter(|h| h.matches_feedback).collect();
        let matching_moves: Vec<f64> = matching.iter().filter_map(|h| h.price_movement_pct).collect();
        let successful = matching_moves
            .iter()
            .filter(|&&m| request.pattern_type.agrees_with(m))
            .count();

        let moves: Vec<f64> = hits.iter().filter_map(|h| h.price_movement_pct).collect();

        result.total_patterns_found = hits.len();
        result.patterns_matching_feedback = matching.len();
        result.success_rate = if matching_moves.is_empty() {
            0.0
        } else {
            successful as f64 / matching_moves.len() as f64 * 100.0
        };
        result.average_price_movement = if moves.is_empty() {
            0.0
        } else {
            moves.iter().sum::<f64>() / moves.len() as f64
        };
        hits.truncate(config.backtest_detail_limit);
        result.details = hits;

        tracing::info!(
            instrument = %request.instrument,
            pattern = %request.pattern_type,
            timeframe = %request.timeframe,
            found = result.total_patterns_found,
            matching = result.patterns_matching_feedback,
            success_rate = result.success_rate,
            "backtest complete"
        );
        Ok(result)
    }
}
