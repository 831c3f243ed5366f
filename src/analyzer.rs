//! End-to-end analysis of one price series.
//!
//! [`Analyzer`] wires the stages together: enrich, detect, score, confirm,
//! locate intrabar times, backtest and aggregate. Each stage is also exposed
//! on its own so callers can stop early or swap inputs.

use crate::backtest::{run_backtest, BacktestResult};
use crate::config::AnalysisConfig;
use crate::confirmation::{confirm_with, ConfirmationResult};
use crate::data::{ensure_prepared, median_bar_spacing};
use crate::detector::detect_extrema;
use crate::error::Result;
use crate::exact_time::{resolve_exact_times, ExactTime, ExactTimeProvider};
use crate::indicators::IndicatorFrame;
use crate::patterns::{aggregate, PatternSummary};
use crate::scoring::{scheme_for, score_extrema, MarketContext, ScoreBreakdown, ScoredExtremum, ScoringContext};
use crate::types::{Bar, Direction, Extremum, Tier};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One extremum with everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtremumReport {
    pub extremum: Extremum,
    pub breakdown: ScoreBreakdown,
    pub confirmation: ConfirmationResult,
    pub exact_time: ExactTime,
}

impl ExtremumReport {
    pub fn score(&self) -> f64 {
        self.breakdown.score
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub simple: usize,
    pub confirmed: usize,
    pub major: usize,
}

impl TierCounts {
    pub fn from_extrema<'a>(extrema: impl IntoIterator<Item = &'a Extremum>) -> Self {
        let mut counts = Self::default();
        for e in extrema {
            match e.tier {
                Tier::Simple => counts.simple += 1,
                Tier::Confirmed => counts.confirmed += 1,
                Tier::Major => counts.major += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.simple + self.confirmed + self.major
    }
}

/// Serializable result of a full analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub direction: Direction,
    pub scoring_method: String,
    pub bars: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Median bar spacing in seconds.
    pub bar_spacing_secs: Option<i64>,
    pub tier_counts: TierCounts,
    /// Ascending by timestamp.
    pub extrema: Vec<ExtremumReport>,
    pub backtest: BacktestResult,
    pub patterns: PatternSummary,
}

impl AnalysisReport {
    /// Highest-scoring extrema first; ties keep chronological order.
    pub fn ranked(&self, limit: usize) -> Vec<&ExtremumReport> {
        let mut ranked: Vec<&ExtremumReport> = self.extrema.iter().collect();
        ranked.sort_by(|a, b| b.score().total_cmp(&a.score()));
        ranked.truncate(limit);
        ranked
    }

    pub fn confirmed_count(&self) -> usize {
        self.extrema.iter().filter(|e| e.confirmation.confirmed).count()
    }

    pub fn mean_score(&self) -> Option<f64> {
        if self.extrema.is_empty() {
            return None;
        }
        Some(self.extrema.iter().map(|e| e.score()).sum::<f64>() / self.extrema.len() as f64)
    }
}

/// Runs the full pipeline with one immutable configuration.
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: AnalysisConfig,
    market: MarketContext,
}

impl Analyzer {
    /// Validate `config` and build an analyzer.
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            market: MarketContext::default(),
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: AnalysisConfig::default(),
            market: MarketContext::default(),
        }
    }

    /// Attach sentiment inputs for the category scheme's market sub-score.
    pub fn with_market(mut self, market: MarketContext) -> Self {
        self.market = market;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Compute indicator columns over a sorted, deduplicated series.
    pub fn enrich(&self, bars: &[Bar]) -> Result<IndicatorFrame> {
        ensure_prepared(bars)?;
        Ok(IndicatorFrame::compute(bars, &self.config.indicators))
    }

    pub fn detect(&self, frame: &IndicatorFrame, direction: Direction) -> Vec<Extremum> {
        detect_extrema(frame, direction, self.config.params(direction))
    }

    /// Score `extrema` (all of one direction, ascending) with the configured scheme.
    pub fn score(&self, frame: &IndicatorFrame, direction: Direction, extrema: &[Extremum]) -> Vec<ScoredExtremum> {
        let scheme = scheme_for(&self.config.scoring);
        let ctx = ScoringContext::new(
            frame,
            &self.config.scoring,
            self.config.params(direction),
            &self.market,
            extrema,
        );
        score_extrema(scheme.as_ref(), &ctx)
    }

    /// Full pipeline with the candle-shape heuristic for intrabar timing.
    pub fn analyze(&self, bars: &[Bar], direction: Direction) -> Result<AnalysisReport> {
        self.analyze_with(bars, direction, &[])
    }

    /// Full pipeline, locating intrabar times through `providers` first.
    pub fn analyze_with(
        &self,
        bars: &[Bar],
        direction: Direction,
        providers: &[&dyn ExactTimeProvider],
    ) -> Result<AnalysisReport> {
        let frame = self.enrich(bars)?;
        let spacing = median_bar_spacing(bars).ok();

        let extrema = self.detect(&frame, direction);
        let scored = self.score(&frame, direction, &extrema);
        let candle = spacing.unwrap_or_else(|| Duration::hours(1));
        let exact_times = resolve_exact_times(&extrema, bars, candle, providers);

        let reports: Vec<ExtremumReport> = scored
            .iter()
            .zip(exact_times)
            .map(|(s, exact_time)| ExtremumReport {
                confirmation: confirm_with(&s.extremum, &frame, &self.config.confirmation),
                extremum: s.extremum.clone(),
                breakdown: s.breakdown.clone(),
                exact_time,
            })
            .collect();

        let backtest = run_backtest(&scored, &frame, &self.config.backtest, &self.config.confirmation);
        let accepted: Vec<Extremum> = reports.iter().map(|r| r.extremum.clone()).collect();
        let patterns = aggregate(&accepted, &self.config.sessions)?;

        let report = AnalysisReport {
            direction,
            scoring_method: scheme_for(&self.config.scoring).name().to_string(),
            bars: bars.len(),
            start: bars.first().map(|b| b.timestamp),
            end: bars.last().map(|b| b.timestamp),
            bar_spacing_secs: spacing.map(|s| s.num_seconds()),
            tier_counts: TierCounts::from_extrema(&extrema),
            extrema: reports,
            backtest,
            patterns,
        };
        info!(
            "Analyzed {} bars: {} {}, {} confirmed, {} trades",
            report.bars,
            report.extrema.len(),
            direction.plural(),
            report.confirmed_count(),
            report.backtest.stats.total_trades
        );
        Ok(report)
    }
}
