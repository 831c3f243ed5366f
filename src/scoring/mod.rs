//! Extremum scoring.
//!
//! Two interchangeable schemes rank detected extrema on a 0-10 scale:
//!
//! - [`CategoryScheme`]: five sub-scores (technical, volume, pattern,
//!   temporal, market) that start at a neutral 5 and are combined with
//!   configurable weights.
//! - [`PointScheme`]: additive points from zero for band excess, volume
//!   anomaly, wick rejection, RSI zone, divergence, local dominance,
//!   round-number proximity and a momentum-pressure proxy, followed by an
//!   optional anti-fake adjustment.
//!
//! Both report the same labels so their outputs read alike: 8+ major, 6+
//! solid, 4+ possible.

mod category;
mod divergence;
mod points;

pub use category::{CategoryScheme, CategoryScores};
pub use divergence::{detect_divergence, last_pivot};
pub use points::{anti_fake_adjustment, PointBreakdown, PointScheme};

use crate::config::{DetectionParams, ScoringConfig, ScoringMethod};
use crate::indicators::IndicatorFrame;
use crate::types::{clamp_score, Direction, Extremum};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Coarse class of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Weak,
    Possible,
    Solid,
    Major,
}

impl SignalCategory {
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            SignalCategory::Major
        } else if score >= 6.0 {
            SignalCategory::Solid
        } else if score >= 4.0 {
            SignalCategory::Possible
        } else {
            SignalCategory::Weak
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalCategory::Weak => write!(f, "weak"),
            SignalCategory::Possible => write!(f, "possible"),
            SignalCategory::Solid => write!(f, "solid"),
            SignalCategory::Major => write!(f, "major"),
        }
    }
}

/// Confidence band of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Confidence::VeryHigh
        } else if score >= 7.0 {
            Confidence::High
        } else if score >= 6.0 {
            Confidence::Medium
        } else if score >= 5.0 {
            Confidence::Low
        } else {
            Confidence::VeryLow
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::VeryLow => write!(f, "very low"),
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
            Confidence::VeryHigh => write!(f, "very high"),
        }
    }
}

/// Human-readable advice keyed off the confidence bands.
pub fn recommendation(score: f64, direction: Direction) -> String {
    let text = match (Confidence::from_score(score), direction) {
        (Confidence::VeryHigh, Direction::Top) => {
            "Probable major top: strong reversal odds, consider taking profit or shorting"
        }
        (Confidence::VeryHigh, Direction::Bottom) => {
            "Probable major bottom: strong reversal odds, consider accumulating or covering shorts"
        }
        (Confidence::High, Direction::Top) => "Confirmed top: reduce exposure or tighten stops",
        (Confidence::High, Direction::Bottom) => "Confirmed bottom: scale in with a defined stop",
        (Confidence::Medium, Direction::Top) => "Possible top: watch closely and prepare an exit plan",
        (Confidence::Medium, Direction::Bottom) => {
            "Possible bottom: watch closely and prepare an entry plan"
        }
        (Confidence::Low, Direction::Top) => "Uptrend momentum intact: continuation still possible",
        (Confidence::Low, Direction::Bottom) => {
            "Downtrend momentum intact: further downside still possible"
        }
        (Confidence::VeryLow, Direction::Top) => "No top signal: little immediate reversal risk",
        (Confidence::VeryLow, Direction::Bottom) => "No bottom signal: no reversal evidence yet",
    };
    text.to_string()
}

/// Broader market momentum supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumState {
    Exhausted,
    Neutral,
    Strong,
}

/// Optional sentiment inputs for the market sub-score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Fear & greed index, 0 = extreme fear, 100 = extreme greed.
    pub fear_greed: Option<f64>,
    pub momentum: Option<MomentumState>,
}

/// Everything a scheme may read besides the extremum itself.
pub struct ScoringContext<'a> {
    pub frame: &'a IndicatorFrame,
    pub config: &'a ScoringConfig,
    pub params: &'a DetectionParams,
    pub market: &'a MarketContext,
    /// All detected extrema of the same direction, ascending.
    pub peers: &'a [Extremum],
    sorted_closes: Vec<f64>,
}

impl<'a> ScoringContext<'a> {
    pub fn new(
        frame: &'a IndicatorFrame,
        config: &'a ScoringConfig,
        params: &'a DetectionParams,
        market: &'a MarketContext,
        peers: &'a [Extremum],
    ) -> Self {
        let mut sorted_closes: Vec<f64> = frame.bars().iter().map(|b| b.close).collect();
        sorted_closes.sort_by(f64::total_cmp);
        Self {
            frame,
            config,
            params,
            market,
            peers,
            sorted_closes,
        }
    }

    /// Share of all closes strictly below `price`, in percent. `None` for
    /// series of 100 bars or fewer.
    pub fn close_percentile(&self, price: f64) -> Option<f64> {
        let n = self.sorted_closes.len();
        if n <= 100 {
            return None;
        }
        let below = self.sorted_closes.partition_point(|&c| c < price);
        Some(below as f64 / n as f64 * 100.0)
    }

    /// Most recent peer strictly before `extremum`.
    pub fn previous_peer(&self, extremum: &Extremum) -> Option<&Extremum> {
        let pos = self
            .peers
            .partition_point(|p| p.timestamp < extremum.timestamp);
        pos.checked_sub(1).map(|i| &self.peers[i])
    }
}

/// Per-scheme detail behind a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum ScoreComponents {
    Category {
        scores: CategoryScores,
        weights: crate::config::CategoryWeights,
    },
    Points {
        points: PointBreakdown,
        /// Score before the anti-fake adjustment.
        raw_score: f64,
        adjustments: Vec<Adjustment>,
    },
}

/// One named score change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub reason: String,
    pub delta: f64,
}

impl Adjustment {
    pub fn new(reason: impl Into<String>, delta: f64) -> Self {
        Self {
            reason: reason.into(),
            delta,
        }
    }
}

/// Full scoring result attached to one extremum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub score: f64,
    pub category: SignalCategory,
    pub confidence: Confidence,
    pub recommendation: String,
    pub components: ScoreComponents,
}

impl ScoreBreakdown {
    pub fn new(score: f64, direction: Direction, components: ScoreComponents) -> Self {
        let score = clamp_score(score);
        Self {
            score,
            category: SignalCategory::from_score(score),
            confidence: Confidence::from_score(score),
            recommendation: recommendation(score, direction),
            components,
        }
    }
}

/// A scoring scheme.
pub trait ScoringScheme {
    fn name(&self) -> &'static str;

    /// Score one extremum. The result is always within `[0, 10]`.
    fn score(&self, extremum: &Extremum, ctx: &ScoringContext<'_>) -> ScoreBreakdown;
}

/// Build the scheme selected in the configuration.
pub fn scheme_for(config: &ScoringConfig) -> Box<dyn ScoringScheme> {
    match config.method {
        ScoringMethod::Category => Box::new(CategoryScheme),
        ScoringMethod::Points => Box::new(PointScheme {
            anti_fake: config.anti_fake,
        }),
    }
}

/// An extremum whose strength was replaced by its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredExtremum {
    pub extremum: Extremum,
    pub breakdown: ScoreBreakdown,
}

/// Score every extremum in `ctx.peers`.
pub fn score_extrema(scheme: &dyn ScoringScheme, ctx: &ScoringContext<'_>) -> Vec<ScoredExtremum> {
    ctx.peers
        .iter()
        .map(|e| {
            let breakdown = scheme.score(e, ctx);
            debug!(
                "{} {} at {} scored {:.2} ({})",
                scheme.name(),
                e.direction,
                e.timestamp,
                breakdown.score,
                breakdown.category
            );
            ScoredExtremum {
                extremum: e.clone().with_strength(breakdown.score),
                breakdown,
            }
        })
        .collect()
}
