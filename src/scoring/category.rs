//! Weighted five-category scheme.

use super::divergence::detect_divergence;
use super::{MomentumState, ScoreBreakdown, ScoreComponents, ScoringContext, ScoringScheme};
use crate::types::{Direction, Extremum, Tier};
use serde::{Deserialize, Serialize};

const NEUTRAL: f64 = 5.0;

/// Sub-scores, each in `[0, 10]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub technical: f64,
    pub volume: f64,
    pub pattern: f64,
    pub temporal: f64,
    pub market: f64,
}

fn bounded(score: f64) -> f64 {
    score.clamp(0.0, 10.0)
}

/// Starts every category at a neutral 5 and nudges it up or down.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryScheme;

impl CategoryScheme {
    pub fn categories(&self, extremum: &Extremum, ctx: &ScoringContext<'_>) -> CategoryScores {
        CategoryScores {
            technical: technical(extremum, ctx),
            volume: volume(extremum),
            pattern: pattern(extremum),
            temporal: temporal(extremum, ctx),
            market: market(extremum, ctx),
        }
    }
}

impl ScoringScheme for CategoryScheme {
    fn name(&self) -> &'static str {
        "category"
    }

    fn score(&self, extremum: &Extremum, ctx: &ScoringContext<'_>) -> ScoreBreakdown {
        let scores = self.categories(extremum, ctx);
        let w = &ctx.config.weights;
        let total = scores.technical * w.technical
            + scores.volume * w.volume
            + scores.pattern * w.pattern
            + scores.temporal * w.temporal
            + scores.market * w.market;

        ScoreBreakdown::new(
            total,
            extremum.direction,
            ScoreComponents::Category {
                scores,
                weights: w.clone(),
            },
        )
    }
}

fn technical(extremum: &Extremum, ctx: &ScoringContext<'_>) -> f64 {
    let mut score = NEUTRAL;
    let m = &extremum.metrics;

    if let Some(rsi) = m.rsi {
        score += match extremum.direction {
            Direction::Top if rsi >= 80.0 => 2.0,
            Direction::Top if rsi >= 70.0 => 1.0,
            Direction::Top if rsi < 50.0 => -2.0,
            Direction::Bottom if rsi <= 20.0 => 2.0,
            Direction::Bottom if rsi <= 30.0 => 1.0,
            Direction::Bottom if rsi > 50.0 => -2.0,
            _ => 0.0,
        };
    }

    if let Some(pct) = m.bb_pct {
        score += match extremum.direction {
            Direction::Top if pct >= 1.0 => 1.5,
            Direction::Top if pct >= 0.95 => 0.5,
            Direction::Top if pct < 0.5 => -1.0,
            Direction::Bottom if pct <= 0.0 => 1.5,
            Direction::Bottom if pct <= 0.05 => 0.5,
            Direction::Bottom if pct > 0.5 => -1.0,
            _ => 0.0,
        };
    }

    if detect_divergence(
        ctx.frame,
        extremum.index,
        extremum.direction,
        ctx.config.divergence_lookback,
        ctx.config.divergence_margin,
    ) {
        score += 1.5;
    }

    bounded(score)
}

fn volume(extremum: &Extremum) -> f64 {
    let mut score = NEUTRAL;
    let m = &extremum.metrics;

    score += match m.volume_ratio {
        Some(r) if r >= 3.0 => 3.0,
        Some(r) if r >= 2.0 => 2.0,
        Some(r) if r >= 1.5 => 1.0,
        Some(r) if r < 0.8 => -2.0,
        _ => 0.0,
    };
    if m.vol_z.map_or(false, |z| z >= 3.0) {
        score += 2.0;
    }

    bounded(score)
}

fn pattern(extremum: &Extremum) -> f64 {
    let mut score = NEUTRAL;
    let m = &extremum.metrics;

    score += match extremum.tier {
        Tier::Major => 2.0,
        Tier::Confirmed => 1.0,
        Tier::Simple => 0.0,
    };
    score += match m.prior_move_pct {
        Some(p) if p >= 100.0 => 2.0,
        Some(p) if p >= 50.0 => 1.0,
        Some(p) if p < 20.0 => -1.0,
        _ => 0.0,
    };
    score += match m.reversal_pct {
        Some(r) if r >= 20.0 => 1.0,
        Some(r) if r < 5.0 => -2.0,
        _ => 0.0,
    };

    bounded(score)
}

fn temporal(extremum: &Extremum, ctx: &ScoringContext<'_>) -> f64 {
    let mut score = NEUTRAL;

    if (10..=16).contains(&extremum.hour()) {
        score += 1.5;
    }
    score += match extremum.weekday() {
        2..=4 => 1.0,
        0 | 6 => -0.5,
        _ => 0.0,
    };

    // isolated extremes count for more than clustered ones
    if let Some(prev) = ctx.previous_peer(extremum) {
        let days = (extremum.timestamp - prev.timestamp).num_days();
        score += if days > 90 {
            2.0
        } else if days > 30 {
            1.0
        } else if days < 7 {
            -1.0
        } else {
            0.0
        };
    }

    bounded(score)
}

fn market(extremum: &Extremum, ctx: &ScoringContext<'_>) -> f64 {
    let mut score = NEUTRAL;
    let direction = extremum.direction;

    if let Some(pct) = ctx.close_percentile(extremum.price) {
        score += match direction {
            Direction::Top if pct >= 95.0 => 2.0,
            Direction::Top if pct >= 90.0 => 1.0,
            Direction::Top if pct < 50.0 => -2.0,
            Direction::Bottom if pct <= 5.0 => 2.0,
            Direction::Bottom if pct <= 10.0 => 1.0,
            Direction::Bottom if pct > 50.0 => -2.0,
            _ => 0.0,
        };
    }

    score += match ctx.market.momentum {
        Some(MomentumState::Exhausted) => 1.5,
        Some(MomentumState::Strong) => -1.0,
        _ => 0.0,
    };

    if let Some(fg) = ctx.market.fear_greed {
        score += match direction {
            Direction::Top if fg >= 80.0 => 2.0,
            Direction::Top if fg >= 70.0 => 1.0,
            Direction::Top if fg < 30.0 => -2.0,
            Direction::Bottom if fg <= 20.0 => 2.0,
            Direction::Bottom if fg <= 30.0 => 1.0,
            Direction::Bottom if fg > 70.0 => -2.0,
            _ => 0.0,
        };
    }

    bounded(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryWeights, DetectionParams, ScoringConfig};
    use crate::indicators::{IndicatorConfig, IndicatorFrame};
    use crate::scoring::MarketContext;
    use crate::types::{Bar, MetricsSnapshot};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn flat_frame(n: usize) -> IndicatorFrame {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..n)
            .map(|i| Bar::new(start + Duration::hours(i as i64), 100.0, 101.0, 99.0, 100.0, 10.0))
            .collect();
        IndicatorFrame::compute(&bars, &IndicatorConfig::default())
    }

    fn extremum(ts: DateTime<Utc>, direction: Direction, tier: Tier, metrics: MetricsSnapshot) -> Extremum {
        Extremum {
            index: 5,
            timestamp: ts,
            direction,
            price: 100.0,
            tier,
            strength: 1.0,
            metrics,
            estimated_time: ts,
        }
    }

    #[test]
    fn test_neutral_extremum_scores_five() {
        let f = flat_frame(30);
        let config = ScoringConfig::default();
        let params = DetectionParams::tops();
        let market = MarketContext::default();
        let ctx = ScoringContext::new(&f, &config, &params, &market, &[]);

        // Tuesday 08:00, no metrics, simple tier, reversal and prior move in the neutral zone
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        let metrics = MetricsSnapshot {
            prior_move_pct: Some(30.0),
            reversal_pct: Some(10.0),
            ..Default::default()
        };
        let e = extremum(ts, Direction::Top, Tier::Simple, metrics);
        let b = CategoryScheme.score(&e, &ctx);
        assert!((b.score - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_strong_top_reaches_upper_bands() {
        let f = flat_frame(30);
        let config = ScoringConfig::default();
        let params = DetectionParams::tops();
        let market = MarketContext {
            fear_greed: Some(85.0),
            momentum: Some(MomentumState::Exhausted),
        };
        let ctx = ScoringContext::new(&f, &config, &params, &market, &[]);

        // Wednesday 14:00
        let ts = Utc.with_ymd_and_hms(2024, 1, 3, 14, 0, 0).unwrap();
        let metrics = MetricsSnapshot {
            rsi: Some(85.0),
            bb_pct: Some(1.1),
            volume_ratio: Some(3.5),
            vol_z: Some(3.2),
            prior_move_pct: Some(120.0),
            reversal_pct: Some(25.0),
            ..Default::default()
        };
        let e = extremum(ts, Direction::Top, Tier::Major, metrics);
        let scores = CategoryScheme.categories(&e, &ctx);
        assert_eq!(scores.technical, 8.5);
        assert_eq!(scores.volume, 10.0);
        assert_eq!(scores.pattern, 10.0);
        assert_eq!(scores.temporal, 7.5);
        assert_eq!(scores.market, 8.5);

        let b = CategoryScheme.score(&e, &ctx);
        assert!(b.score >= 8.0);
        assert!(b.score <= 10.0);
    }

    #[test]
    fn test_all_bonuses_cap_each_category() {
        // 120 flat bars so the close percentile is available
        let f = flat_frame(120);
        let market = MarketContext {
            fear_greed: Some(90.0),
            momentum: Some(MomentumState::Exhausted),
        };
        let params = DetectionParams::tops();

        // Wednesday 14:00, previous top more than 90 days earlier
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap();
        let peers = vec![extremum(
            ts - Duration::days(120),
            Direction::Top,
            Tier::Simple,
            MetricsSnapshot::default(),
        )];
        let metrics = MetricsSnapshot {
            rsi: Some(92.0),
            bb_pct: Some(1.4),
            volume_ratio: Some(6.0),
            vol_z: Some(5.0),
            prior_move_pct: Some(250.0),
            reversal_pct: Some(40.0),
            ..Default::default()
        };
        let mut e = extremum(ts, Direction::Top, Tier::Major, metrics);
        e.price = 150.0;

        let config = ScoringConfig::default();
        let ctx = ScoringContext::new(&f, &config, &params, &market, &peers);
        let scores = CategoryScheme.categories(&e, &ctx);
        assert_eq!(scores.technical, 8.5);
        assert_eq!(scores.volume, 10.0);
        assert_eq!(scores.pattern, 10.0);
        assert_eq!(scores.temporal, 9.5);
        // 5 + 2 + 1.5 + 2 before the cap
        assert_eq!(scores.market, 10.0);

        let b = CategoryScheme.score(&e, &ctx);
        assert!((b.score - 9.475).abs() < 1e-9);

        // weight only the categories that hit their cap
        let capped = ScoringConfig {
            weights: CategoryWeights {
                technical: 0.0,
                volume: 0.5,
                pattern: 0.25,
                temporal: 0.0,
                market: 0.25,
            },
            ..ScoringConfig::default()
        };
        let ctx = ScoringContext::new(&f, &capped, &params, &market, &peers);
        assert_eq!(CategoryScheme.score(&e, &ctx).score, 10.0);
    }

    #[test]
    fn test_bottom_rules_mirror_tops() {
        let f = flat_frame(30);
        let config = ScoringConfig::default();
        let params = DetectionParams::bottoms();
        let market = MarketContext {
            fear_greed: Some(15.0),
            momentum: None,
        };
        let ctx = ScoringContext::new(&f, &config, &params, &market, &[]);

        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        let metrics = MetricsSnapshot {
            rsi: Some(18.0),
            bb_pct: Some(-0.2),
            ..Default::default()
        };
        let e = extremum(ts, Direction::Bottom, Tier::Simple, metrics);
        let scores = CategoryScheme.categories(&e, &ctx);
        assert_eq!(scores.technical, 8.5);
        assert_eq!(scores.market, 7.0);
    }

    #[test]
    fn test_clustered_peers_lower_temporal() {
        let f = flat_frame(30);
        let config = ScoringConfig::default();
        let params = DetectionParams::bottoms();
        let market = MarketContext::default();

        // Tuesday 08:00 both times: no hour or weekday adjustment
        let earlier = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        let later = earlier + Duration::days(7 * 20);
        let near = earlier + Duration::days(7);
        let peers = vec![
            extremum(earlier, Direction::Bottom, Tier::Simple, MetricsSnapshot::default()),
            extremum(near, Direction::Bottom, Tier::Simple, MetricsSnapshot::default()),
            extremum(later, Direction::Bottom, Tier::Simple, MetricsSnapshot::default()),
        ];
        let ctx = ScoringContext::new(&f, &config, &params, &market, &peers);

        assert_eq!(temporal(&peers[0], &ctx), 5.0);
        assert_eq!(temporal(&peers[1], &ctx), 5.0);
        assert_eq!(temporal(&peers[2], &ctx), 7.0);

        let crowded = extremum(earlier + Duration::days(2), Direction::Bottom, Tier::Simple, MetricsSnapshot::default());
        // Thursday: +1, two days after a peer: -1
        assert_eq!(temporal(&crowded, &ctx), 5.0);
    }
}
