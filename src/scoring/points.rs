//! Point-accumulation scheme with anti-fake adjustment.

use super::divergence::detect_divergence;
use super::{Adjustment, ScoreBreakdown, ScoreComponents, ScoringContext, ScoringScheme};
use crate::indicators::IndicatorFrame;
use crate::types::{clamp_score, Direction, Extremum};
use serde::{Deserialize, Serialize};

/// Points earned per criterion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointBreakdown {
    /// 0-3: close beyond the outer band by >0, >0.10, >0.20 band widths.
    pub band_excess: f64,
    /// 0-3: volume z-score above 1, 2, 3.
    pub volume: f64,
    /// 0-1: rejection wick at least 1.5x the body.
    pub wick: f64,
    /// 0-1: RSI in the oversold / overbought zone.
    pub rsi_zone: f64,
    /// 0-2: RSI divergence against the last pivot.
    pub divergence: f64,
    /// 0-2: extreme of the last 30 and of the last 90 bars.
    pub local_dominance: f64,
    /// 0-1: within 1% of a round price level.
    pub round_number: f64,
    /// 0-1: four of the last five closes pushing in one direction with
    /// widening bands.
    pub momentum_pressure: f64,
}

impl PointBreakdown {
    pub fn total(&self) -> f64 {
        self.band_excess
            + self.volume
            + self.wick
            + self.rsi_zone
            + self.divergence
            + self.local_dominance
            + self.round_number
            + self.momentum_pressure
    }
}

const SHORT_DOMINANCE: usize = 30;
const LONG_DOMINANCE: usize = 90;

fn tiered(value: Option<f64>, thresholds: [f64; 3]) -> f64 {
    match value {
        Some(v) if v > thresholds[2] => 3.0,
        Some(v) if v > thresholds[1] => 2.0,
        Some(v) if v > thresholds[0] => 1.0,
        _ => 0.0,
    }
}

/// The bar's price is at least as extreme as every price in `[idx - window, idx]`.
fn dominates(frame: &IndicatorFrame, idx: usize, window: usize, direction: Direction) -> bool {
    if idx < window {
        return false;
    }
    let bars = frame.bars();
    let price = direction.extreme_price(&bars[idx]);
    bars[idx - window..idx]
        .iter()
        .all(|b| direction.is_at_least(price, direction.extreme_price(b)))
}

fn near_round_number(price: f64, levels: &[f64]) -> bool {
    levels
        .iter()
        .any(|&level| level > 0.0 && (price - level).abs() / level < 0.01)
}

/// Close-to-close pushes in the extremum direction over the last five bars,
/// plus band width up more than 20 % against five bars earlier.
fn momentum_pressure(frame: &IndicatorFrame, idx: usize, direction: Direction) -> bool {
    if idx < 10 {
        return false;
    }
    let bars = frame.bars();
    let pushes = (idx - 4..=idx)
        .filter(|&i| direction.is_beyond(bars[i].close, bars[i - 1].close))
        .count();
    if pushes < 4 {
        return false;
    }
    match (frame.band_width(idx), frame.band_width(idx - 5)) {
        (Some(now), Some(before)) => now > before * 1.2,
        _ => false,
    }
}

/// Additive scheme starting from zero.
#[derive(Debug, Clone, Copy)]
pub struct PointScheme {
    pub anti_fake: bool,
}

impl Default for PointScheme {
    fn default() -> Self {
        Self { anti_fake: true }
    }
}

impl PointScheme {
    pub fn points(&self, extremum: &Extremum, ctx: &ScoringContext<'_>) -> PointBreakdown {
        let frame = ctx.frame;
        let idx = extremum.index;
        let direction = extremum.direction;
        let m = &extremum.metrics;

        let divergence = detect_divergence(
            frame,
            idx,
            direction,
            ctx.config.divergence_lookback,
            ctx.config.divergence_margin,
        );

        PointBreakdown {
            band_excess: match m.band_z {
                Some(z) if z > 0.20 => 3.0,
                Some(z) if z > 0.10 => 2.0,
                Some(z) if z > 0.0 => 1.0,
                _ => 0.0,
            },
            volume: tiered(m.vol_z, [1.0, 2.0, 3.0]),
            wick: if m.wick_ratio.map_or(false, |w| w >= 1.5) { 1.0 } else { 0.0 },
            rsi_zone: if m.rsi.map_or(false, |r| ctx.params.rsi_in_zone(r, direction)) {
                1.0
            } else {
                0.0
            },
            divergence: if divergence { 2.0 } else { 0.0 },
            local_dominance: [SHORT_DOMINANCE, LONG_DOMINANCE]
                .iter()
                .filter(|&&w| dominates(frame, idx, w, direction))
                .count() as f64,
            round_number: if near_round_number(extremum.price, &ctx.config.round_levels) {
                1.0
            } else {
                0.0
            },
            momentum_pressure: if momentum_pressure(frame, idx, direction) { 1.0 } else { 0.0 },
        }
    }
}

impl ScoringScheme for PointScheme {
    fn name(&self) -> &'static str {
        "points"
    }

    fn score(&self, extremum: &Extremum, ctx: &ScoringContext<'_>) -> ScoreBreakdown {
        let points = self.points(extremum, ctx);
        let raw_score = clamp_score(points.total());
        let adjustments = if self.anti_fake {
            anti_fake_adjustment(ctx.frame, extremum)
        } else {
            Vec::new()
        };
        let adjusted = raw_score + adjustments.iter().map(|a| a.delta).sum::<f64>();

        ScoreBreakdown::new(
            adjusted,
            extremum.direction,
            ScoreComponents::Points {
                points,
                raw_score,
                adjustments,
            },
        )
    }
}

const RECENT_WINDOW: usize = 20;
const CONTEXT_WINDOW: usize = 100;

/// Linear-interpolated quantile of an unsorted sample.
fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Penalties for strong-trend and thin-liquidity conditions, bonuses for
/// repeated tests of the level and volume climax.
pub fn anti_fake_adjustment(frame: &IndicatorFrame, extremum: &Extremum) -> Vec<Adjustment> {
    let idx = extremum.index;
    let direction = extremum.direction;
    let bars = frame.bars();
    let mut out = Vec::new();

    // bands widening fast while the breakout band migrates with price
    if idx >= 10 {
        if let (Some(now), Some(before)) = (frame.band_width(idx), frame.band_width(idx - 5)) {
            let band = match direction {
                Direction::Top => &frame.bb_high,
                Direction::Bottom => &frame.bb_low,
            };
            if (now - before) / before > 0.30 {
                if let (Some(b_now), Some(b_before)) = (band[idx], band[idx - 5].filter(|b| *b > 0.0)) {
                    let migration = (b_now - b_before) / b_before;
                    let trending = match direction {
                        Direction::Top => migration > 0.05,
                        Direction::Bottom => migration < -0.05,
                    };
                    if trending {
                        out.push(Adjustment::new("strong trend: bands expanding", -2.0));
                    }
                }
            }
        }
    }

    if extremum.weekday() >= 5 {
        out.push(Adjustment::new("weekend: thin liquidity", -1.0));
    }

    // repeated test: two or more recent bars in the outer 5% of the wider context
    if idx >= RECENT_WINDOW {
        let context: Vec<f64> = bars[idx.saturating_sub(CONTEXT_WINDOW)..idx]
            .iter()
            .map(|b| direction.extreme_price(b))
            .collect();
        let q = match direction {
            Direction::Top => 0.95,
            Direction::Bottom => 0.05,
        };
        if let Some(threshold) = quantile(&context, q) {
            let hits = context[context.len() - RECENT_WINDOW..]
                .iter()
                .filter(|&&p| direction.is_beyond(p, threshold))
                .count();
            if hits >= 2 {
                out.push(Adjustment::new(format!("double {}", direction), 1.0));
            }
        }
    }

    if frame.vol_z[idx].map_or(false, |z| z > 3.0) {
        out.push(Adjustment::new("volume climax", 1.0));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectionParams, ScoringConfig};
    use crate::indicators::IndicatorConfig;
    use crate::scoring::MarketContext;
    use crate::types::{Bar, MetricsSnapshot, Tier};
    use chrono::{Duration, TimeZone, Utc};

    fn frame(closes: &[f64], volumes: &[f64], start_day: u32) -> IndicatorFrame {
        let start = Utc.with_ymd_and_hms(2024, 1, start_day, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&c, &v))| {
                Bar::new(start + Duration::hours(4 * i as i64), c, c * 1.002, c * 0.998, c, v)
            })
            .collect();
        IndicatorFrame::compute(&bars, &IndicatorConfig::default())
    }

    fn at(frame: &IndicatorFrame, idx: usize, direction: Direction, metrics: MetricsSnapshot) -> Extremum {
        let bar = &frame.bars()[idx];
        Extremum {
            index: idx,
            timestamp: bar.timestamp,
            direction,
            price: direction.extreme_price(bar),
            tier: Tier::Simple,
            strength: 1.0,
            metrics,
            estimated_time: bar.timestamp,
        }
    }

    #[test]
    fn test_all_bonuses_clamp_to_ten() {
        let closes: Vec<f64> = (0..120).map(|i| 900.0 + 0.8 * i as f64).collect();
        let f = frame(&closes, &vec![1.0; 120], 1);
        let config = ScoringConfig {
            round_levels: vec![1000.0],
            ..ScoringConfig::default()
        };
        let params = DetectionParams::tops();
        let market = MarketContext::default();
        let ctx = ScoringContext::new(&f, &config, &params, &market, &[]);

        let maxed = PointBreakdown {
            band_excess: 3.0,
            volume: 3.0,
            wick: 1.0,
            rsi_zone: 1.0,
            divergence: 2.0,
            local_dominance: 2.0,
            round_number: 1.0,
            momentum_pressure: 1.0,
        };
        assert_eq!(maxed.total(), 14.0);

        let metrics = MetricsSnapshot {
            band_z: Some(0.5),
            vol_z: Some(4.0),
            rsi: Some(90.0),
            wick_ratio: Some(3.0),
            ..Default::default()
        };
        let e = at(&f, 119, Direction::Top, metrics);
        let scored = PointScheme { anti_fake: false }.score(&e, &ctx);
        assert_eq!(scored.score, 10.0);
        let points = PointScheme::default().points(&e, &ctx);
        assert!(points.total() > 10.0);
        assert_eq!(points.band_excess, 3.0);
        assert_eq!(points.volume, 3.0);
        assert_eq!(points.local_dominance, 2.0);
        assert_eq!(points.round_number, 1.0);
    }

    #[test]
    fn test_missing_metrics_score_zero() {
        let f = frame(&[100.0; 40], &[5.0; 40], 1);
        let config = ScoringConfig::default();
        let params = DetectionParams::bottoms();
        let market = MarketContext::default();
        let ctx = ScoringContext::new(&f, &config, &params, &market, &[]);
        let e = at(&f, 35, Direction::Bottom, f.snapshot(35, Direction::Bottom));

        let points = PointScheme::default().points(&e, &ctx);
        assert_eq!(points.volume, 0.0);
        assert_eq!(points.band_excess, 0.0);
        assert_eq!(points.divergence, 0.0);
        assert!(points.total().is_finite());
    }

    #[test]
    fn test_round_number() {
        let levels = ScoringConfig::default().round_levels;
        assert!(near_round_number(99_500.0, &levels));
        assert!(near_round_number(100_800.0, &levels));
        assert!(near_round_number(112_345.0, &levels));
        assert!(!near_round_number(97_500.0, &levels));
        assert!(!near_round_number(0.4, &levels));
    }

    #[test]
    fn test_mid_grid_prices_miss_round_levels() {
        let levels = ScoringConfig::default().round_levels;
        assert!(!near_round_number(67_500.0, &levels));
        assert!(!near_round_number(43_480.0, &levels));
        assert!(!near_round_number(43_480.0, &[]));
        assert!(near_round_number(43_480.0, &[43_500.0]));

        let f = frame(&[67_500.0; 40], &[5.0; 40], 1);
        let config = ScoringConfig::default();
        let params = DetectionParams::bottoms();
        let market = MarketContext::default();
        let ctx = ScoringContext::new(&f, &config, &params, &market, &[]);
        let e = at(&f, 35, Direction::Bottom, MetricsSnapshot::default());
        assert_eq!(PointScheme::default().points(&e, &ctx).round_number, 0.0);
    }

    #[test]
    fn test_weekend_penalty() {
        // 2024-01-06 is a Saturday
        let f = frame(&[100.0; 30], &[1.0; 30], 6);
        let e = at(&f, 2, Direction::Top, MetricsSnapshot::default());
        let adj = anti_fake_adjustment(&f, &e);
        assert!(adj.iter().any(|a| a.delta == -1.0));
    }

    #[test]
    fn test_trend_penalty_skips_non_positive_band() {
        // 2024-01-02 is a Tuesday
        let mut f = frame(&[100.0; 30], &[1.0; 30], 2);
        f.bb_high[15] = Some(10.0);
        f.bb_low[15] = Some(0.0);
        f.bb_high[20] = Some(10.0);
        f.bb_low[20] = Some(-50.0);
        let e = at(&f, 20, Direction::Bottom, MetricsSnapshot::default());
        let adj = anti_fake_adjustment(&f, &e);
        assert!(adj.iter().all(|a| a.delta.is_finite()));
        assert!(!adj.iter().any(|a| a.delta == -2.0));

        // same widening from a positive band does trip the penalty
        f.bb_low[15] = Some(5.0);
        f.bb_high[15] = Some(15.0);
        let adj = anti_fake_adjustment(&f, &e);
        assert!(adj.iter().any(|a| a.delta == -2.0));
    }

    #[test]
    fn test_quantile() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&v, 0.5), Some(3.0));
        assert_eq!(quantile(&v, 1.0), Some(5.0));
        assert!((quantile(&v, 0.95).unwrap() - 4.8).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_anti_fake_rescales_within_bounds() {
        let mut closes: Vec<f64> = vec![100.0; 60];
        closes.extend((1..=10).map(|i| 100.0 + 4.0 * i as f64));
        let mut volumes = vec![10.0; 70];
        volumes[69] = 1000.0;
        let f = frame(&closes, &volumes, 1);
        let e = at(&f, 69, Direction::Top, f.snapshot(69, Direction::Top));

        let adj = anti_fake_adjustment(&f, &e);
        assert!(adj.iter().any(|a| a.reason.contains("trend")));
        assert!(adj.iter().any(|a| a.reason.contains("climax")));
    }
}
