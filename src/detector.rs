//! Local extremum detection.
//!
//! Three detectors scan the same enriched series and their outputs are
//! unioned:
//!
//! | Tier      | Criterion                                                   | Strength   |
//! |-----------|-------------------------------------------------------------|------------|
//! | simple    | local extreme of a `2 * lookback` window                    | 1          |
//! | confirmed | simple + reversal ≥ min bounce + volume surge               | 1.5 or 2   |
//! | major     | unique extreme of the long window + prior move + reversal   | 3          |
//!
//! All window checks go through monotonic-deque sliding extremes, so a
//! detector pass is linear in the series length.

use crate::config::DetectionParams;
use crate::data::median_bar_spacing;
use crate::exact_time::estimate_from_shape;
use crate::indicators::IndicatorFrame;
use crate::rolling::forward_window_extremes;
use crate::types::{Direction, Extremum, Tier};
use chrono::Duration;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Indices that are local extremes of `prices`.
///
/// Index `i` qualifies when it lies in `lookback ..= n - lookback`, its price
/// is strictly beyond every price in `[i - lookback, i)` and at least as
/// extreme as every price in `(i, min(i + lookback, n - 1)]`. The strict left
/// side keeps one candidate per plateau and none on a flat series. Series
/// shorter than `2 * lookback` yield nothing.
pub fn local_candidates(prices: &[f64], lookback: usize, direction: Direction) -> Vec<usize> {
    let n = prices.len();
    if lookback == 0 || n < 2 * lookback {
        return Vec::new();
    }

    let windows = forward_window_extremes(prices, lookback, direction);
    (lookback..=n - lookback)
        .filter(|&i| {
            let left_ok = windows[i - lookback]
                .map_or(false, |left| direction.is_beyond(prices[i], left));
            let right_ok = windows
                .get(i + 1)
                .copied()
                .flatten()
                .map_or(true, |right| direction.is_at_least(prices[i], right));
            left_ok && right_ok
        })
        .collect()
}

/// Convert a period in days to a bar count using the bar spacing. At least 1.
pub fn major_period_bars(days: u32, spacing: Duration) -> usize {
    let secs = spacing.num_seconds();
    if secs <= 0 {
        return 1;
    }
    ((i64::from(days) * 86_400 / secs) as usize).max(1)
}

/// Runs the tiered detectors for one direction over an enriched series.
pub struct Detector<'a> {
    frame: &'a IndicatorFrame,
    params: &'a DetectionParams,
    direction: Direction,
    spacing: Option<Duration>,
    prices: Vec<f64>,
    opposite: Vec<f64>,
}

impl<'a> Detector<'a> {
    pub fn new(frame: &'a IndicatorFrame, direction: Direction, params: &'a DetectionParams) -> Self {
        let bars = frame.bars();
        Self {
            frame,
            params,
            direction,
            spacing: median_bar_spacing(bars).ok(),
            prices: bars.iter().map(|b| direction.extreme_price(b)).collect(),
            opposite: bars.iter().map(|b| direction.opposite_price(b)).collect(),
        }
    }

    fn candle(&self) -> Duration {
        self.spacing.unwrap_or_else(|| Duration::hours(1))
    }

    fn build(
        &self,
        i: usize,
        tier: Tier,
        strength: f64,
        reversal_pct: Option<f64>,
        prior_move_pct: Option<f64>,
    ) -> Extremum {
        let bar = &self.frame.bars()[i];
        let mut metrics = self.frame.snapshot(i, self.direction);
        metrics.reversal_pct = reversal_pct;
        metrics.prior_move_pct = prior_move_pct;
        Extremum {
            index: i,
            timestamp: bar.timestamp,
            direction: self.direction,
            price: self.prices[i],
            tier,
            strength,
            metrics,
            estimated_time: estimate_from_shape(bar, self.direction, self.candle()),
        }
    }

    /// Reversal percent over `[i, i + window)` when that window is complete.
    fn reversals(&self, window: usize) -> Vec<Option<f64>> {
        let n = self.prices.len();
        let best = forward_window_extremes(&self.opposite, window, self.direction.opposite());
        (0..n)
            .map(|i| {
                if i + window < n {
                    best[i].map(|opp| self.direction.reversal_pct(self.prices[i], opp))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Local extremes with strength 1. The reversal is informational.
    pub fn detect_simple(&self) -> Vec<Extremum> {
        let lookback = self.params.lookback_periods;
        let reversals = self.reversals(lookback);
        local_candidates(&self.prices, lookback, self.direction)
            .into_iter()
            .map(|i| self.build(i, Tier::Simple, 1.0, reversals[i], None))
            .collect()
    }

    /// Candidates that pass the confirmed-tier checks, as
    /// `(index, reversal_pct, strength)`.
    fn confirmed_candidates(&self) -> Vec<(usize, f64, f64)> {
        let lookback = self.params.lookback_periods;
        let reversals = self.reversals(lookback);

        local_candidates(&self.prices, lookback, self.direction)
            .into_iter()
            .filter_map(|i| {
                let reversal = reversals[i]?;
                if reversal < self.params.min_bounce_percent {
                    return None;
                }
                let volume_ratio = self.frame.volume_ratio[i]?;
                if volume_ratio < self.params.volume_threshold {
                    debug!(
                        "{} at {} rejected: volume ratio {:.2}",
                        self.direction, i, volume_ratio
                    );
                    return None;
                }
                let in_zone = self.frame.rsi[i]
                    .map_or(false, |rsi| self.params.rsi_in_zone(rsi, self.direction));
                let strength = if in_zone { 2.0 } else { 1.5 };
                Some((i, reversal, strength))
            })
            .collect()
    }

    /// Local extremes followed by a reversal of at least `min_bounce_percent`
    /// within `lookback` bars, on a volume surge.
    pub fn detect_confirmed(&self) -> Vec<Extremum> {
        self.confirmed_candidates()
            .into_iter()
            .map(|(i, reversal, strength)| {
                self.build(i, Tier::Confirmed, strength, Some(reversal), None)
            })
            .collect()
    }

    /// Unique extremes of the major window with a large move in and out.
    /// Only bars that already pass the confirmed tier are eligible.
    pub fn detect_major(&self) -> Vec<Extremum> {
        let Some(spacing) = self.spacing else {
            return Vec::new();
        };
        let n = self.prices.len();
        let period = major_period_bars(self.params.major_period_days, spacing);
        if n <= period {
            return Vec::new();
        }

        let lookout = self.params.major_lookout;
        let prior_threshold = self.params.major_prior_move_pct(self.direction);
        let reversal_threshold = self
            .params
            .major_reversal_pct(self.direction)
            .max(self.params.min_bounce_percent);

        let mut confirmed = vec![false; n];
        for (i, _, _) in self.confirmed_candidates() {
            confirmed[i] = true;
        }

        let history = forward_window_extremes(&self.prices, period, self.direction);
        let history_opposite =
            forward_window_extremes(&self.opposite, period, self.direction.opposite());
        let reversals = self.reversals(lookout);

        (period..n)
            .filter(|&i| confirmed[i])
            .filter_map(|i| {
                let price = self.prices[i];
                let prior_best = history[i - period]?;
                if !self.direction.is_beyond(price, prior_best) {
                    return None;
                }
                let prior_move = self
                    .direction
                    .prior_move_pct(price, history_opposite[i - period]?);
                if prior_move <= prior_threshold {
                    return None;
                }
                let reversal = reversals[i]?;
                if reversal <= reversal_threshold {
                    return None;
                }
                Some(self.build(i, Tier::Major, 3.0, Some(reversal), Some(prior_move)))
            })
            .collect()
    }

    /// Union of all three tiers, one record per bar, ascending by time.
    pub fn detect(&self) -> Vec<Extremum> {
        let simple = self.detect_simple();
        let confirmed = self.detect_confirmed();
        let major = self.detect_major();
        info!(
            "Detected {} candidates: {} simple, {} confirmed, {} major",
            self.direction.plural(),
            simple.len(),
            confirmed.len(),
            major.len()
        );
        merge_tiers([simple, confirmed, major].into_iter().flatten())
    }
}

/// Keep one extremum per timestamp: highest strength, then highest tier.
pub fn merge_tiers(candidates: impl IntoIterator<Item = Extremum>) -> Vec<Extremum> {
    let mut merged: BTreeMap<_, Extremum> = BTreeMap::new();
    for candidate in candidates {
        match merged.get(&candidate.timestamp) {
            Some(existing)
                if (existing.strength, existing.tier) >= (candidate.strength, candidate.tier) => {}
            _ => {
                merged.insert(candidate.timestamp, candidate);
            }
        }
    }
    merged.into_values().collect()
}

/// Detect extrema of one direction with the given parameters.
pub fn detect_extrema(
    frame: &IndicatorFrame,
    direction: Direction,
    params: &DetectionParams,
) -> Vec<Extremum> {
    Detector::new(frame, direction, params).detect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorConfig;
    use crate::types::{Bar, MetricsSnapshot};
    use chrono::{TimeZone, Utc};

    fn frame_from(closes: &[f64], volumes: &[f64]) -> IndicatorFrame {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&c, &v))| {
                Bar::new(
                    start + Duration::hours(4 * i as i64),
                    c,
                    c * 1.005,
                    c * 0.995,
                    c,
                    v,
                )
            })
            .collect();
        IndicatorFrame::compute(&bars, &IndicatorConfig::default())
    }

    fn params(lookback: usize) -> DetectionParams {
        DetectionParams {
            lookback_periods: lookback,
            ..DetectionParams::bottoms()
        }
    }

    fn v_shape() -> (Vec<f64>, Vec<f64>) {
        let mut closes: Vec<f64> = (0..=40).map(|i| 100.0 - 30.0 * i as f64 / 40.0).collect();
        closes.extend((1..=10).map(|i| 70.0 * (1.0 + 0.2 * i as f64 / 10.0)));
        let mut volumes = vec![100.0; closes.len()];
        volumes[40] = 500.0;
        (closes, volumes)
    }

    #[test]
    fn test_local_candidates_basic() {
        let prices = [5.0, 4.0, 3.0, 1.0, 3.0, 4.0, 5.0];
        assert_eq!(local_candidates(&prices, 2, Direction::Bottom), vec![3]);
        assert!(local_candidates(&prices, 2, Direction::Top).is_empty());
    }

    #[test]
    fn test_flat_series_has_no_candidates() {
        let prices = [10.0; 50];
        assert!(local_candidates(&prices, 5, Direction::Bottom).is_empty());
        assert!(local_candidates(&prices, 5, Direction::Top).is_empty());
    }

    #[test]
    fn test_plateau_keeps_first_bar() {
        let prices = [5.0, 4.0, 2.0, 2.0, 2.0, 4.0, 5.0, 6.0];
        assert_eq!(local_candidates(&prices, 2, Direction::Bottom), vec![2]);
    }

    #[test]
    fn test_exact_two_lookback_checks_midpoint_only() {
        let prices = [3.0, 2.0, 1.0, 2.0];
        assert_eq!(local_candidates(&prices, 2, Direction::Bottom), vec![2]);
        let rising = [1.0, 2.0, 3.0, 4.0];
        assert!(local_candidates(&rising, 2, Direction::Bottom).is_empty());
    }

    #[test]
    fn test_short_series_is_empty() {
        let prices = [3.0, 1.0, 3.0];
        assert!(local_candidates(&prices, 2, Direction::Bottom).is_empty());
    }

    #[test]
    fn test_major_period_bars() {
        assert_eq!(major_period_bars(90, Duration::hours(4)), 540);
        assert_eq!(major_period_bars(1, Duration::days(2)), 1);
    }

    #[test]
    fn test_v_shape_single_confirmed_bottom() {
        let (closes, volumes) = v_shape();
        let frame = frame_from(&closes, &volumes);
        let found = detect_extrema(&frame, Direction::Bottom, &params(10));

        assert_eq!(found.len(), 1);
        let bottom = &found[0];
        assert_eq!(bottom.index, 40);
        assert_eq!(bottom.tier, Tier::Confirmed);
        assert!(bottom.metrics.reversal_pct.unwrap() >= 5.0);
        assert!(bottom.strength == 1.5 || bottom.strength == 2.0);
    }

    #[test]
    fn test_v_shape_without_volume_surge_is_simple() {
        let (closes, _) = v_shape();
        let frame = frame_from(&closes, &vec![100.0; closes.len()]);
        let found = detect_extrema(&frame, Direction::Bottom, &params(10));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tier, Tier::Simple);
        assert_eq!(found[0].strength, 1.0);
    }

    fn major_fixture(trough_volume: f64) -> IndicatorFrame {
        // 1-day bars so a 10 day major window is 10 bars
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut closes = vec![100.0; 20];
        closes.push(60.0);
        closes.extend((1..=12).map(|i| 60.0 + 3.0 * i as f64));
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let volume = if i == 20 { trough_volume } else { 100.0 };
                Bar::new(start + Duration::days(i as i64), c, c * 1.01, c * 0.99, c, volume)
            })
            .collect();
        IndicatorFrame::compute(&bars, &IndicatorConfig::default())
    }

    fn major_params() -> DetectionParams {
        DetectionParams {
            lookback_periods: 5,
            major_period_days: 10,
            major_lookout: 10,
            ..DetectionParams::bottoms()
        }
    }

    #[test]
    fn test_major_tier_requires_history_and_reversal() {
        let frame = major_fixture(600.0);
        let p = major_params();

        let major = Detector::new(&frame, Direction::Bottom, &p).detect_major();
        assert_eq!(major.len(), 1);
        assert_eq!(major[0].index, 20);
        assert_eq!(major[0].strength, 3.0);
        assert!(major[0].metrics.prior_move_pct.unwrap() > 20.0);
        assert!(major[0].metrics.reversal_pct.unwrap() >= p.min_bounce_percent);
        assert!(frame.volume_ratio[20].unwrap() >= p.volume_threshold);

        let merged = detect_extrema(&frame, Direction::Bottom, &p);
        let at_trough: Vec<_> = merged.iter().filter(|e| e.index == 20).collect();
        assert_eq!(at_trough.len(), 1);
        assert_eq!(at_trough[0].tier, Tier::Major);
    }

    #[test]
    fn test_major_tier_needs_volume_surge() {
        let frame = major_fixture(100.0);
        let p = major_params();
        let detector = Detector::new(&frame, Direction::Bottom, &p);

        assert!(detector.detect_confirmed().is_empty());
        assert!(detector.detect_major().is_empty());

        let merged = detect_extrema(&frame, Direction::Bottom, &p);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].index, 20);
        assert_eq!(merged[0].tier, Tier::Simple);
    }

    #[test]
    fn test_merge_prefers_strength_then_tier() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let make = |tier, strength| Extremum {
            index: 3,
            timestamp: ts,
            direction: Direction::Top,
            price: 1.0,
            tier,
            strength,
            metrics: MetricsSnapshot::default(),
            estimated_time: ts,
        };
        let merged = merge_tiers(vec![
            make(Tier::Simple, 1.0),
            make(Tier::Major, 3.0),
            make(Tier::Confirmed, 2.0),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].tier, Tier::Major);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let closes: Vec<f64> = (0..300)
            .map(|i| 100.0 + 10.0 * (i as f64 / 7.0).sin() + 3.0 * (i as f64 / 3.1).cos())
            .collect();
        let volumes: Vec<f64> = (0..300).map(|i| 100.0 + (i * 37 % 50) as f64).collect();
        let frame = frame_from(&closes, &volumes);
        for direction in [Direction::Bottom, Direction::Top] {
            let a = detect_extrema(&frame, direction, &params(5));
            let b = detect_extrema(&frame, direction, &params(5));
            assert_eq!(a, b);
            assert!(a.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }
}
