//! Intrabar timing of extrema.
//!
//! A bar only says that its low (or high) happened somewhere between its open
//! and the next bar. Two strategies narrow that down behind one
//! [`ExactTimeProvider`] interface:
//!
//! - [`OhlcShapeEstimator`] reads the candle shape. Always available.
//! - [`FineBarLookup`] searches pre-fetched higher-resolution bars.
//!
//! [`ExactTimeCache`] stores previous answers on disk so long batch runs can
//! resume. [`resolve_exact_times`] tries providers in order and falls back to
//! the shape heuristic, so every extremum always gets an answer.

use crate::data::median_bar_spacing;
use crate::error::Result;
use crate::types::{Bar, Direction, Extremum};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where an exact-time answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    Heuristic,
    FineBars,
    Cache,
}

/// Estimated moment and price of an extreme inside its bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactTime {
    pub time: DateTime<Utc>,
    pub price: f64,
    pub source: TimeSource,
}

/// Fraction of the bar at which the extreme most likely printed.
///
/// A close on the wrong side of the open (bearish candle at a bottom,
/// bullish candle at a top) puts the extreme late. An extreme nearer the open
/// than the close puts it early. Anything else is the midpoint.
pub fn shape_offset(bar: &Bar, direction: Direction) -> f64 {
    let extreme = direction.extreme_price(bar);
    let wrong_side = match direction {
        Direction::Bottom => bar.is_bearish(),
        Direction::Top => bar.is_bullish(),
    };
    if wrong_side {
        0.75
    } else if (extreme - bar.open).abs() < (extreme - bar.close).abs() {
        0.25
    } else {
        0.5
    }
}

/// Bar open time plus the shape offset of a bar lasting `duration`.
pub fn estimate_from_shape(bar: &Bar, direction: Direction, duration: Duration) -> DateTime<Utc> {
    let millis = duration.num_milliseconds() as f64 * shape_offset(bar, direction);
    bar.timestamp + Duration::milliseconds(millis.round() as i64)
}

/// A strategy for locating the extreme of `bar` in time.
pub trait ExactTimeProvider {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// `None` when this provider cannot answer for the bar.
    fn locate(&self, extremum: &Extremum, bar: &Bar, candle: Duration) -> Option<ExactTime>;
}

/// Candle-shape heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct OhlcShapeEstimator;

impl ExactTimeProvider for OhlcShapeEstimator {
    fn name(&self) -> &str {
        "ohlc_shape"
    }

    fn locate(&self, extremum: &Extremum, bar: &Bar, candle: Duration) -> Option<ExactTime> {
        Some(ExactTime {
            time: estimate_from_shape(bar, extremum.direction, candle),
            price: extremum.price,
            source: TimeSource::Heuristic,
        })
    }
}

/// Lookup in a pre-fetched finer series (e.g. 1m bars under 4h bars).
///
/// The finest bar holding the extreme is located, then the shape heuristic is
/// applied inside it. For 1-minute bars that gives a 15/30/45 second estimate.
#[derive(Debug, Clone)]
pub struct FineBarLookup {
    bars: Vec<Bar>,
    spacing: Duration,
}

impl FineBarLookup {
    /// `bars` must be sorted ascending.
    pub fn new(bars: Vec<Bar>) -> Result<Self> {
        let spacing = median_bar_spacing(&bars)?;
        Ok(Self { bars, spacing })
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }
}

impl ExactTimeProvider for FineBarLookup {
    fn name(&self) -> &str {
        "fine_bars"
    }

    fn locate(&self, extremum: &Extremum, bar: &Bar, candle: Duration) -> Option<ExactTime> {
        let start = bar.timestamp;
        let end = start + candle;
        let lo = self.bars.partition_point(|b| b.timestamp < start);
        let hi = self.bars.partition_point(|b| b.timestamp < end);
        let window = &self.bars[lo..hi];

        let direction = extremum.direction;
        let mut best: Option<&Bar> = None;
        for fine in window {
            let beats = best.map_or(true, |b| {
                direction.is_beyond(direction.extreme_price(fine), direction.extreme_price(b))
            });
            if beats {
                best = Some(fine);
            }
        }

        let fine = best?;
        Some(ExactTime {
            time: estimate_from_shape(fine, direction, self.spacing),
            price: direction.extreme_price(fine),
            source: TimeSource::FineBars,
        })
    }
}

/// Persisted answers keyed by direction and bar timestamp.
#[derive(Debug, Clone, Default)]
pub struct ExactTimeCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, ExactTime>,
}

fn cache_key(direction: Direction, timestamp: DateTime<Utc>) -> String {
    format!("{}:{}", direction, timestamp.to_rfc3339())
}

impl ExactTimeCache {
    /// In-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a JSON cache file. A missing file yields an empty cache bound to
    /// that path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries: BTreeMap<String, ExactTime> = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        info!(
            "Exact-time cache {} holds {} entries",
            path.display(),
            entries.len()
        );
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// Write the cache back to its file. No-op for in-memory caches.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            fs::write(path, serde_json::to_string_pretty(&self.entries)?)?;
        }
        Ok(())
    }

    pub fn get(&self, direction: Direction, timestamp: DateTime<Utc>) -> Option<&ExactTime> {
        self.entries.get(&cache_key(direction, timestamp))
    }

    /// Store a non-heuristic answer. Heuristic answers are cheap to recompute
    /// and are not stored.
    pub fn insert(&mut self, extremum: &Extremum, exact: &ExactTime) {
        if exact.source == TimeSource::FineBars {
            self.entries
                .insert(cache_key(extremum.direction, extremum.timestamp), exact.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ExactTimeProvider for ExactTimeCache {
    fn name(&self) -> &str {
        "cache"
    }

    fn locate(&self, extremum: &Extremum, _bar: &Bar, _candle: Duration) -> Option<ExactTime> {
        self.get(extremum.direction, extremum.timestamp).map(|hit| ExactTime {
            source: TimeSource::Cache,
            ..hit.clone()
        })
    }
}

/// Resolve an exact time for every extremum, trying `providers` in order and
/// falling back to the candle-shape heuristic.
pub fn resolve_exact_times(
    extrema: &[Extremum],
    bars: &[Bar],
    candle: Duration,
    providers: &[&dyn ExactTimeProvider],
) -> Vec<ExactTime> {
    extrema
        .iter()
        .filter_map(|e| {
            let bar = bars.get(e.index)?;
            providers
                .iter()
                .find_map(|p| {
                    let hit = p.locate(e, bar, candle);
                    if hit.is_some() {
                        debug!("{} located {} at {}", p.name(), e.direction, e.timestamp);
                    }
                    hit
                })
                .or_else(|| OhlcShapeEstimator.locate(e, bar, candle))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricsSnapshot, Tier};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
    }

    fn extremum(direction: Direction, price: f64) -> Extremum {
        Extremum {
            index: 0,
            timestamp: t0(),
            direction,
            price,
            tier: Tier::Simple,
            strength: 1.0,
            metrics: MetricsSnapshot::default(),
            estimated_time: t0(),
        }
    }

    #[test]
    fn test_shape_offsets_bottom() {
        let bearish = Bar::new(t0(), 100.0, 101.0, 90.0, 95.0, 1.0);
        assert_eq!(shape_offset(&bearish, Direction::Bottom), 0.75);
        let low_near_open = Bar::new(t0(), 100.0, 110.0, 99.0, 108.0, 1.0);
        assert_eq!(shape_offset(&low_near_open, Direction::Bottom), 0.25);
        let hammer = Bar::new(t0(), 100.0, 104.0, 90.0, 101.0, 1.0);
        assert_eq!(shape_offset(&hammer, Direction::Bottom), 0.5);
    }

    #[test]
    fn test_shape_offsets_top_mirror() {
        let bullish = Bar::new(t0(), 100.0, 110.0, 99.0, 105.0, 1.0);
        assert_eq!(shape_offset(&bullish, Direction::Top), 0.75);
        let high_near_open = Bar::new(t0(), 100.0, 101.0, 90.0, 92.0, 1.0);
        assert_eq!(shape_offset(&high_near_open, Direction::Top), 0.25);
    }

    #[test]
    fn test_estimate_uses_duration() {
        let bearish = Bar::new(t0(), 100.0, 101.0, 90.0, 95.0, 1.0);
        let t = estimate_from_shape(&bearish, Direction::Bottom, Duration::hours(4));
        assert_eq!(t, t0() + Duration::hours(3));
    }

    #[test]
    fn test_fine_bar_lookup() {
        let fine: Vec<Bar> = (0..240)
            .map(|m| {
                let low = if m == 100 { 90.0 } else { 99.0 };
                // bullish minute with low near the open -> 15 s
                Bar::new(t0() + Duration::minutes(m), low + 0.5, 101.0, low, 100.5, 1.0)
            })
            .collect();
        let lookup = FineBarLookup::new(fine).unwrap();
        let candle = Bar::new(t0(), 100.0, 101.0, 90.0, 100.5, 1.0);
        let hit = lookup
            .locate(&extremum(Direction::Bottom, 90.0), &candle, Duration::hours(4))
            .unwrap();
        assert_eq!(hit.source, TimeSource::FineBars);
        assert_eq!(hit.price, 90.0);
        assert_eq!(hit.time, t0() + Duration::minutes(100) + Duration::seconds(15));
    }

    #[test]
    fn test_fine_bar_lookup_outside_coverage() {
        let fine: Vec<Bar> = (0..10)
            .map(|m| Bar::new(t0() + Duration::days(2) + Duration::minutes(m), 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect();
        let lookup = FineBarLookup::new(fine).unwrap();
        let candle = Bar::new(t0(), 100.0, 101.0, 90.0, 100.5, 1.0);
        assert!(lookup
            .locate(&extremum(Direction::Bottom, 90.0), &candle, Duration::hours(4))
            .is_none());
    }

    #[test]
    fn test_resolve_prefers_cache_then_falls_back() {
        let bars = vec![Bar::new(t0(), 100.0, 101.0, 90.0, 95.0, 1.0)];
        let e = extremum(Direction::Bottom, 90.0);

        let empty = ExactTimeCache::new();
        let resolved = resolve_exact_times(&[e.clone()], &bars, Duration::hours(4), &[&empty]);
        assert_eq!(resolved[0].source, TimeSource::Heuristic);

        let mut cache = ExactTimeCache::new();
        let exact = ExactTime {
            time: t0() + Duration::minutes(37),
            price: 89.5,
            source: TimeSource::FineBars,
        };
        cache.insert(&e, &exact);
        let resolved = resolve_exact_times(&[e], &bars, Duration::hours(4), &[&cache]);
        assert_eq!(resolved[0].source, TimeSource::Cache);
        assert_eq!(resolved[0].time, exact.time);
    }

    #[test]
    fn test_cache_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exact_times.json");
        let e = extremum(Direction::Top, 120.0);

        let mut cache = ExactTimeCache::open(&path).unwrap();
        assert!(cache.is_empty());
        cache.insert(
            &e,
            &ExactTime {
                time: t0() + Duration::minutes(5),
                price: 120.0,
                source: TimeSource::FineBars,
            },
        );
        cache.save().unwrap();

        let reopened = ExactTimeCache::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get(Direction::Top, t0()).is_some());
        assert!(reopened.get(Direction::Bottom, t0()).is_none());
    }
}
