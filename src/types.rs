//! Core data types shared by the detection, scoring and backtest stages.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV bar representing a single candle. Timestamp is the bar open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate that bar data is consistent:
    /// `low <= min(open, close) <= max(open, close) <= high`, positive prices,
    /// non-negative volume.
    pub fn validate(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.low > 0.0
            && self.volume >= 0.0
            && self.volume.is_finite()
    }

    /// Calculate the bar range.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Calculate the body size (absolute difference between open and close).
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Shadow above the body.
    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    /// Shadow below the body.
    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// Check if the bar is bullish (close > open).
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Check if the bar is bearish (close < open).
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Which kind of extremum is being analyzed.
///
/// Bottoms are local minima of `low` followed by a bullish reversal; tops are
/// local maxima of `high` followed by a bearish reversal. Every algorithm in
/// the crate is written once against this type and mirrors itself for tops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bottom,
    Top,
}

impl Direction {
    /// The mirrored direction.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Bottom => Direction::Top,
            Direction::Top => Direction::Bottom,
        }
    }

    /// The price that defines the extremum on a bar.
    pub fn extreme_price(&self, bar: &Bar) -> f64 {
        match self {
            Direction::Bottom => bar.low,
            Direction::Top => bar.high,
        }
    }

    /// The price on the other side of the bar (used to measure reversals).
    pub fn opposite_price(&self, bar: &Bar) -> f64 {
        match self {
            Direction::Bottom => bar.high,
            Direction::Top => bar.low,
        }
    }

    /// `a` lies strictly beyond `b` in this direction.
    pub fn is_beyond(&self, a: f64, b: f64) -> bool {
        match self {
            Direction::Bottom => a < b,
            Direction::Top => a > b,
        }
    }

    /// `a` is at least as extreme as `b`.
    pub fn is_at_least(&self, a: f64, b: f64) -> bool {
        match self {
            Direction::Bottom => a <= b,
            Direction::Top => a >= b,
        }
    }

    /// Pick the more extreme of two prices.
    pub fn more_extreme(&self, a: f64, b: f64) -> f64 {
        match self {
            Direction::Bottom => a.min(b),
            Direction::Top => a.max(b),
        }
    }

    /// Percent reversal away from `extreme` reaching `opposite`
    /// (bounce for bottoms, drop for tops). Positive means a reversal happened.
    pub fn reversal_pct(&self, extreme: f64, opposite: f64) -> f64 {
        match self {
            Direction::Bottom => (opposite - extreme) / extreme * 100.0,
            Direction::Top => (extreme - opposite) / extreme * 100.0,
        }
    }

    /// Percent move into `extreme` from the opposite extreme seen beforehand
    /// (drop into a bottom, rise into a top).
    pub fn prior_move_pct(&self, extreme: f64, opposite_before: f64) -> f64 {
        match self {
            Direction::Bottom => (opposite_before - extreme) / opposite_before * 100.0,
            Direction::Top => (extreme - opposite_before) / opposite_before * 100.0,
        }
    }

    /// Signed move of `price` relative to `reference` in the expected reversal
    /// direction, as a fraction. Positive means price moved away from the extreme.
    pub fn reversal_fraction(&self, reference: f64, price: f64) -> f64 {
        match self {
            Direction::Bottom => (price - reference) / reference,
            Direction::Top => (reference - price) / reference,
        }
    }

    /// Trade side taken when fading this extremum.
    pub fn trade_side(&self) -> TradeSide {
        match self {
            Direction::Bottom => TradeSide::Long,
            Direction::Top => TradeSide::Short,
        }
    }

    /// Plural label for reports.
    pub fn plural(&self) -> &'static str {
        match self {
            Direction::Bottom => "bottoms",
            Direction::Top => "tops",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bottom => write!(f, "bottom"),
            Direction::Top => write!(f, "top"),
        }
    }
}

/// Reliability classification of an extremum. Ordered: `Simple < Confirmed < Major`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Simple,
    Confirmed,
    Major,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Simple, Tier::Confirmed, Tier::Major];
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Simple => write!(f, "simple"),
            Tier::Confirmed => write!(f, "confirmed"),
            Tier::Major => write!(f, "major"),
        }
    }
}

/// Indicator readings captured at the signal bar.
///
/// `None` means the underlying rolling window was not yet filled or the metric
/// was degenerate (zero band width, zero body, zero deviation).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Distance beyond the relevant Bollinger band as a fraction of band width.
    pub band_z: Option<f64>,
    pub vol_z: Option<f64>,
    pub rsi: Option<f64>,
    pub wick_ratio: Option<f64>,
    pub volume_ratio: Option<f64>,
    /// Close position inside the bands, 0 = lower band, 1 = upper band.
    pub bb_pct: Option<f64>,
    /// Bounce after a bottom / drop after a top, percent.
    pub reversal_pct: Option<f64>,
    /// Drop into a bottom / rise into a top, percent.
    pub prior_move_pct: Option<f64>,
}

/// A detected local price extremum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    /// Position of the signal bar in the analyzed series.
    pub index: usize,
    /// Open time of the signal bar.
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Low of the bar for a bottom, high for a top.
    pub price: f64,
    pub tier: Tier,
    /// Strength in `[0, 10]`. Detectors assign 1 / 1.5 / 2 / 3; scoring may replace it.
    pub strength: f64,
    pub metrics: MetricsSnapshot,
    /// Estimated time of the extreme inside the bar.
    pub estimated_time: DateTime<Utc>,
}

impl Extremum {
    /// Return a copy carrying a new strength, clamped to `[0, 10]`.
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = clamp_score(strength);
        self
    }

    /// Day of week in UTC, Monday = 0.
    pub fn weekday(&self) -> u32 {
        self.timestamp.weekday().num_days_from_monday()
    }

    /// Hour of day in UTC.
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }
}

/// Clamp a score into `[0, 10]`, mapping non-finite input to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 10.0)
    } else {
        0.0
    }
}

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            TradeSide::Long => 1.0,
            TradeSide::Short => -1.0,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Long => write!(f, "LONG"),
            TradeSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Why a simulated trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Timeout,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::TakeProfit => write!(f, "take_profit"),
            ExitReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of one simulated trade. `exit_index > entry_index` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub side: TradeSide,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub exit_index: usize,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub bars_held: usize,
    /// Absolute pnl per unit.
    pub pnl: f64,
    pub pnl_pct: f64,
    /// Tier of the extremum that triggered the trade, if any.
    pub tier: Option<Tier>,
    /// Score of the triggering extremum, if it was scored.
    pub score: Option<f64>,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.pnl < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            10.0,
        )
    }

    #[test]
    fn test_bar_validation() {
        assert!(bar(100.0, 110.0, 90.0, 105.0).validate());
        assert!(!bar(100.0, 95.0, 90.0, 105.0).validate());
        assert!(!bar(100.0, 110.0, 101.0, 105.0).validate());
    }

    #[test]
    fn test_wicks() {
        let b = bar(100.0, 110.0, 90.0, 104.0);
        assert_eq!(b.upper_wick(), 6.0);
        assert_eq!(b.lower_wick(), 10.0);
        assert_eq!(b.body(), 4.0);
    }

    #[test]
    fn test_direction_mirror() {
        let b = bar(100.0, 110.0, 90.0, 104.0);
        assert_eq!(Direction::Bottom.extreme_price(&b), 90.0);
        assert_eq!(Direction::Top.extreme_price(&b), 110.0);
        assert!(Direction::Bottom.is_beyond(1.0, 2.0));
        assert!(Direction::Top.is_beyond(2.0, 1.0));
        assert!((Direction::Bottom.reversal_pct(100.0, 110.0) - 10.0).abs() < 1e-9);
        assert!((Direction::Top.reversal_pct(100.0, 90.0) - 10.0).abs() < 1e-9);
        assert!((Direction::Bottom.prior_move_pct(80.0, 100.0) - 20.0).abs() < 1e-9);
        assert!((Direction::Top.prior_move_pct(150.0, 100.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Simple < Tier::Confirmed);
        assert!(Tier::Confirmed < Tier::Major);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(14.0), 10.0);
        assert_eq!(clamp_score(-3.0), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(6.5), 6.5);
    }
}
