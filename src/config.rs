//! Analysis configuration.
//!
//! One immutable [`AnalysisConfig`] value carries every tunable of a run and
//! is passed by reference into detectors, scorers and simulators. It loads
//! from TOML with defaults for every field and is validated eagerly: a bad
//! value fails the run before any bar is scanned.

use crate::error::{AnalysisError, Result};
use crate::indicators::IndicatorConfig;
use crate::types::Direction;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete configuration for an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default = "DetectionParams::bottoms")]
    pub bottoms: DetectionParams,
    #[serde(default = "DetectionParams::tops")]
    pub tops: DetectionParams,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub backtest: BacktestSettings,
    #[serde(default)]
    pub sessions: SessionConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            indicators: IndicatorConfig::default(),
            bottoms: DetectionParams::bottoms(),
            tops: DetectionParams::tops(),
            scoring: ScoringConfig::default(),
            confirmation: ConfirmationConfig::default(),
            backtest: BacktestSettings::default(),
            sessions: SessionConfig::default(),
        }
    }
}

/// Detection thresholds for one direction.
///
/// Percent fields are percents (`5.0` means 5 %), not fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Half-width of the local-extremum window, in bars.
    #[serde(default = "default_lookback")]
    pub lookback_periods: usize,
    /// Minimum bounce (bottoms) or drop (tops) for the confirmed tier.
    #[serde(default = "default_min_bounce")]
    pub min_bounce_percent: f64,
    /// Minimum volume / rolling-mean volume at the signal bar.
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: f64,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    /// Dominance window for the major tier, converted to bars with the
    /// series' median spacing.
    #[serde(default = "default_major_period_days")]
    pub major_period_days: u32,
    /// Forward bars used to measure the major-tier reversal.
    #[serde(default = "default_major_lookout")]
    pub major_lookout: usize,
    /// Move into the extremum over the major window. Falls back to the
    /// direction default when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_min_prior_move_pct: Option<f64>,
    /// Reversal after the extremum over `major_lookout` bars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_min_reversal_pct: Option<f64>,
}

fn default_lookback() -> usize { 30 }
fn default_min_bounce() -> f64 { 5.0 }
fn default_volume_threshold() -> f64 { 1.5 }
fn default_rsi_oversold() -> f64 { 30.0 }
fn default_rsi_overbought() -> f64 { 70.0 }
fn default_major_period_days() -> u32 { 90 }
fn default_major_lookout() -> usize { 30 }

impl DetectionParams {
    fn base() -> Self {
        Self {
            lookback_periods: 30,
            min_bounce_percent: 5.0,
            volume_threshold: 1.5,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            major_period_days: 90,
            major_lookout: 30,
            major_min_prior_move_pct: None,
            major_min_reversal_pct: None,
        }
    }

    /// Defaults for bottom detection: 20 % drop in, 15 % bounce out.
    pub fn bottoms() -> Self {
        Self {
            major_min_prior_move_pct: Some(20.0),
            major_min_reversal_pct: Some(15.0),
            ..Self::base()
        }
    }

    /// Defaults for top detection: 50 % rise in, 20 % drop out.
    pub fn tops() -> Self {
        Self {
            major_min_prior_move_pct: Some(50.0),
            major_min_reversal_pct: Some(20.0),
            ..Self::base()
        }
    }

    pub fn major_prior_move_pct(&self, direction: Direction) -> f64 {
        self.major_min_prior_move_pct.unwrap_or(match direction {
            Direction::Bottom => 20.0,
            Direction::Top => 50.0,
        })
    }

    pub fn major_reversal_pct(&self, direction: Direction) -> f64 {
        self.major_min_reversal_pct.unwrap_or(match direction {
            Direction::Bottom => 15.0,
            Direction::Top => 20.0,
        })
    }

    /// RSI sits strictly inside the oversold zone (bottoms) or overbought zone (tops).
    pub fn rsi_in_zone(&self, rsi: f64, direction: Direction) -> bool {
        match direction {
            Direction::Bottom => rsi < self.rsi_oversold,
            Direction::Top => rsi > self.rsi_overbought,
        }
    }

    fn validate(&self, direction: Direction) -> Result<()> {
        let section = direction.plural();
        if self.lookback_periods == 0 {
            return Err(AnalysisError::config(format!(
                "{}.lookback_periods must be positive",
                section
            )));
        }
        if self.major_lookout == 0 || self.major_period_days == 0 {
            return Err(AnalysisError::config(format!(
                "{}.major_period_days and major_lookout must be positive",
                section
            )));
        }
        for (name, value) in [
            ("min_bounce_percent", self.min_bounce_percent),
            ("volume_threshold", self.volume_threshold),
            ("major_min_prior_move_pct", self.major_prior_move_pct(direction)),
            ("major_min_reversal_pct", self.major_reversal_pct(direction)),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalysisError::config(format!(
                    "{}.{} must be a non-negative number, got {}",
                    section, name, value
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.rsi_oversold)
            || !(0.0..=100.0).contains(&self.rsi_overbought)
            || self.rsi_oversold >= self.rsi_overbought
        {
            return Err(AnalysisError::config(format!(
                "{}: RSI zones must satisfy 0 <= oversold < overbought <= 100",
                section
            )));
        }
        // a major extremum must also carry confirmed-level reversal evidence
        if self.major_reversal_pct(direction) < self.min_bounce_percent {
            return Err(AnalysisError::config(format!(
                "{}.major_min_reversal_pct ({}) is below min_bounce_percent ({})",
                section,
                self.major_reversal_pct(direction),
                self.min_bounce_percent
            )));
        }
        Ok(())
    }
}

/// Which scoring scheme ranks extrema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    /// Five weighted sub-scores around a neutral 5.
    Category,
    /// Additive points from zero with an anti-fake adjustment.
    #[default]
    Points,
}

/// Weights of the category scheme. Must sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub technical: f64,
    pub volume: f64,
    pub pattern: f64,
    pub temporal: f64,
    pub market: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            technical: 0.30,
            volume: 0.20,
            pattern: 0.20,
            temporal: 0.15,
            market: 0.15,
        }
    }
}

impl CategoryWeights {
    pub fn sum(&self) -> f64 {
        self.technical + self.volume + self.pattern + self.temporal + self.market
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub method: ScoringMethod,
    #[serde(default)]
    pub weights: CategoryWeights,
    /// Bars searched backwards for the prior pivot in the divergence check.
    #[serde(default = "default_divergence_lookback")]
    pub divergence_lookback: usize,
    /// RSI points by which the oscillator must fail to extend.
    #[serde(default = "default_divergence_margin")]
    pub divergence_margin: f64,
    /// Psychological price levels for the round-number bonus, matched within 1%.
    #[serde(default = "default_round_levels")]
    pub round_levels: Vec<f64>,
    /// Apply the anti-fake adjustment after point scoring.
    #[serde(default = "default_true")]
    pub anti_fake: bool,
}

fn default_divergence_lookback() -> usize { 20 }
fn default_divergence_margin() -> f64 { 2.0 }
fn default_round_levels() -> Vec<f64> {
    vec![
        90_000.0, 95_000.0, 100_000.0, 105_000.0, 110_000.0, 112_000.0, 115_000.0, 120_000.0,
        125_000.0, 130_000.0, 150_000.0, 200_000.0,
    ]
}
fn default_true() -> bool { true }

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            method: ScoringMethod::default(),
            weights: CategoryWeights::default(),
            divergence_lookback: 20,
            divergence_margin: 2.0,
            round_levels: default_round_levels(),
            anti_fake: true,
        }
    }
}

/// Forward check that an extremum was followed by a reversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Bars scanned after the signal bar.
    #[serde(default = "default_confirmation_window")]
    pub window: usize,
    /// Reversal needed, as a fraction of the extremum price (0.05 = 5 %).
    #[serde(default = "default_drop_threshold")]
    pub drop_threshold: f64,
}

fn default_confirmation_window() -> usize { 4 }
fn default_drop_threshold() -> f64 { 0.05 }

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            window: 4,
            drop_threshold: 0.05,
        }
    }
}

/// Where the take-profit sits.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeProfitMode {
    /// Middle Bollinger band at the entry bar.
    #[default]
    BandMid,
    /// Opposite Bollinger band at the entry bar (upper for longs, lower for shorts).
    BandOuter,
    /// Multiple of the entry-to-stop distance.
    RMultiple(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    /// Distance from the extremum price to the stop, in price units.
    #[serde(default = "default_stop_buffer")]
    pub stop_buffer: f64,
    #[serde(default)]
    pub take_profit_mode: TakeProfitMode,
    #[serde(default = "default_max_bars")]
    pub max_bars: usize,
    /// Annualization constant for the Sharpe-like ratio.
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
    /// Only trade extrema scoring at least this much. 0 disables the filter.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Enter only after the confirmation check passes.
    #[serde(default = "default_true")]
    pub require_confirmation: bool,
}

fn default_stop_buffer() -> f64 { 150.0 }
fn default_max_bars() -> usize { 100 }
fn default_periods_per_year() -> f64 { 365.0 * 6.0 }
fn default_min_score() -> f64 { 6.0 }

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            stop_buffer: 150.0,
            take_profit_mode: TakeProfitMode::BandMid,
            max_bars: 100,
            periods_per_year: 365.0 * 6.0,
            min_score: 6.0,
            require_confirmation: true,
        }
    }
}

/// Hour range `[start, end)` in local hours. `start > end` wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start: u32,
    pub end: u32,
}

impl SessionWindow {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Timezone and trading-session boundaries used by the pattern tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_label")]
    pub label: String,
    /// Fixed offset applied to UTC timestamps before bucketing.
    #[serde(default)]
    pub utc_offset_hours: i32,
    #[serde(default = "default_asia")]
    pub asia: SessionWindow,
    #[serde(default = "default_europe")]
    pub europe: SessionWindow,
    #[serde(default = "default_us")]
    pub us: SessionWindow,
}

fn default_session_label() -> String { "utc".to_string() }
fn default_asia() -> SessionWindow { SessionWindow::new(0, 8) }
fn default_europe() -> SessionWindow { SessionWindow::new(8, 16) }
fn default_us() -> SessionWindow { SessionWindow::new(16, 0) }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: default_session_label(),
            utc_offset_hours: 0,
            asia: default_asia(),
            europe: default_europe(),
            us: default_us(),
        }
    }
}

impl SessionConfig {
    /// Named presets: `utc`, `paris`, `bangkok`, `new_york`.
    pub fn preset(name: &str) -> Result<Self> {
        let (offset, asia, europe, us) = match name.to_lowercase().as_str() {
            "utc" => (0, (0, 8), (8, 16), (16, 0)),
            "paris" => (1, (1, 9), (9, 17), (17, 1)),
            "bangkok" => (7, (7, 15), (15, 23), (23, 7)),
            "new_york" | "new-york" | "ny" => (-5, (19, 3), (3, 11), (11, 19)),
            other => {
                return Err(AnalysisError::config(format!(
                    "Unknown session preset '{}'. Use utc, paris, bangkok or new_york",
                    other
                )))
            }
        };
        Ok(Self {
            label: name.to_lowercase().replace('-', "_"),
            utc_offset_hours: offset,
            asia: SessionWindow::new(asia.0, asia.1),
            europe: SessionWindow::new(europe.0, europe.1),
            us: SessionWindow::new(us.0, us.1),
        })
    }
}

impl AnalysisConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: AnalysisConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| AnalysisError::config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Detection parameters for one direction.
    pub fn params(&self, direction: Direction) -> &DetectionParams {
        match direction {
            Direction::Bottom => &self.bottoms,
            Direction::Top => &self.tops,
        }
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        let ind = &self.indicators;
        if [
            ind.rsi_period,
            ind.bb_period,
            ind.atr_period,
            ind.volume_period,
            ind.zscore_period,
        ]
        .contains(&0)
        {
            return Err(AnalysisError::config("indicator periods must be positive"));
        }
        if ind.zscore_period < 2 {
            return Err(AnalysisError::config(
                "indicators.zscore_period must be at least 2",
            ));
        }
        if !ind.bb_std.is_finite() || ind.bb_std <= 0.0 {
            return Err(AnalysisError::config("indicators.bb_std must be positive"));
        }

        self.bottoms.validate(Direction::Bottom)?;
        self.tops.validate(Direction::Top)?;

        let w = &self.scoring.weights;
        if [w.technical, w.volume, w.pattern, w.temporal, w.market]
            .iter()
            .any(|x| !x.is_finite() || *x < 0.0)
        {
            return Err(AnalysisError::config("scoring weights must be non-negative"));
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(AnalysisError::config(format!(
                "scoring weights must sum to 1.0, got {:.6}",
                w.sum()
            )));
        }
        if self.scoring.divergence_lookback < 3 {
            return Err(AnalysisError::config(
                "scoring.divergence_lookback must be at least 3",
            ));
        }
        if self.scoring.divergence_margin < 0.0 {
            return Err(AnalysisError::config(
                "scoring.divergence_margin must be non-negative",
            ));
        }
        if self
            .scoring
            .round_levels
            .iter()
            .any(|l| !l.is_finite() || *l <= 0.0)
        {
            return Err(AnalysisError::config(
                "scoring.round_levels must be positive prices",
            ));
        }

        if self.confirmation.window == 0 {
            return Err(AnalysisError::config("confirmation.window must be positive"));
        }
        if !(0.0..=1.0).contains(&self.confirmation.drop_threshold) {
            return Err(AnalysisError::config(format!(
                "confirmation.drop_threshold is a fraction in [0, 1], got {}",
                self.confirmation.drop_threshold
            )));
        }

        let bt = &self.backtest;
        if !bt.stop_buffer.is_finite() || bt.stop_buffer < 0.0 {
            return Err(AnalysisError::config("backtest.stop_buffer must be non-negative"));
        }
        if bt.max_bars == 0 {
            return Err(AnalysisError::config("backtest.max_bars must be positive"));
        }
        if !bt.periods_per_year.is_finite() || bt.periods_per_year <= 0.0 {
            return Err(AnalysisError::config(
                "backtest.periods_per_year must be positive",
            ));
        }
        if !(0.0..=10.0).contains(&bt.min_score) {
            return Err(AnalysisError::config("backtest.min_score must lie in [0, 10]"));
        }
        if let TakeProfitMode::RMultiple(r) = bt.take_profit_mode {
            if !r.is_finite() || r <= 0.0 {
                return Err(AnalysisError::config(
                    "take_profit_mode.r_multiple must be positive",
                ));
            }
        }

        let s = &self.sessions;
        if !(-12..=14).contains(&s.utc_offset_hours) {
            return Err(AnalysisError::config(
                "sessions.utc_offset_hours must lie in [-12, 14]",
            ));
        }
        for (name, window) in [("asia", s.asia), ("europe", s.europe), ("us", s.us)] {
            if window.start >= 24 || window.end >= 24 {
                return Err(AnalysisError::config(format!(
                    "sessions.{} hours must be below 24",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Example configuration file content.
    pub fn example() -> String {
        r#"# turnpoint analysis configuration
# Every field is optional; omitted values use the defaults shown here.

[indicators]
rsi_period = 14
bb_period = 20
bb_std = 2.0
atr_period = 14
volume_period = 20
zscore_period = 20

[bottoms]
lookback_periods = 30
min_bounce_percent = 5.0      # percent
volume_threshold = 1.5        # x rolling mean volume
rsi_oversold = 30.0
rsi_overbought = 70.0
major_period_days = 90
major_lookout = 30
major_min_prior_move_pct = 20.0
major_min_reversal_pct = 15.0

[tops]
lookback_periods = 30
min_bounce_percent = 5.0
volume_threshold = 1.5
major_min_prior_move_pct = 50.0
major_min_reversal_pct = 20.0

[scoring]
method = "points"             # or "category"
divergence_lookback = 20
divergence_margin = 2.0
round_levels = [90000.0, 95000.0, 100000.0, 105000.0, 110000.0, 112000.0,
                115000.0, 120000.0, 125000.0, 130000.0, 150000.0, 200000.0]
anti_fake = true

[scoring.weights]
technical = 0.30
volume = 0.20
pattern = 0.20
temporal = 0.15
market = 0.15

[confirmation]
window = 4
drop_threshold = 0.05         # fraction, 0.05 = 5%

[backtest]
stop_buffer = 150.0           # price units beyond the extremum
take_profit_mode = "band_mid" # "band_outer" or { r_multiple = 2.0 }
max_bars = 100
periods_per_year = 2190.0     # 4h bars
min_score = 6.0
require_confirmation = true

[sessions]
label = "utc"
utc_offset_hours = 0
asia = { start = 0, end = 8 }
europe = { start = 8, end = 16 }
us = { start = 16, end = 0 }
"#
        .to_string()
    }
}
