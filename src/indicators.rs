//! Indicator engine.
//!
//! Enriches an OHLCV series with the rolling columns used by the detectors
//! and scorers:
//!
//! - **RSI**: Wilder-smoothed relative strength, 0-100
//! - **Bollinger Bands**: SMA ± k · rolling population deviation of closes
//! - **ATR**: rolling mean of the true range
//! - **Volume ratio**: volume / rolling mean volume
//! - **Z-scores**: volume and ATR against their rolling mean and sample deviation
//!
//! Every column is `None` until its window is filled. Degenerate inputs
//! (zero deviation, zero band width, zero body) also produce `None`, never
//! zero, NaN or infinity.

use crate::rolling::{RollingIndicator, RollingWindow, WilderRsi};
use crate::types::{Bar, Direction, MetricsSnapshot};
use serde::{Deserialize, Serialize};

/// Window parameters for the indicator engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_bb_period")]
    pub bb_period: usize,
    #[serde(default = "default_bb_std")]
    pub bb_std: f64,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    /// Lookback for the volume-ratio denominator.
    #[serde(default = "default_window")]
    pub volume_period: usize,
    /// Lookback for volume and ATR z-scores.
    #[serde(default = "default_window")]
    pub zscore_period: usize,
}

fn default_rsi_period() -> usize { 14 }
fn default_bb_period() -> usize { 20 }
fn default_bb_std() -> f64 { 2.0 }
fn default_atr_period() -> usize { 14 }
fn default_window() -> usize { 20 }

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            bb_period: 20,
            bb_std: 2.0,
            atr_period: 14,
            volume_period: 20,
            zscore_period: 20,
        }
    }
}

/// A price series plus its derived indicator columns.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    bars: Vec<Bar>,
    pub rsi: Vec<Option<f64>>,
    pub bb_mid: Vec<Option<f64>>,
    pub bb_high: Vec<Option<f64>>,
    pub bb_low: Vec<Option<f64>>,
    pub atr: Vec<Option<f64>>,
    pub volume_ratio: Vec<Option<f64>>,
    pub vol_z: Vec<Option<f64>>,
    pub atr_z: Vec<Option<f64>>,
}

/// True range of `bar` given the previous close.
pub fn true_range(bar: &Bar, prev_close: Option<f64>) -> f64 {
    let hl = bar.high - bar.low;
    match prev_close {
        Some(pc) => hl.max((bar.high - pc).abs()).max((bar.low - pc).abs()),
        None => hl,
    }
}

impl IndicatorFrame {
    /// Compute every indicator column over `bars`.
    pub fn compute(bars: &[Bar], config: &IndicatorConfig) -> Self {
        let n = bars.len();
        let mut rsi = Vec::with_capacity(n);
        let mut bb_mid = Vec::with_capacity(n);
        let mut bb_high = Vec::with_capacity(n);
        let mut bb_low = Vec::with_capacity(n);
        let mut atr = Vec::with_capacity(n);
        let mut volume_ratio = Vec::with_capacity(n);
        let mut vol_z = Vec::with_capacity(n);
        let mut atr_z = Vec::with_capacity(n);

        let mut rsi_state = WilderRsi::new(config.rsi_period);
        let mut close_window = RollingWindow::new(config.bb_period);
        let mut tr_window = RollingWindow::new(config.atr_period);
        let mut volume_mean = RollingWindow::new(config.volume_period);
        let mut volume_z = RollingWindow::new(config.zscore_period);
        let mut atr_window = RollingWindow::new(config.zscore_period);

        let mut prev_close = None;
        for bar in bars {
            rsi_state.update(bar.close);
            rsi.push(rsi_state.value());

            close_window.update(bar.close);
            match (close_window.mean(), close_window.std_population()) {
                (Some(mid), Some(std)) => {
                    bb_mid.push(Some(mid));
                    bb_high.push(Some(mid + config.bb_std * std));
                    bb_low.push(Some(mid - config.bb_std * std));
                }
                _ => {
                    bb_mid.push(None);
                    bb_high.push(None);
                    bb_low.push(None);
                }
            }

            tr_window.update(true_range(bar, prev_close));
            let atr_now = tr_window.mean();
            atr.push(atr_now);
            match atr_now {
                Some(a) => {
                    atr_window.update(a);
                    atr_z.push(atr_window.zscore(a));
                }
                None => atr_z.push(None),
            }

            volume_mean.update(bar.volume);
            volume_ratio.push(
                volume_mean
                    .mean()
                    .filter(|m| *m > 0.0)
                    .map(|m| bar.volume / m),
            );

            volume_z.update(bar.volume);
            vol_z.push(volume_z.zscore(bar.volume));

            prev_close = Some(bar.close);
        }

        Self {
            bars: bars.to_vec(),
            rsi,
            bb_mid,
            bb_high,
            bb_low,
            atr,
            volume_ratio,
            vol_z,
            atr_z,
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Upper minus lower band; `None` when undefined or collapsed.
    pub fn band_width(&self, i: usize) -> Option<f64> {
        let (hi, lo) = (self.bb_high[i]?, self.bb_low[i]?);
        let width = hi - lo;
        (width > 0.0).then_some(width)
    }

    /// Close position inside the bands: 0 at the lower band, 1 at the upper band.
    pub fn bb_pct(&self, i: usize) -> Option<f64> {
        let width = self.band_width(i)?;
        Some((self.bars[i].close - self.bb_low[i]?) / width)
    }

    /// Excess of the close beyond the band on the extremum side, as a fraction
    /// of band width. Positive when the close sits outside the band.
    pub fn band_z(&self, i: usize, direction: Direction) -> Option<f64> {
        let width = self.band_width(i)?;
        let close = self.bars[i].close;
        match direction {
            Direction::Bottom => Some((self.bb_low[i]? - close) / width),
            Direction::Top => Some((close - self.bb_high[i]?) / width),
        }
    }

    /// Rejection wick over body: lower wick for bottoms, upper wick for tops.
    pub fn wick_ratio(&self, i: usize, direction: Direction) -> Option<f64> {
        let bar = &self.bars[i];
        let body = bar.body();
        if body <= 0.0 {
            return None;
        }
        let wick = match direction {
            Direction::Bottom => bar.lower_wick(),
            Direction::Top => bar.upper_wick(),
        };
        Some(wick / body)
    }

    /// Capture the indicator readings at bar `i`. Reversal and prior-move
    /// fields are filled in by the detectors.
    pub fn snapshot(&self, i: usize, direction: Direction) -> MetricsSnapshot {
        MetricsSnapshot {
            band_z: self.band_z(i, direction),
            vol_z: self.vol_z[i],
            rsi: self.rsi[i],
            wick_ratio: self.wick_ratio(i, direction),
            volume_ratio: self.volume_ratio[i],
            bb_pct: self.bb_pct(i),
            reversal_pct: None,
            prior_move_pct: None,
        }
    }
}
