//! Forward confirmation of an extremum.
//!
//! A bottom is confirmed once a later close climbs back above the middle
//! Bollinger band or rises `threshold` above the extremum low. Tops mirror
//! this. Only bars after the signal bar are read, so confirmation is a
//! hindsight label used by the backtest and reports, never by detection.

use crate::config::ConfirmationConfig;
use crate::indicators::IndicatorFrame;
use crate::types::{Direction, Extremum};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationReason {
    /// Close crossed back through the middle band.
    MidlineCross,
    /// Close moved the threshold away from the extremum price.
    ThresholdMove,
    NotConfirmed,
    /// The series ended before the window was complete.
    InsufficientFutureData,
}

impl fmt::Display for ConfirmationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationReason::MidlineCross => write!(f, "midline cross"),
            ConfirmationReason::ThresholdMove => write!(f, "threshold move"),
            ConfirmationReason::NotConfirmed => write!(f, "not confirmed"),
            ConfirmationReason::InsufficientFutureData => write!(f, "insufficient future data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub confirmed: bool,
    pub reason: ConfirmationReason,
    /// Bars after the signal bar until the confirming close.
    pub bars_to_confirm: Option<usize>,
}

impl ConfirmationResult {
    fn unconfirmed(reason: ConfirmationReason) -> Self {
        Self {
            confirmed: false,
            reason,
            bars_to_confirm: None,
        }
    }
}

/// Scan up to `n_bars` bars after the extremum for a confirming close.
pub fn confirm(
    extremum: &Extremum,
    frame: &IndicatorFrame,
    n_bars: usize,
    threshold: f64,
) -> ConfirmationResult {
    let idx = extremum.index;
    let len = frame.len();
    if idx + 1 >= len {
        return ConfirmationResult::unconfirmed(ConfirmationReason::InsufficientFutureData);
    }

    let last = (idx + n_bars).min(len - 1);
    let direction = extremum.direction;
    for j in idx + 1..=last {
        let close = frame.bars()[j].close;
        let crossed = frame.bb_mid[j].map_or(false, |mid| match direction {
            Direction::Bottom => close > mid,
            Direction::Top => close < mid,
        });
        let reason = if crossed {
            Some(ConfirmationReason::MidlineCross)
        } else if direction.reversal_fraction(extremum.price, close) >= threshold {
            Some(ConfirmationReason::ThresholdMove)
        } else {
            None
        };
        if let Some(reason) = reason {
            return ConfirmationResult {
                confirmed: true,
                reason,
                bars_to_confirm: Some(j - idx),
            };
        }
    }

    if idx + n_bars > len - 1 {
        ConfirmationResult::unconfirmed(ConfirmationReason::InsufficientFutureData)
    } else {
        ConfirmationResult::unconfirmed(ConfirmationReason::NotConfirmed)
    }
}

/// Confirm with the configured window and threshold.
pub fn confirm_with(extremum: &Extremum, frame: &IndicatorFrame, config: &ConfirmationConfig) -> ConfirmationResult {
    confirm(extremum, frame, config.window, config.drop_threshold)
}
