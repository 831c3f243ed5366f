//! Price/RSI divergence.

use crate::indicators::IndicatorFrame;
use crate::types::Direction;

/// Last three-bar pivot of `prices` inside `[start, end)`: a bar strictly
/// beyond both neighbours, with both neighbours inside the range.
pub fn last_pivot(prices: &[f64], start: usize, end: usize, direction: Direction) -> Option<usize> {
    let end = end.min(prices.len());
    if end < start + 3 {
        return None;
    }
    (start + 1..end - 1).rev().find(|&i| {
        direction.is_beyond(prices[i], prices[i - 1]) && direction.is_beyond(prices[i], prices[i + 1])
    })
}

/// Whether bar `idx` diverges from the last pivot of the preceding
/// `lookback` bars.
///
/// For a top: the high exceeds the pivot high while RSI sits at least
/// `margin` points below the pivot's RSI. Bottoms mirror this with lows and
/// RSI at least `margin` points above. Missing RSI on either bar means no
/// divergence.
pub fn detect_divergence(
    frame: &IndicatorFrame,
    idx: usize,
    direction: Direction,
    lookback: usize,
    margin: f64,
) -> bool {
    if idx < lookback || idx >= frame.len() {
        return false;
    }
    let prices: Vec<f64> = frame.bars()[idx - lookback..=idx]
        .iter()
        .map(|b| direction.extreme_price(b))
        .collect();

    let Some(pivot) = last_pivot(&prices, 0, lookback, direction) else {
        return false;
    };
    if !direction.is_beyond(prices[lookback], prices[pivot]) {
        return false;
    }

    let (Some(rsi_now), Some(rsi_pivot)) = (frame.rsi[idx], frame.rsi[idx - lookback + pivot]) else {
        return false;
    };
    match direction {
        Direction::Top => rsi_now + margin <= rsi_pivot,
        Direction::Bottom => rsi_now >= rsi_pivot + margin,
    }
}
