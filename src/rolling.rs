//! Rolling-window building blocks.
//!
//! Incremental indicators that keep their window state and update with each
//! new observation, plus a monotonic-deque sliding extreme used by the
//! detectors so that local-window checks stay linear in the series length.
//!
//! # Example
//!
//! ```
//! use turnpoint::rolling::{RollingIndicator, RollingWindow, WilderRsi};
//!
//! let mut mean = RollingWindow::new(3);
//! let mut rsi = WilderRsi::new(2);
//! for price in [10.0, 11.0, 10.5, 12.0] {
//!     mean.update(price);
//!     rsi.update(price);
//! }
//! assert!((mean.value().unwrap() - 11.166666).abs() < 1e-4);
//! assert!(rsi.value().is_some());
//! ```

use crate::types::Direction;
use std::collections::VecDeque;

/// Trait for incremental indicators.
pub trait RollingIndicator {
    /// Push a new observation.
    fn update(&mut self, value: f64);

    /// Current indicator value, `None` until warmed up or when degenerate.
    fn value(&self) -> Option<f64>;

    /// Check if the indicator has warmed up.
    fn is_ready(&self) -> bool;

    /// Number of observations needed before a value is produced.
    fn warmup_period(&self) -> usize;
}

/// Fixed-size window with mean and standard deviation.
///
/// Statistics are recomputed from the buffer on request, so a window of
/// identical values always reports a deviation of exactly zero.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    period: usize,
    buffer: VecDeque<f64>,
}

impl RollingWindow {
    /// Create a new window of `period` observations.
    pub fn new(period: usize) -> Self {
        Self {
            period,
            buffer: VecDeque::with_capacity(period + 1),
        }
    }

    /// Mean of the window.
    pub fn mean(&self) -> Option<f64> {
        if !self.is_ready() {
            return None;
        }
        Some(self.buffer.iter().sum::<f64>() / self.period as f64)
    }

    /// Population (`ddof = 0`) standard deviation.
    pub fn std_population(&self) -> Option<f64> {
        self.std_with_ddof(0)
    }

    /// Sample (`ddof = 1`) standard deviation.
    pub fn std_sample(&self) -> Option<f64> {
        self.std_with_ddof(1)
    }

    fn std_with_ddof(&self, ddof: usize) -> Option<f64> {
        if !self.is_ready() || self.period <= ddof {
            return None;
        }
        let (lo, hi) = self
            .buffer
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if hi == lo {
            return Some(0.0);
        }
        let mean = self.mean()?;
        let ss: f64 = self.buffer.iter().map(|v| (v - mean).powi(2)).sum();
        Some((ss / (self.period - ddof) as f64).sqrt())
    }

    /// Z-score of `x` against the window (sample deviation). `None` when the
    /// deviation is zero.
    pub fn zscore(&self, x: f64) -> Option<f64> {
        let mean = self.mean()?;
        let std = self.std_sample()?;
        if std > 0.0 {
            Some((x - mean) / std)
        } else {
            None
        }
    }
}

impl RollingIndicator for RollingWindow {
    fn update(&mut self, value: f64) {
        self.buffer.push_back(value);
        if self.buffer.len() > self.period {
            self.buffer.pop_front();
        }
    }

    fn value(&self) -> Option<f64> {
        self.mean()
    }

    fn is_ready(&self) -> bool {
        self.period > 0 && self.buffer.len() >= self.period
    }

    fn warmup_period(&self) -> usize {
        self.period
    }
}

/// Wilder-smoothed RSI. The first average is the plain mean of the first
/// `period` changes; later values use `(prev * (period - 1) + x) / period`.
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    prev_price: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    count: usize,
    seed_gain: f64,
    seed_loss: f64,
}

impl WilderRsi {
    /// Create a new RSI.
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_price: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            count: 0,
            seed_gain: 0.0,
            seed_loss: 0.0,
        }
    }
}

impl RollingIndicator for WilderRsi {
    fn update(&mut self, price: f64) {
        if let Some(prev) = self.prev_price {
            let change = price - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);

            self.count += 1;

            if self.count <= self.period {
                self.seed_gain += gain;
                self.seed_loss += loss;
                if self.count == self.period {
                    self.avg_gain = self.seed_gain / self.period as f64;
                    self.avg_loss = self.seed_loss / self.period as f64;
                }
            } else {
                let p = self.period as f64;
                self.avg_gain = (self.avg_gain * (p - 1.0) + gain) / p;
                self.avg_loss = (self.avg_loss * (p - 1.0) + loss) / p;
            }
        }

        self.prev_price = Some(price);
    }

    /// `None` before warmup and when price has not moved at all over the
    /// smoothing horizon (both averages zero).
    fn value(&self) -> Option<f64> {
        if !self.is_ready() {
            return None;
        }
        if self.avg_gain == 0.0 && self.avg_loss == 0.0 {
            return None;
        }
        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    fn is_ready(&self) -> bool {
        self.period > 0 && self.count >= self.period
    }

    fn warmup_period(&self) -> usize {
        self.period + 1
    }
}

/// Monotonic deque tracking the most extreme value in a sliding window.
///
/// For `Direction::Bottom` the front holds the window minimum, for
/// `Direction::Top` the maximum. Each index is pushed and popped at most
/// once, so a full scan is O(n).
#[derive(Debug, Clone)]
pub struct SlidingExtreme {
    direction: Direction,
    deque: VecDeque<(usize, f64)>,
}

impl SlidingExtreme {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            deque: VecDeque::new(),
        }
    }

    /// Push the value at `index`. Indices must be pushed in increasing order.
    pub fn push(&mut self, index: usize, value: f64) {
        while let Some(&(_, back)) = self.deque.back() {
            if self.direction.is_at_least(value, back) {
                self.deque.pop_back();
            } else {
                break;
            }
        }
        self.deque.push_back((index, value));
    }

    /// Drop entries whose index is below `start`.
    pub fn evict_before(&mut self, start: usize) {
        while let Some(&(idx, _)) = self.deque.front() {
            if idx < start {
                self.deque.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current extreme of the window.
    pub fn extreme(&self) -> Option<f64> {
        self.deque.front().map(|&(_, v)| v)
    }
}

/// For every start position `j`, the most extreme value of
/// `values[j .. min(j + window, n)]`. Windows running past the end are
/// clipped, not padded. A zero window yields `None` everywhere.
pub fn forward_window_extremes(
    values: &[f64],
    window: usize,
    direction: Direction,
) -> Vec<Option<f64>> {
    let n = values.len();
    if window == 0 {
        return vec![None; n];
    }

    let mut out = Vec::with_capacity(n);
    let mut tracker = SlidingExtreme::new(direction);
    let mut next = 0;

    for start in 0..n {
        let end = (start + window).min(n);
        while next < end {
            tracker.push(next, values[next]);
            next += 1;
        }
        tracker.evict_before(start);
        out.push(tracker.extreme());
    }

    out
}
