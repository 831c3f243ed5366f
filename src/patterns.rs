//! Temporal patterns of extrema and calendar backtests.
//!
//! Extrema are bucketed by local hour, weekday and trading session after
//! shifting their UTC timestamps by a fixed offset. Weekdays are numbered
//! from Monday = 0.

use crate::config::SessionConfig;
use crate::error::{AnalysisError, Result};
use crate::types::{Bar, Direction, Extremum, Tier};
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Fixed offset for a whole number of hours east of UTC.
pub fn fixed_offset(hours: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
        .ok_or_else(|| AnalysisError::config(format!("invalid UTC offset: {} hours", hours)))
}

fn local(ts: DateTime<Utc>, offset: FixedOffset) -> DateTime<FixedOffset> {
    ts.with_timezone(&offset)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Asia,
    Europe,
    Us,
    /// Hours outside all three configured windows.
    OffHours,
}

impl Session {
    /// First configured window containing `hour`.
    pub fn classify(hour: u32, sessions: &SessionConfig) -> Self {
        if sessions.asia.contains(hour) {
            Session::Asia
        } else if sessions.europe.contains(hour) {
            Session::Europe
        } else if sessions.us.contains(hour) {
            Session::Us
        } else {
            Session::OffHours
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Session::Asia => write!(f, "Asia"),
            Session::Europe => write!(f, "Europe"),
            Session::Us => write!(f, "US"),
            Session::OffHours => write!(f, "Off hours"),
        }
    }
}

/// Count and mean strength of one group of extrema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub label: String,
    pub count: usize,
    /// Share of all extrema, percent.
    pub percentage: f64,
    /// `None` for empty buckets.
    pub avg_strength: Option<f64>,
}

#[derive(Default)]
struct Acc {
    count: usize,
    strength: f64,
}

impl Acc {
    fn add(&mut self, strength: f64) {
        self.count += 1;
        self.strength += strength;
    }

    fn bucket(&self, label: impl Into<String>, total: usize) -> Bucket {
        Bucket {
            label: label.into(),
            count: self.count,
            percentage: if total > 0 {
                self.count as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            avg_strength: (self.count > 0).then(|| self.strength / self.count as f64),
        }
    }
}

/// Frequency tables of a set of extrema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub total: usize,
    pub timezone: String,
    pub utc_offset_hours: i32,
    /// 24 buckets, index = local hour.
    pub by_hour: Vec<Bucket>,
    /// 7 buckets, index = weekday (Monday = 0).
    pub by_weekday: Vec<Bucket>,
    /// Asia, Europe, US, plus off-hours when any extremum falls outside.
    pub by_session: Vec<Bucket>,
    pub by_tier: Vec<Bucket>,
    pub by_year: Vec<Bucket>,
    /// 7 x 24 counts, `[weekday][hour]`.
    pub day_hour: Vec<Vec<usize>>,
}

/// Index of the largest count; the earliest index wins ties.
fn argmax(buckets: &[Bucket]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, b) in buckets.iter().enumerate() {
        if b.count > 0 && best.map_or(true, |j| b.count > buckets[j].count) {
            best = Some(i);
        }
    }
    best
}

impl PatternSummary {
    pub fn most_frequent_hour(&self) -> Option<u32> {
        argmax(&self.by_hour).map(|h| h as u32)
    }

    pub fn most_frequent_weekday(&self) -> Option<u32> {
        argmax(&self.by_weekday).map(|d| d as u32)
    }

    pub fn most_frequent_session(&self) -> Option<&str> {
        argmax(&self.by_session).map(|i| self.by_session[i].label.as_str())
    }

    /// Weekday and hour with the most extrema.
    pub fn busiest_slot(&self) -> Option<(u32, u32)> {
        let mut best: Option<(usize, usize, usize)> = None;
        for (d, row) in self.day_hour.iter().enumerate() {
            for (h, &count) in row.iter().enumerate() {
                if count > 0 && best.map_or(true, |(_, _, c)| count > c) {
                    best = Some((d, h, count));
                }
            }
        }
        best.map(|(d, h, _)| (d as u32, h as u32))
    }
}

/// Bucket extrema by local hour, weekday, session, tier and year.
pub fn aggregate(extrema: &[Extremum], sessions: &SessionConfig) -> Result<PatternSummary> {
    let offset = fixed_offset(sessions.utc_offset_hours)?;
    let total = extrema.len();

    let mut hours: Vec<Acc> = (0..24).map(|_| Acc::default()).collect();
    let mut days: Vec<Acc> = (0..7).map(|_| Acc::default()).collect();
    let mut by_session: BTreeMap<Session, Acc> = BTreeMap::new();
    let mut by_tier: BTreeMap<Tier, Acc> = BTreeMap::new();
    let mut by_year: BTreeMap<i32, Acc> = BTreeMap::new();
    let mut day_hour = vec![vec![0usize; 24]; 7];

    for e in extrema {
        let t = local(e.timestamp, offset);
        let hour = t.hour();
        let day = t.weekday().num_days_from_monday();

        hours[hour as usize].add(e.strength);
        days[day as usize].add(e.strength);
        day_hour[day as usize][hour as usize] += 1;
        by_session
            .entry(Session::classify(hour, sessions))
            .or_default()
            .add(e.strength);
        by_tier.entry(e.tier).or_default().add(e.strength);
        by_year.entry(t.year()).or_default().add(e.strength);
    }

    let mut session_buckets = Vec::new();
    for session in [Session::Asia, Session::Europe, Session::Us, Session::OffHours] {
        match by_session.get(&session) {
            Some(acc) => session_buckets.push(acc.bucket(session.to_string(), total)),
            None if session != Session::OffHours => {
                session_buckets.push(Acc::default().bucket(session.to_string(), total))
            }
            None => {}
        }
    }

    Ok(PatternSummary {
        total,
        timezone: sessions.label.clone(),
        utc_offset_hours: sessions.utc_offset_hours,
        by_hour: hours
            .iter()
            .enumerate()
            .map(|(h, acc)| acc.bucket(format!("{:02}:00", h), total))
            .collect(),
        by_weekday: days
            .iter()
            .enumerate()
            .map(|(d, acc)| acc.bucket(DAY_NAMES[d], total))
            .collect(),
        by_session: session_buckets,
        by_tier: by_tier
            .iter()
            .map(|(tier, acc)| acc.bucket(tier.to_string(), total))
            .collect(),
        by_year: by_year
            .iter()
            .map(|(year, acc)| acc.bucket(year.to_string(), total))
            .collect(),
        day_hour,
    })
}

/// One fixed-holding-period trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarTrade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub return_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarSummary {
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub mean_return_pct: f64,
    pub median_return_pct: f64,
    pub best_pct: f64,
    pub worst_pct: f64,
    /// Mean over sample standard deviation of returns; 0 when undefined.
    pub mean_std_ratio: f64,
}

impl CalendarSummary {
    pub fn from_returns(returns: &[f64]) -> Self {
        let n = returns.len();
        if n == 0 {
            return Self::default();
        }
        let mean = returns.iter().sum::<f64>() / n as f64;
        let mut sorted = returns.to_vec();
        sorted.sort_by(f64::total_cmp);
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        let std = if n > 1 {
            (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let wins = returns.iter().filter(|&&r| r > 0.0).count();

        Self {
            trades: n,
            wins,
            win_rate: wins as f64 / n as f64 * 100.0,
            mean_return_pct: mean,
            median_return_pct: median,
            best_pct: sorted[n - 1],
            worst_pct: sorted[0],
            mean_std_ratio: if std > 0.0 { mean / std } else { 0.0 },
        }
    }
}

/// Result of a weekday-filtered holding strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayBacktest {
    /// Selected weekdays, Monday = 0.
    pub days: Vec<u32>,
    pub hold_bars: usize,
    pub direction: Direction,
    pub trades: Vec<CalendarTrade>,
    pub summary: CalendarSummary,
}

fn hold_trade(bars: &[Bar], i: usize, hold_bars: usize, direction: Direction) -> Option<CalendarTrade> {
    let exit = i + hold_bars;
    if hold_bars == 0 || exit >= bars.len() {
        return None;
    }
    let (entry, out) = (&bars[i], &bars[exit]);
    let sign = direction.trade_side().sign();
    Some(CalendarTrade {
        entry_time: entry.timestamp,
        exit_time: out.timestamp,
        entry_price: entry.close,
        exit_price: out.close,
        return_pct: sign * (out.close - entry.close) / entry.close * 100.0,
    })
}

fn finish(days: &[u32], hold_bars: usize, direction: Direction, trades: Vec<CalendarTrade>) -> WeekdayBacktest {
    let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
    WeekdayBacktest {
        days: days.to_vec(),
        hold_bars,
        direction,
        summary: CalendarSummary::from_returns(&returns),
        trades,
    }
}

/// Enter at the close of every bar falling on a selected weekday and exit at
/// the close `hold_bars` later. Long for bottoms, short for tops. Entries
/// without a complete holding period are skipped.
pub fn weekday_backtest(
    bars: &[Bar],
    days: &[u32],
    hold_bars: usize,
    direction: Direction,
    offset: FixedOffset,
) -> WeekdayBacktest {
    let trades = bars
        .iter()
        .enumerate()
        .filter(|(_, b)| days.contains(&local(b.timestamp, offset).weekday().num_days_from_monday()))
        .filter_map(|(i, _)| hold_trade(bars, i, hold_bars, direction))
        .collect();
    finish(days, hold_bars, direction, trades)
}

/// Same holding rule, entered only at extrema whose signal bar falls on a
/// selected weekday.
pub fn extremum_weekday_backtest(
    extrema: &[Extremum],
    bars: &[Bar],
    days: &[u32],
    hold_bars: usize,
    offset: FixedOffset,
) -> Option<WeekdayBacktest> {
    let direction = extrema.first()?.direction;
    let trades = extrema
        .iter()
        .filter(|e| days.contains(&local(e.timestamp, offset).weekday().num_days_from_monday()))
        .filter_map(|e| hold_trade(bars, e.index, hold_bars, e.direction))
        .collect();
    Some(finish(days, hold_bars, direction, trades))
}

/// Parse weekday names or numbers ("mon", "Tuesday", "0") into Monday-based indices.
pub fn parse_weekdays(input: &str) -> Result<Vec<u32>> {
    let mut days = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let day = if let Ok(n) = part.parse::<u32>() {
            n
        } else {
            let lower = part.to_lowercase();
            DAY_NAMES
                .iter()
                .position(|name| lower.len() >= 3 && name.to_lowercase().starts_with(&lower))
                .map(|p| p as u32)
                .ok_or_else(|| AnalysisError::config(format!("unknown weekday '{}'", part)))?
        };
        if day > 6 {
            return Err(AnalysisError::config(format!(
                "weekday index {} out of range 0..=6",
                day
            )));
        }
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(AnalysisError::config("no weekdays selected"));
    }
    days.sort_unstable();
    Ok(days)
}
