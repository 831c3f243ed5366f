//! Bar-by-bar trade simulation anchored on extrema.
//!
//! Bottoms open long trades and tops open short trades. Each trade walks
//! forward from the bar after entry until the stop, the target or the
//! `max_bars` limit is hit. When one bar breaches both stop and target the
//! stop wins: a single OHLC bar cannot tell which level traded first, so the
//! simulator assumes the worse outcome.

use crate::config::{BacktestSettings, ConfirmationConfig, TakeProfitMode};
use crate::confirmation::confirm_with;
use crate::indicators::IndicatorFrame;
use crate::scoring::ScoredExtremum;
use crate::types::{Bar, ExitReason, Extremum, Tier, TradeRecord, TradeSide};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Entry, stop and target of one prospective trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub side: TradeSide,
    pub entry_index: usize,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub tier: Option<Tier>,
    pub score: Option<f64>,
}

impl TradePlan {
    pub fn new(
        side: TradeSide,
        entry_index: usize,
        entry_price: f64,
        stop_price: f64,
        target_price: f64,
    ) -> Self {
        Self {
            side,
            entry_index,
            entry_price,
            stop_price,
            target_price,
            tier: None,
            score: None,
        }
    }

    /// Build a plan that enters at the close of bar `entry_index`.
    ///
    /// The stop sits `stop_buffer` beyond the extremum price. Returns `None`
    /// when the entry bar does not exist, the band target is undefined, or the
    /// stop or target lies on the wrong side of the entry.
    pub fn from_extremum(
        extremum: &Extremum,
        frame: &IndicatorFrame,
        entry_index: usize,
        settings: &BacktestSettings,
    ) -> Option<Self> {
        let bar = frame.bars().get(entry_index)?;
        let side = extremum.direction.trade_side();
        let entry_price = bar.close;
        let stop_price = extremum.price - side.sign() * settings.stop_buffer;

        if (entry_price - stop_price) * side.sign() <= 0.0 {
            debug!(
                "skipping {} at {}: entry {:.2} already beyond stop {:.2}",
                extremum.direction, extremum.timestamp, entry_price, stop_price
            );
            return None;
        }

        let target_price = match settings.take_profit_mode {
            TakeProfitMode::BandMid => frame.bb_mid[entry_index],
            TakeProfitMode::BandOuter => match side {
                TradeSide::Long => frame.bb_high[entry_index],
                TradeSide::Short => frame.bb_low[entry_index],
            },
            TakeProfitMode::RMultiple(r) => {
                Some(entry_price + side.sign() * r * (entry_price - stop_price).abs())
            }
        };
        let Some(target_price) = target_price else {
            debug!(
                "skipping {} at {}: band target undefined at entry bar {}",
                extremum.direction, extremum.timestamp, entry_index
            );
            return None;
        };
        if (target_price - entry_price) * side.sign() <= 0.0 {
            debug!(
                "skipping {} at {}: target {:.2} on the wrong side of entry {:.2}",
                extremum.direction, extremum.timestamp, target_price, entry_price
            );
            return None;
        }

        Some(Self {
            side,
            entry_index,
            entry_price,
            stop_price,
            target_price,
            tier: Some(extremum.tier),
            score: None,
        })
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Walk forward from `plan.entry_index + 1` for at most `max_bars` bars.
///
/// Returns `None` when there is no bar after the entry. Otherwise always
/// returns a record whose exit index is greater than the entry index.
pub fn simulate(plan: &TradePlan, bars: &[Bar], max_bars: usize) -> Option<TradeRecord> {
    let entry = plan.entry_index;
    if max_bars == 0 || entry + 1 >= bars.len() {
        return None;
    }
    let last = (entry + max_bars).min(bars.len() - 1);

    let mut exit = None;
    for (j, bar) in bars.iter().enumerate().take(last + 1).skip(entry + 1) {
        let (stop_hit, target_hit) = match plan.side {
            TradeSide::Long => (bar.low <= plan.stop_price, bar.high >= plan.target_price),
            TradeSide::Short => (bar.high >= plan.stop_price, bar.low <= plan.target_price),
        };
        if stop_hit {
            exit = Some((j, plan.stop_price, ExitReason::StopLoss));
            break;
        }
        if target_hit {
            exit = Some((j, plan.target_price, ExitReason::TakeProfit));
            break;
        }
    }
    let (exit_index, exit_price, exit_reason) =
        exit.unwrap_or((last, bars[last].close, ExitReason::Timeout));

    let pnl = plan.side.sign() * (exit_price - plan.entry_price);
    Some(TradeRecord {
        side: plan.side,
        entry_index: entry,
        entry_time: bars[entry].timestamp,
        entry_price: plan.entry_price,
        stop_price: plan.stop_price,
        target_price: plan.target_price,
        exit_index,
        exit_time: bars[exit_index].timestamp,
        exit_price,
        exit_reason,
        bars_held: exit_index - entry,
        pnl,
        pnl_pct: pnl / plan.entry_price * 100.0,
        tier: plan.tier,
        score: plan.score,
    })
}

/// Win rate and mean return of a subset of trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub label: String,
    pub trades: usize,
    pub win_rate: f64,
    pub avg_pnl_pct: f64,
}

impl GroupStats {
    fn from_trades(label: impl Into<String>, trades: &[&TradeRecord]) -> Self {
        let n = trades.len();
        let wins = trades.iter().filter(|t| t.is_win()).count();
        Self {
            label: label.into(),
            trades: n,
            win_rate: if n > 0 { wins as f64 / n as f64 * 100.0 } else { 0.0 },
            avg_pnl_pct: if n > 0 {
                trades.iter().map(|t| t.pnl_pct).sum::<f64>() / n as f64
            } else {
                0.0
            },
        }
    }
}

/// Summary statistics over a set of trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent of trades with positive pnl.
    pub win_rate: f64,
    pub avg_win_pct: f64,
    /// Mean pnl percent of losing trades (negative).
    pub avg_loss_pct: f64,
    /// Mean pnl percent over all trades.
    pub expectancy_pct: f64,
    /// Gross wins over gross losses on absolute pnl (price units, not
    /// percent); 0 when there are no losses.
    pub profit_factor: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    /// Deepest dip of cumulative absolute pnl below its running peak (<= 0).
    pub max_drawdown: f64,
    /// Same on cumulative percent pnl.
    pub max_drawdown_pct: f64,
    /// Mean over standard deviation of pnl percent, annualized.
    pub sharpe_ratio: f64,
    pub avg_bars_held: f64,
    pub largest_win_pct: f64,
    pub largest_loss_pct: f64,
    pub by_tier: Vec<GroupStats>,
    pub by_exit_reason: Vec<GroupStats>,
}

fn max_drawdown(values: impl Iterator<Item = f64>) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst: f64 = 0.0;
    for v in values {
        cumulative += v;
        peak = peak.max(cumulative);
        worst = worst.min(cumulative - peak);
    }
    worst
}

fn sample_std(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    if values.iter().all(|v| *v == values[0]) {
        return Some(0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    Some(var.sqrt())
}

impl TradeStats {
    pub fn from_trades(trades: &[TradeRecord], periods_per_year: f64) -> Self {
        let n = trades.len();
        if n == 0 {
            return Self::default();
        }

        let pnl_pcts: Vec<f64> = trades.iter().map(|t| t.pnl_pct).collect();
        let wins: Vec<&TradeRecord> = trades.iter().filter(|t| t.is_win()).collect();
        let losses: Vec<&TradeRecord> = trades.iter().filter(|t| t.is_loss()).collect();

        let gross_win: f64 = wins.iter().map(|t| t.pnl).sum();
        let gross_loss: f64 = losses.iter().map(|t| t.pnl).sum();
        let mean_of = |set: &[&TradeRecord]| {
            if set.is_empty() {
                0.0
            } else {
                set.iter().map(|t| t.pnl_pct).sum::<f64>() / set.len() as f64
            }
        };

        let expectancy = pnl_pcts.iter().sum::<f64>() / n as f64;
        let sharpe = match sample_std(&pnl_pcts) {
            Some(std) if std > 0.0 => expectancy / std * periods_per_year.sqrt(),
            _ => 0.0,
        };

        let mut by_tier = Vec::new();
        for tier in Tier::ALL {
            let subset: Vec<&TradeRecord> = trades.iter().filter(|t| t.tier == Some(tier)).collect();
            if !subset.is_empty() {
                by_tier.push(GroupStats::from_trades(tier.to_string(), &subset));
            }
        }
        let mut by_exit_reason = Vec::new();
        for reason in [ExitReason::StopLoss, ExitReason::TakeProfit, ExitReason::Timeout] {
            let subset: Vec<&TradeRecord> = trades.iter().filter(|t| t.exit_reason == reason).collect();
            if !subset.is_empty() {
                by_exit_reason.push(GroupStats::from_trades(reason.to_string(), &subset));
            }
        }

        Self {
            total_trades: n,
            wins: wins.len(),
            losses: losses.len(),
            win_rate: wins.len() as f64 / n as f64 * 100.0,
            avg_win_pct: mean_of(&wins),
            avg_loss_pct: mean_of(&losses),
            expectancy_pct: expectancy,
            profit_factor: if gross_loss != 0.0 { (gross_win / gross_loss).abs() } else { 0.0 },
            total_pnl: trades.iter().map(|t| t.pnl).sum(),
            total_pnl_pct: pnl_pcts.iter().sum(),
            max_drawdown: max_drawdown(trades.iter().map(|t| t.pnl)),
            max_drawdown_pct: max_drawdown(pnl_pcts.iter().copied()),
            sharpe_ratio: sharpe,
            avg_bars_held: trades.iter().map(|t| t.bars_held as f64).sum::<f64>() / n as f64,
            largest_win_pct: pnl_pcts.iter().copied().fold(0.0, f64::max),
            largest_loss_pct: pnl_pcts.iter().copied().fold(0.0, f64::min),
            by_tier,
            by_exit_reason,
        }
    }
}

/// Trades and statistics of one backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub trades: Vec<TradeRecord>,
    pub stats: TradeStats,
    /// Extrema below the score filter.
    pub filtered: usize,
    /// Extrema that never confirmed.
    pub unconfirmed: usize,
    /// Extrema without a valid plan or without bars after entry.
    pub skipped: usize,
}

/// Backtest every scored extremum passing the score filter.
pub fn run_backtest(
    extrema: &[ScoredExtremum],
    frame: &IndicatorFrame,
    settings: &BacktestSettings,
    confirmation: &ConfirmationConfig,
) -> BacktestResult {
    let mut result = BacktestResult::default();

    for scored in extrema {
        let extremum = &scored.extremum;
        let score = scored.breakdown.score;
        if score < settings.min_score {
            result.filtered += 1;
            continue;
        }

        let entry_index = if settings.require_confirmation {
            let check = confirm_with(extremum, frame, confirmation);
            match check.bars_to_confirm {
                Some(bars) if check.confirmed => extremum.index + bars,
                _ => {
                    debug!(
                        "{} at {} not confirmed: {}",
                        extremum.direction, extremum.timestamp, check.reason
                    );
                    result.unconfirmed += 1;
                    continue;
                }
            }
        } else {
            extremum.index
        };

        let trade = TradePlan::from_extremum(extremum, frame, entry_index, settings)
            .map(|plan| plan.with_score(score))
            .and_then(|plan| simulate(&plan, frame.bars(), settings.max_bars));
        match trade {
            Some(trade) => result.trades.push(trade),
            None => result.skipped += 1,
        }
    }

    result.stats = TradeStats::from_trades(&result.trades, settings.periods_per_year);
    info!(
        "Backtest: {} trades, win rate {:.1}%, expectancy {:.2}% ({} filtered, {} unconfirmed, {} skipped)",
        result.stats.total_trades,
        result.stats.win_rate,
        result.stats.expectancy_pct,
        result.filtered,
        result.unconfirmed,
        result.skipped
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorConfig;
    use crate::types::Direction;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ohlc.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| Bar::new(start + Duration::hours(4 * i as i64), o, h, l, c, 1.0))
            .collect()
    }

    fn trade(pnl_pct: f64, tier: Tier, reason: ExitReason) -> TradeRecord {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TradeRecord {
            side: TradeSide::Long,
            entry_index: 0,
            entry_time: t,
            entry_price: 100.0,
            stop_price: 95.0,
            target_price: 110.0,
            exit_index: 2,
            exit_time: t,
            exit_price: 100.0 + pnl_pct,
            exit_reason: reason,
            bars_held: 2,
            pnl: pnl_pct,
            pnl_pct,
            tier: Some(tier),
            score: None,
        }
    }

    #[test]
    fn test_long_take_profit() {
        let b = bars(&[
            (100.0, 101.0, 99.0, 100.0),
            (100.0, 105.0, 98.0, 104.0),
            (104.0, 111.0, 103.0, 110.0),
        ]);
        let plan = TradePlan::new(TradeSide::Long, 0, 100.0, 95.0, 110.0);
        let r = simulate(&plan, &b, 100).unwrap();
        assert_eq!(r.exit_reason, ExitReason::TakeProfit);
        assert_eq!(r.exit_index, 2);
        assert_eq!(r.exit_price, 110.0);
        assert!((r.pnl_pct - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_short_stop_loss() {
        let b = bars(&[(100.0, 101.0, 99.0, 100.0), (100.0, 106.0, 99.0, 105.0)]);
        let plan = TradePlan::new(TradeSide::Short, 0, 100.0, 105.0, 90.0);
        let r = simulate(&plan, &b, 100).unwrap();
        assert_eq!(r.exit_reason, ExitReason::StopLoss);
        assert_eq!(r.pnl, -5.0);
    }

    #[test]
    fn test_same_bar_breach_resolves_to_stop() {
        let b = bars(&[(100.0, 101.0, 99.0, 100.0), (100.0, 120.0, 80.0, 100.0)]);
        let long = simulate(&TradePlan::new(TradeSide::Long, 0, 100.0, 95.0, 110.0), &b, 10).unwrap();
        let short = simulate(&TradePlan::new(TradeSide::Short, 0, 100.0, 105.0, 90.0), &b, 10).unwrap();
        assert_eq!(long.exit_reason, ExitReason::StopLoss);
        assert_eq!(short.exit_reason, ExitReason::StopLoss);
    }

    #[test]
    fn test_timeout_exits_at_last_scanned_close() {
        let mut ohlc = vec![(100.0, 101.0, 99.0, 100.0)];
        ohlc.extend((1..=10).map(|i| (100.0, 102.0, 98.0, 100.0 + i as f64 * 0.1)));
        let b = bars(&ohlc);
        let plan = TradePlan::new(TradeSide::Long, 0, 100.0, 95.0, 110.0);

        let r = simulate(&plan, &b, 4).unwrap();
        assert_eq!(r.exit_reason, ExitReason::Timeout);
        assert_eq!(r.exit_index, 4);
        assert_eq!(r.exit_price, b[4].close);

        // window clipped by the end of the series
        let r = simulate(&plan, &b, 100).unwrap();
        assert_eq!(r.exit_index, 10);
        assert_eq!(r.exit_price, b[10].close);
    }

    #[test]
    fn test_no_bar_after_entry() {
        let b = bars(&[(100.0, 101.0, 99.0, 100.0)]);
        let plan = TradePlan::new(TradeSide::Long, 0, 100.0, 95.0, 110.0);
        assert!(simulate(&plan, &b, 100).is_none());
    }

    #[test]
    fn test_plan_from_bottom() {
        let mut ohlc: Vec<(f64, f64, f64, f64)> = (0..25).map(|_| (100.0, 101.0, 99.0, 100.0)).collect();
        ohlc.push((100.0, 100.5, 90.0, 92.0));
        let b = bars(&ohlc);
        let frame = IndicatorFrame::compute(&b, &IndicatorConfig::default());
        let bottom = Extremum {
            index: 25,
            timestamp: b[25].timestamp,
            direction: Direction::Bottom,
            price: 90.0,
            tier: Tier::Simple,
            strength: 1.0,
            metrics: Default::default(),
            estimated_time: b[25].timestamp,
        };

        let settings = BacktestSettings {
            stop_buffer: 2.0,
            take_profit_mode: TakeProfitMode::RMultiple(2.0),
            ..BacktestSettings::default()
        };
        let plan = TradePlan::from_extremum(&bottom, &frame, 25, &settings).unwrap();
        assert_eq!(plan.side, TradeSide::Long);
        assert_eq!(plan.stop_price, 88.0);
        assert_eq!(plan.target_price, 100.0);

        let mid = BacktestSettings {
            stop_buffer: 2.0,
            ..BacktestSettings::default()
        };
        let plan = TradePlan::from_extremum(&bottom, &frame, 25, &mid).unwrap();
        assert_eq!(Some(plan.target_price), frame.bb_mid[25]);

        // a negative buffer puts the stop above a long entry
        let inverted = BacktestSettings {
            stop_buffer: -5.0,
            ..BacktestSettings::default()
        };
        assert!(TradePlan::from_extremum(&bottom, &frame, 25, &inverted).is_none());
    }

    #[test]
    fn test_stats() {
        let trades = vec![
            trade(10.0, Tier::Major, ExitReason::TakeProfit),
            trade(-5.0, Tier::Simple, ExitReason::StopLoss),
            trade(4.0, Tier::Simple, ExitReason::Timeout),
            trade(-3.0, Tier::Simple, ExitReason::StopLoss),
        ];
        let s = TradeStats::from_trades(&trades, 1.0);
        assert_eq!(s.total_trades, 4);
        assert_eq!(s.wins, 2);
        assert_eq!(s.win_rate, 50.0);
        assert_eq!(s.avg_win_pct, 7.0);
        assert_eq!(s.avg_loss_pct, -4.0);
        assert_eq!(s.expectancy_pct, 1.5);
        assert!((s.profit_factor - 14.0 / 8.0).abs() < 1e-12);
        // cumulative 10, 5, 9, 6: deepest dip 5 below the peak of 10
        assert_eq!(s.max_drawdown, -5.0);
        assert_eq!(s.largest_win_pct, 10.0);
        assert_eq!(s.largest_loss_pct, -5.0);
        assert_eq!(s.by_tier.len(), 2);
        assert_eq!(s.by_tier[0].label, "simple");
        assert_eq!(s.by_tier[0].trades, 3);
        assert_eq!(s.by_exit_reason.len(), 3);
        assert!(s.sharpe_ratio > 0.0);
    }

    #[test]
    fn test_stats_degenerate() {
        assert_eq!(TradeStats::from_trades(&[], 2190.0), TradeStats::default());
        let same = vec![
            trade(2.0, Tier::Simple, ExitReason::Timeout),
            trade(2.0, Tier::Simple, ExitReason::Timeout),
        ];
        let s = TradeStats::from_trades(&same, 2190.0);
        assert_eq!(s.sharpe_ratio, 0.0);
        assert_eq!(s.profit_factor, 0.0);
        assert_eq!(s.max_drawdown, 0.0);
    }

    #[test]
    fn test_sharpe_zero_for_identical_fractional_returns() {
        let same: Vec<TradeRecord> = (0..3)
            .map(|_| trade(0.1, Tier::Confirmed, ExitReason::TakeProfit))
            .collect();
        let s = TradeStats::from_trades(&same, 2190.0);
        assert_eq!(s.sharpe_ratio, 0.0);
        assert!((s.expectancy_pct - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_profit_factor_uses_absolute_pnl() {
        let mut win = trade(10.0, Tier::Simple, ExitReason::TakeProfit);
        win.pnl = 300.0;
        let mut loss = trade(-5.0, Tier::Simple, ExitReason::StopLoss);
        loss.pnl = -100.0;
        let s = TradeStats::from_trades(&[win, loss], 1.0);
        assert_eq!(s.profit_factor, 3.0);
        assert_eq!(s.total_pnl, 200.0);
        assert_eq!(s.total_pnl_pct, 5.0);
    }
}
