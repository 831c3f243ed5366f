//! Terminal rendering and file export of analysis results.

use crate::analyzer::{AnalysisReport, ExtremumReport};
use crate::backtest::{BacktestResult, GroupStats, TradeStats};
use crate::data::DataQualityReport;
use crate::error::Result;
use crate::patterns::{Bucket, PatternSummary, WeekdayBacktest, DAY_NAMES};
use crate::scoring::{Confidence, ScoreComponents};
use crate::types::TradeRecord;
use colored::Colorize;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tabled::{builder::Builder, settings::Style};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

fn rule() -> String {
    "═".repeat(60).blue().to_string()
}

fn format_pct(pct: f64) -> String {
    if pct >= 0.0 {
        format!("+{:.2}%", pct).green().to_string()
    } else {
        format!("{:.2}%", pct).red().to_string()
    }
}

fn format_score(score: f64) -> String {
    let text = format!("{:.1}", score);
    match Confidence::from_score(score) {
        Confidence::VeryHigh => text.red().bold().to_string(),
        Confidence::High => text.yellow().bold().to_string(),
        Confidence::Medium => text.yellow().to_string(),
        _ => text,
    }
}

fn opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.*}", precision, v))
}

/// Table of extrema, one row each.
pub fn extrema_table(extrema: &[&ExtremumReport]) -> String {
    let mut builder = Builder::new();
    builder.push_record([
        "Time", "Exact", "Price", "Tier", "Score", "Class", "RSI", "Vol ratio", "Reversal %",
        "Confirmed",
    ]);
    for r in extrema {
        let e = &r.extremum;
        builder.push_record([
            e.timestamp.format(DATE_FORMAT).to_string(),
            r.exact_time.time.format("%H:%M:%S").to_string(),
            format!("{:.2}", e.price),
            e.tier.to_string(),
            format_score(r.score()),
            r.breakdown.category.to_string(),
            opt(e.metrics.rsi, 1),
            opt(e.metrics.volume_ratio, 2),
            opt(e.metrics.reversal_pct, 2),
            match r.confirmation.bars_to_confirm {
                Some(bars) if r.confirmation.confirmed => format!("yes ({} bars)", bars),
                _ => r.confirmation.reason.to_string(),
            },
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

/// Per-criterion detail of one score.
pub fn breakdown_table(report: &ExtremumReport) -> String {
    let mut builder = Builder::new();
    builder.push_record(["Component", "Value"]);
    match &report.breakdown.components {
        ScoreComponents::Category { scores, weights } => {
            for (name, score, weight) in [
                ("technical", scores.technical, weights.technical),
                ("volume", scores.volume, weights.volume),
                ("pattern", scores.pattern, weights.pattern),
                ("temporal", scores.temporal, weights.temporal),
                ("market", scores.market, weights.market),
            ] {
                builder.push_record([name.to_string(), format!("{:.1} x {:.2}", score, weight)]);
            }
        }
        ScoreComponents::Points {
            points,
            raw_score,
            adjustments,
        } => {
            for (name, value) in [
                ("band excess", points.band_excess),
                ("volume", points.volume),
                ("wick", points.wick),
                ("rsi zone", points.rsi_zone),
                ("divergence", points.divergence),
                ("local dominance", points.local_dominance),
                ("round number", points.round_number),
                ("momentum pressure", points.momentum_pressure),
            ] {
                builder.push_record([name.to_string(), format!("{:.0}", value)]);
            }
            builder.push_record(["raw score".to_string(), format!("{:.1}", raw_score)]);
            for adj in adjustments {
                builder.push_record([adj.reason.clone(), format!("{:+.0}", adj.delta)]);
            }
        }
    }
    builder.push_record(["score".to_string(), format!("{:.1}", report.score())]);
    builder.build().with(Style::rounded()).to_string()
}

fn group_table(title: &str, groups: &[GroupStats]) -> String {
    let mut builder = Builder::new();
    builder.push_record([title, "Trades", "Win rate", "Avg pnl"]);
    for g in groups {
        builder.push_record([
            g.label.clone(),
            g.trades.to_string(),
            format!("{:.1}%", g.win_rate),
            format!("{:.2}%", g.avg_pnl_pct),
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

pub fn trades_table(trades: &[TradeRecord], limit: usize) -> String {
    let mut builder = Builder::new();
    builder.push_record([
        "Side", "Entry", "Entry px", "Stop", "Target", "Exit", "Exit px", "Reason", "Bars", "Pnl %",
    ]);
    let shown = if limit > 0 { limit.min(trades.len()) } else { trades.len() };
    for t in &trades[..shown] {
        builder.push_record([
            t.side.to_string(),
            t.entry_time.format(DATE_FORMAT).to_string(),
            format!("{:.2}", t.entry_price),
            format!("{:.2}", t.stop_price),
            format!("{:.2}", t.target_price),
            t.exit_time.format(DATE_FORMAT).to_string(),
            format!("{:.2}", t.exit_price),
            t.exit_reason.to_string(),
            t.bars_held.to_string(),
            format_pct(t.pnl_pct),
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

fn bucket_table(title: &str, buckets: &[Bucket], skip_empty: bool) -> String {
    let mut builder = Builder::new();
    builder.push_record([title, "Count", "Share", "Avg strength"]);
    for b in buckets.iter().filter(|b| !skip_empty || b.count > 0) {
        builder.push_record([
            b.label.clone(),
            b.count.to_string(),
            format!("{:.1}%", b.percentage),
            opt(b.avg_strength, 2),
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

/// Weekday rows by hour columns, blanks for zero.
pub fn day_hour_table(summary: &PatternSummary) -> String {
    let mut builder = Builder::new();
    let mut header = vec!["".to_string()];
    header.extend((0..24).map(|h| format!("{:02}", h)));
    builder.push_record(header);
    for (d, row) in summary.day_hour.iter().enumerate() {
        let mut record = vec![DAY_NAMES[d][..3].to_string()];
        record.extend(
            row.iter()
                .map(|&c| if c > 0 { c.to_string() } else { String::new() }),
        );
        builder.push_record(record);
    }
    builder.build().with(Style::modern()).to_string()
}

/// Terminal printers.
pub struct ReportFormatter;

impl ReportFormatter {
    pub fn print_analysis(report: &AnalysisReport, top: usize) {
        println!();
        println!("{}", rule());
        println!(
            "{}",
            format!(" {} ANALYSIS ", report.direction.plural().to_uppercase())
                .bold()
                .blue()
        );
        println!("{}", rule());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Bars:            {:>10}", report.bars);
        if let (Some(start), Some(end)) = (report.start, report.end) {
            println!(
                "  Period:          {} to {}",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            );
        }
        if let Some(secs) = report.bar_spacing_secs {
            println!("  Bar spacing:     {:>9}m", secs / 60);
        }
        println!("  Scoring:         {:>10}", report.scoring_method);
        println!();

        println!("{}", "Detection".bold().underline());
        println!("  Extrema:         {:>10}", report.extrema.len());
        println!("  Simple:          {:>10}", report.tier_counts.simple);
        println!("  Confirmed tier:  {:>10}", report.tier_counts.confirmed);
        println!("  Major tier:      {:>10}", report.tier_counts.major);
        println!("  Reversal seen:   {:>10}", report.confirmed_count());
        if let Some(mean) = report.mean_score() {
            println!("  Mean score:      {:>10.2}", mean);
        }
        println!();

        if report.extrema.is_empty() {
            println!("No {} detected.", report.direction.plural());
        } else {
            println!("{}", format!("Top {} by score", top).bold().underline());
            let ranked = report.ranked(top);
            println!("{}", extrema_table(&ranked));
            if let Some(best) = ranked.first() {
                println!();
                println!("{}", "Best signal".bold().underline());
                println!("{}", breakdown_table(best));
                println!("  {}", best.breakdown.recommendation.italic());
            }
        }
        println!();

        Self::print_backtest(&report.backtest);
        Self::print_patterns(&report.patterns);
        println!("{}", rule());
    }

    pub fn print_stats(stats: &TradeStats) {
        println!("{}", "Trade Statistics".bold().underline());
        println!("  Total Trades:    {:>12}", stats.total_trades);
        println!(
            "  Winning Trades:  {:>12}  ({:.1}%)",
            stats.wins, stats.win_rate
        );
        println!("  Losing Trades:   {:>12}", stats.losses);
        println!("  Profit Factor:   {:>12.2}", stats.profit_factor);
        println!("  Sharpe Ratio:    {:>12.2}", stats.sharpe_ratio);
        println!("  Avg Bars Held:   {:>12.1}", stats.avg_bars_held);
        println!();
        println!("{}", "Trade P&L".bold().underline());
        println!("  Average Win:     {:>11.2}%", stats.avg_win_pct);
        println!("  Average Loss:    {:>11.2}%", stats.avg_loss_pct);
        println!("  Largest Win:     {:>11.2}%", stats.largest_win_pct);
        println!("  Largest Loss:    {:>11.2}%", stats.largest_loss_pct);
        println!("  Expectancy:      {:>11.2}%", stats.expectancy_pct);
        println!("  Total:           {}", format_pct(stats.total_pnl_pct));
        println!("  Max Drawdown:    {:>11.2}%", stats.max_drawdown_pct);
        println!();
    }

    pub fn print_backtest(result: &BacktestResult) {
        println!("{}", "Backtest".bold().underline());
        println!(
            "  Filtered: {}  Unconfirmed: {}  Skipped: {}",
            result.filtered, result.unconfirmed, result.skipped
        );
        println!();
        if result.trades.is_empty() {
            println!("No trades.");
            println!();
            return;
        }
        Self::print_stats(&result.stats);
        println!("{}", group_table("Tier", &result.stats.by_tier));
        println!("{}", group_table("Exit", &result.stats.by_exit_reason));
        println!();
    }

    pub fn print_trades(trades: &[TradeRecord], limit: usize) {
        if trades.is_empty() {
            println!("No trades.");
            return;
        }
        println!("{}", trades_table(trades, limit));
        if limit > 0 && trades.len() > limit {
            println!("... and {} more", trades.len() - limit);
        }
    }

    pub fn print_patterns(summary: &PatternSummary) {
        println!(
            "{}",
            format!("Patterns ({}, UTC{:+})", summary.timezone, summary.utc_offset_hours)
                .bold()
                .underline()
        );
        if summary.total == 0 {
            println!("No extrema to aggregate.");
            println!();
            return;
        }
        if let Some(h) = summary.most_frequent_hour() {
            println!("  Most frequent hour:    {:02}:00", h);
        }
        if let Some(d) = summary.most_frequent_weekday() {
            println!("  Most frequent day:     {}", DAY_NAMES[d as usize]);
        }
        if let Some(s) = summary.most_frequent_session() {
            println!("  Most frequent session: {}", s);
        }
        println!();
        println!("{}", bucket_table("Session", &summary.by_session, false));
        println!("{}", bucket_table("Day", &summary.by_weekday, false));
        println!("{}", bucket_table("Hour", &summary.by_hour, true));
        println!("{}", bucket_table("Tier", &summary.by_tier, false));
        println!("{}", bucket_table("Year", &summary.by_year, false));
        println!("{}", day_hour_table(summary));
        println!();
    }

    pub fn print_weekday(result: &WeekdayBacktest) {
        let days: Vec<&str> = result.days.iter().map(|&d| DAY_NAMES[d as usize]).collect();
        println!(
            "{}",
            format!(
                "Weekday strategy: {} on {}, hold {} bars",
                result.direction.trade_side(),
                days.join(", "),
                result.hold_bars
            )
            .bold()
            .underline()
        );
        let s = &result.summary;
        println!("  Trades:          {:>10}", s.trades);
        println!("  Wins:            {:>10}  ({:.1}%)", s.wins, s.win_rate);
        println!("  Mean return:     {}", format_pct(s.mean_return_pct));
        println!("  Median return:   {}", format_pct(s.median_return_pct));
        println!("  Best:            {}", format_pct(s.best_pct));
        println!("  Worst:           {}", format_pct(s.worst_pct));
        println!("  Mean / std:      {:>10.2}", s.mean_std_ratio);
        println!();
    }

    pub fn print_quality(report: &DataQualityReport) {
        println!("{}", "Data quality".bold().underline());
        println!("{}", report.summary());
        if report.is_acceptable() {
            println!("{}", "Series is usable for analysis.".green());
        } else {
            println!("{}", "Series needs cleaning before analysis.".red());
        }
    }
}

/// Write extrema with their scores to CSV.
pub fn export_extrema_csv(extrema: &[ExtremumReport], path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writeln!(
        writer,
        "timestamp,exact_time,time_source,direction,price,tier,score,category,rsi,volume_ratio,reversal_pct,confirmed"
    )?;
    for r in extrema {
        let e = &r.extremum;
        writeln!(
            writer,
            "{},{},{:?},{},{:.4},{},{:.2},{},{},{},{},{}",
            e.timestamp.to_rfc3339(),
            r.exact_time.time.to_rfc3339(),
            r.exact_time.source,
            e.direction,
            e.price,
            e.tier,
            r.score(),
            r.breakdown.category,
            opt(e.metrics.rsi, 2),
            opt(e.metrics.volume_ratio, 4),
            opt(e.metrics.reversal_pct, 4),
            r.confirmation.confirmed,
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Write simulated trades to CSV.
pub fn export_trades_csv(trades: &[TradeRecord], path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writeln!(
        writer,
        "side,entry_time,entry_price,stop_price,target_price,exit_time,exit_price,exit_reason,bars_held,pnl,pnl_pct"
    )?;
    for t in trades {
        writeln!(
            writer,
            "{},{},{:.4},{:.4},{:.4},{},{:.4},{},{},{:.4},{:.4}",
            t.side,
            t.entry_time.to_rfc3339(),
            t.entry_price,
            t.stop_price,
            t.target_price,
            t.exit_time.to_rfc3339(),
            t.exit_price,
            t.exit_reason,
            t.bars_held,
            t.pnl,
            t.pnl_pct,
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Pretty-printed JSON of any serializable result.
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn export_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}
