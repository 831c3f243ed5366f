//! Property-based tests using proptest for invariant testing.
//!
//! These tests verify that:
//! 1. Scores stay within [0, 10] for any series and either scheme
//! 2. Detection and scoring are deterministic
//! 3. Confirmation only ever reads bars after the signal bar
//! 4. Trade simulation always terminates within its bar budget
//! 5. Tiers are consistent with the criteria that produced them

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use turnpoint::backtest::{simulate, TradePlan};
use turnpoint::config::{AnalysisConfig, ScoringMethod};
use turnpoint::confirmation::confirm;
use turnpoint::detector::detect_extrema;
use turnpoint::indicators::{IndicatorConfig, IndicatorFrame};
use turnpoint::types::{Bar, Direction, ExitReason, Tier, TradeSide};
use turnpoint::Analyzer;

// ============================================================================
// Generators
// ============================================================================

/// Random-walk series of valid 4h bars.
fn series_strategy(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<Bar>> {
    (
        50.0..50_000.0f64,
        prop::collection::vec((-0.04..0.04f64, 0.0..0.02f64, 0.0..0.02f64, 1.0..1_000.0f64), min_len..max_len),
    )
        .prop_map(|(start_price, steps)| {
            let start = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
            let mut price = start_price;
            steps
                .into_iter()
                .enumerate()
                .map(|(i, (ret, up, down, volume))| {
                    let open = price;
                    price *= 1.0 + ret;
                    let close = price;
                    let high = open.max(close) * (1.0 + up);
                    let low = open.min(close) * (1.0 - down);
                    Bar::new(start + Duration::hours(4 * i as i64), open, high, low, close, volume)
                })
                .collect()
        })
}

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Bottom), Just(Direction::Top)]
}

fn method_strategy() -> impl Strategy<Value = ScoringMethod> {
    prop_oneof![Just(ScoringMethod::Points), Just(ScoringMethod::Category)]
}

fn analyzer(lookback: usize, method: ScoringMethod) -> Analyzer {
    let mut config = AnalysisConfig::default();
    config.bottoms.lookback_periods = lookback;
    config.tops.lookback_periods = lookback;
    config.scoring.method = method;
    config.backtest.min_score = 0.0;
    Analyzer::new(config).unwrap()
}

// ============================================================================
// Scoring Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn scores_are_clamped(
        bars in series_strategy(60, 260),
        direction in direction_strategy(),
        method in method_strategy(),
        lookback in 3usize..15,
    ) {
        let report = analyzer(lookback, method).analyze(&bars, direction).unwrap();
        for r in &report.extrema {
            prop_assert!(r.score().is_finite());
            prop_assert!((0.0..=10.0).contains(&r.score()));
        }
    }

    #[test]
    fn analysis_is_deterministic(
        bars in series_strategy(60, 200),
        direction in direction_strategy(),
        method in method_strategy(),
    ) {
        let analyzer = analyzer(8, method);
        let first = analyzer.analyze(&bars, direction).unwrap();
        let second = analyzer.analyze(&bars, direction).unwrap();
        prop_assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}

// ============================================================================
// Detection Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tiers_match_their_evidence(
        bars in series_strategy(40, 300),
        direction in direction_strategy(),
        lookback in 2usize..12,
    ) {
        let mut config = AnalysisConfig::default();
        config.bottoms.lookback_periods = lookback;
        config.tops.lookback_periods = lookback;
        let params = config.params(direction).clone();
        let frame = IndicatorFrame::compute(&bars, &config.indicators);

        let found = detect_extrema(&frame, direction, &params);
        prop_assert!(found.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        for e in &found {
            prop_assert_eq!(e.price, direction.extreme_price(&bars[e.index]));
            match e.tier {
                Tier::Simple => prop_assert_eq!(e.strength, 1.0),
                Tier::Confirmed => {
                    prop_assert!(e.strength == 1.5 || e.strength == 2.0);
                    prop_assert!(e.metrics.reversal_pct.unwrap() >= params.min_bounce_percent);
                }
                Tier::Major => {
                    prop_assert_eq!(e.strength, 3.0);
                    prop_assert!(e.metrics.reversal_pct.unwrap() >= params.min_bounce_percent);
                    prop_assert!(e.metrics.prior_move_pct.is_some());
                    prop_assert!(frame.volume_ratio[e.index].unwrap() >= params.volume_threshold);
                }
            }
        }
    }

    #[test]
    fn confirmation_never_reads_the_past(
        bars in series_strategy(40, 150),
        direction in direction_strategy(),
        noise in -0.3..0.3f64,
    ) {
        let frame = IndicatorFrame::compute(&bars, &IndicatorConfig::default());
        let found = detect_extrema(&frame, direction, &{
            let mut p = AnalysisConfig::default().params(direction).clone();
            p.lookback_periods = 4;
            p
        });

        for e in &found {
            let before = confirm(e, &frame, 4, 0.05);

            // Rewrite every bar up to and including the signal bar.
            let mut altered = bars.clone();
            for bar in altered.iter_mut().take(e.index + 1) {
                let k = 1.0 + noise;
                bar.open *= k;
                bar.high *= k;
                bar.low *= k;
                bar.close *= k;
            }
            let mut altered_frame = IndicatorFrame::compute(&altered, &IndicatorConfig::default());
            // Keep the midline fixed so only the bars themselves differ.
            altered_frame.bb_mid = frame.bb_mid.clone();
            let after = confirm(e, &altered_frame, 4, 0.05);
            prop_assert_eq!(before, after);
        }
    }
}

// ============================================================================
// Simulation Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn simulation_terminates_within_budget(
        bars in series_strategy(2, 200),
        long in any::<bool>(),
        stop_pct in 0.005..0.2f64,
        target_pct in 0.005..0.4f64,
        max_bars in 1usize..120,
    ) {
        let entry_price = bars[0].close;
        let (side, stop, target) = if long {
            (TradeSide::Long, entry_price * (1.0 - stop_pct), entry_price * (1.0 + target_pct))
        } else {
            (TradeSide::Short, entry_price * (1.0 + stop_pct), entry_price * (1.0 - target_pct))
        };
        let plan = TradePlan::new(side, 0, entry_price, stop, target);
        let trade = simulate(&plan, &bars, max_bars).unwrap();

        prop_assert!(trade.exit_index > trade.entry_index);
        prop_assert!(trade.bars_held >= 1 && trade.bars_held <= max_bars);
        prop_assert!(trade.exit_index < bars.len());
        match trade.exit_reason {
            ExitReason::StopLoss => prop_assert_eq!(trade.exit_price, stop),
            ExitReason::TakeProfit => prop_assert_eq!(trade.exit_price, target),
            ExitReason::Timeout => prop_assert_eq!(trade.exit_price, bars[trade.exit_index].close),
        }
        prop_assert!(trade.pnl.is_finite());
    }
}
