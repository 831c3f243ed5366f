//! Turnpoint - price extrema detection, scoring and backtesting.
//!
//! # Overview
//!
//! Turnpoint scans an OHLCV candle series for local bottoms and tops and
//! tells you how much each one is worth:
//!
//! - **Detection**: three tiers (simple, confirmed, major) from rolling
//!   windows, bounce/pullback requirements and a volume filter
//! - **Scoring**: a weighted category scheme or an additive point scheme,
//!   both on a 0-10 scale with the same labels
//! - **Confirmation**: strictly forward-looking checks that never leak future
//!   bars into detection or scoring
//! - **Backtesting**: stop/target/timeout simulation of trades anchored on
//!   extrema, with win rate, profit factor, drawdown and Sharpe
//! - **Temporal patterns**: frequency by hour, weekday and trading session,
//!   plus a weekday holding strategy
//! - **Intrabar timing**: candle-shape estimates refined from finer bars or a
//!   persisted cache
//!
//! Bottoms and tops share one code path: every algorithm is generic over
//! [`Direction`].
//!
//! # Quick Start
//!
//! ```no_run
//! use turnpoint::{data::load_csv, AnalysisConfig, Analyzer, Direction};
//!
//! let bars = load_csv("data/BTCUSDT_4h.csv", &Default::default()).unwrap();
//! let analyzer = Analyzer::new(AnalysisConfig::default()).unwrap();
//!
//! let report = analyzer.analyze(&bars, Direction::Bottom).unwrap();
//! for bottom in report.ranked(5) {
//!     println!(
//!         "{} {:.2} score {:.1}",
//!         bottom.extremum.timestamp,
//!         bottom.extremum.price,
//!         bottom.score()
//!     );
//! }
//! println!("Win rate: {:.1}%", report.backtest.stats.win_rate);
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core data types (Bar, Direction, Tier, Extremum, TradeRecord)
//! - [`data`]: CSV loading, series preparation and quality checks
//! - [`rolling`]: Streaming window statistics used by the indicators
//! - [`indicators`]: RSI, Bollinger bands, ATR and volume z-scores
//! - [`detector`]: Three-tier extremum detection
//! - [`scoring`]: Category and point scoring schemes
//! - [`confirmation`]: Forward-looking confirmation
//! - [`backtest`]: Trade simulation and statistics
//! - [`patterns`]: Temporal aggregation and weekday strategy
//! - [`exact_time`]: Intrabar timing of extrema
//! - [`analyzer`]: The end-to-end pipeline
//! - [`report`]: Terminal tables and CSV/JSON export
//! - [`config`]: TOML configuration file support

pub mod analyzer;
pub mod backtest;
pub mod config;
pub mod confirmation;
pub mod data;
pub mod detector;
pub mod error;
pub mod exact_time;
pub mod indicators;
pub mod patterns;
pub mod report;
pub mod rolling;
pub mod scoring;
pub mod types;

// Re-exports for convenience
pub use analyzer::{AnalysisReport, Analyzer, ExtremumReport, TierCounts};
pub use backtest::{run_backtest, simulate, BacktestResult, TradePlan, TradeStats};
pub use config::{AnalysisConfig, DetectionParams, ScoringMethod, TakeProfitMode};
pub use confirmation::{confirm, ConfirmationResult};
pub use error::{AnalysisError, Result};
pub use indicators::IndicatorFrame;
pub use scoring::{MarketContext, ScoreBreakdown, ScoredExtremum};
pub use types::{Bar, Direction, ExitReason, Extremum, Tier, TradeRecord, TradeSide};

// Data handling re-exports
pub use data::{data_quality_report, load_csv, DataConfig, DataGap, DataQualityReport};
