//! Command-line interface for the extrema analyzer.

use turnpoint::analyzer::{AnalysisReport, Analyzer};
use turnpoint::config::{AnalysisConfig, ScoringMethod, SessionConfig, TakeProfitMode};
use turnpoint::data::{data_quality_report, load_csv, read_csv, DataConfig};
use turnpoint::error::Result;
use turnpoint::exact_time::{ExactTimeCache, ExactTimeProvider, FineBarLookup, TimeSource};
use turnpoint::patterns::{extremum_weekday_backtest, fixed_offset, parse_weekdays, weekday_backtest};
use turnpoint::report::{export_extrema_csv, export_trades_csv, to_json, ReportFormatter};
use turnpoint::scoring::{MarketContext, MomentumState};
use turnpoint::types::Direction;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Turnpoint - detect, score and backtest price extrema in OHLCV series.
#[derive(Parser)]
#[command(name = "turnpoint")]
#[command(version)]
#[command(about = "Detect, score and backtest price bottoms and tops")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that runs the analyzer.
#[derive(Args, Debug, Clone)]
pub struct AnalysisArgs {
    /// Path to OHLCV CSV file
    #[arg(short, long)]
    pub data: PathBuf,

    /// Which extrema to analyze
    #[arg(short = 'D', long, value_enum, default_value = "bottoms")]
    pub direction: DirectionArg,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the local-window lookback (bars)
    #[arg(short, long)]
    pub lookback: Option<usize>,

    /// Override the scoring scheme
    #[arg(long, value_enum)]
    pub scoring: Option<ScoringArg>,

    /// Session timezone preset (utc, paris, bangkok, new_york)
    #[arg(long)]
    pub timezone: Option<String>,

    /// Explicit datetime format for the CSV timestamp column
    #[arg(long)]
    pub date_format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect, score and confirm extrema, then backtest and aggregate them
    Analyze {
        #[command(flatten)]
        args: AnalysisArgs,

        /// Number of top-scored extrema to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Fear & greed index (0-100) for the category scheme
        #[arg(long)]
        fear_greed: Option<f64>,

        /// Broader market momentum for the category scheme
        #[arg(long, value_enum)]
        momentum: Option<MomentumArg>,

        /// Higher-resolution CSV used to refine intrabar timing
        #[arg(long)]
        fine_data: Option<PathBuf>,

        /// JSON cache of intrabar timing results
        #[arg(long)]
        time_cache: Option<PathBuf>,

        /// Write extrema to this CSV file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Backtest trades anchored on scored extrema
    Backtest {
        #[command(flatten)]
        args: AnalysisArgs,

        /// Minimum score to trade (0 disables the filter)
        #[arg(long)]
        min_score: Option<f64>,

        /// Take-profit placement
        #[arg(long, value_enum)]
        take_profit: Option<TakeProfitArg>,

        /// R multiple for --take-profit r-multiple
        #[arg(long, default_value = "3.0")]
        r_multiple: f64,

        /// Stop distance beyond the extremum, in price units
        #[arg(long)]
        stop_buffer: Option<f64>,

        /// Enter at the signal bar without waiting for confirmation
        #[arg(long)]
        no_confirmation: bool,

        /// Number of trades to list (0 = all)
        #[arg(long, default_value = "20")]
        trades: usize,

        /// Write trades to this CSV file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Frequency of extrema by hour, weekday and session
    Patterns {
        #[command(flatten)]
        args: AnalysisArgs,
    },

    /// Weekday holding strategy
    Weekday {
        #[command(flatten)]
        args: AnalysisArgs,

        /// Weekdays to enter on, e.g. "mon,thu" or "0,3"
        #[arg(long, default_value = "mon")]
        days: String,

        /// Bars to hold each position
        #[arg(long, default_value = "42")]
        hold_bars: usize,

        /// Enter only at detected extrema instead of every bar
        #[arg(long)]
        at_extrema: bool,
    },

    /// Check a data file for gaps, duplicates and invalid bars
    Validate {
        /// Path to OHLCV CSV file
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "turnpoint.toml")]
        output: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    Bottoms,
    Tops,
    Both,
}

impl DirectionArg {
    fn directions(self) -> Vec<Direction> {
        match self {
            DirectionArg::Bottoms => vec![Direction::Bottom],
            DirectionArg::Tops => vec![Direction::Top],
            DirectionArg::Both => vec![Direction::Bottom, Direction::Top],
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ScoringArg {
    Category,
    Points,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum MomentumArg {
    Exhausted,
    Neutral,
    Strong,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum TakeProfitArg {
    BandMid,
    BandOuter,
    RMultiple,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("warning: a tracing subscriber was already installed");
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Analyze {
            args,
            top,
            fear_greed,
            momentum,
            fine_data,
            time_cache,
            export,
        } => {
            let market = MarketContext {
                fear_greed: *fear_greed,
                momentum: momentum.map(|m| match m {
                    MomentumArg::Exhausted => MomentumState::Exhausted,
                    MomentumArg::Neutral => MomentumState::Neutral,
                    MomentumArg::Strong => MomentumState::Strong,
                }),
            };
            run_analyze(
                args,
                *top,
                market,
                fine_data.as_deref(),
                time_cache.as_deref(),
                export.as_deref(),
                cli.output,
            )
        }

        Commands::Backtest {
            args,
            min_score,
            take_profit,
            r_multiple,
            stop_buffer,
            no_confirmation,
            trades,
            export,
        } => {
            let mut config = build_config(args)?;
            if let Some(score) = min_score {
                config.backtest.min_score = *score;
            }
            if let Some(tp) = take_profit {
                config.backtest.take_profit_mode = match tp {
                    TakeProfitArg::BandMid => TakeProfitMode::BandMid,
                    TakeProfitArg::BandOuter => TakeProfitMode::BandOuter,
                    TakeProfitArg::RMultiple => TakeProfitMode::RMultiple(*r_multiple),
                };
            }
            if let Some(buffer) = stop_buffer {
                config.backtest.stop_buffer = *buffer;
            }
            if *no_confirmation {
                config.backtest.require_confirmation = false;
            }
            run_backtest(args, config, *trades, export.as_deref(), cli.output)
        }

        Commands::Patterns { args } => run_patterns(args, cli.output),

        Commands::Weekday {
            args,
            days,
            hold_bars,
            at_extrema,
        } => run_weekday(args, days, *hold_bars, *at_extrema, cli.output),

        Commands::Validate { data } => validate_data(data, cli.output),

        Commands::Init { output } => init_config(output),
    }
}

/// Configuration file (or defaults) with command-line overrides applied.
fn build_config(args: &AnalysisArgs) -> Result<AnalysisConfig> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(lookback) = args.lookback {
        config.bottoms.lookback_periods = lookback;
        config.tops.lookback_periods = lookback;
    }
    if let Some(scoring) = args.scoring {
        config.scoring.method = match scoring {
            ScoringArg::Category => ScoringMethod::Category,
            ScoringArg::Points => ScoringMethod::Points,
        };
    }
    if let Some(tz) = &args.timezone {
        config.sessions = SessionConfig::preset(tz)?;
    }
    config.validate()?;
    Ok(config)
}

fn load_bars(args: &AnalysisArgs) -> Result<Vec<turnpoint::types::Bar>> {
    info!("Loading data from: {}", args.data.display());
    let data_config = DataConfig {
        date_format: args.date_format.clone(),
        ..DataConfig::default()
    };
    load_csv(&args.data, &data_config)
}

fn print_reports(reports: &[AnalysisReport], output: OutputFormat, top: usize) -> Result<()> {
    match output {
        OutputFormat::Text => {
            for report in reports {
                ReportFormatter::print_analysis(report, top);
            }
        }
        OutputFormat::Json => match reports {
            [single] => println!("{}", to_json(single)?),
            many => println!("{}", to_json(&many)?),
        },
    }
    Ok(())
}

fn run_analyze(
    args: &AnalysisArgs,
    top: usize,
    market: MarketContext,
    fine_data: Option<&Path>,
    time_cache: Option<&Path>,
    export: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    let config = build_config(args)?;
    let bars = load_bars(args)?;
    let analyzer = Analyzer::new(config)?.with_market(market);

    let fine = match fine_data {
        Some(path) => {
            info!("Loading fine bars from: {}", path.display());
            Some(FineBarLookup::new(load_csv(path, &DataConfig::default())?)?)
        }
        None => None,
    };
    let mut cache = match time_cache {
        Some(path) => Some(ExactTimeCache::open(path)?),
        None => None,
    };

    let mut reports = Vec::new();
    for direction in args.direction.directions() {
        let mut providers: Vec<&dyn ExactTimeProvider> = Vec::new();
        if let Some(cache) = &cache {
            providers.push(cache);
        }
        if let Some(fine) = &fine {
            providers.push(fine);
        }
        reports.push(analyzer.analyze_with(&bars, direction, &providers)?);
    }

    if let Some(cache) = cache.as_mut() {
        for report in &reports {
            for r in &report.extrema {
                if r.exact_time.source == TimeSource::FineBars {
                    cache.insert(&r.extremum, &r.exact_time);
                }
            }
        }
        cache.save()?;
        info!("Exact-time cache now holds {} entries", cache.len());
    }

    if let Some(path) = export {
        let all: Vec<_> = reports.iter().flat_map(|r| r.extrema.iter().cloned()).collect();
        export_extrema_csv(&all, path)?;
        println!("Exported {} extrema to {}", all.len(), path.display());
    }

    print_reports(&reports, output, top)
}

fn run_backtest(
    args: &AnalysisArgs,
    config: AnalysisConfig,
    limit: usize,
    export: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    let bars = load_bars(args)?;
    let analyzer = Analyzer::new(config)?;

    let mut results = Vec::new();
    for direction in args.direction.directions() {
        let report = analyzer.analyze(&bars, direction)?;
        results.push((direction, report.backtest));
    }

    if let Some(path) = export {
        let trades: Vec<_> = results.iter().flat_map(|(_, r)| r.trades.iter().cloned()).collect();
        export_trades_csv(&trades, path)?;
        println!("Exported {} trades to {}", trades.len(), path.display());
    }

    match output {
        OutputFormat::Text => {
            for (direction, result) in &results {
                println!();
                println!("Trades from {}", direction.plural());
                ReportFormatter::print_backtest(result);
                ReportFormatter::print_trades(&result.trades, limit);
            }
        }
        OutputFormat::Json => {
            let results: Vec<_> = results.iter().map(|(_, r)| r).collect();
            println!("{}", to_json(&results)?);
        }
    }
    Ok(())
}

fn run_patterns(args: &AnalysisArgs, output: OutputFormat) -> Result<()> {
    let config = build_config(args)?;
    let bars = load_bars(args)?;
    let analyzer = Analyzer::new(config)?;

    for direction in args.direction.directions() {
        let report = analyzer.analyze(&bars, direction)?;
        match output {
            OutputFormat::Text => {
                println!();
                println!("{}", direction.plural().to_uppercase());
                ReportFormatter::print_patterns(&report.patterns);
            }
            OutputFormat::Json => println!("{}", to_json(&report.patterns)?),
        }
    }
    Ok(())
}

fn run_weekday(
    args: &AnalysisArgs,
    days: &str,
    hold_bars: usize,
    at_extrema: bool,
    output: OutputFormat,
) -> Result<()> {
    let config = build_config(args)?;
    let days = parse_weekdays(days)?;
    let offset = fixed_offset(config.sessions.utc_offset_hours)?;
    let bars = load_bars(args)?;
    let analyzer = Analyzer::new(config)?;

    for direction in args.direction.directions() {
        let result = if at_extrema {
            let frame = analyzer.enrich(&bars)?;
            let extrema = analyzer.detect(&frame, direction);
            match extremum_weekday_backtest(&extrema, &bars, &days, hold_bars, offset) {
                Some(result) => result,
                None => {
                    println!("No {} detected.", direction.plural());
                    continue;
                }
            }
        } else {
            weekday_backtest(&bars, &days, hold_bars, direction, offset)
        };

        match output {
            OutputFormat::Text => ReportFormatter::print_weekday(&result),
            OutputFormat::Json => println!("{}", to_json(&result)?),
        }
    }
    Ok(())
}

fn validate_data(data_path: &Path, output: OutputFormat) -> Result<()> {
    let raw = read_csv(data_path, &DataConfig::default())?;
    let report = data_quality_report(raw);

    match output {
        OutputFormat::Text => {
            println!("Validating data file: {}", data_path.display());
            println!();
            ReportFormatter::print_quality(&report);
            if let (Some(first), Some(last)) = (report.first, report.last) {
                println!("  Start: {}", first);
                println!("  End:   {}", last);
            }
            for gap in report.gaps.iter().take(10) {
                println!(
                    "  Gap: {} -> {} ({} bars missing)",
                    gap.start, gap.end, gap.missing_bars
                );
            }
            if report.gaps.len() > 10 {
                println!("  ... and {} more gaps", report.gaps.len() - 10);
            }
        }
        OutputFormat::Json => println!("{}", to_json(&report)?),
    }
    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    std::fs::write(output, AnalysisConfig::example())?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to tune detection and scoring, then run:");
    println!("  turnpoint analyze -d data.csv -c {}", output.display());
    Ok(())
}
