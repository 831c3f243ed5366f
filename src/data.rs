//! Loading and preparing OHLCV series.
//!
//! The analysis core assumes an ascending, deduplicated series of valid bars.
//! This module is the boundary that establishes that: it reads CSV exports
//! with tolerant headers and datetime formats, then sorts, deduplicates and
//! filters them before anything else sees the data.

use crate::error::{AnalysisError, Result};
use crate::types::Bar;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw CSV row with flexible header names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "date",
        alias = "Timestamp",
        alias = "Time",
        alias = "time",
        alias = "datetime",
        alias = "Datetime",
        alias = "open_time"
    )]
    timestamp: String,
    #[serde(alias = "Open", alias = "o")]
    open: f64,
    #[serde(alias = "High", alias = "h")]
    high: f64,
    #[serde(alias = "Low", alias = "l")]
    low: f64,
    #[serde(alias = "Close", alias = "c")]
    close: f64,
    #[serde(alias = "Volume", alias = "v", alias = "vol", default)]
    volume: f64,
}

/// CSV reading options.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Explicit datetime format, tried before the built-in list.
    pub date_format: Option<String>,
    /// Field delimiter. Auto-detected when `None`.
    pub delimiter: Option<u8>,
    /// Skip unparseable rows instead of failing the whole load.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            delimiter: None,
            skip_invalid: true,
        }
    }
}

/// Pick the delimiter that splits the first lines into a consistent number
/// of at least five fields.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();
    if lines.is_empty() {
        return Ok(b',');
    }

    let mut best = (b',', 0usize);
    for delim in [b',', b'\t', b';', b'|'] {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.bytes().filter(|&b| b == delim).count() + 1)
            .collect();
        let first = counts[0];
        if first >= 5 && counts.iter().all(|&c| c == first) && first > best.1 {
            best = (delim, first);
        }
    }

    debug!("Detected delimiter {:?}", best.0 as char);
    Ok(best.0)
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&d.and_time(NaiveTime::default()))
}

/// Parse a timestamp string, trying RFC 3339, common datetime and date
/// layouts, then unix seconds or milliseconds.
pub fn parse_datetime(s: &str, format: Option<&str>) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(midnight(d));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    for fmt in &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(midnight(d));
        }
    }

    if let Ok(ts) = s.parse::<i64>() {
        // exchange exports use milliseconds
        let parsed = if ts.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(ts)
        } else {
            DateTime::from_timestamp(ts, 0)
        };
        if let Some(dt) = parsed {
            return Ok(dt);
        }
    }

    Err(AnalysisError::DataError(format!(
        "Could not parse timestamp: '{}'",
        s
    )))
}

/// Read raw bars from a CSV file without reordering or validation.
pub fn read_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut bars = Vec::new();
    let mut skipped = 0;

    for (row_num, result) in reader.deserialize::<CsvRow>().enumerate() {
        let parsed = result
            .map_err(AnalysisError::from)
            .and_then(|row| {
                let ts = parse_datetime(&row.timestamp, config.date_format.as_deref())?;
                Ok(Bar::new(ts, row.open, row.high, row.low, row.close, row.volume))
            });

        match parsed {
            Ok(bar) => bars.push(bar),
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if skipped > 0 {
        warn!("Skipped {} unparseable rows in {}", skipped, path.display());
    }
    Ok(bars)
}

/// Series after sorting, deduplication and validation.
#[derive(Debug, Clone, Default)]
pub struct PreparedSeries {
    pub bars: Vec<Bar>,
    pub duplicates_removed: usize,
    pub invalid_removed: usize,
}

/// Drop bars that break the OHLC invariants, sort ascending and keep the
/// first bar per timestamp.
pub fn prepare_series(mut bars: Vec<Bar>) -> PreparedSeries {
    let before = bars.len();
    bars.retain(Bar::validate);
    let invalid_removed = before - bars.len();
    if invalid_removed > 0 {
        warn!("Dropped {} bars violating OHLC invariants", invalid_removed);
    }

    bars.sort_by_key(|b| b.timestamp);

    let before = bars.len();
    bars.dedup_by_key(|b| b.timestamp);
    let duplicates_removed = before - bars.len();
    if duplicates_removed > 0 {
        warn!("Removed {} duplicate timestamps", duplicates_removed);
    }

    PreparedSeries {
        bars,
        duplicates_removed,
        invalid_removed,
    }
}

/// Load and prepare a CSV series.
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let prepared = prepare_series(read_csv(path, config)?);
    let bars = prepared.bars;
    if bars.is_empty() {
        return Err(AnalysisError::DataError(format!(
            "No valid bars in {}",
            path.display()
        )));
    }

    info!(
        "Loaded {} bars from {} to {}",
        bars.len(),
        bars[0].timestamp,
        bars[bars.len() - 1].timestamp
    );
    Ok(bars)
}

/// Reject series that are not strictly ascending or contain invalid bars.
pub fn ensure_prepared(bars: &[Bar]) -> Result<()> {
    if let Some(pos) = bars
        .windows(2)
        .position(|w| w[1].timestamp <= w[0].timestamp)
    {
        return Err(AnalysisError::DataError(format!(
            "Series not strictly ascending at index {}",
            pos + 1
        )));
    }
    if let Some(pos) = bars.iter().position(|b| !b.validate()) {
        return Err(AnalysisError::DataError(format!(
            "Invalid bar at index {}: {:?}",
            pos, bars[pos]
        )));
    }
    Ok(())
}

/// Median spacing between consecutive bars.
pub fn median_bar_spacing(bars: &[Bar]) -> Result<Duration> {
    if bars.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            required: 2,
            available: bars.len(),
        });
    }

    let mut gaps: Vec<i64> = bars
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds())
        .collect();
    gaps.sort_unstable();

    let mid = gaps.len() / 2;
    let median = if gaps.len() % 2 == 0 {
        (gaps[mid - 1] + gaps[mid]) / 2
    } else {
        gaps[mid]
    };

    if median <= 0 {
        return Err(AnalysisError::DataError(
            "Median bar spacing is not positive".to_string(),
        ));
    }
    Ok(Duration::seconds(median))
}

/// A stretch of missing bars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataGap {
    /// Last bar before the gap.
    pub start: DateTime<Utc>,
    /// First bar after the gap.
    pub end: DateTime<Utc>,
    pub missing_bars: usize,
}

/// Find gaps where consecutive bars are more than 1.5 spacings apart.
pub fn detect_gaps(bars: &[Bar], spacing: Duration) -> Vec<DataGap> {
    let step = spacing.num_seconds();
    if bars.len() < 2 || step <= 0 {
        return Vec::new();
    }

    let threshold = step + step / 2;
    bars.windows(2)
        .filter_map(|w| {
            let elapsed = (w[1].timestamp - w[0].timestamp).num_seconds();
            (elapsed > threshold).then(|| DataGap {
                start: w[0].timestamp,
                end: w[1].timestamp,
                missing_bars: (elapsed / step - 1).max(1) as usize,
            })
        })
        .collect()
}

/// Summary of issues found in a raw series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataQualityReport {
    pub raw_bars: usize,
    pub usable_bars: usize,
    pub duplicate_timestamps: usize,
    pub invalid_bars: usize,
    pub spacing_seconds: Option<i64>,
    pub gaps: Vec<DataGap>,
    /// Missing bars as a percent of the expected total.
    pub gap_percentage: f64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

impl DataQualityReport {
    pub fn is_acceptable(&self) -> bool {
        self.usable_bars > 0
            && self.gaps.is_empty()
            && self.duplicate_timestamps == 0
            && self.invalid_bars == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Bars: {} usable / {} raw, Gaps: {} ({:.2}%), Duplicates: {}, Invalid: {}",
            self.usable_bars,
            self.raw_bars,
            self.gaps.len(),
            self.gap_percentage,
            self.duplicate_timestamps,
            self.invalid_bars
        )
    }
}

/// Build a quality report for a raw, possibly unsorted series.
pub fn data_quality_report(raw: Vec<Bar>) -> DataQualityReport {
    let raw_bars = raw.len();
    let prepared = prepare_series(raw);
    let bars = &prepared.bars;

    let spacing = median_bar_spacing(bars).ok();
    let gaps = spacing
        .map(|s| detect_gaps(bars, s))
        .unwrap_or_default();
    let missing: usize = gaps.iter().map(|g| g.missing_bars).sum();
    let expected = bars.len() + missing;
    let gap_percentage = if expected > 0 {
        missing as f64 / expected as f64 * 100.0
    } else {
        0.0
    };

    DataQualityReport {
        raw_bars,
        usable_bars: bars.len(),
        duplicate_timestamps: prepared.duplicates_removed,
        invalid_bars: prepared.invalid_removed,
        spacing_seconds: spacing.map(|s| s.num_seconds()),
        gaps,
        gap_percentage,
        first: bars.first().map(|b| b.timestamp),
        last: bars.last().map(|b| b.timestamp),
    }
}
