//! Historical data loading
//!
//! Reads OHLCV bars from CSV files. Timestamps may be unix milliseconds or
//! datetime strings; malformed or out-of-order rows are dropped with a
//! warning, matching the engine's input-fault policy.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::Bar;

/// Raw CSV row before timestamp parsing and validation
#[derive(Debug, Deserialize)]
struct RawBar {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Load bars from a CSV file with columns
/// `timestamp,open,high,low,close,volume`.
///
/// Rows that fail validation or arrive out of timestamp order are skipped.
pub fn load_bars_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open data file {}", path.display()))?;

    let mut bars: Vec<Bar> = Vec::new();
    let mut skipped = 0usize;

    for (line, record) in reader.deserialize::<RawBar>().enumerate() {
        let raw = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(line, error = %e, "Skipping unparseable row");
                skipped += 1;
                continue;
            }
        };

        let timestamp = match parse_timestamp(&raw.timestamp) {
            Some(ts) => ts,
            None => {
                warn!(line, raw = %raw.timestamp, "Skipping row with bad timestamp");
                skipped += 1;
                continue;
            }
        };

        let bar = match Bar::new(timestamp, raw.open, raw.high, raw.low, raw.close, raw.volume) {
            Ok(b) => b,
            Err(e) => {
                warn!(line, error = %e, "Skipping invalid bar");
                skipped += 1;
                continue;
            }
        };

        if let Some(last) = bars.last() {
            if bar.timestamp <= last.timestamp {
                warn!(line, timestamp = %bar.timestamp, "Skipping non-monotonic bar");
                skipped += 1;
                continue;
            }
        }

        bars.push(bar);
    }

    info!(
        path = %path.display(),
        loaded = bars.len(),
        skipped,
        "Loaded bar data"
    );
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_millis_timestamps() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             1714521600000,100.0,101.0,99.0,100.5,1000\n\
             1714521660000,100.5,102.0,100.0,101.5,1200\n",
        );
        let bars = load_bars_csv(file.path()).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[1].timestamp > bars[0].timestamp);
        assert_eq!(bars[0].close, 100.5);
    }

    #[test]
    fn test_load_datetime_strings() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2024-05-01 00:00:00,100.0,101.0,99.0,100.5,1000\n\
             2024-05-01 00:01:00,100.5,102.0,100.0,101.5,1200\n",
        );
        let bars = load_bars_csv(file.path()).unwrap();
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn test_invalid_rows_skipped() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             1714521600000,100.0,101.0,99.0,100.5,1000\n\
             1714521660000,100.5,99.0,100.0,101.5,1200\n\
             1714521720000,101.0,102.0,100.5,101.5,900\n",
        );
        // Second row has high < low
        let bars = load_bars_csv(file.path()).unwrap();
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn test_non_monotonic_rows_dropped() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             1714521660000,100.0,101.0,99.0,100.5,1000\n\
             1714521600000,100.5,102.0,100.0,101.5,1200\n\
             1714521660000,100.5,102.0,100.0,101.5,1200\n\
             1714521720000,101.0,102.0,100.5,101.5,900\n",
        );
        let bars = load_bars_csv(file.path()).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[1].timestamp > bars[0].timestamp);
    }
}
