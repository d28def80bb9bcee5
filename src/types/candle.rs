use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

use crate::error::{PipelineError, Result};

pub const REQUIRED_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// One OHLCV bar. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: Option<DateTime<Utc>>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub symbol: Option<String>,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp: Some(timestamp),
            open,
            high,
            low,
            close,
            volume,
            symbol: None,
        }
    }

    pub fn body_size(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Body smaller than 1% of the close
    pub fn is_doji(&self) -> bool {
        self.body_size() < 0.01 * self.close
    }

    /// Long range relative to the body with the close in the upper 40% of the
    /// range. A zero range is never a hammer.
    pub fn is_hammer(&self) -> bool {
        let range = self.range();
        if range == 0.0 {
            return false;
        }
        let close_position = (self.close - self.low) / range;
        range > 2.0 * self.body_size() && close_position > 0.6
    }
}

/// Time-ordered candle table for one symbol/timeframe
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Most recent `n` candles as a new series
    pub fn tail(&self, n: usize) -> CandleSeries {
        let len = self.candles.len();
        let start = len.saturating_sub(n);
        CandleSeries::new(self.candles[start..].to_vec())
    }

    pub fn has_timestamps(&self) -> bool {
        !self.candles.is_empty() && self.candles.iter().all(|c| c.timestamp.is_some())
    }

    pub fn opens(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.open).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_csv_reader(file)
    }

    /// Parse a CSV table with `open,high,low,close,volume` and optional
    /// `timestamp`/`symbol` columns, sorted ascending by timestamp.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_lowercase()).collect();

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|col| !headers.iter().any(|h| h == col))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Schema(format!("Missing required columns: {:?}", missing)));
        }

        let index_of = |name: &str| headers.iter().position(|h| h == name);
        let (i_open, i_high, i_low, i_close, i_volume) = (
            index_of("open").unwrap_or_default(),
            index_of("high").unwrap_or_default(),
            index_of("low").unwrap_or_default(),
            index_of("close").unwrap_or_default(),
            index_of("volume").unwrap_or_default(),
        );
        let i_timestamp = index_of("timestamp");
        let i_symbol = index_of("symbol");

        let mut candles = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let number = |idx: usize| -> Result<f64> {
                let raw = record.get(idx).unwrap_or("");
                raw.parse::<f64>().map_err(|_| {
                    PipelineError::Schema(format!("Row {}: invalid number '{}'", line + 1, raw))
                })
            };

            let timestamp = match i_timestamp.and_then(|i| record.get(i)) {
                Some(raw) if !raw.is_empty() => Some(parse_timestamp(raw).ok_or_else(|| {
                    PipelineError::Schema(format!("Row {}: invalid timestamp '{}'", line + 1, raw))
                })?),
                _ => None,
            };

            candles.push(Candle {
                timestamp,
                open: number(i_open)?,
                high: number(i_high)?,
                low: number(i_low)?,
                close: number(i_close)?,
                volume: number(i_volume)?,
                symbol: i_symbol.and_then(|i| record.get(i)).map(|s| s.to_string()),
            });
        }

        // Stable sort keeps file order when timestamps are absent
        candles.sort_by_key(|c| c.timestamp);
        Ok(Self::new(candles))
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` or epoch milliseconds
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    raw.parse::<i64>().ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: None,
            open,
            high,
            low,
            close,
            volume: 1.0,
            symbol: None,
        }
    }

    #[test]
    fn test_doji_uses_one_percent_of_close() {
        assert!(candle(100.0, 101.0, 99.0, 100.5).is_doji());
        assert!(!candle(100.0, 103.0, 99.0, 102.0).is_doji());
    }

    #[test]
    fn test_hammer_zero_range_is_false() {
        assert!(!candle(100.0, 100.0, 100.0, 100.0).is_hammer());
        // range 10, body 1, close near top
        assert!(candle(108.0, 110.0, 100.0, 109.0).is_hammer());
        // close in lower part of the range
        assert!(!candle(102.0, 110.0, 100.0, 101.0).is_hammer());
    }

    #[test]
    fn test_csv_missing_columns_is_schema_error() {
        let data = "timestamp,open,high,low\n2024-01-01T00:00:00Z,1,2,0.5\n";
        let err = CandleSeries::from_csv_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
    }

    #[test]
    fn test_csv_sorted_by_timestamp() {
        let data = "timestamp,open,high,low,close,volume,symbol\n\
            2024-01-01 02:00:00,2,3,1,2.5,10,BTCUSDT\n\
            2024-01-01 01:00:00,1,2,0.5,1.5,20,BTCUSDT\n";
        let series = CandleSeries::from_csv_reader(data.as_bytes()).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.candles[0].close, 1.5);
        assert_eq!(series.candles[1].symbol.as_deref(), Some("BTCUSDT"));
        assert!(series.has_timestamps());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T12:00:00Z").is_some());
        assert!(parse_timestamp("2024-03-01 12:00:00").is_some());
        assert_eq!(
            parse_timestamp("1704067200000"),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single()
        );
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_tail() {
        let series =
            CandleSeries::new(vec![candle(1.0, 1.0, 1.0, 1.0), candle(2.0, 2.0, 2.0, 2.0)]);
        assert_eq!(series.tail(1).candles[0].open, 2.0);
        assert_eq!(series.tail(10).len(), 2);
    }
}
