use std::path::PathBuf;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::types::CandleSeries;

/// Where a learning cycle gets its candles from. Fetching from an exchange
/// happens elsewhere; implementations only read what was already stored.
#[cfg_attr(test, mockall::automock)]
pub trait CandleSource {
    fn load(&self, symbol: &str, timeframe: &str) -> Result<CandleSeries>;
}

/// Reads `{data_dir}/{symbol}_{timeframe}.csv`, or one fixed file
#[derive(Debug, Clone)]
pub struct CsvCandleSource {
    data_dir: PathBuf,
    file: Option<PathBuf>,
}

impl CsvCandleSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            file: None,
        }
    }

    /// Always read `file`, whatever pair is requested
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn path_for(&self, symbol: &str, timeframe: &str) -> PathBuf {
        match &self.file {
            Some(file) => file.clone(),
            None => self
                .data_dir
                .join(format!("{}_{}.csv", symbol.to_lowercase(), timeframe)),
        }
    }
}

impl CandleSource for CsvCandleSource {
    fn load(&self, symbol: &str, timeframe: &str) -> Result<CandleSeries> {
        let path = self.path_for(symbol, timeframe);
        if !path.exists() {
            return Err(PipelineError::InsufficientData(format!(
                "No market data for {} {} at {}",
                symbol,
                timeframe,
                path.display()
            )));
        }
        let series = CandleSeries::from_csv_path(&path)?;
        info!("Loaded {} candles from {}", series.len(), path.display());
        Ok(series)
    }
}
