use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use super::stats::PerformanceStats;
use crate::error::{PipelineError, Result};
use crate::types::{NewSignal, SignalClass, SignalOutcome, SignalRecord};

/// What `update_outcome` did with the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeUpdate {
    Updated,
    /// No record with that id; the log was left untouched
    NotFound,
    /// The record was closed before; the first resolution stands
    AlreadyClosed,
}

/// A closed signal prepared for training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSample {
    pub signal_id: String,
    pub signal_type: SignalClass,
    pub confidence: f64,
    pub emitted_at: DateTime<Utc>,
    pub outcome: SignalOutcome,
    pub profit_loss_percent: f64,
    /// Sign of the profit/loss: 1, -1 or 0
    pub reward: i8,
    /// Profit/loss as a fraction
    pub weighted_reward: f64,
}

impl FeedbackSample {
    fn from_record(record: &SignalRecord) -> Option<Self> {
        let outcome = record.outcome?;
        let pl = record.profit_loss_percent?;
        Some(Self {
            signal_id: record.signal_id.clone(),
            signal_type: record.signal_type,
            confidence: record.confidence,
            emitted_at: record.emitted_at,
            outcome,
            profit_loss_percent: pl,
            reward: if pl > 0.0 {
                1
            } else if pl < 0.0 {
                -1
            } else {
                0
            },
            weighted_reward: pl / 100.0,
        })
    }
}

/// Append-only JSONL log of emitted signals.
///
/// New signals are appended; an outcome update rewrites the whole file
/// through a temporary copy. All writers of one store go through a mutex;
/// separate processes sharing the file must coordinate externally.
pub struct FeedbackStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FeedbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an ACTIVE record and return its id. An id already present in
    /// the log is rejected and nothing is written.
    pub fn record(&self, signal: NewSignal) -> Result<String> {
        let record = SignalRecord::open(signal, Utc::now());
        let line = serde_json::to_string(&record)?;

        let _guard = self.lock();
        if self.contains_id(&record.signal_id)? {
            warn!("Signal {} already recorded", record.signal_id);
            return Err(PipelineError::DuplicateSignal(record.signal_id));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;

        info!(
            "Recorded signal {} ({} {} {})",
            record.signal_id, record.symbol, record.timeframe, record.signal_type
        );
        Ok(record.signal_id)
    }

    /// `record` for the live signal path: failures are logged, never raised
    pub fn record_best_effort(&self, signal: NewSignal) -> Option<String> {
        match self.record(signal) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record signal feedback: {}", e);
                None
            }
        }
    }

    /// Close a signal with its outcome. Unknown ids and already closed
    /// records leave the log unchanged.
    pub fn update_outcome(
        &self,
        signal_id: &str,
        outcome: SignalOutcome,
        exit_price: Decimal,
        profit_loss_percent: f64,
    ) -> Result<OutcomeUpdate> {
        let _guard = self.lock();
        if !self.path.exists() {
            warn!("Signal not found: {} (feedback log is empty)", signal_id);
            return Ok(OutcomeUpdate::NotFound);
        }

        let mut lines: Vec<String> = BufReader::new(fs::File::open(&self.path)?)
            .lines()
            .collect::<std::io::Result<_>>()?;

        let position = lines.iter().position(|line| {
            serde_json::from_str::<SignalRecord>(line)
                .map(|r| r.signal_id == signal_id)
                .unwrap_or(false)
        });
        let Some(idx) = position else {
            warn!("Signal not found: {}", signal_id);
            return Ok(OutcomeUpdate::NotFound);
        };

        let mut record: SignalRecord = serde_json::from_str(&lines[idx])?;
        if record.is_closed() {
            warn!(
                "Signal {} already closed as {}; ignoring {}",
                signal_id,
                record.outcome.map(|o| o.as_str()).unwrap_or("UNKNOWN"),
                outcome
            );
            return Ok(OutcomeUpdate::AlreadyClosed);
        }

        record.close(outcome, exit_price, profit_loss_percent, Utc::now());
        lines[idx] = serde_json::to_string(&record)?;

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for line in &lines {
                writeln!(file, "{}", line)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        info!("Updated signal {}: {} ({:+.2}%)", signal_id, outcome, profit_loss_percent);
        Ok(OutcomeUpdate::Updated)
    }

    /// `update_outcome` for the live signal path: failures are logged and
    /// the update is skipped
    pub fn update_outcome_best_effort(
        &self,
        signal_id: &str,
        outcome: SignalOutcome,
        exit_price: Decimal,
        profit_loss_percent: f64,
    ) -> Option<OutcomeUpdate> {
        match self.update_outcome(signal_id, outcome, exit_price, profit_loss_percent) {
            Ok(update) => Some(update),
            Err(e) => {
                warn!("Failed to update signal {}: {}", signal_id, e);
                None
            }
        }
    }

    /// Every parsable record, optionally only those emitted in the last `days`
    pub fn load_signals(&self, days: Option<i64>) -> Result<Vec<SignalRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let cutoff = days.map(|d| Utc::now() - Duration::days(d));
        let reader = BufReader::new(fs::File::open(&self.path)?);

        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SignalRecord>(&line) {
                Ok(record) => {
                    if cutoff.map_or(true, |c| record.emitted_at >= c) {
                        records.push(record);
                    }
                }
                Err(e) => warn!("Skipping malformed feedback line {}: {}", line_no + 1, e),
            }
        }
        Ok(records)
    }

    /// Closed signals with a profit/loss for the pair, in log order, or
    /// `None` when fewer than `min_samples` exist
    pub fn feedback_data(
        &self,
        symbol: &str,
        timeframe: &str,
        min_samples: usize,
    ) -> Result<Option<Vec<FeedbackSample>>> {
        let samples: Vec<FeedbackSample> = self
            .load_signals(None)?
            .iter()
            .filter(|r| r.symbol == symbol && r.timeframe == timeframe && r.is_closed())
            .filter_map(FeedbackSample::from_record)
            .collect();

        if samples.len() < min_samples {
            warn!(
                "Insufficient feedback data for {} {}: {} < {}",
                symbol,
                timeframe,
                samples.len(),
                min_samples
            );
            return Ok(None);
        }

        let wins = samples.iter().filter(|s| s.reward > 0).count();
        let total_pl: f64 = samples.iter().map(|s| s.profit_loss_percent).sum();
        let mean_pl = total_pl / samples.len() as f64;
        info!(
            "Loaded {} feedback samples for {} {} (success {:.1}%, avg return {:.2}%)",
            samples.len(),
            symbol,
            timeframe,
            wins as f64 / samples.len() as f64 * 100.0,
            mean_pl
        );
        Ok(Some(samples))
    }

    /// Write the pair's feedback samples as CSV. Defaults to
    /// `{symbol}_{timeframe}_feedback.csv` next to the log.
    pub fn export_training_data(
        &self,
        symbol: &str,
        timeframe: &str,
        min_samples: usize,
        output: Option<&Path>,
    ) -> Result<Option<PathBuf>> {
        let Some(samples) = self.feedback_data(symbol, timeframe, min_samples)? else {
            return Ok(None);
        };

        let path = match output {
            Some(p) => p.to_path_buf(),
            None => self
                .path
                .with_file_name(format!("{}_{}_feedback.csv", symbol.to_lowercase(), timeframe)),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&path)?;
        for sample in &samples {
            writer.serialize(sample)?;
        }
        writer.flush()?;

        info!("Exported {} feedback samples to {}", samples.len(), path.display());
        Ok(Some(path))
    }

    pub fn performance_stats(
        &self,
        symbol: Option<&str>,
        timeframe: Option<&str>,
        days: Option<i64>,
    ) -> Result<PerformanceStats> {
        let records: Vec<SignalRecord> = self
            .load_signals(days)?
            .into_iter()
            .filter(|r| symbol.map_or(true, |s| r.symbol == s))
            .filter(|r| timeframe.map_or(true, |t| r.timeframe == t))
            .collect();
        Ok(PerformanceStats::from_records(&records))
    }

    /// Caller must hold the write lock
    fn contains_id(&self, signal_id: &str) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        for line in BufReader::new(fs::File::open(&self.path)?).lines() {
            let line = line?;
            if let Ok(record) = serde_json::from_str::<SignalRecord>(&line) {
                if record.signal_id == signal_id {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn temp_store() -> (tempfile::TempDir, FeedbackStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path().join("feedback").join("signals.jsonl"));
        (dir, store)
    }

    /// Record and immediately close a signal
    pub(crate) fn closed(
        store: &FeedbackStore,
        class: SignalClass,
        outcome: SignalOutcome,
        pl: f64,
    ) -> String {
        let id = store
            .record(
                NewSignal::new("BTCUSDT", "1h", class, 70.0)
                    .with_prices(dec!(100), dec!(98), dec!(104)),
            )
            .unwrap();
        let update = store.update_outcome(&id, outcome, dec!(101), pl).unwrap();
        assert_eq!(update, OutcomeUpdate::Updated);
        id
    }

    #[test]
    fn test_record_appends_active_signal() {
        let (_dir, store) = temp_store();
        let id = store
            .record(
                NewSignal::new("BTCUSDT", "1h", SignalClass::Buy, 75.0).with_id("test_signal_001"),
            )
            .unwrap();
        assert_eq!(id, "test_signal_001");
        store.record(NewSignal::new("ETHUSDT", "4h", SignalClass::Sell, 60.0)).unwrap();

        let records = store.load_signals(None).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.is_closed()));
        assert_eq!(records[0].signal_type, SignalClass::Buy);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let (_dir, store) = temp_store();
        store
            .record(NewSignal::new("BTCUSDT", "1h", SignalClass::Buy, 75.0).with_id("dup"))
            .unwrap();
        let second =
            store.record(NewSignal::new("BTCUSDT", "1h", SignalClass::Sell, 60.0).with_id("dup"));
        assert!(matches!(second, Err(PipelineError::DuplicateSignal(ref id)) if id == "dup"));
        assert_eq!(store.load_signals(None).unwrap().len(), 1);

        let update = store.update_outcome("dup", SignalOutcome::Success, dec!(101), 1.0).unwrap();
        assert_eq!(update, OutcomeUpdate::Updated);
        let stats = store.performance_stats(None, None, None).unwrap();
        assert_eq!(stats.active_signals, 0);
        assert_eq!(stats.closed_signals, 1);
    }

    #[test]
    fn test_update_closes_once() {
        let (_dir, store) = temp_store();
        let id = closed(&store, SignalClass::Buy, SignalOutcome::TookProfit, 4.0);

        let second = store
            .update_outcome(&id, SignalOutcome::StoppedOut, dec!(90), -10.0)
            .unwrap();
        assert_eq!(second, OutcomeUpdate::AlreadyClosed);

        let record = &store.load_signals(None).unwrap()[0];
        assert_eq!(record.outcome, Some(SignalOutcome::TookProfit));
        assert_eq!(record.profit_loss_percent, Some(4.0));
        assert!(record.exit_time.is_some());
    }

    #[test]
    fn test_unknown_id_leaves_log_unchanged() {
        let (_dir, store) = temp_store();
        assert_eq!(
            store.update_outcome("missing", SignalOutcome::Success, dec!(1), 1.0).unwrap(),
            OutcomeUpdate::NotFound
        );
        store.record(NewSignal::new("BTCUSDT", "1h", SignalClass::Hold, 50.0)).unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        let update =
            store.update_outcome_best_effort("missing", SignalOutcome::Success, dec!(1), 1.0);
        assert_eq!(update, Some(OutcomeUpdate::NotFound));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn test_rewrite_preserves_other_lines() {
        let (_dir, store) = temp_store();
        let first = store.record(NewSignal::new("BTCUSDT", "1h", SignalClass::Buy, 70.0)).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
            writeln!(file, "not json").unwrap();
        }
        store.record(NewSignal::new("BTCUSDT", "1h", SignalClass::Sell, 65.0)).unwrap();

        store.update_outcome(&first, SignalOutcome::Failure, dec!(99), -1.0).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.contains("not json"));
        assert_eq!(store.load_signals(None).unwrap().len(), 2);
    }

    #[test]
    fn test_best_effort_swallows_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the log file should be makes every write fail
        let store = FeedbackStore::new(dir.path());
        let id = store.record_best_effort(NewSignal::new("BTCUSDT", "1h", SignalClass::Buy, 70.0));
        assert!(id.is_none());
    }

    #[test]
    fn test_days_filter() {
        let (_dir, store) = temp_store();
        store
            .record(
                NewSignal::new("BTCUSDT", "1h", SignalClass::Buy, 70.0)
                    .emitted_at(Utc::now() - Duration::days(45)),
            )
            .unwrap();
        store.record(NewSignal::new("BTCUSDT", "1h", SignalClass::Buy, 70.0)).unwrap();
        assert_eq!(store.load_signals(Some(30)).unwrap().len(), 1);
        assert_eq!(store.load_signals(None).unwrap().len(), 2);
    }

    #[test]
    fn test_feedback_data_rewards() {
        let (_dir, store) = temp_store();
        closed(&store, SignalClass::Buy, SignalOutcome::TookProfit, 5.0);
        closed(&store, SignalClass::Sell, SignalOutcome::StoppedOut, -2.0);
        closed(&store, SignalClass::Hold, SignalOutcome::Success, 0.0);
        store.record(NewSignal::new("BTCUSDT", "1h", SignalClass::Buy, 70.0)).unwrap();

        assert!(store.feedback_data("BTCUSDT", "1h", 5).unwrap().is_none());
        let samples = store.feedback_data("BTCUSDT", "1h", 3).unwrap().unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.iter().map(|s| s.reward).collect::<Vec<_>>(), vec![1, -1, 0]);
        assert!((samples[0].weighted_reward - 0.05).abs() < 1e-12);
        assert!(store.feedback_data("BTCUSDT", "4h", 1).unwrap().is_none());
    }

    #[test]
    fn test_export_training_data() {
        let (dir, store) = temp_store();
        closed(&store, SignalClass::Buy, SignalOutcome::TookProfit, 5.0);
        closed(&store, SignalClass::Sell, SignalOutcome::Failure, -1.5);

        let path = store.export_training_data("BTCUSDT", "1h", 1, None).unwrap().unwrap();
        assert_eq!(path, dir.path().join("feedback").join("btcusdt_1h_feedback.csv"));
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<FeedbackSample> = reader
            .deserialize()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].outcome, SignalOutcome::Failure);

        assert!(store.export_training_data("BTCUSDT", "1h", 10, None).unwrap().is_none());
    }
}
