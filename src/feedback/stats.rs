use serde::Serialize;
use std::fmt;

use crate::types::SignalRecord;

/// Aggregate performance of a set of logged signals
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceStats {
    pub total_signals: usize,
    pub active_signals: usize,
    pub closed_signals: usize,
    pub successful: usize,
    pub failed: usize,
    /// Wins among closed signals, in percent
    pub success_rate: f64,
    pub avg_profit_loss: f64,
    pub total_return: f64,
    pub best_signal: Option<SignalRecord>,
    pub worst_signal: Option<SignalRecord>,
}

impl PerformanceStats {
    /// SUCCESS and TOOK_PROFIT are wins, FAILURE and STOPPED_OUT losses.
    /// An empty or all-active set yields zero rates.
    pub fn from_records(records: &[SignalRecord]) -> Self {
        let closed: Vec<&SignalRecord> = records.iter().filter(|r| r.is_closed()).collect();
        let mut stats = Self {
            total_signals: records.len(),
            active_signals: records.len() - closed.len(),
            closed_signals: closed.len(),
            ..Default::default()
        };
        if closed.is_empty() {
            return stats;
        }

        stats.successful = closed.iter().filter(|r| r.outcome.is_some_and(|o| o.is_win())).count();
        stats.failed = closed.iter().filter(|r| r.outcome.is_some_and(|o| o.is_loss())).count();
        stats.success_rate = stats.successful as f64 / closed.len() as f64 * 100.0;
        stats.total_return = closed.iter().filter_map(|r| r.profit_loss_percent).sum();
        stats.avg_profit_loss = stats.total_return / closed.len() as f64;

        let pl = |r: &&SignalRecord| r.profit_loss_percent.unwrap_or(0.0);
        stats.best_signal = closed
            .iter()
            .copied()
            .reduce(|best, r| if pl(&r) > pl(&best) { r } else { best })
            .cloned();
        stats.worst_signal = closed
            .iter()
            .copied()
            .reduce(|worst, r| if pl(&r) < pl(&worst) { r } else { worst })
            .cloned();
        stats
    }
}

impl fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Signals: {} total, {} active, {} closed",
            self.total_signals, self.active_signals, self.closed_signals
        )?;
        writeln!(
            f,
            "Success rate: {:.1}% ({} won, {} lost)",
            self.success_rate, self.successful, self.failed
        )?;
        write!(
            f,
            "Avg P/L: {:+.2}%, total return: {:+.2}%",
            self.avg_profit_loss, self.total_return
        )?;
        if let Some(best) = &self.best_signal {
            write!(
                f,
                "\nBest: {} {:+.2}%",
                best.signal_id,
                best.profit_loss_percent.unwrap_or(0.0)
            )?;
        }
        if let Some(worst) = &self.worst_signal {
            write!(
                f,
                "\nWorst: {} {:+.2}%",
                worst.signal_id,
                worst.profit_loss_percent.unwrap_or(0.0)
            )?;
        }
        Ok(())
    }
}
