use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::SignalClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStatus {
    Active,
    Closed,
}

/// Resolution of an emitted signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalOutcome {
    Success,
    Failure,
    StoppedOut,
    TookProfit,
}

impl SignalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalOutcome::Success => "SUCCESS",
            SignalOutcome::Failure => "FAILURE",
            SignalOutcome::StoppedOut => "STOPPED_OUT",
            SignalOutcome::TookProfit => "TOOK_PROFIT",
        }
    }

    pub fn is_win(&self) -> bool {
        matches!(self, SignalOutcome::Success | SignalOutcome::TookProfit)
    }

    pub fn is_loss(&self) -> bool {
        matches!(self, SignalOutcome::Failure | SignalOutcome::StoppedOut)
    }
}

impl fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignalOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SUCCESS" => Ok(SignalOutcome::Success),
            "FAILURE" => Ok(SignalOutcome::Failure),
            "STOPPED_OUT" => Ok(SignalOutcome::StoppedOut),
            "TOOK_PROFIT" => Ok(SignalOutcome::TookProfit),
            other => Err(format!("Unknown outcome: {}", other)),
        }
    }
}

/// Signal as handed over by the emitting side, before it is logged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSignal {
    pub signal_id: Option<String>,
    pub symbol: String,
    pub timeframe: String,
    pub signal_type: SignalClass,
    pub confidence: f64,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub emitted_at: Option<DateTime<Utc>>,
}

impl NewSignal {
    pub fn new(symbol: &str, timeframe: &str, signal_type: SignalClass, confidence: f64) -> Self {
        Self {
            signal_id: None,
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            signal_type,
            confidence,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            emitted_at: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.signal_id = Some(id.to_string());
        self
    }

    pub fn with_prices(mut self, entry: Decimal, stop_loss: Decimal, take_profit: Decimal) -> Self {
        self.entry_price = Some(entry);
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn emitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.emitted_at = Some(at);
        self
    }
}

/// One line of the feedback log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub signal_type: SignalClass,
    pub confidence: f64,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub emitted_at: DateTime<Utc>,
    pub status: SignalStatus,
    pub outcome: Option<SignalOutcome>,
    pub exit_price: Option<Decimal>,
    pub profit_loss_percent: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl SignalRecord {
    /// Fresh ACTIVE record; generates an id when the signal has none
    pub fn open(signal: NewSignal, now: DateTime<Utc>) -> Self {
        Self {
            signal_id: signal
                .signal_id
                .unwrap_or_else(|| format!("signal_{}", Uuid::new_v4())),
            symbol: signal.symbol,
            timeframe: signal.timeframe,
            signal_type: signal.signal_type,
            confidence: signal.confidence,
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            emitted_at: signal.emitted_at.unwrap_or(now),
            status: SignalStatus::Active,
            outcome: None,
            exit_price: None,
            profit_loss_percent: None,
            exit_time: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == SignalStatus::Closed
    }

    pub fn close(
        &mut self,
        outcome: SignalOutcome,
        exit_price: Decimal,
        profit_loss_percent: f64,
        at: DateTime<Utc>,
    ) {
        self.status = SignalStatus::Closed;
        self.outcome = Some(outcome);
        self.exit_price = Some(exit_price);
        self.profit_loss_percent = Some(profit_loss_percent);
        self.exit_time = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_generates_id_and_defaults_time() {
        let now = Utc::now();
        let record =
            SignalRecord::open(NewSignal::new("BTCUSDT", "1h", SignalClass::Buy, 75.0), now);
        assert!(record.signal_id.starts_with("signal_"));
        assert_eq!(record.emitted_at, now);
        assert_eq!(record.status, SignalStatus::Active);
        assert!(record.outcome.is_none());
    }

    #[test]
    fn test_close_sets_outcome_fields() {
        let now = Utc::now();
        let mut record = SignalRecord::open(
            NewSignal::new("ETHUSDT", "4h", SignalClass::Sell, 60.0)
                .with_id("s-1")
                .with_prices(dec!(2000), dec!(2050), dec!(1900)),
            now,
        );
        record.close(SignalOutcome::TookProfit, dec!(1900), 5.0, now);
        assert!(record.is_closed());
        assert_eq!(record.signal_id, "s-1");
        assert_eq!(record.exit_price, Some(dec!(1900)));
        assert_eq!(record.profit_loss_percent, Some(5.0));
    }

    #[test]
    fn test_outcome_serde_names() {
        let json = serde_json::to_string(&SignalOutcome::StoppedOut).unwrap();
        assert_eq!(json, "\"STOPPED_OUT\"");
        assert!(SignalOutcome::TookProfit.is_win());
        assert!(SignalOutcome::StoppedOut.is_loss());
        assert_eq!("took_profit".parse::<SignalOutcome>().unwrap(), SignalOutcome::TookProfit);
    }
}
