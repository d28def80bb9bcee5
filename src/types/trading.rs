use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Three-way trading class predicted by the ensemble.
/// The discriminants are the class indices used by every classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalClass {
    Sell = 0,
    Hold = 1,
    Buy = 2,
}

impl SignalClass {
    pub const COUNT: usize = 3;
    pub const ALL: [SignalClass; 3] = [SignalClass::Sell, SignalClass::Hold, SignalClass::Buy];

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(SignalClass::Sell),
            1 => Some(SignalClass::Hold),
            2 => Some(SignalClass::Buy),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalClass::Sell => "SELL",
            SignalClass::Hold => "HOLD",
            SignalClass::Buy => "BUY",
        }
    }

    /// Label a forward price move. Thresholds are strict: a move of exactly
    /// `threshold` stays HOLD. A non-positive current price is degenerate and
    /// labels HOLD.
    pub fn from_price_move(current: f64, future: f64, threshold: f64) -> Self {
        if current <= 0.0 {
            return SignalClass::Hold;
        }
        let change = (future - current) / current;
        if change < -threshold {
            SignalClass::Sell
        } else if change > threshold {
            SignalClass::Buy
        } else {
            SignalClass::Hold
        }
    }
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignalClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SELL" => Ok(SignalClass::Sell),
            "HOLD" => Ok(SignalClass::Hold),
            "BUY" => Ok(SignalClass::Buy),
            other => Err(format!("Unknown signal type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,   // 1 minute
    M5,   // 5 minutes
    M15,  // 15 minutes
    H1,   // 1 hour
    H4,   // 4 hours
    D1,   // 1 day
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M5 => "5m",
            TimeFrame::M15 => "15m",
            TimeFrame::H1 => "1h",
            TimeFrame::H4 => "4h",
            TimeFrame::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "m1" => Some(TimeFrame::M1),
            "5m" | "m5" => Some(TimeFrame::M5),
            "15m" | "m15" => Some(TimeFrame::M15),
            "1h" | "h1" => Some(TimeFrame::H1),
            "4h" | "h4" => Some(TimeFrame::H4),
            "1d" | "d1" => Some(TimeFrame::D1),
            _ => None,
        }
    }

    pub fn to_minutes(&self) -> u64 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M5 => 5,
            TimeFrame::M15 => 15,
            TimeFrame::H1 => 60,
            TimeFrame::H4 => 240,
            TimeFrame::D1 => 1440,
        }
    }

    /// Number of candles covering `days` of history
    pub fn candles_per_days(&self, days: u64) -> usize {
        (days * 1440 / self.to_minutes()) as usize
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_thresholds_are_strict() {
        assert_eq!(SignalClass::from_price_move(100.0, 101.0, 0.01), SignalClass::Hold);
        assert_eq!(SignalClass::from_price_move(100.0, 99.0, 0.01), SignalClass::Hold);
        assert_eq!(SignalClass::from_price_move(100.0, 101.01, 0.01), SignalClass::Buy);
        assert_eq!(SignalClass::from_price_move(100.0, 98.99, 0.01), SignalClass::Sell);
    }

    #[test]
    fn test_degenerate_price_is_hold() {
        assert_eq!(SignalClass::from_price_move(0.0, 50.0, 0.01), SignalClass::Hold);
        assert_eq!(SignalClass::from_price_move(-1.0, 50.0, 0.01), SignalClass::Hold);
    }

    #[test]
    fn test_class_index_roundtrip() {
        for class in SignalClass::ALL {
            assert_eq!(SignalClass::from_index(class.index()), Some(class));
        }
        assert_eq!(SignalClass::from_index(3), None);
        assert_eq!("buy".parse::<SignalClass>().unwrap(), SignalClass::Buy);
    }

    #[test]
    fn test_timeframe_candles_per_days() {
        assert_eq!(TimeFrame::H1.candles_per_days(30), 720);
        assert_eq!(TimeFrame::H4.candles_per_days(30), 180);
        assert_eq!(TimeFrame::parse("1h"), Some(TimeFrame::H1));
        assert_eq!(TimeFrame::parse("2h"), None);
    }
}
