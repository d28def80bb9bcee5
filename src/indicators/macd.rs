use super::ema;

#[derive(Debug, Clone)]
pub struct MacdOutput {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdOutput {
    let fast = ema(closes, fast_period);
    let slow = ema(closes, slow_period);
    let macd_line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal_line = ema(&macd_line, signal_period);
    let histogram = macd_line.iter().zip(&signal_line).map(|(m, s)| m - s).collect();

    MacdOutput {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Standard 12/26/9 parameters
pub fn macd_default(closes: &[f64]) -> MacdOutput {
    macd(closes, 12, 26, 9)
}
