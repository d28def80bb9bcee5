use super::{shift, sma};

/// max(high - low, |high - prev close|, |low - prev close|); undefined on the
/// first bar, which has no previous close.
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let prev_close = shift(closes, 1);
    (0..closes.len())
        .map(|i| {
            let pc = prev_close[i];
            if pc.is_nan() {
                return f64::NAN;
            }
            let hl = highs[i] - lows[i];
            let hc = (highs[i] - pc).abs();
            let lc = (lows[i] - pc).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Rolling mean of the true range
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    sma(&true_range(highs, lows, closes), period)
}
