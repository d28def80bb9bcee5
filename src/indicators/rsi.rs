use super::{diff, finite_or_nan, sma};

/// RSI from trailing simple averages of gains and losses over `period`.
///
/// The first price change is undefined and counts as zero gain and zero loss.
/// A window with no losses reads 100; a window with neither gains nor losses
/// is undefined.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let delta = diff(closes);
    let gains: Vec<f64> = delta.iter().map(|&d| if d > 0.0 { d } else { 0.0 }).collect();
    let losses: Vec<f64> = delta.iter().map(|&d| if d < 0.0 { -d } else { 0.0 }).collect();

    let avg_gain = sma(&gains, period);
    let avg_loss = sma(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(&g, &l)| {
            if g.is_nan() || l.is_nan() || (g == 0.0 && l == 0.0) {
                f64::NAN
            } else if l == 0.0 {
                100.0
            } else {
                finite_or_nan(100.0 - 100.0 / (1.0 + g / l))
            }
        })
        .collect()
}
