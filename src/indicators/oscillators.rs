use super::{finite_or_nan, highest, lowest, mean, rolling, shift, sma};

#[derive(Debug, Clone)]
pub struct StochasticOutput {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
    pub williams_r: Vec<f64>,
}

/// %K over `period` bars, %D as the `smooth` bar mean of %K, and Williams %R
/// over the same high/low window
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    smooth: usize,
) -> StochasticOutput {
    let high_n = highest(highs, period);
    let low_n = lowest(lows, period);

    let k: Vec<f64> = (0..closes.len())
        .map(|i| finite_or_nan(100.0 * (closes[i] - low_n[i]) / (high_n[i] - low_n[i])))
        .collect();
    let d = sma(&k, smooth);
    let williams_r = (0..closes.len())
        .map(|i| finite_or_nan(-100.0 * (high_n[i] - closes[i]) / (high_n[i] - low_n[i])))
        .collect();

    StochasticOutput { k, d, williams_r }
}

/// Percentage rate of change over `period` bars
pub fn rate_of_change(closes: &[f64], period: usize) -> Vec<f64> {
    let prev = shift(closes, period);
    closes
        .iter()
        .zip(&prev)
        .map(|(c, p)| finite_or_nan((c - p) / p * 100.0))
        .collect()
}

/// Commodity channel index using the mean absolute deviation of the typical price
pub fn cci(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let typical: Vec<f64> = (0..closes.len())
        .map(|i| (highs[i] + lows[i] + closes[i]) / 3.0)
        .collect();
    let sma_tp = sma(&typical, period);
    let mad = rolling(&typical, period, |w| {
        let m = mean(w);
        w.iter().map(|v| (v - m).abs()).sum::<f64>() / w.len() as f64
    });

    (0..closes.len())
        .map(|i| finite_or_nan((typical[i] - sma_tp[i]) / (0.015 * mad[i])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stochastic_at_high_is_100() {
        let highs: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();
        let lows: Vec<f64> = highs.iter().map(|h| h - 2.0).collect();
        let closes = highs.clone();
        let out = stochastic(&highs, &lows, &closes, 14, 3);
        assert!(out.k[12].is_nan());
        assert!((out.k[19] - 100.0).abs() < 1e-9);
        assert!((out.williams_r[19]).abs() < 1e-9);
        assert!((out.d[19] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_roc() {
        let closes: Vec<f64> = (0..13).map(|i| 100.0 + i as f64).collect();
        let out = rate_of_change(&closes, 12);
        assert!(out[11].is_nan());
        assert!((out[12] - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_cci_flat_is_undefined() {
        let out = cci(&[11.0; 25], &[9.0; 25], &[10.0; 25], 20);
        assert!(out.iter().all(|v| v.is_nan()));
    }
}
