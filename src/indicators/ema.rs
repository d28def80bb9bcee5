/// Span-based exponential moving average with bias-corrected weights.
///
/// `alpha = 2 / (span + 1)`; each output is the weighted mean of all prior
/// values with weights `(1 - alpha)^age`, so the series is defined from the
/// first observation. Inputs are expected to be free of `NaN`.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    values
        .iter()
        .map(|&v| {
            numerator = v + decay * numerator;
            denominator = 1.0 + decay * denominator;
            numerator / denominator
        })
        .collect()
}

/// Spread between a fast and a slow EMA as a percentage of the slow one
pub fn ema_spread_pct(values: &[f64], fast: usize, slow: usize) -> Vec<f64> {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| super::finite_or_nan((f - s) / s * 100.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_first_value_is_input() {
        let out = ema(&[10.0, 20.0, 30.0], 3);
        assert_eq!(out[0], 10.0);
        // alpha = 0.5: (20 + 0.5*10) / 1.5
        assert!((out[1] - 50.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_ema_constant_series() {
        let out = ema(&[5.0; 50], 12);
        assert!(out.iter().all(|v| (v - 5.0).abs() < 1e-12));
    }

    #[test]
    fn test_ema_spread_sign() {
        let rising: Vec<f64> = (1..=60).map(|i| i as f64).collect();
        let spread = ema_spread_pct(&rising, 9, 21);
        assert!(spread[59] > 0.0);
    }
}
