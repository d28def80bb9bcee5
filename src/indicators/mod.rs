//! Vectorised indicator math over `f64` series.
//!
//! Every function returns a series of the same length as its input. Positions
//! without enough trailing history hold `NaN`; no value ever looks ahead.

pub mod ema;
pub mod rsi;
pub mod macd;
pub mod bollinger;
pub mod atr;
pub mod volume;
pub mod oscillators;

pub use ema::*;
pub use rsi::*;
pub use macd::*;
pub use bollinger::*;
pub use atr::*;
pub use volume::*;
pub use oscillators::*;

/// Apply `f` to every full trailing window. Windows containing `NaN` yield `NaN`.
pub fn rolling<F>(values: &[f64], window: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 {
        return out;
    }
    for i in (window - 1)..values.len() {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        out[i] = f(slice);
    }
    out
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator)
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, mean)
}

pub fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, sample_std)
}

pub fn highest(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

pub fn lowest(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

/// Value `periods` steps back
pub fn shift(values: &[f64], periods: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| if i >= periods { values[i - periods] } else { f64::NAN })
        .collect()
}

pub fn pct_change(values: &[f64], periods: usize) -> Vec<f64> {
    let prev = shift(values, periods);
    values.iter().zip(prev).map(|(v, p)| (v - p) / p).collect()
}

pub fn diff(values: &[f64]) -> Vec<f64> {
    let prev = shift(values, 1);
    values.iter().zip(prev).map(|(v, p)| v - p).collect()
}

/// Running sum that skips `NaN` entries but keeps them `NaN` in the output
pub fn cumsum_skip_nan(values: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                f64::NAN
            } else {
                total += v;
                total
            }
        })
        .collect()
}

/// Element-wise division; anything non-finite becomes `NaN`
pub fn safe_ratio(numerator: &[f64], denominator: &[f64]) -> Vec<f64> {
    numerator
        .iter()
        .zip(denominator)
        .map(|(n, d)| finite_or_nan(n / d))
        .collect()
}

pub fn finite_or_nan(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        f64::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_leading_nan() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(out[2], 2.0);
        assert_eq!(out[3], 3.0);
    }

    #[test]
    fn test_rolling_propagates_nan() {
        let out = sma(&[f64::NAN, 2.0, 3.0, 4.0], 2);
        assert!(out[1].is_nan());
        assert_eq!(out[2], 2.5);
    }

    #[test]
    fn test_sample_std() {
        let out = rolling_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8);
        assert!((out[7] - 2.138089935299395).abs() < 1e-12);
    }

    #[test]
    fn test_pct_change_and_shift() {
        let out = pct_change(&[100.0, 110.0, 99.0], 1);
        assert!(out[0].is_nan());
        assert!((out[1] - 0.1).abs() < 1e-12);
        assert!((out[2] + 0.1).abs() < 1e-12);
        assert_eq!(shift(&[1.0, 2.0], 1)[1], 1.0);
    }

    #[test]
    fn test_cumsum_skips_nan() {
        let out = cumsum_skip_nan(&[f64::NAN, 1.0, 2.0, f64::NAN, 3.0]);
        assert!(out[0].is_nan());
        assert_eq!(out[2], 3.0);
        assert!(out[3].is_nan());
        assert_eq!(out[4], 6.0);
    }

    #[test]
    fn test_highest_lowest() {
        let values = [3.0, 1.0, 4.0, 1.0, 5.0];
        assert_eq!(highest(&values, 3)[4], 5.0);
        assert_eq!(lowest(&values, 3)[3], 1.0);
    }
}
