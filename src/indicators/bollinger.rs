use super::{finite_or_nan, rolling_std, sma};

#[derive(Debug, Clone)]
pub struct BollingerOutput {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
    /// (upper - lower) / middle
    pub width: Vec<f64>,
    /// (close - lower) / (upper - lower)
    pub position: Vec<f64>,
}

pub fn bollinger_bands(closes: &[f64], period: usize, std_dev_multiplier: f64) -> BollingerOutput {
    let middle = sma(closes, period);
    let std_dev = rolling_std(closes, period);

    let upper: Vec<f64> = middle
        .iter()
        .zip(&std_dev)
        .map(|(m, s)| m + s * std_dev_multiplier)
        .collect();
    let lower: Vec<f64> = middle
        .iter()
        .zip(&std_dev)
        .map(|(m, s)| m - s * std_dev_multiplier)
        .collect();

    let width = (0..closes.len())
        .map(|i| finite_or_nan((upper[i] - lower[i]) / middle[i]))
        .collect();
    let position = (0..closes.len())
        .map(|i| finite_or_nan((closes[i] - lower[i]) / (upper[i] - lower[i])))
        .collect();

    BollingerOutput {
        upper,
        middle,
        lower,
        width,
        position,
    }
}
