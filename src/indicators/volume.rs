use super::{cumsum_skip_nan, shift};

/// On-balance volume: cumulative volume signed by close direction
pub fn obv(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let prev = shift(closes, 1);
    let mut total = 0.0;
    (0..closes.len())
        .map(|i| {
            if closes[i] > prev[i] {
                total += volumes[i];
            } else if closes[i] < prev[i] {
                total -= volumes[i];
            }
            total
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct VptOutput {
    pub vpt: Vec<f64>,
    pub cumulative: Vec<f64>,
}

/// Volume-price trend from one-step returns
pub fn volume_price_trend(volumes: &[f64], returns: &[f64]) -> VptOutput {
    let vpt: Vec<f64> = volumes.iter().zip(returns).map(|(v, r)| v * r).collect();
    let cumulative = cumsum_skip_nan(&vpt);
    VptOutput { vpt, cumulative }
}
