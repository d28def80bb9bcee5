use tracing::info;

use super::store::FeedbackSample;
use crate::config::FeedbackConfig;
use crate::types::SignalClass;

/// Turns closed-signal rewards into per-sample training weights.
///
/// Weights follow a linear recency ramp over the sample index, so samples
/// must be in chronological order. Each label class is then scaled by
/// `clamp(1 + mean_reward * reward_scale)` and the vector is rescaled to a
/// mean of 1.
#[derive(Debug, Clone)]
pub struct FeedbackWeighter {
    pub decay_start: f64,
    pub reward_scale: f64,
    pub min_adjustment: f64,
    pub max_adjustment: f64,
    pub min_samples: usize,
}

impl Default for FeedbackWeighter {
    fn default() -> Self {
        Self::from_config(&FeedbackConfig::default())
    }
}

impl FeedbackWeighter {
    pub fn from_config(config: &FeedbackConfig) -> Self {
        Self {
            decay_start: config.decay_start,
            reward_scale: config.reward_scale,
            min_adjustment: config.min_adjustment,
            max_adjustment: config.max_adjustment,
            min_samples: config.min_samples,
        }
    }

    /// Weights for `labels`, or `None` when there is too little feedback to
    /// justify reweighting
    pub fn weights_for(
        &self,
        labels: &[SignalClass],
        feedback: Option<&[FeedbackSample]>,
    ) -> Option<Vec<f64>> {
        match feedback {
            Some(samples) if samples.len() >= self.min_samples => {
                Some(self.calculate_sample_weights(labels, samples))
            }
            Some(samples) => {
                info!(
                    "Only {} feedback samples (need {}), training without weights",
                    samples.len(),
                    self.min_samples
                );
                None
            }
            None => {
                info!("No feedback data yet, training without weights");
                None
            }
        }
    }

    pub fn calculate_sample_weights(
        &self,
        labels: &[SignalClass],
        feedback: &[FeedbackSample],
    ) -> Vec<f64> {
        let n = labels.len();
        if n == 0 {
            return Vec::new();
        }

        let mut weights = linspace(self.decay_start, 1.0, n);

        if !feedback.is_empty() {
            let adjustments = self.class_adjustments(feedback);
            for (w, label) in weights.iter_mut().zip(labels) {
                *w *= adjustments[label.index()];
            }
        }

        let mean = weights.iter().sum::<f64>() / n as f64;
        if mean > 0.0 {
            weights.iter_mut().for_each(|w| *w /= mean);
        }
        weights
    }

    /// Multiplier per class from the mean weighted reward of its feedback.
    /// Classes without feedback keep 1.0.
    pub fn class_adjustments(&self, feedback: &[FeedbackSample]) -> [f64; SignalClass::COUNT] {
        let mut sums = [0.0; SignalClass::COUNT];
        let mut counts = [0usize; SignalClass::COUNT];
        for sample in feedback {
            let k = sample.signal_type.index();
            sums[k] += sample.weighted_reward;
            counts[k] += 1;
        }

        let mut adjustments = [1.0; SignalClass::COUNT];
        for class in SignalClass::ALL {
            let k = class.index();
            let reward = if counts[k] > 0 { sums[k] / counts[k] as f64 } else { 0.0 };
            adjustments[k] =
                (1.0 + reward * self.reward_scale).clamp(self.min_adjustment, self.max_adjustment);
            info!("{} signals: reward={:.3}, weight_mult={:.3}", class, reward, adjustments[k]);
        }
        adjustments
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalOutcome;
    use chrono::Utc;

    fn sample(class: SignalClass, pl: f64) -> FeedbackSample {
        FeedbackSample {
            signal_id: format!("s-{}-{}", class, pl),
            signal_type: class,
            confidence: 70.0,
            emitted_at: Utc::now(),
            outcome: if pl > 0.0 { SignalOutcome::Success } else { SignalOutcome::Failure },
            profit_loss_percent: pl,
            reward: if pl > 0.0 { 1 } else { -1 },
            weighted_reward: pl / 100.0,
        }
    }

    fn mean(v: &[f64]) -> f64 {
        v.iter().sum::<f64>() / v.len() as f64
    }

    #[test]
    fn test_recency_ramp_without_feedback() {
        let labels = vec![SignalClass::Hold; 5];
        let weights = FeedbackWeighter::default().calculate_sample_weights(&labels, &[]);
        assert!((mean(&weights) - 1.0).abs() < 1e-12);
        assert!(weights.windows(2).all(|w| w[0] < w[1]));
        assert!((weights[4] / weights[0] - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_profitable_class_is_upweighted() {
        let labels = vec![SignalClass::Buy, SignalClass::Sell, SignalClass::Buy, SignalClass::Sell];
        let feedback = vec![sample(SignalClass::Buy, 50.0), sample(SignalClass::Sell, -50.0)];
        let weighter = FeedbackWeighter::default();

        let adjustments = weighter.class_adjustments(&feedback);
        assert!((adjustments[SignalClass::Buy.index()] - 1.15).abs() < 1e-12);
        assert!((adjustments[SignalClass::Sell.index()] - 0.85).abs() < 1e-12);
        assert_eq!(adjustments[SignalClass::Hold.index()], 1.0);

        let weights = weighter.calculate_sample_weights(&labels, &feedback);
        assert!((mean(&weights) - 1.0).abs() < 1e-12);
        assert!(weights[0] > weights[1]);
    }

    #[test]
    fn test_adjustment_is_clamped() {
        let feedback = vec![sample(SignalClass::Buy, 1000.0), sample(SignalClass::Sell, -1000.0)];
        let adjustments = FeedbackWeighter::default().class_adjustments(&feedback);
        assert_eq!(adjustments[SignalClass::Buy.index()], 1.5);
        assert_eq!(adjustments[SignalClass::Sell.index()], 0.5);
    }

    #[test]
    fn test_mean_is_one_for_any_input() {
        let weighter = FeedbackWeighter::default();
        let feedback = vec![sample(SignalClass::Hold, -7.0), sample(SignalClass::Buy, 3.0)];
        for n in [1, 2, 3, 17, 250] {
            let labels: Vec<SignalClass> = (0..n).map(|i| SignalClass::ALL[i % 3]).collect();
            let weights = weighter.calculate_sample_weights(&labels, &feedback);
            assert_eq!(weights.len(), n);
            assert!((mean(&weights) - 1.0).abs() < 1e-9);
        }
        assert!(weighter.calculate_sample_weights(&[], &feedback).is_empty());
    }

    #[test]
    fn test_too_little_feedback_skips_weighting() {
        let weighter = FeedbackWeighter::default();
        let labels = vec![SignalClass::Buy; 3];
        let few = vec![sample(SignalClass::Buy, 2.0); 4];
        assert!(weighter.weights_for(&labels, Some(&few[..])).is_none());
        assert!(weighter.weights_for(&labels, None).is_none());
        let enough = vec![sample(SignalClass::Buy, 2.0); 5];
        assert_eq!(weighter.weights_for(&labels, Some(&enough[..])).unwrap().len(), 3);
    }
}
