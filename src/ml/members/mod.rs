//! Ensemble members behind one classifier interface.

pub mod tree;
pub mod forest;
pub mod boosting;
pub mod logistic;

pub use boosting::{BoostingParams, GradientBoosting};
pub use forest::{ForestParams, RandomForest};
pub use logistic::{LogisticParams, LogisticRegression};

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::types::SignalClass;

pub const N_CLASSES: usize = SignalClass::COUNT;

/// Uniform contract every ensemble member implements
pub trait Classifier {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()>;

    /// `[n, 3]` class probabilities, rows summing to 1
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Most probable class per row, lowest index on ties
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.axis_iter(Axis(0)).map(|row| argmax(row.iter().copied())).collect())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    fn is_fitted(&self) -> bool;
}

/// Concrete members the ensemble builds and persists
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemberModel {
    Forest(RandomForest),
    Boosting(GradientBoosting),
    Logistic(LogisticRegression),
}

impl MemberModel {
    pub fn kind(&self) -> &'static str {
        match self {
            MemberModel::Forest(_) => "forest",
            MemberModel::Boosting(_) => "boosting",
            MemberModel::Logistic(_) => "logistic",
        }
    }
}

impl Classifier for MemberModel {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()> {
        match self {
            MemberModel::Forest(m) => m.fit(x, y, sample_weight),
            MemberModel::Boosting(m) => m.fit(x, y, sample_weight),
            MemberModel::Logistic(m) => m.fit(x, y, sample_weight),
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            MemberModel::Forest(m) => m.predict_proba(x),
            MemberModel::Boosting(m) => m.predict_proba(x),
            MemberModel::Logistic(m) => m.predict_proba(x),
        }
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            MemberModel::Forest(m) => m.feature_importances(),
            MemberModel::Boosting(m) => m.feature_importances(),
            MemberModel::Logistic(m) => m.feature_importances(),
        }
    }

    fn is_fitted(&self) -> bool {
        match self {
            MemberModel::Forest(m) => m.is_fitted(),
            MemberModel::Boosting(m) => m.is_fitted(),
            MemberModel::Logistic(m) => m.is_fitted(),
        }
    }
}

/// Index of the largest value; the first one wins ties
pub fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Check shapes and labels, and resolve the per-sample weights
pub(crate) fn training_weights(
    x: &Array2<f64>,
    y: &[usize],
    sample_weight: Option<&[f64]>,
) -> Result<Vec<f64>> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(PipelineError::InsufficientData("Empty training matrix".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(PipelineError::Schema(format!(
            "{} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if let Some(bad) = y.iter().find(|&&label| label >= N_CLASSES) {
        return Err(PipelineError::Schema(format!("Label {} outside 0..{}", bad, N_CLASSES)));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Schema("Training matrix holds non-finite values".to_string()));
    }

    match sample_weight {
        None => Ok(vec![1.0; y.len()]),
        Some(w) if w.len() != y.len() => Err(PipelineError::Schema(format!(
            "{} sample weights for {} samples",
            w.len(),
            y.len()
        ))),
        Some(w) if w.iter().any(|v| !v.is_finite() || *v < 0.0) => Err(PipelineError::Schema(
            "Sample weights must be finite and non-negative".to_string(),
        )),
        Some(w) => Ok(w.to_vec()),
    }
}

/// Multiply weights by `n / (k * count_k)` so every present class carries
/// the same total weight
pub(crate) fn apply_class_balance(y: &[usize], weights: &mut [f64]) {
    let mut counts = [0usize; N_CLASSES];
    for &label in y {
        counts[label] += 1;
    }
    let present = counts.iter().filter(|&&c| c > 0).count().max(1);
    let n = y.len() as f64;
    for (w, &label) in weights.iter_mut().zip(y) {
        *w *= n / (present as f64 * counts[label] as f64);
    }
}

pub(crate) fn check_predict_input(
    x: &Array2<f64>,
    expected: usize,
    fitted: bool,
    member: &str,
) -> Result<()> {
    if !fitted {
        return Err(PipelineError::NotTrained(format!("{} has not been fitted", member)));
    }
    if x.ncols() != expected {
        return Err(PipelineError::Schema(format!(
            "{} expects {} features, got {}",
            member,
            expected,
            x.ncols()
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::Array2;

    /// Three noisy clusters at the corners of a triangle plus a noise column
    pub(crate) fn clustered(n_per_class: usize) -> (Array2<f64>, Vec<usize>) {
        const CENTERS: [(f64, f64); N_CLASSES] = [(-1.5, -1.0), (0.0, 1.5), (1.5, -1.0)];
        let n = n_per_class * N_CLASSES;
        let mut x = Array2::zeros((n, 3));
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let class = i % N_CLASSES;
            let jitter_a = ((i * 7919) % 100) as f64 / 100.0 - 0.5;
            let jitter_b = ((i * 104729) % 97) as f64 / 97.0 - 0.5;
            x[[i, 0]] = CENTERS[class].0 + jitter_a * 0.5;
            x[[i, 1]] = CENTERS[class].1 + jitter_b * 0.5;
            x[[i, 2]] = ((i * 31) % 17) as f64 / 17.0 - 0.5;
            y.push(class);
        }
        (x, y)
    }

    #[test]
    fn test_argmax_prefers_lowest_on_tie() {
        assert_eq!(argmax([0.4, 0.4, 0.2].into_iter()), 0);
        assert_eq!(argmax([0.1, 0.3, 0.6].into_iter()), 2);
    }

    #[test]
    fn test_training_weights_validation() {
        let x = Array2::zeros((2, 1));
        assert_eq!(training_weights(&x, &[0, 2], None).unwrap(), vec![1.0, 1.0]);
        assert!(training_weights(&x, &[0, 3], None).is_err());
        assert!(training_weights(&x, &[0], None).is_err());
        assert!(training_weights(&x, &[0, 1], Some(&[1.0][..])).is_err());
        assert!(training_weights(&x, &[0, 1], Some(&[1.0, -1.0][..])).is_err());
    }

    #[test]
    fn test_class_balance_equalizes_totals() {
        let y = [0, 0, 0, 1];
        let mut w = vec![1.0; 4];
        apply_class_balance(&y, &mut w);
        let sell: f64 = w[..3].iter().sum();
        assert!((sell - w[3]).abs() < 1e-12);
    }

    #[test]
    fn test_every_member_learns_clusters() {
        let (x, y) = clustered(30);
        let mut members = vec![
            MemberModel::Forest(RandomForest::new(ForestParams {
                n_estimators: 10,
                ..Default::default()
            })),
            MemberModel::Boosting(GradientBoosting::new(BoostingParams {
                n_estimators: 20,
                ..Default::default()
            })),
            MemberModel::Logistic(LogisticRegression::new(LogisticParams::default())),
        ];
        for member in &mut members {
            assert!(!member.is_fitted());
            member.fit(&x, &y, None).unwrap();
            let pred = member.predict(&x).unwrap();
            let correct = pred.iter().zip(&y).filter(|(p, t)| p == t).count();
            assert!(correct as f64 / y.len() as f64 > 0.9, "{} too weak", member.kind());

            let proba = member.predict_proba(&x).unwrap();
            for row in proba.axis_iter(Axis(0)) {
                assert!((row.sum() - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_predict_before_fit_is_not_trained() {
        let member = MemberModel::Logistic(LogisticRegression::new(LogisticParams::default()));
        let err = member.predict(&Array2::zeros((1, 3))).unwrap_err();
        assert!(matches!(err, PipelineError::NotTrained(_)));
    }

    #[test]
    fn test_member_serde_tag() {
        let member = MemberModel::Forest(RandomForest::new(ForestParams::default()));
        let json = serde_json::to_string(&member).unwrap();
        assert!(json.contains("\"kind\":\"forest\""));
        let back: MemberModel = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, MemberModel::Forest(_)));
    }
}
