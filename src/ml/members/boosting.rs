use ndarray::{Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{DecisionTree, Target, TreeParams};
use super::{apply_class_balance, check_predict_input, training_weights, Classifier, N_CLASSES};
use crate::error::{PipelineError, Result};

/// Gradient boosting hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_split: usize,
    pub class_balance: bool,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            max_depth: 8,
            learning_rate: 0.1,
            min_samples_split: 5,
            class_balance: true,
            seed: 42,
        }
    }
}

/// Multiclass gradient boosting on the softmax loss: one regression tree per
/// class and stage, each fit to the negative gradient `onehot - p`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    params: BoostingParams,
    init_scores: Vec<f64>,
    stages: Vec<Vec<DecisionTree>>,
    n_features: usize,
}

impl GradientBoosting {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            init_scores: Vec::new(),
            stages: Vec::new(),
            n_features: 0,
        }
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }

    fn raw_scores(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut scores = Array2::zeros((x.nrows(), N_CLASSES));
        for (row, mut out) in x.axis_iter(Axis(0)).zip(scores.axis_iter_mut(Axis(0))) {
            for k in 0..N_CLASSES {
                out[k] = self.init_scores[k];
            }
            for stage in &self.stages {
                for (k, tree) in stage.iter().enumerate() {
                    let leaf = tree.leaf_value(row).first().copied().unwrap_or(0.0);
                    out[k] += self.params.learning_rate * leaf;
                }
            }
        }
        scores
    }
}

fn softmax_rows(scores: &mut Array2<f64>) {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    }
}

impl Classifier for GradientBoosting {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()> {
        let mut weights = training_weights(x, y, sample_weight)?;
        if self.params.class_balance {
            apply_class_balance(y, &mut weights);
        }
        if !(self.params.learning_rate > 0.0) {
            return Err(PipelineError::Config(
                "Boosting learning_rate must be positive".to_string(),
            ));
        }

        let n = x.nrows();
        let total_weight: f64 = weights.iter().sum();
        if total_weight <= 0.0 {
            return Err(PipelineError::InsufficientData("All sample weights are zero".to_string()));
        }

        // Log class priors, floored so absent classes stay finite
        let mut prior = [0.0; N_CLASSES];
        for (&label, &w) in y.iter().zip(&weights) {
            prior[label] += w;
        }
        let init_scores: Vec<f64> =
            prior.iter().map(|p| (p / total_weight).max(1e-6).ln()).collect();

        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: 1,
            max_features: Some(((x.ncols() as f64).sqrt().ceil() as usize).max(1)),
        };
        let indices: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);

        let mut scores = Array2::<f64>::zeros((n, N_CLASSES));
        for mut row in scores.axis_iter_mut(Axis(0)) {
            for k in 0..N_CLASSES {
                row[k] = init_scores[k];
            }
        }

        let mut stages = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let mut proba = scores.clone();
            softmax_rows(&mut proba);

            let mut stage = Vec::with_capacity(N_CLASSES);
            for k in 0..N_CLASSES {
                let residual: Vec<f64> = (0..n)
                    .map(|i| (if y[i] == k { 1.0 } else { 0.0 }) - proba[[i, k]])
                    .collect();
                let mut tree = DecisionTree::new(tree_params.clone());
                tree.fit(x, Target::Values(&residual), &weights, &indices, &mut rng);

                for (i, row) in x.axis_iter(Axis(0)).enumerate() {
                    let step = tree.leaf_value(row).first().copied().unwrap_or(0.0);
                    scores[[i, k]] += self.params.learning_rate * step;
                }
                stage.push(tree);
            }
            stages.push(stage);
        }

        debug!("Gradient boosting fitted: {} stages x {} classes", stages.len(), N_CLASSES);
        self.init_scores = init_scores;
        self.stages = stages;
        self.n_features = x.ncols();
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        check_predict_input(x, self.n_features, self.is_fitted(), "gradient boosting")?;
        let mut scores = self.raw_scores(x);
        softmax_rows(&mut scores);
        Ok(scores)
    }

    /// Importances averaged over every stage's trees
    fn feature_importances(&self) -> Option<Vec<f64>> {
        if !self.is_fitted() || self.stages.is_empty() {
            return None;
        }
        let mut totals = vec![0.0; self.n_features];
        for tree in self.stages.iter().flatten() {
            for (t, v) in totals.iter_mut().zip(tree.feature_importances()) {
                *t += v;
            }
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            totals.iter_mut().for_each(|v| *v /= sum);
        }
        Some(totals)
    }

    fn is_fitted(&self) -> bool {
        !self.init_scores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::members::tests::clustered;

    #[test]
    fn test_zero_stages_predicts_priors() {
        let (x, y) = clustered(10);
        let mut model = GradientBoosting::new(BoostingParams {
            n_estimators: 0,
            class_balance: false,
            ..Default::default()
        });
        model.fit(&x, &y, None).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        for p in proba.row(0) {
            assert!((p - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_more_stages_sharpen_probabilities() {
        let (x, y) = clustered(15);
        let fit = |stages| {
            let mut model = GradientBoosting::new(BoostingParams {
                n_estimators: stages,
                max_depth: 3,
                ..Default::default()
            });
            model.fit(&x, &y, None).unwrap();
            let proba = model.predict_proba(&x).unwrap();
            (0..y.len()).map(|i| proba[[i, y[i]]]).sum::<f64>() / y.len() as f64
        };
        assert!(fit(30) > fit(3));
    }

    #[test]
    fn test_rejects_bad_learning_rate() {
        let (x, y) = clustered(5);
        let mut model =
            GradientBoosting::new(BoostingParams { learning_rate: 0.0, ..Default::default() });
        assert!(model.fit(&x, &y, None).is_err());
        assert!(!model.is_fitted());
    }
}
