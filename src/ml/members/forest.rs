//! Bagged gini trees with sqrt feature sampling.

use ndarray::{Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{DecisionTree, Target, TreeParams};
use super::{apply_class_balance, check_predict_input, training_weights, Classifier, N_CLASSES};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub class_balance: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 15,
            min_samples_split: 5,
            class_balance: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<DecisionTree>,
    n_features: usize,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_features: 0,
            importances: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()> {
        let mut weights = training_weights(x, y, sample_weight)?;
        if self.params.class_balance {
            apply_class_balance(y, &mut weights);
        }

        let n = x.nrows();
        let n_features = x.ncols();
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: 1,
            max_features: Some(((n_features as f64).sqrt().ceil() as usize).max(1)),
        };
        let target = Target::Classes { labels: y, n_classes: N_CLASSES };
        let seed = self.params.seed;

        let trees: Vec<DecisionTree> = (0..self.params.n_estimators.max(1))
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut tree = DecisionTree::new(tree_params.clone());
                tree.fit(x, target, &weights, &bootstrap, &mut rng);
                tree
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        for tree in &trees {
            for (total, v) in importances.iter_mut().zip(tree.feature_importances()) {
                *total += v;
            }
        }
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|v| *v /= sum);
        }

        debug!(
            "Random forest fitted: {} trees, max depth {}",
            trees.len(),
            trees.iter().map(|t| t.depth()).max().unwrap_or(0)
        );
        self.trees = trees;
        self.n_features = n_features;
        self.importances = importances;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        check_predict_input(x, self.n_features, self.is_fitted(), "random forest")?;
        let mut proba = Array2::zeros((x.nrows(), N_CLASSES));
        for (row, mut out) in x.axis_iter(Axis(0)).zip(proba.axis_iter_mut(Axis(0))) {
            for tree in &self.trees {
                for (o, v) in out.iter_mut().zip(tree.leaf_value(row)) {
                    *o += v;
                }
            }
            let total = out.sum();
            if total > 0.0 {
                out.mapv_inplace(|v| v / total);
            } else {
                out.fill(1.0 / N_CLASSES as f64);
            }
        }
        Ok(proba)
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.is_fitted().then(|| self.importances.clone())
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::members::tests::clustered;

    fn small() -> RandomForest {
        RandomForest::new(ForestParams { n_estimators: 15, max_depth: 6, ..Default::default() })
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let (x, y) = clustered(20);
        let mut a = small();
        let mut b = small();
        a.fit(&x, &y, None).unwrap();
        b.fit(&x, &y, None).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
        assert_eq!(a.n_trees(), 15);
    }

    #[test]
    fn test_importances_sum_to_one_and_favor_signal() {
        let (x, y) = clustered(20);
        let mut forest = small();
        forest.fit(&x, &y, None).unwrap();
        let imp = forest.feature_importances().unwrap();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp[2] < imp[0].max(imp[1]));
    }

    #[test]
    fn test_zero_weight_class_never_predicted() {
        let (x, y) = clustered(20);
        let weights: Vec<f64> = y.iter().map(|&c| if c == 1 { 0.0 } else { 1.0 }).collect();
        let mut forest = RandomForest::new(ForestParams {
            n_estimators: 10,
            class_balance: false,
            ..Default::default()
        });
        forest.fit(&x, &y, Some(&weights[..])).unwrap();
        let proba = forest.predict_proba(&x).unwrap();
        assert!(proba.column(1).iter().all(|p| *p == 0.0));
    }
}
