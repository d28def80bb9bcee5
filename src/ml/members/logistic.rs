use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{apply_class_balance, check_predict_input, training_weights, Classifier, N_CLASSES};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    pub max_iter: usize,
    pub learning_rate: f64,
    /// L2 penalty on coefficients (not the intercept)
    pub l2: f64,
    pub class_balance: bool,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            learning_rate: 0.5,
            l2: 0.01,
            class_balance: true,
        }
    }
}

/// Multinomial logistic regression trained by full-batch gradient descent.
/// Expects standardized inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    params: LogisticParams,
    /// `[features, classes]`
    coefficients: Option<Array2<f64>>,
    intercept: Array1<f64>,
}

impl LogisticRegression {
    pub fn new(params: LogisticParams) -> Self {
        Self {
            params,
            coefficients: None,
            intercept: Array1::zeros(N_CLASSES),
        }
    }

    fn probabilities(
        x: &Array2<f64>,
        coefficients: &Array2<f64>,
        intercept: &Array1<f64>,
    ) -> Array2<f64> {
        let mut logits = x.dot(coefficients) + intercept;
        for mut row in logits.axis_iter_mut(Axis(0)) {
            let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            row.mapv_inplace(|v| (v - max).exp());
            let total = row.sum();
            row.mapv_inplace(|v| v / total);
        }
        logits
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()> {
        let mut weights = training_weights(x, y, sample_weight)?;
        if self.params.class_balance {
            apply_class_balance(y, &mut weights);
        }
        let total_weight: f64 = weights.iter().sum();
        if total_weight <= 0.0 {
            return Err(PipelineError::InsufficientData("All sample weights are zero".to_string()));
        }

        let n_features = x.ncols();
        let weights = Array1::from(weights);
        let mut onehot = Array2::<f64>::zeros((x.nrows(), N_CLASSES));
        for (i, &label) in y.iter().enumerate() {
            onehot[[i, label]] = 1.0;
        }

        let mut coefficients = Array2::<f64>::zeros((n_features, N_CLASSES));
        let mut intercept = Array1::<f64>::zeros(N_CLASSES);
        // Step shrinks with the mean squared row norm so wide inputs stay stable
        let mean_sq_norm: f64 = x
            .axis_iter(Axis(0))
            .zip(weights.iter())
            .map(|(row, w)| w * row.dot(&row))
            .sum::<f64>()
            / total_weight;
        let lr = self.params.learning_rate / (1.0 + 0.5 * mean_sq_norm);

        for _ in 0..self.params.max_iter {
            let proba = Self::probabilities(x, &coefficients, &intercept);
            // weighted error, rows scaled by their sample weight
            let error = (proba - &onehot) * &weights.view().insert_axis(Axis(1)) / total_weight;

            let grad_coef = x.t().dot(&error) + &coefficients * self.params.l2;
            let grad_intercept = error.sum_axis(Axis(0));

            coefficients.scaled_add(-lr, &grad_coef);
            intercept.scaled_add(-lr, &grad_intercept);
        }

        if coefficients.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidState(
                "Logistic regression diverged; lower the learning rate".to_string(),
            ));
        }

        debug!(
            "Logistic regression fitted: {} features, {} iterations",
            n_features, self.params.max_iter
        );
        self.coefficients = Some(coefficients);
        self.intercept = intercept;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let expected = self.coefficients.as_ref().map_or(0, |c| c.nrows());
        check_predict_input(x, expected, self.is_fitted(), "logistic regression")?;
        match &self.coefficients {
            Some(coefficients) => Ok(Self::probabilities(x, coefficients, &self.intercept)),
            None => Err(PipelineError::NotTrained(
                "logistic regression has not been fitted".to_string(),
            )),
        }
    }

    fn is_fitted(&self) -> bool {
        self.coefficients.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fits_linearly_separable_classes() {
        let x = array![[-2.0], [-1.8], [-1.5], [1.5], [1.8], [2.0]];
        let y = [0, 0, 0, 2, 2, 2];
        let mut model = LogisticRegression::new(LogisticParams::default());
        model.fit(&x, &y, None).unwrap();
        assert_eq!(model.predict(&x).unwrap(), vec![0, 0, 0, 2, 2, 2]);
        // HOLD never appears so it stays the least likely class
        let proba = model.predict_proba(&array![[0.0]]).unwrap();
        assert!(proba[[0, 1]] < proba[[0, 0]].max(proba[[0, 2]]) + 1e-9);
    }

    #[test]
    fn test_no_importances() {
        let model = LogisticRegression::new(LogisticParams::default());
        assert!(model.feature_importances().is_none());
    }

    #[test]
    fn test_sample_weights_tilt_decision() {
        let x = array![[0.0], [0.0], [0.0], [0.0]];
        let y = [0, 0, 2, 2];
        let params = LogisticParams { class_balance: false, ..Default::default() };

        let mut model = LogisticRegression::new(params);
        model.fit(&x, &y, Some(&[1.0, 1.0, 3.0, 3.0][..])).unwrap();
        assert_eq!(model.predict(&array![[0.0]]).unwrap(), vec![2]);
    }
}
