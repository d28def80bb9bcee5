use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Z-score scaler fitted on the training split only
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    pub fn is_fitted(&self) -> bool {
        !self.means.is_empty()
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let means = x
            .mean_axis(Axis(0))
            .ok_or_else(|| {
                PipelineError::InsufficientData("Cannot fit scaler on zero rows".to_string())
            })?;
        let stds = x.std_axis(Axis(0), 0.0);
        self.means = means.to_vec();
        self.stds = stds.to_vec();
        Ok(())
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    /// Constant columns scale to 0
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted() {
            return Err(PipelineError::NotFitted(
                "Scaler must be fitted before transform".to_string(),
            ));
        }
        if x.ncols() != self.means.len() {
            return Err(PipelineError::Schema(format!(
                "Scaler expects {} features, got {}",
                self.means.len(),
                x.ncols()
            )));
        }

        let mut out = x.clone();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, std) = (self.means[j], self.stds[j]);
            column.mapv_inplace(|v| if std > 1e-10 { (v - mean) / std } else { 0.0 });
        }
        Ok(out)
    }
}
