use ndarray::{Array, Axis, Dimension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Per-feature min-max scaling state.
///
/// Features live on the last axis, so the same instance works on flattened
/// `[sample, feature]` and windowed `[sample, window, feature]` arrays. One
/// instance belongs to one model and is persisted with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureNormalizer {
    min: Vec<f64>,
    max: Vec<f64>,
    fitted: bool,
}

impl FeatureNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn n_features(&self) -> usize {
        self.min.len()
    }

    /// Fit on every value of each feature, then rescale to [0, 1].
    /// Replaces any previous fit.
    pub fn fit_transform<D: Dimension>(&mut self, x: &Array<f64, D>) -> Result<Array<f64, D>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn fit<D: Dimension>(&mut self, x: &Array<f64, D>) -> Result<()> {
        let n_features = feature_axis_len(x)?;
        if x.len() == 0 {
            return Err(PipelineError::InsufficientData(
                "Cannot fit normalizer on empty data".to_string(),
            ));
        }
        let mut min = vec![f64::INFINITY; n_features];
        let mut max = vec![f64::NEG_INFINITY; n_features];

        for lane in x.lanes(Axis(x.ndim() - 1)) {
            for (f, &v) in lane.iter().enumerate() {
                min[f] = min[f].min(v);
                max[f] = max[f].max(v);
            }
        }

        self.min = min;
        self.max = max;
        self.fitted = true;
        debug!("Fitted min-max normalizer on {} features", n_features);
        Ok(())
    }

    /// Rescale with the stored parameters. Values outside the fit range map
    /// outside [0, 1]; constant features map to 0.
    pub fn transform<D: Dimension>(&self, x: &Array<f64, D>) -> Result<Array<f64, D>> {
        if !self.fitted {
            return Err(PipelineError::NotFitted(
                "Normalizer must be fitted before transform".to_string(),
            ));
        }
        let n_features = feature_axis_len(x)?;
        if n_features != self.n_features() {
            return Err(PipelineError::Schema(format!(
                "Normalizer was fitted on {} features, got {}",
                self.n_features(),
                n_features
            )));
        }

        let mut out = x.clone();
        let last = out.ndim() - 1;
        for mut lane in out.lanes_mut(Axis(last)) {
            for (f, v) in lane.iter_mut().enumerate() {
                let range = self.max[f] - self.min[f];
                *v = if range > 0.0 { (*v - self.min[f]) / range } else { *v - self.min[f] };
            }
        }
        Ok(out)
    }
}

fn feature_axis_len<D: Dimension>(x: &Array<f64, D>) -> Result<usize> {
    if x.ndim() == 0 {
        return Err(PipelineError::Schema("Expected at least one axis".to_string()));
    }
    Ok(x.len_of(Axis(x.ndim() - 1)))
}
