//! Voting ensemble over independently trained members.
//!
//! Lifecycle is `Unbuilt -> Built -> Trained`. Training is all-or-nothing:
//! members are fitted on clones and only committed once every one of them
//! succeeded.

use chrono::{DateTime, Utc};
use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use super::members::{
    argmax, BoostingParams, Classifier, ForestParams, GradientBoosting, LogisticParams,
    LogisticRegression, MemberModel, RandomForest, N_CLASSES,
};
use super::metrics::ClassificationReport;
use super::normalizer::FeatureNormalizer;
use super::scaler::StandardScaler;
use crate::config::ModelConfig;
use crate::error::{PipelineError, Result};
use crate::types::SignalClass;

/// Key of the aggregate record in training and evaluation results
pub const ENSEMBLE_KEY: &str = "ensemble";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Unbuilt,
    Built,
    Trained,
}

/// Validation scores of one member or of the combined vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub accuracy: f64,
    pub f1: f64,
    pub report: ClassificationReport,
}

impl TrainingMetrics {
    fn new(y_true: &[usize], y_pred: &[usize]) -> Self {
        let report = ClassificationReport::new(y_true, y_pred);
        Self {
            accuracy: report.accuracy,
            f1: report.weighted_f1,
            report,
        }
    }
}

/// One completed `train` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    pub trained_at: DateTime<Utc>,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub weighted: bool,
    pub accuracy: f64,
    pub f1: f64,
}

/// How raw feature windows were turned into the ensemble's input columns.
/// Persisted with the model so inference rebuilds the exact same layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    pub feature_columns: Vec<String>,
    pub sequence_length: usize,
    pub normalizer: FeatureNormalizer,
}

/// Combined prediction for one sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPrediction {
    pub signal: SignalClass,
    /// Soft-vote probability of `signal`, in percent
    pub confidence: f64,
    /// SELL, HOLD, BUY probabilities in percent
    pub probabilities: [f64; N_CLASSES],
}

impl SignalPrediction {
    pub fn probability(&self, class: SignalClass) -> f64 {
        self.probabilities[class.index()]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub state: ModelState,
    pub members: Vec<String>,
    pub n_features: usize,
    pub training_runs: usize,
    pub last_run: Option<TrainingRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleModel<M = MemberModel> {
    config: ModelConfig,
    state: ModelState,
    members: Vec<(String, M)>,
    scaler: StandardScaler,
    feature_names: Vec<String>,
    feature_importances: Option<Vec<f64>>,
    history: Vec<TrainingRun>,
    input_schema: Option<InputSchema>,
}

impl EnsembleModel<MemberModel> {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            state: ModelState::Unbuilt,
            members: Vec::new(),
            scaler: StandardScaler::default(),
            feature_names: Vec::new(),
            feature_importances: None,
            history: Vec::new(),
            input_schema: None,
        }
    }

    /// Create fresh `rf`, `gbm` and `logit` members. Rebuilding a trained
    /// model discards its members and scaler.
    pub fn build(&mut self) {
        let balance = self.config.class_balance;
        let seed = self.config.random_state;

        let forest = RandomForest::new(ForestParams {
            class_balance: balance,
            seed,
            ..self.config.forest.clone()
        });
        let boosting = GradientBoosting::new(BoostingParams {
            class_balance: balance,
            seed,
            ..self.config.boosting.clone()
        });
        let logistic = LogisticRegression::new(LogisticParams {
            class_balance: balance,
            ..self.config.logistic.clone()
        });

        self.members = vec![
            ("rf".to_string(), MemberModel::Forest(forest)),
            ("gbm".to_string(), MemberModel::Boosting(boosting)),
            ("logit".to_string(), MemberModel::Logistic(logistic)),
        ];
        self.scaler = StandardScaler::default();
        self.feature_importances = None;
        self.state = ModelState::Built;
        info!("Built ensemble with {} members", self.members.len());
    }
}

impl<M: Classifier + Clone> EnsembleModel<M> {
    /// Ensemble over caller-supplied members, already in the Built state
    pub fn with_members(config: ModelConfig, members: Vec<(String, M)>) -> Self {
        let state = if members.is_empty() {
            ModelState::Unbuilt
        } else {
            ModelState::Built
        };
        Self {
            config,
            state,
            members,
            scaler: StandardScaler::default(),
            feature_names: Vec::new(),
            feature_importances: None,
            history: Vec::new(),
            input_schema: None,
        }
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn is_trained(&self) -> bool {
        self.state == ModelState::Trained
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Column names of the training matrix; used by `predict_single` and
    /// `top_features`
    pub fn set_feature_names(&mut self, names: Vec<String>) {
        self.feature_names = names;
    }

    pub fn input_schema(&self) -> Option<&InputSchema> {
        self.input_schema.as_ref()
    }

    pub fn set_input_schema(&mut self, schema: InputSchema) {
        self.input_schema = Some(schema);
    }

    pub fn history(&self) -> &[TrainingRun] {
        &self.history
    }

    /// Fit every member on a stratified train split and score them on the
    /// held-out rows. Returns one record per member plus `"ensemble"`.
    pub fn train(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        sample_weight: Option<&[f64]>,
    ) -> Result<BTreeMap<String, TrainingMetrics>> {
        if self.state == ModelState::Unbuilt {
            return Err(PipelineError::InvalidState(
                "Ensemble must be built before training".to_string(),
            ));
        }
        if x.nrows() != y.len() {
            return Err(PipelineError::Schema(format!(
                "{} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if let Some(w) = sample_weight {
            if w.len() != y.len() {
                return Err(PipelineError::Schema(format!(
                    "{} sample weights for {} samples",
                    w.len(),
                    y.len()
                )));
            }
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Schema(
                "Training matrix holds non-finite values".to_string(),
            ));
        }
        if self.feature_names.is_empty() {
            self.feature_names = (0..x.ncols()).map(|i| format!("feature_{}", i)).collect();
        } else if self.feature_names.len() != x.ncols() {
            return Err(PipelineError::Schema(format!(
                "{} feature names for {} columns",
                self.feature_names.len(),
                x.ncols()
            )));
        }

        let (train_idx, val_idx) =
            stratified_split(y, self.config.test_size, self.config.random_state)?;
        let x_train = x.select(Axis(0), &train_idx);
        let x_val = x.select(Axis(0), &val_idx);
        let y_train: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();
        let y_val: Vec<usize> = val_idx.iter().map(|&i| y[i]).collect();
        let w_train: Option<Vec<f64>> =
            sample_weight.map(|w| train_idx.iter().map(|&i| w[i]).collect());

        info!(
            "Training ensemble on {} samples, validating on {} ({} features, weighted: {})",
            train_idx.len(),
            val_idx.len(),
            x.ncols(),
            w_train.is_some()
        );

        let mut scaler = StandardScaler::default();
        let x_train = scaler.fit_transform(&x_train)?;
        let x_val = scaler.transform(&x_val)?;

        let mut fitted = Vec::with_capacity(self.members.len());
        for (name, member) in &self.members {
            info!("Training {}...", name);
            let mut candidate = member.clone();
            candidate
                .fit(&x_train, &y_train, w_train.as_deref())
                .map_err(|e| PipelineError::Training {
                    member: name.clone(),
                    reason: e.to_string(),
                })?;
            fitted.push((name.clone(), candidate));
        }

        let (metrics, votes) = score(&fitted, &x_val, &y_val).map_err(|e| match e {
            PipelineError::Training { .. } => e,
            other => PipelineError::Training {
                member: ENSEMBLE_KEY.to_string(),
                reason: other.to_string(),
            },
        })?;
        debug!("Validation votes: {:?}", vote_counts(&votes));

        self.feature_importances = fitted.iter().find_map(|(_, m)| m.feature_importances());
        self.members = fitted;
        self.scaler = scaler;
        self.state = ModelState::Trained;

        let ensemble = &metrics[ENSEMBLE_KEY];
        for (name, m) in &metrics {
            info!("{} - accuracy: {:.4}, F1: {:.4}", name, m.accuracy, m.f1);
        }
        self.history.push(TrainingRun {
            trained_at: Utc::now(),
            train_samples: train_idx.len(),
            validation_samples: val_idx.len(),
            weighted: sample_weight.is_some(),
            accuracy: ensemble.accuracy,
            f1: ensemble.f1,
        });

        Ok(metrics)
    }

    /// Hard vote per row: the most voted class, lowest index on ties
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<SignalClass>> {
        let scaled = self.prepare(x)?;
        let (votes, _) = combine(&self.members, &scaled)?;
        Ok(votes.into_iter().filter_map(SignalClass::from_index).collect())
    }

    /// Soft vote: unweighted mean of member probabilities
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let scaled = self.prepare(x)?;
        let (_, proba) = combine(&self.members, &scaled)?;
        Ok(proba)
    }

    pub fn predict_with_confidence(&self, x: &Array2<f64>) -> Result<Vec<SignalPrediction>> {
        let scaled = self.prepare(x)?;
        let (votes, proba) = combine(&self.members, &scaled)?;
        Ok(votes
            .iter()
            .zip(proba.axis_iter(Axis(0)))
            .filter_map(|(&vote, row)| {
                let signal = SignalClass::from_index(vote)?;
                let mut probabilities = [0.0; N_CLASSES];
                for (p, v) in probabilities.iter_mut().zip(row.iter()) {
                    *p = v * 100.0;
                }
                Some(SignalPrediction {
                    signal,
                    confidence: probabilities[vote],
                    probabilities,
                })
            })
            .collect())
    }

    /// Predict from a named feature map laid out in training column order
    pub fn predict_single(&self, features: &HashMap<String, f64>) -> Result<SignalPrediction> {
        self.ensure_trained()?;
        let row = self
            .feature_names
            .iter()
            .map(|name| {
                features
                    .get(name)
                    .copied()
                    .ok_or_else(|| PipelineError::Schema(format!("Missing feature '{}'", name)))
            })
            .collect::<Result<Vec<f64>>>()?;
        let x = Array2::from_shape_vec((1, row.len()), row)
            .map_err(|e| PipelineError::Schema(e.to_string()))?;

        self.predict_with_confidence(&x)?
            .pop()
            .ok_or_else(|| {
                PipelineError::InvalidState("Ensemble produced no prediction".to_string())
            })
    }

    /// Score every member and the vote on labeled data
    pub fn evaluate(
        &self,
        x: &Array2<f64>,
        y: &[usize],
    ) -> Result<BTreeMap<String, TrainingMetrics>> {
        if x.nrows() != y.len() {
            return Err(PipelineError::Schema(format!(
                "{} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        let scaled = self.prepare(x)?;
        let (metrics, _) = score(&self.members, &scaled, y)?;
        if let Some(ensemble) = metrics.get(ENSEMBLE_KEY) {
            info!("Evaluation on {} samples - accuracy: {:.4}", y.len(), ensemble.accuracy);
            debug!("Confusion matrix:\n{}", ensemble.report.confusion);
        }
        Ok(metrics)
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            state: self.state,
            members: self.member_names(),
            n_features: self.feature_names.len(),
            training_runs: self.history.len(),
            last_run: self.history.last().cloned(),
        }
    }

    /// Highest importances first, as reported by the first member that has any
    pub fn top_features(&self, n: usize) -> Vec<(String, f64)> {
        let Some(importances) = &self.feature_importances else {
            return Vec::new();
        };
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(importances.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }

    fn ensure_trained(&self) -> Result<()> {
        if self.is_trained() {
            Ok(())
        } else {
            Err(PipelineError::NotTrained("Ensemble must be trained before prediction".to_string()))
        }
    }

    fn prepare(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.ensure_trained()?;
        self.scaler.transform(x)
    }
}

impl<M: Classifier + Clone + Serialize + DeserializeOwned> EnsembleModel<M> {
    /// Write the whole model as JSON via a temporary file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(self)?)?;
        fs::rename(&tmp, path)?;
        info!("Saved ensemble to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let model: Self = serde_json::from_slice(&bytes)?;
        if model.state != ModelState::Trained {
            warn!("Loaded ensemble from {} is not trained", path.display());
        }
        info!("Loaded ensemble from {} ({} members)", path.display(), model.members.len());
        Ok(model)
    }
}

/// Per-class shuffled split holding out `round(count * test_size)` rows of
/// each class. Indices come back sorted.
pub(crate) fn stratified_split(
    y: &[usize],
    test_size: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut validation = Vec::new();

    for class in 0..N_CLASSES {
        let mut idx: Vec<usize> = y
            .iter()
            .enumerate()
            .filter(|&(_, &label)| label == class)
            .map(|(i, _)| i)
            .collect();
        idx.shuffle(&mut rng);
        let n_val = ((idx.len() as f64 * test_size).round() as usize).min(idx.len());
        validation.extend_from_slice(&idx[..n_val]);
        train.extend_from_slice(&idx[n_val..]);
    }

    if train.is_empty() || validation.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "{} samples cannot be split into train and validation with test_size {}",
            y.len(),
            test_size
        )));
    }
    train.sort_unstable();
    validation.sort_unstable();
    Ok((train, validation))
}

/// Hard votes and mean probabilities over all members
fn combine<M: Classifier>(
    members: &[(String, M)],
    x: &Array2<f64>,
) -> Result<(Vec<usize>, Array2<f64>)> {
    if members.is_empty() {
        return Err(PipelineError::InvalidState("Ensemble has no members".to_string()));
    }
    let n = x.nrows();
    let mut counts = vec![[0usize; N_CLASSES]; n];
    let mut proba = Array2::<f64>::zeros((n, N_CLASSES));

    for (name, member) in members {
        for (row, &class) in member.predict(x)?.iter().enumerate() {
            if class >= N_CLASSES {
                return Err(PipelineError::InvalidState(format!(
                    "Member '{}' predicted class {}",
                    name, class
                )));
            }
            counts[row][class] += 1;
        }
        let member_proba = member.predict_proba(x)?;
        if member_proba.dim() != (n, N_CLASSES) {
            return Err(PipelineError::InvalidState(format!(
                "Member '{}' returned probabilities of shape {:?}, expected {:?}",
                name,
                member_proba.dim(),
                (n, N_CLASSES)
            )));
        }
        proba += &member_proba;
    }
    proba /= members.len() as f64;

    let votes = counts
        .iter()
        .map(|c| argmax(c.iter().map(|&v| v as f64)))
        .collect();
    Ok((votes, proba))
}

fn score<M: Classifier>(
    members: &[(String, M)],
    x: &Array2<f64>,
    y: &[usize],
) -> Result<(BTreeMap<String, TrainingMetrics>, Vec<usize>)> {
    let mut metrics = BTreeMap::new();
    for (name, member) in members {
        let pred = member.predict(x).map_err(|e| PipelineError::Training {
            member: name.clone(),
            reason: e.to_string(),
        })?;
        metrics.insert(name.clone(), TrainingMetrics::new(y, &pred));
    }
    let (votes, _) = combine(members, x)?;
    metrics.insert(ENSEMBLE_KEY.to_string(), TrainingMetrics::new(y, &votes));
    Ok((metrics, votes))
}

fn vote_counts(votes: &[usize]) -> [usize; N_CLASSES] {
    let mut counts = [0; N_CLASSES];
    for &v in votes {
        counts[v] += 1;
    }
    counts
}
