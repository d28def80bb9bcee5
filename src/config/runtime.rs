use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ml::members::{BoostingParams, ForestParams, LogisticParams};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub feedback: FeedbackConfig,
    pub learning: LearningConfig,
}

impl LearnerConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Data validation
        if self.data.sequence_length == 0 {
            errors.push("sequence_length must be > 0".to_string());
        }
        if self.data.prediction_horizon == 0 {
            errors.push("prediction_horizon must be > 0".to_string());
        }
        if self.data.label_threshold <= 0.0 || self.data.label_threshold >= 1.0 {
            errors.push("label_threshold must be between 0 and 1".to_string());
        }
        if self.data.noise_factor <= 0.0 {
            errors.push("noise_factor must be > 0".to_string());
        }

        // Model validation
        if self.model.test_size <= 0.0 || self.model.test_size >= 1.0 {
            errors.push("test_size must be between 0 and 1".to_string());
        }
        if self.model.forest.n_estimators == 0 {
            errors.push("forest: n_estimators must be > 0".to_string());
        }
        if self.model.boosting.learning_rate <= 0.0 {
            errors.push("boosting: learning_rate must be > 0".to_string());
        }
        if self.model.logistic.learning_rate <= 0.0 {
            errors.push("logistic: learning_rate must be > 0".to_string());
        }

        // Feedback validation
        let fb = &self.feedback;
        if fb.decay_start <= 0.0 || fb.decay_start > 1.0 {
            errors.push("decay_start must be between 0 and 1".to_string());
        }
        if fb.min_adjustment <= 0.0 || fb.min_adjustment > fb.max_adjustment {
            errors.push("min_adjustment must be > 0 and <= max_adjustment".to_string());
        }
        if fb.reward_scale < 0.0 {
            errors.push("reward_scale must be >= 0".to_string());
        }

        // Learning validation
        let min_incremental = self.data.sequence_length + self.data.prediction_horizon;
        if self.learning.incremental_rows <= min_incremental {
            errors.push(
                "incremental_rows must exceed sequence_length + prediction_horizon".to_string(),
            );
        }
        if !(0.0..=100.0).contains(&self.learning.poor_performance_threshold) {
            errors.push("poor_performance_threshold must be between 0 and 100%".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Sequence construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub sequence_length: usize,
    pub prediction_horizon: usize,
    /// Fractional move that separates BUY/SELL from HOLD
    pub label_threshold: f64,
    pub augment: bool,
    pub noise_factor: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            sequence_length: 60,
            prediction_horizon: 1,
            label_threshold: 0.01,
            augment: false,
            noise_factor: 0.01,
        }
    }
}

/// Ensemble hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub test_size: f64,
    pub random_state: u64,
    pub class_balance: bool,
    pub forest: ForestParams,
    pub boosting: BoostingParams,
    pub logistic: LogisticParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            random_state: 42,
            class_balance: true,
            forest: ForestParams::default(),
            boosting: BoostingParams::default(),
            logistic: LogisticParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub store_path: PathBuf,
    /// Closed signals needed before feedback reweights training
    pub min_samples: usize,
    pub decay_start: f64,
    pub reward_scale: f64,
    pub min_adjustment: f64,
    pub max_adjustment: f64,
    pub stats_days: i64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/feedback/signal_feedback.jsonl"),
            min_samples: 5,
            decay_start: 0.8,
            reward_scale: 0.3,
            min_adjustment: 0.5,
            max_adjustment: 1.5,
            stats_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub models_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Candles kept by an incremental update (30 days of 1h candles)
    pub incremental_rows: usize,
    pub min_evaluation_signals: usize,
    /// Success rate (%) under which a retrain is recommended
    pub poor_performance_threshold: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            data_dir: PathBuf::from("data"),
            incremental_rows: 720,
            min_evaluation_signals: 10,
            poor_performance_threshold: 40.0,
        }
    }
}
