use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::runtime::LearnerConfig;

/// Training presets layered on top of the loaded configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingProfile {
    /// Configuration as loaded
    Standard,
    /// Short windows and small member models for smoke runs
    Fast,
}

impl TrainingProfile {
    pub fn name(&self) -> &str {
        match self {
            Self::Standard => "Standard",
            Self::Fast => "Fast",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Standard => {
                "Full-size ensemble: 60-candle windows, 200 forest trees, 300 boosting stages."
            }
            Self::Fast => "Smoke-test ensemble: 10-candle windows, 25 trees, 30 boosting stages.",
        }
    }

    pub fn apply(&self, config: &mut LearnerConfig) {
        match self {
            Self::Standard => {}
            Self::Fast => {
                config.data.sequence_length = 10;
                config.model.forest.n_estimators = 25;
                config.model.forest.max_depth = 8;
                config.model.boosting.n_estimators = 30;
                config.model.boosting.max_depth = 3;
                config.model.logistic.max_iter = 300;
            }
        }
    }
}

impl FromStr for TrainingProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" | "full" => Ok(Self::Standard),
            "fast" | "quick" => Ok(Self::Fast),
            other => Err(format!("Unknown training profile: {}", other)),
        }
    }
}
