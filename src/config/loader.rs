use std::path::Path;
use tracing::{info, warn};

use super::runtime::LearnerConfig;
use crate::error::{PipelineError, Result};

pub const ENV_PREFIX: &str = "SIGNAL_LEARNER";

/// Defaults, then the TOML file (if present), then `SIGNAL_LEARNER_*`
/// environment overrides such as `SIGNAL_LEARNER_DATA__SEQUENCE_LENGTH=30`.
pub fn load_config(path: Option<&Path>) -> Result<LearnerConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        } else {
            warn!("Config file {} not found, using defaults", path.display());
        }
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    let learner: LearnerConfig = settings
        .try_deserialize()
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    learner
        .validate()
        .map_err(|errors| PipelineError::Config(errors.join(", ")))?;
    Ok(learner)
}
