use thiserror::Error;

/// Result alias used across the learning pipeline
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure taxonomy of the learning pipeline.
///
/// Data-quality and sequencing errors are returned to the caller of the stage
/// that produced them; nothing in the pipeline falls back silently.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input table lacks required columns
    #[error("Schema error: {0}")]
    Schema(String),

    /// Not enough rows for the requested window
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Normalizer or scaler used before `fit`
    #[error("Not fitted: {0}")]
    NotFitted(String),

    /// Ensemble used for inference before `train`
    #[error("Model not trained: {0}")]
    NotTrained(String),

    /// An ensemble member failed to fit; the whole run is aborted
    #[error("Training failed in member '{member}': {reason}")]
    Training { member: String, reason: String },

    /// A signal with this id is already in the feedback log
    #[error("Duplicate signal id: {0}")]
    DuplicateSignal(String),

    /// Operation called in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    /// Whether the caller can recover by fetching more history
    pub fn needs_more_data(&self) -> bool {
        matches!(self, PipelineError::InsufficientData(_))
    }

    /// Sequencing mistakes that indicate a programming error
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFitted(_)
                | PipelineError::NotTrained(_)
                | PipelineError::InvalidState(_)
        )
    }
}
