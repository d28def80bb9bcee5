use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::ensemble::{EnsembleModel, InputSchema};
use crate::error::{PipelineError, Result};

/// Model generation and retrain count, printed as `generation.revision`.
///
/// A generation lasts as long as the input layout does; every retrain on
/// the same layout is a new revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelVersion {
    pub generation: u32,
    pub revision: u32,
}

impl ModelVersion {
    pub fn new(generation: u32, revision: u32) -> Self {
        Self { generation, revision }
    }

    pub fn initial() -> Self {
        Self::new(1, 0)
    }

    /// Version following `self` for a run on `next` when `self` was trained
    /// on `previous`
    pub fn successor(&self, previous: &InputLayout, next: &InputLayout) -> Self {
        if previous == next {
            Self::new(self.generation, self.revision + 1)
        } else {
            Self::new(self.generation + 1, 0)
        }
    }
}

impl FromStr for ModelVersion {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PipelineError::Schema(format!("Invalid model version: {}", s));
        let (generation, revision) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self::new(
            generation.parse().map_err(|_| invalid())?,
            revision.parse().map_err(|_| invalid())?,
        ))
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.generation, self.revision)
    }
}

/// Window length and feature ordering a model was trained on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLayout {
    pub sequence_length: usize,
    pub feature_columns: Vec<String>,
}

impl InputLayout {
    pub fn new(sequence_length: usize, feature_columns: Vec<String>) -> Self {
        Self {
            sequence_length,
            feature_columns,
        }
    }
}

impl From<&InputSchema> for InputLayout {
    fn from(schema: &InputSchema) -> Self {
        Self::new(schema.sequence_length, schema.feature_columns.clone())
    }
}

/// Summary of one training run, written next to the model and appended to
/// the training history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub symbol: String,
    pub timeframe: String,
    pub version: ModelVersion,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub feedback_sample_count: usize,
    pub used_feedback_weights: bool,
    pub accuracy: f64,
    pub f1: f64,
    #[serde(default)]
    pub layout: InputLayout,
}

/// File layout under the models directory:
/// `{symbol}_{timeframe}_ensemble.json`, its `.meta.json` sibling, and a
/// shared `training_history.jsonl`.
pub struct ModelStore {
    models_dir: PathBuf,
}

impl ModelStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.models_dir.join(format!("{}_ensemble.json", key(symbol, timeframe)))
    }

    pub fn metadata_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.models_dir.join(format!("{}_ensemble.meta.json", key(symbol, timeframe)))
    }

    pub fn history_path(&self) -> PathBuf {
        self.models_dir.join("training_history.jsonl")
    }

    pub fn has_model(&self, symbol: &str, timeframe: &str) -> bool {
        self.model_path(symbol, timeframe).exists()
    }

    /// Persist model and metadata as one step. The metadata is staged
    /// first and the previous model is restored if it cannot be committed;
    /// the history line is appended only after both files are in place.
    pub fn save(&self, model: &EnsembleModel, metadata: &ModelMetadata) -> Result<PathBuf> {
        fs::create_dir_all(&self.models_dir)?;
        let path = self.model_path(&metadata.symbol, &metadata.timeframe);
        let meta_path = self.metadata_path(&metadata.symbol, &metadata.timeframe);

        let staged_meta = meta_path.with_extension("json.tmp");
        fs::write(&staged_meta, serde_json::to_string_pretty(metadata)?)?;

        let backup = path.with_extension("json.bak");
        let had_previous = path.exists();
        if had_previous {
            fs::copy(&path, &backup)?;
        }

        let committed = model
            .save(&path)
            .and_then(|_| fs::rename(&staged_meta, &meta_path).map_err(PipelineError::from));
        if let Err(e) = committed {
            warn!(
                "Saving {} {} model failed, rolling back: {}",
                metadata.symbol, metadata.timeframe, e
            );
            self.roll_back(&path, &backup, had_previous);
            discard(&staged_meta);
            return Err(e);
        }
        if had_previous {
            discard(&backup);
        }

        let mut history = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())?;
        writeln!(history, "{}", serde_json::to_string(metadata)?)?;

        info!(
            "Saved {} {} model v{} to {}",
            metadata.symbol,
            metadata.timeframe,
            metadata.version,
            path.display()
        );
        Ok(path)
    }

    fn roll_back(&self, path: &Path, backup: &Path, had_previous: bool) {
        let restored = if had_previous {
            fs::rename(backup, path)
        } else {
            fs::remove_file(path).or_else(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Ok(()),
                _ => Err(e),
            })
        };
        if let Err(e) = restored {
            warn!("Could not restore previous model at {}: {}", path.display(), e);
        }
    }

    pub fn load_model(&self, symbol: &str, timeframe: &str) -> Result<Option<EnsembleModel>> {
        let path = self.model_path(symbol, timeframe);
        if !path.exists() {
            return Ok(None);
        }
        EnsembleModel::load(&path).map(Some)
    }

    pub fn load_metadata(&self, symbol: &str, timeframe: &str) -> Result<Option<ModelMetadata>> {
        let path = self.metadata_path(symbol, timeframe);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Every recorded run for the pair, oldest first
    pub fn history(&self, symbol: &str, timeframe: &str) -> Result<Vec<ModelMetadata>> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut runs = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ModelMetadata>(&line) {
                Ok(meta) if meta.symbol == symbol && meta.timeframe == timeframe => runs.push(meta),
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed history line {}: {}", line_no + 1, e),
            }
        }
        Ok(runs)
    }

    /// Version for the next run of the pair on `layout`
    pub fn next_version(
        &self,
        symbol: &str,
        timeframe: &str,
        layout: &InputLayout,
    ) -> Result<ModelVersion> {
        Ok(match self.load_metadata(symbol, timeframe)? {
            None => ModelVersion::initial(),
            Some(previous) => {
                if previous.layout != *layout {
                    info!(
                        "Input layout changed ({}x{} -> {}x{}), starting a new model generation",
                        previous.layout.sequence_length,
                        previous.layout.feature_columns.len(),
                        layout.sequence_length,
                        layout.feature_columns.len()
                    );
                }
                previous.version.successor(&previous.layout, layout)
            }
        })
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        debug!("Could not remove {}: {}", path.display(), e);
    }
}

fn key(symbol: &str, timeframe: &str) -> String {
    format!("{}_{}", symbol.to_lowercase(), timeframe)
}
