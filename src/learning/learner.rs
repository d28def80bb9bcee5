use chrono::Utc;
use ndarray::Array2;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::source::CandleSource;
use crate::config::LearnerConfig;
use crate::error::{PipelineError, Result};
use crate::feedback::{FeedbackSample, FeedbackStore, FeedbackWeighter, PerformanceStats};
use crate::ml::ensemble::{ModelInfo, ENSEMBLE_KEY};
use crate::ml::{
    EnsembleModel, FeatureEngine, FeatureNormalizer, GeneratedSignal, InputLayout, InputSchema,
    ModelMetadata, ModelStore, SequenceLabeler, SequenceSet, SignalGenerator,
};
use crate::types::CandleSeries;

/// Training matrix for one cycle, already normalized and flattened
struct PreparedData {
    set: SequenceSet,
    /// Samples before augmentation, in chronological order
    original_samples: usize,
    normalizer: FeatureNormalizer,
    x: Array2<f64>,
    y: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodStats {
    pub count: usize,
    pub success_rate: f64,
    pub avg_return: f64,
}

impl PeriodStats {
    fn from_samples(samples: &[FeedbackSample]) -> Self {
        let count = samples.len();
        if count == 0 {
            return Self { count, success_rate: 0.0, avg_return: 0.0 };
        }
        let wins = samples.iter().filter(|s| s.reward > 0).count();
        Self {
            count,
            success_rate: wins as f64 / count as f64 * 100.0,
            avg_return: samples.iter().map(|s| s.profit_loss_percent).sum::<f64>() / count as f64,
        }
    }
}

/// Outcome of comparing early and recent closed signals
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImprovementReport {
    InsufficientData {
        available: usize,
        required: usize,
    },
    Evaluated {
        early: PeriodStats,
        recent: PeriodStats,
        success_rate_delta: f64,
        avg_return_delta: f64,
        is_improving: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerStatus {
    pub symbol: String,
    pub timeframe: String,
    pub model: Option<ModelMetadata>,
    pub model_info: Option<ModelInfo>,
    pub training_runs: usize,
    pub stats: PerformanceStats,
    pub needs_retrain: bool,
}

/// Runs learning cycles for any symbol/timeframe pair: candles to features,
/// labeled windows, feedback weights, ensemble training, persisted model.
pub struct ContinuousLearner<S: CandleSource> {
    config: LearnerConfig,
    source: S,
    feedback: FeedbackStore,
    models: ModelStore,
    engine: FeatureEngine,
    weighter: FeedbackWeighter,
}

impl<S: CandleSource> ContinuousLearner<S> {
    pub fn new(config: LearnerConfig, source: S) -> Self {
        Self {
            feedback: FeedbackStore::new(config.feedback.store_path.clone()),
            models: ModelStore::new(config.learning.models_dir.clone()),
            engine: FeatureEngine::new(),
            weighter: FeedbackWeighter::from_config(&config.feedback),
            config,
            source,
        }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn feedback_store(&self) -> &FeedbackStore {
        &self.feedback
    }

    pub fn model_store(&self) -> &ModelStore {
        &self.models
    }

    /// Full cycle on all available candles with a freshly built ensemble
    pub fn retrain_with_feedback(&self, symbol: &str, timeframe: &str) -> Result<ModelMetadata> {
        let candles = self.source.load(symbol, timeframe)?;
        self.run_cycle(symbol, timeframe, &candles, None)
    }

    /// Retrain the stored model on the most recent `incremental_rows`
    /// candles. Without a stored model this is a full retrain.
    pub fn incremental_update(&self, symbol: &str, timeframe: &str) -> Result<ModelMetadata> {
        info!("Incremental update: {} {}", symbol, timeframe);
        let Some(existing) = self.models.load_model(symbol, timeframe)? else {
            warn!("No existing model found for {} {}, performing full training", symbol, timeframe);
            return self.retrain_with_feedback(symbol, timeframe);
        };

        let candles = self.source.load(symbol, timeframe)?;
        let recent = candles.tail(self.config.learning.incremental_rows);
        info!("Using {} of {} candles for the update", recent.len(), candles.len());
        self.run_cycle(symbol, timeframe, &recent, Some(existing))
    }

    /// Compare success rate and mean return of the older and newer half of
    /// the pair's closed signals
    pub fn evaluate_improvement(&self, symbol: &str, timeframe: &str) -> Result<ImprovementReport> {
        info!("Evaluating improvement: {} {}", symbol, timeframe);
        let required = self.config.learning.min_evaluation_signals;
        let mut samples = self.feedback.feedback_data(symbol, timeframe, 1)?.unwrap_or_default();
        if samples.len() < required {
            warn!("Need at least {} closed signals to evaluate, have {}", required, samples.len());
            return Ok(ImprovementReport::InsufficientData {
                available: samples.len(),
                required,
            });
        }

        samples.sort_by_key(|s| s.emitted_at);
        let (early, recent) = samples.split_at(samples.len() / 2);
        let early = PeriodStats::from_samples(early);
        let recent = PeriodStats::from_samples(recent);
        let success_rate_delta = recent.success_rate - early.success_rate;
        let avg_return_delta = recent.avg_return - early.avg_return;
        let is_improving = success_rate_delta > 0.0 || avg_return_delta > 0.0;

        info!(
            "Early period: {:.1}% success, {:.2}% avg return",
            early.success_rate, early.avg_return
        );
        info!(
            "Recent period: {:.1}% success, {:.2}% avg return",
            recent.success_rate, recent.avg_return
        );
        info!("{}", if is_improving { "IMPROVING" } else { "DECLINING" });

        Ok(ImprovementReport::Evaluated {
            early,
            recent,
            success_rate_delta,
            avg_return_delta,
            is_improving,
        })
    }

    /// Poor live performance over enough closed signals
    pub fn needs_retrain(&self, stats: &PerformanceStats) -> bool {
        stats.closed_signals >= self.config.learning.min_evaluation_signals
            && stats.success_rate < self.config.learning.poor_performance_threshold
    }

    pub fn status(&self, symbol: &str, timeframe: &str) -> Result<LearnerStatus> {
        let stats = self.feedback.performance_stats(
            Some(symbol),
            Some(timeframe),
            Some(self.config.feedback.stats_days),
        )?;
        Ok(LearnerStatus {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            model: self.models.load_metadata(symbol, timeframe)?,
            model_info: self.models.load_model(symbol, timeframe)?.map(|m| m.model_info()),
            training_runs: self.models.history(symbol, timeframe)?.len(),
            needs_retrain: self.needs_retrain(&stats),
            stats,
        })
    }

    /// Signal for the latest stored candles of the pair
    pub fn predict_latest(&self, symbol: &str, timeframe: &str) -> Result<GeneratedSignal> {
        let model = self
            .models
            .load_model(symbol, timeframe)?
            .ok_or_else(|| {
                PipelineError::NotTrained(format!("No model stored for {} {}", symbol, timeframe))
            })?;
        let candles = self.source.load(symbol, timeframe)?;
        SignalGenerator::new(model)?.generate(&candles)
    }

    /// `predict_latest` plus a feedback log entry. A failed log write does
    /// not fail the prediction.
    pub fn emit_signal(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<(GeneratedSignal, Option<String>)> {
        let signal = self.predict_latest(symbol, timeframe)?;
        let id = self.feedback.record_best_effort(signal.to_new_signal(symbol, timeframe));
        Ok((signal, id))
    }

    fn prepare(&self, candles: &CandleSeries) -> Result<PreparedData> {
        let frame = self.engine.compute(candles)?;
        let ranked = FeatureEngine::feature_importance_by_correlation(&frame);
        for (name, corr) in ranked.iter().take(5) {
            debug!("  |corr| with next return {}: {:.4}", name, corr);
        }
        let mut set = SequenceLabeler::from_config(&self.config.data).create_sequences(&frame)?;

        let mut normalizer = FeatureNormalizer::new();
        set.x = normalizer.fit_transform(&set.x)?;
        let original_samples = set.len();
        if self.config.data.augment {
            set.augment_with_noise(self.config.data.noise_factor, self.config.model.random_state)?;
        }

        let x = set.flatten();
        let y = set.labels();
        Ok(PreparedData {
            set,
            original_samples,
            normalizer,
            x,
            y,
        })
    }

    fn run_cycle(
        &self,
        symbol: &str,
        timeframe: &str,
        candles: &CandleSeries,
        existing: Option<EnsembleModel>,
    ) -> Result<ModelMetadata> {
        info!("Continuous learning: {} {} ({} candles)", symbol, timeframe, candles.len());

        let data = self.prepare(candles)?;
        info!("Features: {}x{}, labels: {}", data.x.nrows(), data.x.ncols(), data.y.len());

        let feedback = self
            .feedback
            .feedback_data(symbol, timeframe, self.config.feedback.min_samples)?;
        let feedback_count = feedback.as_ref().map_or(0, |f| f.len());
        let weights = self
            .weighter
            .weights_for(&data.set.y[..data.original_samples], feedback.as_deref())
            .map(|w| expand_weights(w, data.set.len()));

        let layout = InputLayout::new(data.set.sequence_length(), data.set.feature_columns.clone());
        let mut model = match existing {
            Some(model) if trained_on(&model, &layout) => {
                info!("Updating existing model");
                model
            }
            Some(_) => {
                warn!(
                    "Stored model was trained on a different feature layout, building new ensemble"
                );
                self.fresh_model()
            }
            None => {
                info!("Building new ensemble from scratch");
                self.fresh_model()
            }
        };

        model.set_feature_names(data.set.flattened_names());
        let metrics = model.train(&data.x, &data.y, weights.as_deref())?;
        model.set_input_schema(InputSchema {
            feature_columns: data.set.feature_columns.clone(),
            sequence_length: data.set.sequence_length(),
            normalizer: data.normalizer,
        });

        let (accuracy, f1) = metrics
            .get(ENSEMBLE_KEY)
            .map_or((0.0, 0.0), |m| (m.accuracy, m.f1));
        let metadata = ModelMetadata {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            version: self.models.next_version(symbol, timeframe, &layout)?,
            trained_at: Utc::now(),
            sample_count: data.y.len(),
            feedback_sample_count: feedback_count,
            used_feedback_weights: weights.is_some(),
            accuracy,
            f1,
            layout,
        };
        self.models.save(&model, &metadata)?;

        for (name, score) in model.top_features(5) {
            info!("  top feature {}: {:.4}", name, score);
        }
        info!(
            "Learning complete: v{} accuracy {:.4}, F1 {:.4}, feedback samples {}",
            metadata.version, metadata.accuracy, metadata.f1, metadata.feedback_sample_count
        );
        Ok(metadata)
    }

    fn fresh_model(&self) -> EnsembleModel {
        let mut model = EnsembleModel::new(self.config.model.clone());
        model.build();
        model
    }
}

/// Augmented copies follow the originals in the same order, so each copy
/// reuses the recency weight of the sample it was drawn from
fn expand_weights(weights: Vec<f64>, total: usize) -> Vec<f64> {
    let base = weights.len();
    if base == 0 || base == total {
        return weights;
    }
    (0..total).map(|i| weights[i % base]).collect()
}

fn trained_on(model: &EnsembleModel, layout: &InputLayout) -> bool {
    model
        .input_schema()
        .map_or(false, |schema| InputLayout::from(schema) == *layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingProfile;
    use crate::learning::source::MockCandleSource;
    use crate::ml::features::tests::synthetic_series;
    use crate::ml::ModelVersion;
    use crate::types::{Candle, NewSignal, SignalClass, SignalOutcome};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn test_config(dir: &std::path::Path) -> LearnerConfig {
        let mut config = LearnerConfig::default();
        TrainingProfile::Fast.apply(&mut config);
        config.data.sequence_length = 5;
        config.model.forest.n_estimators = 10;
        config.model.boosting.n_estimators = 10;
        config.learning.incremental_rows = 300;
        config.learning.models_dir = dir.join("models");
        config.learning.data_dir = dir.join("data");
        config.feedback.store_path = dir.join("feedback").join("signals.jsonl");
        config
    }

    fn source_with(series: CandleSeries) -> MockCandleSource {
        let mut source = MockCandleSource::new();
        source
            .expect_load()
            .returning(move |_, _| Ok(series.clone()));
        source
    }

    fn close_signal(store: &FeedbackStore, class: SignalClass, pl: f64, age_days: i64) {
        let id = store
            .record(
                NewSignal::new("BTCUSDT", "1h", class, 70.0)
                    .emitted_at(Utc::now() - Duration::days(age_days)),
            )
            .unwrap();
        let outcome = if pl > 0.0 { SignalOutcome::TookProfit } else { SignalOutcome::StoppedOut };
        store.update_outcome(&id, outcome, dec!(100), pl).unwrap();
    }

    #[test]
    fn test_retrain_beats_random_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let learner =
            ContinuousLearner::new(test_config(dir.path()), source_with(synthetic_series(1000)));

        let metadata = learner.retrain_with_feedback("BTCUSDT", "1h").unwrap();
        assert!(metadata.accuracy > 1.0 / 3.0, "accuracy {}", metadata.accuracy);
        assert!(!metadata.used_feedback_weights);
        assert_eq!(metadata.version, ModelVersion::initial());
        assert!(learner.model_store().has_model("BTCUSDT", "1h"));

        let signal = learner.predict_latest("BTCUSDT", "1h").unwrap();
        assert!(signal.confidence > 0.0);

        let (emitted, id) = learner.emit_signal("BTCUSDT", "1h").unwrap();
        let records = learner.feedback_store().load_signals(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(Some(records[0].signal_id.clone()), id);
        assert_eq!(records[0].signal_type, emitted.signal);

        let status = learner.status("BTCUSDT", "1h").unwrap();
        assert_eq!(status.model_info.unwrap().members, vec!["rf", "gbm", "logit"]);
    }

    #[test]
    fn test_feedback_weights_used_when_enough_signals() {
        let dir = tempfile::tempdir().unwrap();
        let learner =
            ContinuousLearner::new(test_config(dir.path()), source_with(synthetic_series(400)));
        for i in 0..6 {
            close_signal(learner.feedback_store(), SignalClass::ALL[i % 3], i as f64 - 2.0, 1);
        }

        let metadata = learner.retrain_with_feedback("BTCUSDT", "1h").unwrap();
        assert!(metadata.used_feedback_weights);
        assert_eq!(metadata.feedback_sample_count, 6);
    }

    #[test]
    fn test_incremental_update_uses_recent_rows() {
        let dir = tempfile::tempdir().unwrap();
        let learner =
            ContinuousLearner::new(test_config(dir.path()), source_with(synthetic_series(600)));

        let first = learner.incremental_update("BTCUSDT", "1h").unwrap();
        let second = learner.incremental_update("BTCUSDT", "1h").unwrap();
        assert!(second.sample_count < first.sample_count);
        assert_eq!(second.version, ModelVersion::new(1, 1));
        assert_eq!(learner.status("BTCUSDT", "1h").unwrap().training_runs, 2);
    }

    #[test]
    fn test_layout_change_rebuilds_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let series = synthetic_series(400);
        ContinuousLearner::new(config.clone(), source_with(series.clone()))
            .retrain_with_feedback("BTCUSDT", "1h")
            .unwrap();

        let untimed = CandleSeries::new(
            series
                .candles
                .iter()
                .map(|c| Candle { timestamp: None, ..c.clone() })
                .collect(),
        );
        let metadata = ContinuousLearner::new(config, source_with(untimed))
            .incremental_update("BTCUSDT", "1h")
            .unwrap();
        assert_eq!(metadata.version, ModelVersion::new(2, 0));
        assert!(!metadata.layout.feature_columns.iter().any(|c| c == "hour"));
    }

    #[test]
    fn test_short_history_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let learner =
            ContinuousLearner::new(test_config(dir.path()), source_with(synthetic_series(150)));
        let err = learner.retrain_with_feedback("BTCUSDT", "1h").unwrap_err();
        assert!(err.needs_more_data());
        assert!(!learner.model_store().has_model("BTCUSDT", "1h"));
    }

    #[test]
    fn test_source_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockCandleSource::new();
        source
            .expect_load()
            .times(1)
            .returning(|_, _| Err(PipelineError::Schema("Missing required columns".to_string())));
        let learner = ContinuousLearner::new(test_config(dir.path()), source);
        assert!(matches!(
            learner.retrain_with_feedback("BTCUSDT", "1h"),
            Err(PipelineError::Schema(_))
        ));
    }

    #[test]
    fn test_evaluate_improvement_halves() {
        let dir = tempfile::tempdir().unwrap();
        let learner = ContinuousLearner::new(test_config(dir.path()), MockCandleSource::new());

        match learner.evaluate_improvement("BTCUSDT", "1h").unwrap() {
            ImprovementReport::InsufficientData { available, required } => {
                assert_eq!((available, required), (0, 10));
            }
            other => panic!("unexpected {:?}", other),
        }

        // Older half mostly losing, newer half mostly winning
        for i in 0..10 {
            let pl = if i < 5 { if i == 0 { 1.0 } else { -1.0 } } else { 2.0 };
            close_signal(learner.feedback_store(), SignalClass::Buy, pl, 20 - i);
        }
        match learner.evaluate_improvement("BTCUSDT", "1h").unwrap() {
            ImprovementReport::Evaluated {
                early,
                recent,
                is_improving,
                success_rate_delta,
                ..
            } => {
                assert_eq!(early.count, 5);
                assert_eq!(recent.count, 5);
                assert!((early.success_rate - 20.0).abs() < 1e-9);
                assert!((recent.success_rate - 100.0).abs() < 1e-9);
                assert!(success_rate_delta > 0.0);
                assert!(is_improving);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_augmented_copies_share_weights() {
        let labels: Vec<SignalClass> = (0..12).map(|i| SignalClass::ALL[i % 3]).collect();
        let base = FeedbackWeighter::default().calculate_sample_weights(&labels, &[]);
        let weights = expand_weights(base.clone(), labels.len() * 2);
        assert_eq!(weights.len(), 24);
        for i in 0..12 {
            assert_eq!(weights[i], base[i]);
            assert_eq!(weights[i + 12], weights[i]);
        }
        assert!(weights[12] < weights[11]);
        let mean = weights.iter().sum::<f64>() / weights.len() as f64;
        assert!((mean - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_retrain_with_augmentation_uses_feedback_weights() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.data.augment = true;
        let learner = ContinuousLearner::new(config, source_with(synthetic_series(400)));
        for i in 0..6 {
            close_signal(learner.feedback_store(), SignalClass::ALL[i % 3], i as f64 - 2.0, 1);
        }

        let metadata = learner.retrain_with_feedback("BTCUSDT", "1h").unwrap();
        assert!(metadata.used_feedback_weights);
        assert_eq!(metadata.sample_count % 2, 0);
    }

    #[test]
    fn test_needs_retrain_on_poor_performance() {
        let dir = tempfile::tempdir().unwrap();
        let learner = ContinuousLearner::new(test_config(dir.path()), MockCandleSource::new());
        for i in 0..10 {
            let pl = if i < 3 { 1.0 } else { -1.0 };
            close_signal(learner.feedback_store(), SignalClass::Sell, pl, 1);
        }
        let status = learner.status("BTCUSDT", "1h").unwrap();
        assert_eq!(status.stats.closed_signals, 10);
        assert!(status.needs_retrain);
        assert!(status.model.is_none());
    }
}
