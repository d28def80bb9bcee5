use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use super::ensemble::{EnsembleModel, InputSchema, SignalPrediction};
use super::features::{FeatureEngine, FeatureFrame};
use super::sequences::{flatten_windows, SequenceLabeler};
use crate::error::{PipelineError, Result};
use crate::types::{CandleSeries, NewSignal, SignalClass};

/// Indicator readings quoted in the rationale
#[derive(Debug, Clone, Serialize)]
pub struct FeatureInsights {
    pub rsi: f64,
    /// 1 when MACD is above its signal line, -1 otherwise
    pub macd_trend: i8,
    pub price_ma_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedSignal {
    pub signal: SignalClass,
    pub confidence: f64,
    pub probabilities: [f64; SignalClass::COUNT],
    pub rationale: String,
    pub insights: FeatureInsights,
    pub close: f64,
    pub candle_time: Option<DateTime<Utc>>,
}

impl GeneratedSignal {
    /// Feedback log entry for this signal, entered at the last close
    pub fn to_new_signal(&self, symbol: &str, timeframe: &str) -> NewSignal {
        let mut signal = NewSignal::new(symbol, timeframe, self.signal, self.confidence);
        signal.entry_price = Decimal::from_f64_retain(self.close);
        if let Some(at) = self.candle_time {
            signal = signal.emitted_at(at);
        }
        signal
    }
}

/// Turns the latest candles into a signal with a trained ensemble
pub struct SignalGenerator {
    model: EnsembleModel,
    engine: FeatureEngine,
}

impl SignalGenerator {
    pub fn new(model: EnsembleModel) -> Result<Self> {
        if !model.is_trained() {
            return Err(PipelineError::NotTrained(
                "Signal generation needs a trained ensemble".to_string(),
            ));
        }
        if model.input_schema().is_none() {
            return Err(PipelineError::InvalidState(
                "Ensemble carries no input schema; retrain it through the learner".to_string(),
            ));
        }
        Ok(Self {
            model,
            engine: FeatureEngine::new(),
        })
    }

    pub fn model(&self) -> &EnsembleModel {
        &self.model
    }

    pub fn generate(&self, candles: &CandleSeries) -> Result<GeneratedSignal> {
        let schema = self
            .model
            .input_schema()
            .ok_or_else(|| {
                PipelineError::InvalidState("Ensemble carries no input schema".to_string())
            })?;

        let frame = self.engine.compute(candles)?;
        check_layout(&frame, schema)?;

        let labeler = SequenceLabeler::new(schema.sequence_length, 1);
        let window = schema.normalizer.transform(&labeler.latest_window(&frame)?)?;
        let prediction = self
            .model
            .predict_with_confidence(&flatten_windows(&window))?
            .pop()
            .ok_or_else(|| {
                PipelineError::InvalidState("Ensemble produced no prediction".to_string())
            })?;

        let last = last_complete_row(&frame)
            .ok_or_else(|| PipelineError::InsufficientData("No complete feature row".to_string()))?;
        let reading = |name: &str, fallback: f64| {
            frame
                .column_index(name)
                .map(|idx| frame.value(last, idx))
                .unwrap_or(fallback)
        };
        let insights = FeatureInsights {
            rsi: reading("rsi", 50.0),
            macd_trend: if reading("macd", 0.0) > reading("macd_signal", 0.0) { 1 } else { -1 },
            price_ma_ratio: reading("sma_20_ratio", 1.0),
        };

        let rationale = rationale(&prediction, &insights);
        info!(
            "Generated {} signal with {:.1}% confidence",
            prediction.signal, prediction.confidence
        );
        debug!("{}", rationale);

        Ok(GeneratedSignal {
            signal: prediction.signal,
            confidence: prediction.confidence,
            probabilities: prediction.probabilities,
            rationale,
            close: reading("close", f64::NAN),
            candle_time: frame.timestamps[last],
            insights,
        })
    }
}

fn check_layout(frame: &FeatureFrame, schema: &InputSchema) -> Result<()> {
    if frame.columns() != schema.feature_columns.as_slice() {
        return Err(PipelineError::Schema(format!(
            "Feature layout differs from training: {} columns now, {} when trained",
            frame.n_columns(),
            schema.feature_columns.len()
        )));
    }
    Ok(())
}

fn last_complete_row(frame: &FeatureFrame) -> Option<usize> {
    (0..frame.n_rows()).rev().find(|&r| frame.row_is_complete(r))
}

/// Human-readable explanation of a prediction
pub fn rationale(prediction: &SignalPrediction, insights: &FeatureInsights) -> String {
    let p = &prediction.probabilities;
    let mut text = format!(
        "Ensemble model predicts {} with {:.1}% confidence. \
             (SELL: {:.1}%, HOLD: {:.1}%, BUY: {:.1}%). ",
        prediction.signal, prediction.confidence, p[0], p[1], p[2]
    );

    let rsi = insights.rsi;
    if rsi < 30.0 {
        text.push_str("RSI indicates oversold conditions (potential reversal). ");
    } else if rsi > 70.0 {
        text.push_str("RSI shows overbought market (potential correction). ");
    } else {
        text.push_str(&format!("RSI at {:.1} (neutral zone). ", rsi));
    }

    text.push_str(if insights.macd_trend > 0 {
        "MACD shows bullish momentum. "
    } else {
        "MACD indicates bearish trend. "
    });

    if insights.price_ma_ratio > 1.02 {
        text.push_str("Price trading above moving average (bullish). ");
    } else if insights.price_ma_ratio < 0.98 {
        text.push_str("Price below moving average (bearish). ");
    }

    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ensemble::tests::fast_config;
    use crate::ml::features::tests::synthetic_series;
    use crate::ml::normalizer::FeatureNormalizer;
    use crate::types::Candle;

    fn trained_model(series: &CandleSeries, sequence_length: usize) -> EnsembleModel {
        let frame = FeatureEngine::new().compute(series).unwrap();
        let mut set = SequenceLabeler::new(sequence_length, 1).create_sequences(&frame).unwrap();
        let mut normalizer = FeatureNormalizer::new();
        set.x = normalizer.fit_transform(&set.x).unwrap();

        let mut model = EnsembleModel::new(fast_config());
        model.build();
        model.set_feature_names(set.flattened_names());
        model.train(&set.flatten(), &set.labels(), None).unwrap();
        model.set_input_schema(InputSchema {
            feature_columns: set.feature_columns.clone(),
            sequence_length,
            normalizer,
        });
        model
    }

    #[test]
    fn test_generate_latest_signal() {
        let series = synthetic_series(400);
        let generator = SignalGenerator::new(trained_model(&series, 5)).unwrap();
        let signal = generator.generate(&series.tail(260)).unwrap();

        assert!(signal.rationale.starts_with("Ensemble model predicts"));
        assert!(signal.rationale.contains("MACD"));
        assert!((signal.probabilities.iter().sum::<f64>() - 100.0).abs() < 1e-6);
        assert_eq!(signal.confidence, signal.probabilities[signal.signal.index()]);
        assert_eq!(signal.candle_time, series.last().and_then(|c| c.timestamp));

        let logged = signal.to_new_signal("BTCUSDT", "1h");
        assert_eq!(logged.signal_type, signal.signal);
        assert_eq!(logged.emitted_at, signal.candle_time);
        assert!(logged.entry_price.is_some());
    }

    #[test]
    fn test_layout_change_is_rejected() {
        let series = synthetic_series(400);
        let generator = SignalGenerator::new(trained_model(&series, 5)).unwrap();
        let untimed = CandleSeries::new(
            series
                .candles
                .iter()
                .map(|c| Candle { timestamp: None, ..c.clone() })
                .collect(),
        );
        assert!(matches!(generator.generate(&untimed), Err(PipelineError::Schema(_))));
    }

    #[test]
    fn test_untrained_model_rejected() {
        let model = EnsembleModel::new(fast_config());
        assert!(matches!(SignalGenerator::new(model), Err(PipelineError::NotTrained(_))));
    }

    #[test]
    fn test_rationale_wording() {
        let prediction = SignalPrediction {
            signal: SignalClass::Buy,
            confidence: 62.5,
            probabilities: [12.5, 25.0, 62.5],
        };
        let insights = FeatureInsights {
            rsi: 25.0,
            macd_trend: 1,
            price_ma_ratio: 1.05,
        };
        let text = rationale(&prediction, &insights);
        assert!(text.contains("predicts BUY with 62.5% confidence"));
        assert!(text.contains("oversold"));
        assert!(text.contains("bullish momentum"));
        assert!(text.ends_with("(bullish)."));

        let neutral = FeatureInsights { rsi: 48.0, ..insights };
        assert!(rationale(&prediction, &neutral).contains("RSI at 48.0 (neutral zone). MACD"));
        let overbought = FeatureInsights { rsi: 75.0, ..insights };
        assert!(rationale(&prediction, &overbought).contains("overbought"));
    }
}
