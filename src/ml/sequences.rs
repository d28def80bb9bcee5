use ndarray::{s, Array2, Array3, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info, warn};

use super::features::FeatureFrame;
use crate::config::DataConfig;
use crate::error::{PipelineError, Result};
use crate::types::SignalClass;

/// Windows of complete feature rows with one label each
#[derive(Debug, Clone)]
pub struct SequenceSet {
    /// `[sample, window position, feature]`
    pub x: Array3<f64>,
    pub y: Vec<SignalClass>,
    /// Feature ordering along the last axis
    pub feature_columns: Vec<String>,
}

impl SequenceSet {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn sequence_length(&self) -> usize {
        self.x.len_of(Axis(1))
    }

    pub fn labels(&self) -> Vec<usize> {
        self.y.iter().map(|c| c.index()).collect()
    }

    /// Count of SELL, HOLD and BUY labels
    pub fn class_distribution(&self) -> [usize; SignalClass::COUNT] {
        let mut counts = [0; SignalClass::COUNT];
        for class in &self.y {
            counts[class.index()] += 1;
        }
        counts
    }

    /// `[sample, window * feature]` matrix, oldest window position first
    pub fn flatten(&self) -> Array2<f64> {
        flatten_windows(&self.x)
    }

    pub fn flattened_names(&self) -> Vec<String> {
        flattened_names(&self.feature_columns, self.sequence_length())
    }

    /// Append a noisy copy of every sample, clipped to [0, 1]. Meant for
    /// normalized data only.
    pub fn augment_with_noise(&mut self, noise_factor: f64, seed: u64) -> Result<()> {
        let normal = Normal::new(0.0, noise_factor)
            .map_err(|e| {
                PipelineError::Config(format!("Invalid noise factor {}: {}", noise_factor, e))
            })?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let noisy = self.x.mapv(|v| (v + normal.sample(&mut rng)).clamp(0.0, 1.0));
        let (n, window, features) = self.x.dim();
        let mut combined = Array3::<f64>::zeros((n * 2, window, features));
        combined.slice_mut(s![..n, .., ..]).assign(&self.x);
        combined.slice_mut(s![n.., .., ..]).assign(&noisy);
        self.x = combined;
        self.y.extend_from_within(..);

        info!("Augmented data: {} samples", self.len());
        Ok(())
    }
}

/// Builds labeled windows from a feature frame
#[derive(Debug, Clone)]
pub struct SequenceLabeler {
    pub sequence_length: usize,
    pub prediction_horizon: usize,
    pub threshold: f64,
}

impl Default for SequenceLabeler {
    fn default() -> Self {
        Self {
            sequence_length: 60,
            prediction_horizon: 1,
            threshold: 0.01,
        }
    }
}

impl SequenceLabeler {
    pub fn new(sequence_length: usize, prediction_horizon: usize) -> Self {
        Self {
            sequence_length,
            prediction_horizon,
            ..Default::default()
        }
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self {
            sequence_length: config.sequence_length,
            prediction_horizon: config.prediction_horizon,
            threshold: config.label_threshold,
        }
    }

    /// Label every full window of complete rows.
    ///
    /// Rows holding any undefined feature are removed first; the window ending
    /// at row `i + L - 1` is labeled against the close `horizon` rows later.
    pub fn create_sequences(&self, frame: &FeatureFrame) -> Result<SequenceSet> {
        if self.sequence_length == 0 || self.prediction_horizon == 0 {
            return Err(PipelineError::Config(
                "sequence_length and prediction_horizon must be positive".to_string(),
            ));
        }
        let close_idx = frame
            .column_index("close")
            .ok_or_else(|| PipelineError::Schema("Feature frame has no close column".to_string()))?;

        let rows = complete_rows(frame);
        let dropped = frame.n_rows() - rows.len();
        if dropped > 0 {
            debug!("Dropped {} rows with undefined features", dropped);
        }

        let needed = self.sequence_length + self.prediction_horizon;
        if rows.len() < needed {
            return Err(PipelineError::InsufficientData(format!(
                "{} complete rows, need at least {} (sequence_length {} + horizon {})",
                rows.len(),
                needed,
                self.sequence_length,
                self.prediction_horizon
            )));
        }

        let n_samples = rows.len() - needed + 1;
        let n_features = frame.n_columns();
        let mut x = Array3::zeros((n_samples, self.sequence_length, n_features));
        let mut y = Vec::with_capacity(n_samples);

        for i in 0..n_samples {
            for (w, &row) in rows[i..i + self.sequence_length].iter().enumerate() {
                for f in 0..n_features {
                    x[[i, w, f]] = frame.value(row, f);
                }
            }
            let current = frame.value(rows[i + self.sequence_length - 1], close_idx);
            let future = frame.value(rows[i + needed - 1], close_idx);
            y.push(SignalClass::from_price_move(current, future, self.threshold));
        }

        let set = SequenceSet {
            x,
            y,
            feature_columns: frame.columns().to_vec(),
        };
        let [sell, hold, buy] = set.class_distribution();
        info!(
            "Created {} sequences of {}x{} (SELL {}, HOLD {}, BUY {})",
            set.len(),
            self.sequence_length,
            n_features,
            sell,
            hold,
            buy
        );
        if sell == 0 || hold == 0 || buy == 0 {
            warn!("Label set is missing at least one class");
        }
        Ok(set)
    }

    /// The most recent complete window, shaped `[1, L, features]`, for
    /// inference on live candles
    pub fn latest_window(&self, frame: &FeatureFrame) -> Result<Array3<f64>> {
        let rows = complete_rows(frame);
        if rows.len() < self.sequence_length || self.sequence_length == 0 {
            return Err(PipelineError::InsufficientData(format!(
                "{} complete rows, need {} for one window",
                rows.len(),
                self.sequence_length
            )));
        }
        let tail = &rows[rows.len() - self.sequence_length..];
        let mut window = Array3::zeros((1, self.sequence_length, frame.n_columns()));
        for (w, &row) in tail.iter().enumerate() {
            for f in 0..frame.n_columns() {
                window[[0, w, f]] = frame.value(row, f);
            }
        }
        Ok(window)
    }
}

fn complete_rows(frame: &FeatureFrame) -> Vec<usize> {
    (0..frame.n_rows()).filter(|&r| frame.row_is_complete(r)).collect()
}

pub fn flatten_windows(x: &Array3<f64>) -> Array2<f64> {
    let (n, w, f) = x.dim();
    Array2::from_shape_fn((n, w * f), |(i, j)| x[[i, j / f, j % f]])
}

/// Names for flattened columns: `rsi@t-0` is the newest row of the window
pub fn flattened_names(columns: &[String], sequence_length: usize) -> Vec<String> {
    (0..sequence_length)
        .flat_map(|w| {
            let lag = sequence_length - 1 - w;
            columns.iter().map(move |c| format!("{}@t-{}", c, lag))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::tests::synthetic_series;
    use crate::ml::features::FeatureEngine;
    use crate::types::{Candle, CandleSeries};

    fn closes_frame(closes: &[f64]) -> FeatureFrame {
        let candles = closes
            .iter()
            .map(|&c| Candle {
                timestamp: None,
                open: c,
                high: c * 1.001,
                low: c * 0.999,
                close: c,
                volume: 1000.0,
                symbol: None,
            })
            .collect();
        FeatureEngine::new().compute(&CandleSeries::new(candles)).unwrap()
    }

    #[test]
    fn test_sequence_count_and_shape() {
        let frame = FeatureEngine::new().compute(&synthetic_series(400)).unwrap();
        let labeler = SequenceLabeler::new(10, 1);
        let set = labeler.create_sequences(&frame).unwrap();
        // sma_200 is the longest warm-up: rows 199.. are complete
        assert_eq!(set.len(), 201 - 11 + 1);
        assert_eq!(set.x.dim(), (set.len(), 10, frame.n_columns()));
        assert_eq!(set.feature_columns, frame.columns());
    }

    #[test]
    fn test_insufficient_rows() {
        let frame = FeatureEngine::new().compute(&synthetic_series(250)).unwrap();
        let err = SequenceLabeler::new(60, 1).create_sequences(&frame).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData(_)));
    }

    #[test]
    fn test_labels_follow_close_moves() {
        let mut closes: Vec<f64> = (0..260).map(|i| 100.0 + (i as f64 * 0.3).sin()).collect();
        let last = closes.len() - 1;
        closes[last] = closes[last - 1] * 1.05;
        let frame = closes_frame(&closes);
        let set = SequenceLabeler::new(5, 1).create_sequences(&frame).unwrap();
        assert_eq!(*set.y.last().unwrap(), SignalClass::Buy);
        assert!(set.y.iter().all(|c| c.index() < 3));
    }

    #[test]
    fn test_flatten_names_and_order() {
        let frame = FeatureEngine::new().compute(&synthetic_series(230)).unwrap();
        let set = SequenceLabeler::new(3, 1).create_sequences(&frame).unwrap();
        let flat = set.flatten();
        let names = set.flattened_names();
        let f = set.feature_columns.len();
        assert_eq!(flat.dim(), (set.len(), 3 * f));
        assert_eq!(names.len(), 3 * f);
        assert_eq!(names[0], "open@t-2");
        assert_eq!(names[2 * f + 3], "close@t-0");
        assert_eq!(flat[[0, 2 * f + 3]], set.x[[0, 2, 3]]);
    }

    #[test]
    fn test_augmentation_doubles_and_clips() {
        let mut set = SequenceSet {
            x: Array3::from_elem((4, 2, 3), 0.5),
            y: vec![SignalClass::Buy, SignalClass::Hold, SignalClass::Sell, SignalClass::Buy],
            feature_columns: vec!["a".into(), "b".into(), "c".into()],
        };
        set.augment_with_noise(0.01, 42).unwrap();
        assert_eq!(set.len(), 8);
        assert_eq!(set.x.len_of(Axis(0)), 8);
        assert_eq!(set.y[4], SignalClass::Buy);
        assert!(set.x.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_latest_window_is_tail() {
        let frame = FeatureEngine::new().compute(&synthetic_series(230)).unwrap();
        let labeler = SequenceLabeler::new(4, 1);
        let window = labeler.latest_window(&frame).unwrap();
        let close = frame.column_index("close").unwrap();
        assert_eq!(window[[0, 3, close]], frame.value(229, close));
    }
}
