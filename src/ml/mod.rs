pub mod features;
pub mod sequences;
pub mod normalizer;
pub mod scaler;
pub mod metrics;
pub mod members;
pub mod ensemble;
pub mod persistence;
pub mod signal;

pub use features::{FeatureEngine, FeatureFrame};
pub use sequences::{SequenceLabeler, SequenceSet};
pub use normalizer::FeatureNormalizer;
pub use scaler::StandardScaler;
pub use metrics::{ClassificationReport, ConfusionMatrix};
pub use members::{Classifier, MemberModel};
pub use ensemble::{EnsembleModel, InputSchema, ModelState, SignalPrediction, TrainingMetrics};
pub use persistence::{InputLayout, ModelMetadata, ModelStore, ModelVersion};
pub use signal::{GeneratedSignal, SignalGenerator};
