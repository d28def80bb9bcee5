//! Feedback-driven retraining cycles.

pub mod source;
pub mod learner;

pub use source::{CandleSource, CsvCandleSource};
pub use learner::{ContinuousLearner, ImprovementReport, LearnerStatus, PeriodStats};
