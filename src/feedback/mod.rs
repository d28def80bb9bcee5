//! Signal outcome log and the feedback it feeds back into training.

pub mod store;
pub mod stats;
pub mod weighting;

pub use store::{FeedbackSample, FeedbackStore, OutcomeUpdate};
pub use stats::PerformanceStats;
pub use weighting::FeedbackWeighter;
