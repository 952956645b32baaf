//! Temporal risk scoring
//!
//! ```text
//! PersonFrame ──> FeatureExtractor ──> FeatureSet ──> FallScorer ──> FallScore
//!                        ^                 |
//!                        |                 v
//!                 short HistoryBuffer   long HistoryBuffer ──> GaitStabilityAnalyzer
//! ```

pub mod fall;
pub mod features;
pub mod gait;
pub mod history;

pub use fall::{DetectionStrategy, FallScore, FallScorer, FallThresholds};
pub use features::{FeatureExtractor, FeatureSet};
pub use gait::{GaitAssessment, GaitSample, GaitStabilityAnalyzer, RiskLevel};
pub use history::HistoryBuffer;
