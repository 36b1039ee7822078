//! Subtitle Sentinel - burned-in subtitle detection for video files
//!
//! Samples frames from a video, searches likely subtitle regions with a
//! pluggable text detector, tracks the best candidate line over time and
//! decides with a trained classifier (or a rule-based fallback) whether the
//! video carries hard-coded subtitles.

pub mod analysis;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod decision;
pub mod storage;
pub mod vision;

#[cfg(test)]
mod testing;

pub use config::DetectorConfig;
pub use decision::{
    evaluate_batch, DecisionStrategy, Evaluation, EvaluationError, StrategyKind, VideoEvaluator,
};
