//! Decision Layer
//!
//! One decision contract, two interchangeable strategies: the trained
//! classifier (preferred) and a rule-based score kept for when no model is
//! available. A single evaluation uses exactly one of them.

pub mod batch;
pub mod evaluator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::analysis::{FeatureVector, SchemaError, TemporalFeatures, FEATURE_DIM, FEATURE_SCHEMA_VERSION};
use crate::classifier::{ClassifierError, ClassifierModel};
use crate::storage::ModelStore;

pub use batch::evaluate_batch;
pub use evaluator::{Evaluation, FrameStats, VideoEvaluator, VideoEvidence};

/// Which strategy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Classifier,
    RuleBased,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::Classifier => "classifier",
            StrategyKind::RuleBased => "rule_based",
        })
    }
}

/// Fixed weights of the rule-based fallback.
///
/// The 60/40 spatial/temporal split is a heuristic default, not a fitted
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleWeights {
    pub spatial_weight: f32,
    pub temporal_weight: f32,
    /// Share of the temporal score taken by persistence; the rest is run length
    pub persistence_share: f32,
    /// Persistence ratio that earns the full persistence score
    pub persistence_saturation: f32,
    /// Run length (frames) that earns the full run score
    pub run_saturation: f32,
    /// Combined score needed for a positive verdict
    pub decision_threshold: f32,
    /// Minimum temporal score for a positive verdict
    pub temporal_floor: f32,
}

impl Default for RuleWeights {
    fn default() -> Self {
        Self {
            spatial_weight: 0.6,
            temporal_weight: 0.4,
            persistence_share: 0.6,
            persistence_saturation: 0.5,
            run_saturation: 5.0,
            decision_threshold: 0.5,
            temporal_floor: 0.4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub strategy: StrategyKind,
    pub rule: RuleWeights,
}

/// Verdict before the sample text is attached
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub has_subtitles: bool,
    /// Presence score in [0, 1]
    pub confidence: f32,
}

/// Fatal evaluation failures. None of these mean "no subtitles".
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("resolution unknown for {}: {reason}", .path.display())]
    ResolutionUnknown { path: PathBuf, reason: String },
    #[error("{failed} of {attempted} frames could not be extracted (limit {:.0}%)", .limit * 100.0)]
    TooManyFrameFailures {
        failed: usize,
        attempted: usize,
        limit: f64,
    },
    #[error("no frame of {} could be evaluated ({timed_out} of {sampled} timed out)", .path.display())]
    NoFramesEvaluated {
        path: PathBuf,
        sampled: usize,
        timed_out: usize,
    },
    #[error("feature schema mismatch: {0}")]
    SchemaMismatch(SchemaError),
    #[error("evaluation of {} was cancelled", .0.display())]
    Cancelled(PathBuf),
    #[error("no trained model available: {0}")]
    NoModel(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ClassifierError> for EvaluationError {
    fn from(e: ClassifierError) -> Self {
        match e {
            ClassifierError::SchemaMismatch(inner) => EvaluationError::SchemaMismatch(inner),
            other => EvaluationError::Internal(other.to_string()),
        }
    }
}

/// Selected decision strategy with its parameters
#[derive(Debug, Clone)]
pub enum DecisionStrategy {
    Classifier(Arc<ClassifierModel>),
    RuleBased(RuleWeights),
}

impl DecisionStrategy {
    /// Build the configured strategy.
    ///
    /// With `strict` unset, a missing model degrades to the rule-based
    /// strategy with a warning; with `strict` set it is an error.
    pub fn resolve(config: &DecisionConfig, store: Option<&ModelStore>, strict: bool) -> Result<Self, EvaluationError> {
        if config.strategy == StrategyKind::RuleBased {
            return Ok(DecisionStrategy::RuleBased(config.rule.clone()));
        }

        let loaded = match store {
            Some(store) => store.load_latest(FEATURE_SCHEMA_VERSION).map_err(|e| format!("{:#}", e)),
            None => Err("no model store configured".to_string()),
        };
        match loaded {
            Ok(model) => Ok(DecisionStrategy::Classifier(model)),
            Err(reason) if strict => Err(EvaluationError::NoModel(reason)),
            Err(reason) => {
                warn!("Falling back to rule-based decisions: {}", reason);
                Ok(DecisionStrategy::RuleBased(config.rule.clone()))
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            DecisionStrategy::Classifier(_) => StrategyKind::Classifier,
            DecisionStrategy::RuleBased(_) => StrategyKind::RuleBased,
        }
    }

    /// Fail fast when the model expects a different feature layout
    pub fn check_schema(&self) -> Result<(), EvaluationError> {
        if let DecisionStrategy::Classifier(model) = self {
            let probe = FeatureVector::from_parts(FEATURE_SCHEMA_VERSION, vec![0.0; FEATURE_DIM]);
            probe
                .ensure_schema(model.schema_version(), model.feature_dim())
                .map_err(EvaluationError::SchemaMismatch)?;
        }
        Ok(())
    }

    pub fn decide(&self, evidence: &VideoEvidence) -> Result<Decision, EvaluationError> {
        match self {
            DecisionStrategy::Classifier(model) => {
                let prediction = model.predict(&evidence.features)?;
                Ok(Decision {
                    has_subtitles: prediction.has_subtitles,
                    confidence: prediction.probability as f32,
                })
            }
            DecisionStrategy::RuleBased(weights) => Ok(rule_based_decision(weights, evidence)),
        }
    }
}

/// Temporal score in [0, 1] from persistence and the longest run.
///
/// A single run below the persistence saturation point is one static piece
/// of text (a caption card, a title, a burst), not dialogue: its score is
/// scaled down by how far it falls short.
pub fn temporal_score(weights: &RuleWeights, temporal: &TemporalFeatures) -> f32 {
    let persistence = (temporal.persistence_ratio / weights.persistence_saturation.max(f32::EPSILON)).min(1.0);
    let run = (temporal.longest_run / weights.run_saturation.max(f32::EPSILON)).min(1.0);
    let score = weights.persistence_share * persistence + (1.0 - weights.persistence_share) * run;

    let single_run = temporal.num_runs <= 1.0;
    let score = if single_run { score * persistence } else { score };
    score.clamp(0.0, 1.0)
}

/// Weighted spatial/temporal score.
///
/// A positive verdict needs the combined score over the threshold and the
/// temporal score over its floor, so a single confident burst cannot pass.
/// With temporal aggregation disabled the spatial score decides alone.
pub fn rule_based_decision(weights: &RuleWeights, evidence: &VideoEvidence) -> Decision {
    let spatial = evidence.max_spatial_score.clamp(0.0, 1.0);

    if !evidence.temporal_enabled {
        return Decision {
            has_subtitles: spatial >= weights.decision_threshold,
            confidence: spatial,
        };
    }

    let temporal = temporal_score(weights, &evidence.temporal);
    let total = (weights.spatial_weight + weights.temporal_weight).max(f32::EPSILON);
    let combined = ((weights.spatial_weight * spatial + weights.temporal_weight * temporal) / total).clamp(0.0, 1.0);

    let has_subtitles = combined >= weights.decision_threshold && temporal >= weights.temporal_floor;
    Decision {
        has_subtitles,
        confidence: if has_subtitles { combined } else { combined.min(temporal) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregate_features;
    use crate::classifier::tests::single_feature_model;

    fn evidence(max_spatial_score: f32, temporal: TemporalFeatures) -> VideoEvidence {
        VideoEvidence {
            features: aggregate_features(&[], &temporal),
            temporal,
            max_spatial_score,
            sample_text: None,
            temporal_enabled: true,
            frames_with_detections: temporal.frames_with_text as usize,
        }
    }

    fn run_of(length: f32, total: f32) -> TemporalFeatures {
        TemporalFeatures {
            frames_with_text: length,
            total_frames: total,
            persistence_ratio: length / total,
            longest_run: length,
            num_runs: 1.0,
            avg_run_length: length,
            avg_text_similarity: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_persistent_line_is_positive() {
        let decision = rule_based_decision(&RuleWeights::default(), &evidence(0.9, run_of(20.0, 30.0)));
        assert!(decision.has_subtitles);
        assert!((decision.confidence - 0.94).abs() < 1e-4);
    }

    #[test]
    fn test_short_confident_burst_is_negative() {
        let decision = rule_based_decision(&RuleWeights::default(), &evidence(0.95, run_of(2.0, 30.0)));
        assert!(!decision.has_subtitles);
        assert!(decision.confidence < 0.5);
    }

    #[test]
    fn test_single_short_static_run_is_negative() {
        for length in [5.0, 8.0] {
            let decision = rule_based_decision(&RuleWeights::default(), &evidence(0.9, run_of(length, 30.0)));
            assert!(!decision.has_subtitles, "one run of {} frames accepted", length);
            assert!(decision.confidence < 0.5);
        }
    }

    #[test]
    fn test_intermittent_dialogue_is_positive() {
        // six lines of three frames each
        let dialogue = TemporalFeatures {
            frames_with_text: 18.0,
            total_frames: 30.0,
            persistence_ratio: 0.6,
            longest_run: 3.0,
            num_runs: 6.0,
            avg_run_length: 3.0,
            avg_text_similarity: 0.4,
            inverse_text_similarity: 0.6,
            ..Default::default()
        };
        let decision = rule_based_decision(&RuleWeights::default(), &evidence(0.9, dialogue));
        assert!(decision.has_subtitles);
        assert!((temporal_score(&RuleWeights::default(), &dialogue) - 0.84).abs() < 1e-4);
    }

    #[test]
    fn test_spatial_only_when_tracking_disabled() {
        let mut e = evidence(0.7, TemporalFeatures::default());
        e.temporal_enabled = false;
        let decision = rule_based_decision(&RuleWeights::default(), &e);
        assert!(decision.has_subtitles);
        assert_eq!(decision.confidence, 0.7);
    }

    #[test]
    fn test_weights_are_tunable() {
        let spatial_heavy = RuleWeights {
            spatial_weight: 1.0,
            temporal_weight: 0.0,
            temporal_floor: 0.0,
            ..Default::default()
        };
        let decision = rule_based_decision(&spatial_heavy, &evidence(0.95, run_of(2.0, 30.0)));
        assert!(decision.has_subtitles);
    }

    #[test]
    fn test_schema_check_rejects_foreign_model() {
        let mut model = single_feature_model(0, 1.0, 0.0);
        model.schema_version = FEATURE_SCHEMA_VERSION + 1;
        let strategy = DecisionStrategy::Classifier(Arc::new(model));
        assert!(matches!(strategy.check_schema(), Err(EvaluationError::SchemaMismatch(_))));

        let ok = DecisionStrategy::Classifier(Arc::new(single_feature_model(0, 1.0, 0.0)));
        assert!(ok.check_schema().is_ok());
    }

    #[test]
    fn test_resolve_degrades_without_model() {
        let config = DecisionConfig::default();
        let strategy = DecisionStrategy::resolve(&config, None, false).unwrap();
        assert_eq!(strategy.kind(), StrategyKind::RuleBased);

        assert!(matches!(
            DecisionStrategy::resolve(&config, None, true),
            Err(EvaluationError::NoModel(_))
        ));
    }
}
