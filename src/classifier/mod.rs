//! Subtitle Classifier
//!
//! L2-regularized logistic regression over z-scored feature vectors. A model
//! carries the feature schema it was trained against and a decision
//! threshold picked on held-out videos; it is never modified after training.

pub mod dataset;
pub mod train;

use serde::{Deserialize, Serialize};

use crate::analysis::{FeatureVector, SchemaError};

pub use dataset::{load_dataset, write_dataset, LabeledVideo};
pub use train::{train_classifier, TrainingConfig};

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(#[from] SchemaError),
    #[error("insufficient training data: {0}")]
    InsufficientData(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
}

/// Accuracy, precision, recall and F1 of boolean predictions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BinaryMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl BinaryMetrics {
    /// Undefined ratios (no predicted or actual positives) are reported as 0
    pub fn compute(predictions: &[bool], labels: &[bool]) -> Self {
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        let mut correct = 0usize;
        for (&p, &l) in predictions.iter().zip(labels) {
            match (p, l) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (false, false) => {}
            }
            if p == l {
                correct += 1;
            }
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            accuracy: ratio(correct, labels.len()),
            precision,
            recall,
            f1,
            support: labels.len(),
        }
    }
}

/// Training provenance stored alongside the coefficients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub trained_at: u64,
    pub dataset_rows: usize,
    pub videos_total: usize,
    pub videos_train: usize,
    pub videos_validation: usize,
    pub videos_test: usize,
    pub positives: usize,
    pub folds: usize,
    pub cv_f1_mean: f64,
    pub cv_f1_std: f64,
    pub cv_log_loss_mean: f64,
    pub cv_log_loss_std: f64,
    pub validation_f1: f64,
    pub test: BinaryMetrics,
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
    pub split_seed: String,
}

/// Trained, immutable classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierModel {
    pub(crate) artifact_id: String,
    pub(crate) schema_version: u32,
    pub(crate) feature_dim: usize,
    pub(crate) feature_means: Vec<f64>,
    pub(crate) feature_scales: Vec<f64>,
    pub(crate) weights: Vec<f64>,
    pub(crate) bias: f64,
    pub(crate) threshold: f64,
    pub(crate) metadata: TrainingMetadata,
}

/// Probability plus thresholded verdict
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub probability: f64,
    pub has_subtitles: bool,
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl ClassifierModel {
    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn metadata(&self) -> &TrainingMetadata {
        &self.metadata
    }

    /// Structural checks run after deserialization
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let dim = self.feature_dim;
        if dim == 0 {
            return Err(ClassifierError::InvalidModel("feature_dim is zero".to_string()));
        }
        for (name, len) in [
            ("feature_means", self.feature_means.len()),
            ("feature_scales", self.feature_scales.len()),
            ("weights", self.weights.len()),
        ] {
            if len != dim {
                return Err(ClassifierError::InvalidModel(format!(
                    "{} has {} entries, expected {}",
                    name, len, dim
                )));
            }
        }
        let finite = self
            .feature_means
            .iter()
            .chain(&self.feature_scales)
            .chain(&self.weights)
            .chain(std::iter::once(&self.bias))
            .all(|v| v.is_finite());
        if !finite {
            return Err(ClassifierError::InvalidModel("non-finite coefficient".to_string()));
        }
        if self.feature_scales.iter().any(|s| *s <= 0.0) {
            return Err(ClassifierError::InvalidModel("non-positive feature scale".to_string()));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(ClassifierError::InvalidModel(format!(
                "threshold {} outside (0, 1)",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Probability that the video carries burned-in subtitles.
    /// Vectors of another schema version or length are rejected.
    pub fn probability(&self, features: &FeatureVector) -> Result<f64, ClassifierError> {
        features.ensure_schema(self.schema_version, self.feature_dim)?;

        let z = features
            .values()
            .iter()
            .zip(&self.feature_means)
            .zip(&self.feature_scales)
            .zip(&self.weights)
            .map(|(((x, m), s), w)| (*x as f64 - m) / s * w)
            .sum::<f64>()
            + self.bias;
        Ok(sigmoid(z))
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        let probability = self.probability(features)?;
        Ok(Prediction {
            probability,
            has_subtitles: probability >= self.threshold,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::{FEATURE_DIM, FEATURE_SCHEMA_VERSION};

    /// A model that keys entirely on one feature position
    pub(crate) fn single_feature_model(position: usize, weight: f64, bias: f64) -> ClassifierModel {
        let mut weights = vec![0.0; FEATURE_DIM];
        weights[position] = weight;
        ClassifierModel {
            artifact_id: "test-model".to_string(),
            schema_version: FEATURE_SCHEMA_VERSION,
            feature_dim: FEATURE_DIM,
            feature_means: vec![0.0; FEATURE_DIM],
            feature_scales: vec![1.0; FEATURE_DIM],
            weights,
            bias,
            threshold: 0.5,
            metadata: TrainingMetadata::default(),
        }
    }

    #[test]
    fn test_probability_and_threshold() {
        let model = single_feature_model(0, 4.0, -2.0);

        let mut values = vec![0.0; FEATURE_DIM];
        let negative = FeatureVector::from_parts(FEATURE_SCHEMA_VERSION, values.clone());
        values[0] = 1.0;
        let positive = FeatureVector::from_parts(FEATURE_SCHEMA_VERSION, values);

        let p = model.predict(&positive).unwrap();
        assert!((p.probability - sigmoid(2.0)).abs() < 1e-12);
        assert!(p.has_subtitles);
        assert!(!model.predict(&negative).unwrap().has_subtitles);
    }

    #[test]
    fn test_rejects_mismatched_vectors() {
        let model = single_feature_model(0, 1.0, 0.0);

        let short = FeatureVector::from_parts(FEATURE_SCHEMA_VERSION, vec![0.0; FEATURE_DIM - 1]);
        assert!(matches!(
            model.probability(&short),
            Err(ClassifierError::SchemaMismatch(SchemaError::Length { .. }))
        ));

        let future = FeatureVector::from_parts(FEATURE_SCHEMA_VERSION + 1, vec![0.0; FEATURE_DIM]);
        assert!(matches!(
            model.probability(&future),
            Err(ClassifierError::SchemaMismatch(SchemaError::Version { .. }))
        ));
    }

    #[test]
    fn test_validate_catches_corrupt_models() {
        assert!(single_feature_model(0, 1.0, 0.0).validate().is_ok());

        let mut truncated = single_feature_model(0, 1.0, 0.0);
        truncated.weights.pop();
        assert!(matches!(truncated.validate(), Err(ClassifierError::InvalidModel(_))));

        let mut bad_threshold = single_feature_model(0, 1.0, 0.0);
        bad_threshold.threshold = 1.0;
        assert!(bad_threshold.validate().is_err());

        let mut nan = single_feature_model(0, 1.0, 0.0);
        nan.bias = f64::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_binary_metrics() {
        let predictions = [true, true, false, false, true];
        let labels = [true, false, false, true, true];
        let m = BinaryMetrics::compute(&predictions, &labels);

        assert!((m.accuracy - 0.6).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.support, 5);

        let none = BinaryMetrics::compute(&[false, false], &[false, false]);
        assert_eq!(none.f1, 0.0);
        assert_eq!(none.accuracy, 1.0);
    }
}
