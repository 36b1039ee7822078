//! Offline classifier training
//!
//! Videos, never individual rows, are the unit of every split: frames of one
//! video are strongly correlated, so a row-level split would leak. Videos are
//! ordered by a SHA-256 of (seed, video_id) and cut per class into
//! train/validation/test. Stability is estimated with stratified k-fold
//! cross-validation on the training partition, the final model is fitted on
//! the whole training partition, and the decision threshold is the F1-optimal
//! point of a grid scan on the validation partition.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::{sigmoid, BinaryMetrics, ClassifierError, ClassifierModel, LabeledVideo, TrainingMetadata};
use crate::analysis::{FEATURE_DIM, FEATURE_SCHEMA_VERSION};

/// Scales below this are treated as constant features
const MIN_SCALE: f64 = 1e-9;

/// Finest threshold grid the scan accepts
const MIN_THRESHOLD_STEP: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub folds: usize,
    pub validation_fraction: f64,
    pub test_fraction: f64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
    pub threshold_min: f64,
    pub threshold_max: f64,
    pub threshold_step: f64,
    /// Changing the seed reshuffles which videos land in which partition
    pub split_seed: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            validation_fraction: 0.15,
            test_fraction: 0.15,
            learning_rate: 0.1,
            epochs: 500,
            l2: 0.01,
            threshold_min: 0.05,
            threshold_max: 0.95,
            threshold_step: 0.01,
            split_seed: "subtitle-sentinel".to_string(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let invalid = |msg: &str| Err(ClassifierError::InvalidModel(msg.to_string()));
        if !(self.validation_fraction > 0.0 && self.test_fraction > 0.0)
            || self.validation_fraction + self.test_fraction >= 0.8
        {
            return invalid("validation/test fractions must be positive and leave room for training");
        }
        if !(self.learning_rate > 0.0) || self.epochs == 0 || self.l2 < 0.0 {
            return invalid("learning_rate and epochs must be positive, l2 non-negative");
        }
        if !(0.0 < self.threshold_min && self.threshold_min <= self.threshold_max && self.threshold_max < 1.0)
            || !(self.threshold_step >= MIN_THRESHOLD_STEP)
        {
            return invalid("threshold grid must lie inside (0, 1) with a step of at least 0.0001");
        }
        Ok(())
    }
}

/// Video ids per partition plus the fold of each training video
#[derive(Debug, Default)]
struct Partitions<'a> {
    train: Vec<&'a str>,
    validation: Vec<&'a str>,
    test: Vec<&'a str>,
    folds: HashMap<&'a str, usize>,
    fold_count: usize,
}

fn split_key(seed: &str, video_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update([0u8]);
    hasher.update(video_id.as_bytes());
    hasher.finalize().into()
}

/// Stratified, hash-ordered partitioning of video ids
fn partition<'a>(labels: &BTreeMap<&'a str, bool>, config: &TrainingConfig) -> Result<Partitions<'a>, ClassifierError> {
    let mut parts = Partitions::default();
    let mut train_by_class: Vec<Vec<&'a str>> = Vec::new();

    for class in [true, false] {
        let mut ids: Vec<&'a str> = labels.iter().filter(|(_, l)| **l == class).map(|(id, _)| *id).collect();
        if ids.len() < 3 {
            return Err(ClassifierError::InsufficientData(format!(
                "{} {} video(s); each class needs at least 3 distinct videos",
                ids.len(),
                if class { "positive" } else { "negative" }
            )));
        }
        ids.sort_by_key(|id| split_key(&config.split_seed, id));

        let n = ids.len();
        let n_test = ((n as f64 * config.test_fraction).round() as usize).max(1);
        let n_val = ((n as f64 * config.validation_fraction).round() as usize).max(1);
        if n_test + n_val >= n {
            return Err(ClassifierError::InsufficientData(format!(
                "only {} {} videos; nothing left for training",
                n,
                if class { "positive" } else { "negative" }
            )));
        }

        parts.test.extend_from_slice(&ids[..n_test]);
        parts.validation.extend_from_slice(&ids[n_test..n_test + n_val]);
        parts.train.extend_from_slice(&ids[n_test + n_val..]);
        train_by_class.push(ids[n_test + n_val..].to_vec());
    }

    let smallest_class = train_by_class.iter().map(Vec::len).min().unwrap_or(0);
    parts.fold_count = config.folds.min(smallest_class);
    if parts.fold_count >= 2 {
        for class_ids in &train_by_class {
            for (i, id) in class_ids.iter().enumerate() {
                parts.folds.insert(*id, i % parts.fold_count);
            }
        }
    } else {
        parts.fold_count = 0;
    }

    Ok(parts)
}

/// Standardizer plus logistic coefficients
struct LogisticFit {
    means: Array1<f64>,
    scales: Array1<f64>,
    weights: Array1<f64>,
    bias: f64,
}

impl LogisticFit {
    /// Batch gradient descent on the L2-penalized log-loss
    fn fit(x: &Array2<f64>, y: &Array1<f64>, config: &TrainingConfig) -> Self {
        let dim = x.ncols();
        let means = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(dim));
        let scales = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < MIN_SCALE { 1.0 } else { s });
        let z = (x - &means) / &scales;

        let n = x.nrows().max(1) as f64;
        let mut weights = Array1::<f64>::zeros(dim);
        let mut bias = 0.0;

        for _ in 0..config.epochs {
            let p = (z.dot(&weights) + bias).mapv(sigmoid);
            let err = &p - y;
            let grad_w = z.t().dot(&err) / n + &weights * config.l2;
            let grad_b = err.sum() / n;
            weights.scaled_add(-config.learning_rate, &grad_w);
            bias -= config.learning_rate * grad_b;
        }

        Self { means, scales, weights, bias }
    }

    fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        let z = (x - &self.means) / &self.scales;
        (z.dot(&self.weights) + self.bias).mapv(sigmoid).to_vec()
    }
}

fn design_matrix(rows: &[&LabeledVideo]) -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_fn((rows.len(), FEATURE_DIM), |(i, j)| rows[i].features.values()[j] as f64);
    let y = rows.iter().map(|r| if r.label { 1.0 } else { 0.0 }).collect::<Array1<f64>>();
    (x, y)
}

fn labels_of(rows: &[&LabeledVideo]) -> Vec<bool> {
    rows.iter().map(|r| r.label).collect()
}

fn log_loss(probabilities: &[f64], labels: &[bool]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f64 = probabilities
        .iter()
        .zip(labels)
        .map(|(p, l)| {
            let p = p.clamp(1e-15, 1.0 - 1e-15);
            if *l {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / labels.len() as f64
}

/// Grid scan for the F1-maximizing threshold.
/// Ties resolve to the middle of the best-scoring plateau.
fn scan_threshold(probabilities: &[f64], labels: &[bool], config: &TrainingConfig) -> (f64, f64) {
    let steps = ((config.threshold_max - config.threshold_min) / config.threshold_step).round() as usize;
    let mut best_f1 = f64::MIN;
    let mut plateau: Vec<f64> = Vec::new();

    for i in 0..=steps {
        let threshold = config.threshold_min + config.threshold_step * i as f64;
        let predictions: Vec<bool> = probabilities.iter().map(|p| *p >= threshold).collect();
        let f1 = BinaryMetrics::compute(&predictions, labels).f1;

        if f1 > best_f1 + 1e-12 {
            best_f1 = f1;
            plateau.clear();
            plateau.push(threshold);
        } else if (f1 - best_f1).abs() <= 1e-12 {
            plateau.push(threshold);
        }
    }

    let threshold = plateau.get(plateau.len() / 2).copied().unwrap_or(0.5);
    (threshold, best_f1.max(0.0))
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Train a classifier on per-video feature vectors
pub fn train_classifier(rows: &[LabeledVideo], config: &TrainingConfig) -> Result<ClassifierModel, ClassifierError> {
    config.validate()?;
    if rows.is_empty() {
        return Err(ClassifierError::InsufficientData("dataset is empty".to_string()));
    }
    for row in rows {
        row.features.ensure_schema(FEATURE_SCHEMA_VERSION, FEATURE_DIM)?;
    }

    let mut labels: BTreeMap<&str, bool> = BTreeMap::new();
    for row in rows {
        if let Some(previous) = labels.insert(row.video_id.as_str(), row.label) {
            if previous != row.label {
                return Err(ClassifierError::InsufficientData(format!(
                    "video '{}' carries conflicting labels",
                    row.video_id
                )));
            }
        }
    }

    let parts = partition(&labels, config)?;
    info!(
        "Split {} videos: {} train, {} validation, {} test",
        labels.len(),
        parts.train.len(),
        parts.validation.len(),
        parts.test.len()
    );

    let rows_in = |ids: &[&str]| -> Vec<&LabeledVideo> {
        rows.iter().filter(|r| ids.contains(&r.video_id.as_str())).collect()
    };
    let train_rows = rows_in(&parts.train);
    let validation_rows = rows_in(&parts.validation);
    let test_rows = rows_in(&parts.test);

    // Cross-validation on the training partition
    let mut fold_f1 = Vec::new();
    let mut fold_loss = Vec::new();
    for fold in 0..parts.fold_count {
        let (held, fit_on): (Vec<&LabeledVideo>, Vec<&LabeledVideo>) = train_rows
            .iter()
            .copied()
            .partition(|r| parts.folds.get(r.video_id.as_str()) == Some(&fold));
        if held.is_empty() || fit_on.is_empty() {
            continue;
        }

        let (x_fit, y_fit) = design_matrix(&fit_on);
        let model = LogisticFit::fit(&x_fit, &y_fit, config);
        let (threshold, _) = scan_threshold(&model.predict(&x_fit), &labels_of(&fit_on), config);

        let (x_held, _) = design_matrix(&held);
        let held_labels = labels_of(&held);
        let probabilities = model.predict(&x_held);
        let predictions: Vec<bool> = probabilities.iter().map(|p| *p >= threshold).collect();
        let f1 = BinaryMetrics::compute(&predictions, &held_labels).f1;
        debug!("Fold {}: F1 {:.3} at threshold {:.2}", fold, f1, threshold);

        fold_f1.push(f1);
        fold_loss.push(log_loss(&probabilities, &held_labels));
    }
    if parts.fold_count == 0 {
        warn!("Too few training videos per class for cross-validation; skipping");
    }
    let (cv_f1_mean, cv_f1_std) = mean_std(&fold_f1);
    let (cv_log_loss_mean, cv_log_loss_std) = mean_std(&fold_loss);

    // Final model and threshold
    let (x_train, y_train) = design_matrix(&train_rows);
    let fit = LogisticFit::fit(&x_train, &y_train, config);

    let (x_val, _) = design_matrix(&validation_rows);
    let (threshold, validation_f1) = scan_threshold(&fit.predict(&x_val), &labels_of(&validation_rows), config);

    let (x_test, _) = design_matrix(&test_rows);
    let test_predictions: Vec<bool> = fit.predict(&x_test).iter().map(|p| *p >= threshold).collect();
    let test = BinaryMetrics::compute(&test_predictions, &labels_of(&test_rows));

    info!(
        "Trained classifier: CV F1 {:.3} ± {:.3}, threshold {:.2} (validation F1 {:.3}), test F1 {:.3}",
        cv_f1_mean, cv_f1_std, threshold, validation_f1, test.f1
    );

    let trained_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let model = ClassifierModel {
        artifact_id: uuid::Uuid::new_v4().to_string(),
        schema_version: FEATURE_SCHEMA_VERSION,
        feature_dim: FEATURE_DIM,
        feature_means: fit.means.to_vec(),
        feature_scales: fit.scales.to_vec(),
        weights: fit.weights.to_vec(),
        bias: fit.bias,
        threshold,
        metadata: TrainingMetadata {
            trained_at,
            dataset_rows: rows.len(),
            videos_total: labels.len(),
            videos_train: parts.train.len(),
            videos_validation: parts.validation.len(),
            videos_test: parts.test.len(),
            positives: labels.values().filter(|l| **l).count(),
            folds: parts.fold_count,
            cv_f1_mean,
            cv_f1_std,
            cv_log_loss_mean,
            cv_log_loss_std,
            validation_f1,
            test,
            learning_rate: config.learning_rate,
            epochs: config.epochs,
            l2: config.l2,
            split_seed: config.split_seed.clone(),
        },
    };
    model.validate()?;
    Ok(model)
}
