//! Analysis Layer
//!
//! Turns per-frame detections into the fixed-schema feature vector the
//! decision layer consumes:
//! - [`spatial`]: per-frame statistics over all detections
//! - [`temporal`]: candidate tracking across the ordered frame sequence
//! - [`features`]: per-video aggregation into a versioned vector

pub mod features;
pub mod spatial;
pub mod temporal;
pub mod text;

pub use features::{aggregate_features, feature_names, FeatureVector, SchemaError, FEATURE_DIM, FEATURE_SCHEMA_VERSION};
pub use spatial::{extract_spatial_features, SpatialFeatures, SPATIAL_FEATURE_COUNT};
pub use temporal::{TemporalFeatures, TemporalTracker, TrackerConfig, TrackerError, TEMPORAL_FEATURE_COUNT};
pub use text::{normalize_text, text_similarity};

pub(crate) fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation, accumulated in f64.
/// Identical values give exactly zero.
pub(crate) fn std_dev(values: &[f32]) -> f32 {
    let Some(first) = values.first() else {
        return 0.0;
    };
    if values.iter().all(|v| v == first) {
        return 0.0;
    }

    let n = values.len() as f64;
    let m = values.iter().map(|v| *v as f64).sum::<f64>() / n;
    let variance = values.iter().map(|v| (*v as f64 - m).powi(2)).sum::<f64>() / n;
    variance.sqrt() as f32
}

pub(crate) fn max(values: &[f32]) -> f32 {
    values.iter().copied().fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |a| a.max(v)))).unwrap_or(0.0)
}
