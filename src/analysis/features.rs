//! Feature Aggregator
//!
//! Builds the per-video feature vector: for each of the 15 spatial metrics
//! the mean, std and max across sampled frames (metric-major), followed by
//! the 11 temporal values. The layout is versioned; any change to order or
//! length must bump [`FEATURE_SCHEMA_VERSION`].

use serde::{Deserialize, Serialize};

use super::spatial::{SpatialFeatures, SPATIAL_FEATURE_COUNT, SPATIAL_FEATURE_NAMES};
use super::temporal::{TemporalFeatures, TEMPORAL_FEATURE_COUNT, TEMPORAL_FEATURE_NAMES};
use super::{max, mean, std_dev};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Aggregated spatial values: metric x {mean, std, max}
pub const AGGREGATED_SPATIAL_COUNT: usize = SPATIAL_FEATURE_COUNT * 3;

pub const FEATURE_DIM: usize = AGGREGATED_SPATIAL_COUNT + TEMPORAL_FEATURE_COUNT;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("feature schema v{found} does not match expected v{expected}")]
    Version { expected: u32, found: u32 },
    #[error("feature vector has {found} values, expected {expected}")]
    Length { expected: usize, found: usize },
}

/// Fixed-order feature vector tagged with its schema version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    schema_version: u32,
    values: Vec<f32>,
}

impl FeatureVector {
    /// Wrap values produced elsewhere (e.g. read from a dataset).
    /// Nothing is checked until [`FeatureVector::ensure_schema`].
    pub fn from_parts(schema_version: u32, values: Vec<f32>) -> Self {
        Self { schema_version, values }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fail unless version and length match exactly
    pub fn ensure_schema(&self, version: u32, dim: usize) -> Result<(), SchemaError> {
        if self.schema_version != version {
            return Err(SchemaError::Version {
                expected: version,
                found: self.schema_version,
            });
        }
        if self.values.len() != dim {
            return Err(SchemaError::Length {
                expected: dim,
                found: self.values.len(),
            });
        }
        Ok(())
    }
}

/// Reduce per-frame spatial features and append temporal features.
/// Always yields [`FEATURE_DIM`] values, including for zero frames.
pub fn aggregate_features(frames: &[SpatialFeatures], temporal: &TemporalFeatures) -> FeatureVector {
    let per_frame: Vec<[f32; SPATIAL_FEATURE_COUNT]> = frames.iter().map(SpatialFeatures::to_array).collect();

    let mut values = Vec::with_capacity(FEATURE_DIM);
    for metric in 0..SPATIAL_FEATURE_COUNT {
        let column: Vec<f32> = per_frame.iter().map(|f| f[metric]).collect();
        values.push(mean(&column));
        values.push(std_dev(&column));
        values.push(max(&column));
    }
    values.extend_from_slice(&temporal.to_array());

    FeatureVector::from_parts(FEATURE_SCHEMA_VERSION, values)
}

/// Names of the vector positions, in order
pub fn feature_names() -> Vec<String> {
    SPATIAL_FEATURE_NAMES
        .iter()
        .flat_map(|name| ["mean", "std", "max"].map(|stat| format!("{}_{}", name, stat)))
        .chain(TEMPORAL_FEATURE_NAMES.iter().map(|name| name.to_string()))
        .collect()
}
