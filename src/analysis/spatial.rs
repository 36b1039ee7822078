//! Spatial Feature Extractor
//!
//! Pure per-frame statistics over every detection in a frame. Identical input
//! always yields identical output, which keeps extracted training data
//! reproducible.

use serde::{Deserialize, Serialize};

use super::{max, mean, std_dev};
use crate::capture::FrameDims;
use crate::vision::Detection;

pub const SPATIAL_FEATURE_COUNT: usize = 15;

/// Normalized vertical position where the bottom band starts
pub const BOTTOM_BAND_START: f32 = 0.7;

/// Declared order of [`SpatialFeatures::to_array`]
pub const SPATIAL_FEATURE_NAMES: [&str; SPATIAL_FEATURE_COUNT] = [
    "detection_count",
    "confidence_mean",
    "confidence_max",
    "confidence_min",
    "confidence_std",
    "y_center_mean",
    "y_center_std",
    "x_center_mean",
    "bottom_band_ratio",
    "total_area",
    "avg_area",
    "avg_aspect_ratio",
    "avg_text_length",
    "total_text_length",
    "vertical_spread",
];

/// Descriptive statistics of one frame's detections.
/// Positions and areas are normalized to the frame (0 = top/left).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpatialFeatures {
    pub detection_count: f32,
    pub confidence_mean: f32,
    pub confidence_max: f32,
    pub confidence_min: f32,
    pub confidence_std: f32,
    pub y_center_mean: f32,
    pub y_center_std: f32,
    pub x_center_mean: f32,
    pub bottom_band_ratio: f32,
    pub total_area: f32,
    pub avg_area: f32,
    pub avg_aspect_ratio: f32,
    pub avg_text_length: f32,
    pub total_text_length: f32,
    pub vertical_spread: f32,
}

impl SpatialFeatures {
    pub fn to_array(&self) -> [f32; SPATIAL_FEATURE_COUNT] {
        [
            self.detection_count,
            self.confidence_mean,
            self.confidence_max,
            self.confidence_min,
            self.confidence_std,
            self.y_center_mean,
            self.y_center_std,
            self.x_center_mean,
            self.bottom_band_ratio,
            self.total_area,
            self.avg_area,
            self.avg_aspect_ratio,
            self.avg_text_length,
            self.total_text_length,
            self.vertical_spread,
        ]
    }
}

/// Compute the per-frame features. No detections gives the all-zero vector.
pub fn extract_spatial_features(detections: &[Detection], dims: FrameDims) -> SpatialFeatures {
    if detections.is_empty() {
        return SpatialFeatures::default();
    }

    let frame_area = dims.area();
    let count = detections.len() as f32;

    let confidences: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
    let (xs, ys): (Vec<f32>, Vec<f32>) = detections.iter().map(|d| dims.normalized_center(&d.bbox)).unzip();
    let areas: Vec<f32> = detections.iter().map(|d| d.bbox.area() as f32 / frame_area).collect();
    let aspects: Vec<f32> = detections.iter().map(|d| d.bbox.aspect_ratio()).collect();
    let lengths: Vec<f32> = detections.iter().map(|d| d.text.chars().count() as f32).collect();

    let y_min = ys.iter().copied().fold(f32::MAX, f32::min);
    let y_max = max(&ys);

    SpatialFeatures {
        detection_count: count,
        confidence_mean: mean(&confidences),
        confidence_max: max(&confidences),
        confidence_min: confidences.iter().copied().fold(f32::MAX, f32::min),
        confidence_std: std_dev(&confidences),
        y_center_mean: mean(&ys),
        y_center_std: std_dev(&ys),
        x_center_mean: mean(&xs),
        bottom_band_ratio: ys.iter().filter(|y| **y >= BOTTOM_BAND_START).count() as f32 / count,
        total_area: areas.iter().sum(),
        avg_area: mean(&areas),
        avg_aspect_ratio: mean(&aspects),
        avg_text_length: mean(&lengths),
        total_text_length: lengths.iter().sum(),
        vertical_spread: y_max - y_min,
    }
}
