//! Candidate Gate
//!
//! Picks at most one subtitle candidate per frame. Geometry filters run
//! before confidence is considered: a crisp square logo routinely beats a
//! blurry subtitle line on raw confidence, so near-square and tiny boxes are
//! discarded outright and the survivors are ranked by a weighted score.

use serde::{Deserialize, Serialize};

use super::{Detection, RegionTag};
use crate::capture::FrameDims;

/// Gate thresholds and score weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Boxes with width/height below this are rejected
    pub min_aspect_ratio: f32,
    /// Boxes covering less than this fraction of the frame are rejected
    pub min_area_ratio: f32,
    /// Aspect ratio at which the aspect term saturates
    pub aspect_saturation: f32,
    /// Area fraction at which the area term saturates
    pub area_saturation: f32,
    pub confidence_weight: f32,
    pub aspect_weight: f32,
    pub centering_weight: f32,
    pub area_weight: f32,
    pub position_weight: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_aspect_ratio: 2.0,
            min_area_ratio: 0.0005,
            aspect_saturation: 8.0,
            area_saturation: 0.05,
            confidence_weight: 0.25,
            aspect_weight: 0.25,
            centering_weight: 0.25,
            area_weight: 0.10,
            position_weight: 0.15,
        }
    }
}

impl GateConfig {
    fn total_weight(&self) -> f32 {
        self.confidence_weight + self.aspect_weight + self.centering_weight + self.area_weight + self.position_weight
    }
}

/// The detection chosen as a frame's subtitle candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub detection: Detection,
    /// Gate score in [0, 1]
    pub score: f32,
}

pub struct CandidateGate {
    config: GateConfig,
}

impl CandidateGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Hard filters: empty boxes, blank text, near-square boxes, specks
    pub fn passes_filters(&self, detection: &Detection, dims: FrameDims) -> bool {
        let bbox = &detection.bbox;
        if bbox.width == 0 || bbox.height == 0 || detection.text.trim().is_empty() {
            return false;
        }
        if bbox.aspect_ratio() < self.config.min_aspect_ratio {
            return false;
        }
        (bbox.area() as f32 / dims.area()) >= self.config.min_area_ratio
    }

    /// Score a detection, or `None` if a hard filter rejects it
    pub fn score(&self, detection: &Detection, dims: FrameDims) -> Option<f32> {
        if !self.passes_filters(detection, dims) {
            return None;
        }
        let cfg = &self.config;
        let bbox = &detection.bbox;
        let (cx, cy) = dims.normalized_center(bbox);

        let aspect_span = (cfg.aspect_saturation - cfg.min_aspect_ratio).max(f32::EPSILON);
        let aspect = ((bbox.aspect_ratio() - cfg.min_aspect_ratio) / aspect_span).clamp(0.0, 1.0);
        let centering = (1.0 - (cx - 0.5).abs() * 2.0).clamp(0.0, 1.0);
        let area = (bbox.area() as f32 / dims.area() / cfg.area_saturation.max(f32::EPSILON)).min(1.0);
        let position = match detection.region {
            RegionTag::BottomBand | RegionTag::FullFrame => cy,
            RegionTag::TopBand => 1.0 - cy,
            RegionTag::LeftBand | RegionTag::RightBand | RegionTag::CenterBlock => {
                (1.0 - (cy - 0.5).abs() * 2.0).clamp(0.0, 1.0)
            }
        };

        let weighted = cfg.confidence_weight * detection.confidence
            + cfg.aspect_weight * aspect
            + cfg.centering_weight * centering
            + cfg.area_weight * area
            + cfg.position_weight * position;

        let total = cfg.total_weight();
        Some(if total > 0.0 { (weighted / total).clamp(0.0, 1.0) } else { 0.0 })
    }

    /// Highest-scoring detection that survives the filters.
    /// Ties keep the earlier detection.
    pub fn select(&self, detections: &[Detection], dims: FrameDims) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;
        for detection in detections {
            let Some(score) = self.score(detection, dims) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Candidate {
                    detection: detection.clone(),
                    score,
                });
            }
        }
        best
    }
}
