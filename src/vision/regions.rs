//! Region Selector
//!
//! Searches a frame region by region in priority order. Each region is
//! cropped, handed to the text detector, and the results are mapped back to
//! frame coordinates. The loop stops early once a region produces enough
//! confident text; otherwise everything found is kept and a full-frame pass is
//! added as a last resort.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{apply_preprocessing, BoundingBox, Detection, DetectionError, PreprocessMode, RegionTag, TextDetector};
use crate::capture::{Frame, FrameDims};

/// A search region expressed as fractions of the frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub tag: RegionTag,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RegionSpec {
    pub const fn new(tag: RegionTag, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { tag, x, y, width, height }
    }

    pub const fn full_frame() -> Self {
        Self::new(RegionTag::FullFrame, 0.0, 0.0, 1.0, 1.0)
    }

    /// Resolve to a pixel rectangle inside the frame.
    ///
    /// Returns `None` when the crop would be narrower than `min_width` or
    /// shorter than `min_height` pixels.
    pub fn to_pixels(&self, dims: FrameDims, min_width: u32, min_height: u32) -> Option<BoundingBox> {
        let resolve = |start: f32, extent: f32, size: u32| -> (u32, u32) {
            let size_f = size as f32;
            let begin = (start.clamp(0.0, 1.0) * size_f).round() as u32;
            let end = ((start + extent).clamp(0.0, 1.0) * size_f).round() as u32;
            (begin.min(size), end.min(size).saturating_sub(begin))
        };

        let (x, width) = resolve(self.x, self.width, dims.width);
        let (y, height) = resolve(self.y, self.height, dims.height);

        if width < min_width.max(1) || height < min_height.max(1) {
            return None;
        }
        Some(BoundingBox::new(x, y, width, height))
    }

    pub fn validate(&self) -> Result<(), String> {
        let in_unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(self.x) || !in_unit(self.y) {
            return Err(format!("region {} origin must be within [0, 1]", self.tag));
        }
        if !in_unit(self.width) || !in_unit(self.height) || self.width == 0.0 || self.height == 0.0 {
            return Err(format!("region {} size must be within (0, 1]", self.tag));
        }
        if self.x + self.width > 1.0 + 1e-6 || self.y + self.height > 1.0 + 1e-6 {
            return Err(format!("region {} extends past the frame", self.tag));
        }
        Ok(())
    }
}

/// Region search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSelectorConfig {
    /// Regions in search priority order
    pub regions: Vec<RegionSpec>,
    /// Regions narrower than this many pixels are skipped
    pub min_region_width: u32,
    /// Regions shorter than this many pixels are skipped
    pub min_region_height: u32,
    /// Minimum detections a region needs to end the search
    pub early_exit_min_detections: usize,
    /// Minimum mean confidence a region needs to end the search
    pub early_exit_min_confidence: f32,
    /// Scan the whole frame when no region satisfies the early-exit rule
    pub full_frame_fallback: bool,
    pub preprocessing: PreprocessMode,
}

impl Default for RegionSelectorConfig {
    fn default() -> Self {
        Self {
            regions: vec![
                RegionSpec::new(RegionTag::BottomBand, 0.0, 0.70, 1.0, 0.30),
                RegionSpec::new(RegionTag::TopBand, 0.0, 0.0, 1.0, 0.20),
                RegionSpec::new(RegionTag::LeftBand, 0.0, 0.0, 0.25, 1.0),
                RegionSpec::new(RegionTag::RightBand, 0.75, 0.0, 0.25, 1.0),
                RegionSpec::new(RegionTag::CenterBlock, 0.15, 0.30, 0.70, 0.40),
            ],
            min_region_width: 32,
            min_region_height: 16,
            early_exit_min_detections: 1,
            early_exit_min_confidence: 0.6,
            full_frame_fallback: true,
            preprocessing: PreprocessMode::None,
        }
    }
}

/// Outcome of searching one region
#[derive(Debug)]
pub enum RegionAttempt {
    /// Text found, in frame coordinates
    Found(Vec<Detection>),
    /// The detector ran and found nothing
    NotFound,
    /// Crop below the minimum size; the detector was not called
    Degenerate,
    /// The detector failed; counts as no detections
    Failed(DetectionError),
}

/// Everything the selector found in one frame
#[derive(Debug, Default)]
pub struct RegionSelection {
    pub detections: Vec<Detection>,
    /// Region that satisfied the early-exit rule, if any
    pub satisfied_by: Option<RegionTag>,
    pub regions_searched: usize,
    pub degenerate_regions: usize,
    pub detector_failures: usize,
}

pub struct RegionSelector {
    config: RegionSelectorConfig,
}

impl RegionSelector {
    pub fn new(config: RegionSelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegionSelectorConfig {
        &self.config
    }

    /// Crop one region, run the detector on it and map results to frame coordinates
    pub fn search_region(&self, frame: &Frame, spec: &RegionSpec, detector: &dyn TextDetector) -> RegionAttempt {
        let Some(dims) = frame.dims() else {
            return RegionAttempt::Degenerate;
        };
        let Some(area) = spec.to_pixels(dims, self.config.min_region_width, self.config.min_region_height) else {
            debug!(
                "Skipping degenerate region {} on {}x{} frame",
                spec.tag, dims.width, dims.height
            );
            return RegionAttempt::Degenerate;
        };

        let crop = apply_preprocessing(frame.crop(&area), self.config.preprocessing);

        match detector.detect(&crop) {
            Ok(found) if found.is_empty() => {
                debug!("No text in region {} at {:.3}s", spec.tag, frame.timestamp.as_secs_f64());
                RegionAttempt::NotFound
            }
            Ok(found) => RegionAttempt::Found(
                found
                    .into_iter()
                    .map(|region| Detection::from_region(region, &area, spec.tag))
                    .collect(),
            ),
            Err(e) => {
                warn!(
                    "Text detector '{}' failed on region {} at {:.3}s: {}",
                    detector.name(),
                    spec.tag,
                    frame.timestamp.as_secs_f64(),
                    e
                );
                RegionAttempt::Failed(e)
            }
        }
    }

    fn satisfies_early_exit(&self, detections: &[Detection]) -> bool {
        if detections.is_empty() || detections.len() < self.config.early_exit_min_detections {
            return false;
        }
        let mean = detections.iter().map(|d| d.confidence).sum::<f32>() / detections.len() as f32;
        mean >= self.config.early_exit_min_confidence
    }

    /// Search the configured regions of a frame in priority order
    pub fn select(&self, frame: &Frame, detector: &dyn TextDetector) -> RegionSelection {
        self.select_until(frame, detector, &CancellationToken::new())
            .unwrap_or_default()
    }

    /// Like [`select`](Self::select), but gives up between region attempts
    /// once `cancel` fires. Returns `None` when the search was abandoned.
    pub fn select_until(
        &self,
        frame: &Frame,
        detector: &dyn TextDetector,
        cancel: &CancellationToken,
    ) -> Option<RegionSelection> {
        let mut selection = RegionSelection::default();
        let mut scanned_full_frame = false;

        for spec in &self.config.regions {
            if cancel.is_cancelled() {
                return None;
            }
            scanned_full_frame |= spec.tag == RegionTag::FullFrame;
            selection.regions_searched += 1;

            match self.search_region(frame, spec, detector) {
                RegionAttempt::Found(found) => {
                    if self.satisfies_early_exit(&found) {
                        trace!("Region {} satisfied early exit", spec.tag);
                        selection.satisfied_by = Some(spec.tag);
                        selection.detections = found;
                        return Some(selection);
                    }
                    selection.detections.extend(found);
                }
                RegionAttempt::NotFound => {}
                RegionAttempt::Degenerate => selection.degenerate_regions += 1,
                RegionAttempt::Failed(_) => selection.detector_failures += 1,
            }
        }

        if self.config.full_frame_fallback && !scanned_full_frame {
            if cancel.is_cancelled() {
                return None;
            }
            selection.regions_searched += 1;
            match self.search_region(frame, &RegionSpec::full_frame(), detector) {
                RegionAttempt::Found(found) => {
                    // Full frame re-reads text already found in the bands
                    for detection in found {
                        let duplicate = selection
                            .detections
                            .iter()
                            .any(|d| d.bbox.iou(&detection.bbox) > 0.5);
                        if !duplicate {
                            selection.detections.push(detection);
                        }
                    }
                }
                RegionAttempt::NotFound => {}
                RegionAttempt::Degenerate => selection.degenerate_regions += 1,
                RegionAttempt::Failed(_) => selection.detector_failures += 1,
            }
        }

        Some(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDetector;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(
            RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])),
            Duration::ZERO,
        )
    }

    #[test]
    fn test_crops_never_below_minimum() {
        let config = RegionSelectorConfig::default();
        let mut specs = config.regions.clone();
        specs.push(RegionSpec::new(RegionTag::BottomBand, 0.0, 0.95, 1.0, 0.05));
        specs.push(RegionSpec::new(RegionTag::LeftBand, 0.0, 0.0, 0.01, 1.0));

        for (w, h) in [(1, 1), (40, 20), (64, 48), (320, 50), (640, 360), (1280, 720), (1920, 1080), (3840, 2160)] {
            let dims = FrameDims::new(w, h).unwrap();
            for spec in &specs {
                if let Some(rect) = spec.to_pixels(dims, config.min_region_width, config.min_region_height) {
                    assert!(rect.height >= config.min_region_height, "{:?} on {}x{}", spec.tag, w, h);
                    assert!(rect.width >= config.min_region_width, "{:?} on {}x{}", spec.tag, w, h);
                    assert!(rect.right() <= w as u64 && rect.bottom() <= h as u64);
                }
            }
        }
    }

    #[test]
    fn test_region_pixels_scale_with_resolution() {
        let bottom = RegionSelectorConfig::default().regions[0];
        let hd = bottom.to_pixels(FrameDims::new(1280, 720).unwrap(), 32, 16).unwrap();
        assert_eq!(hd, BoundingBox::new(0, 504, 1280, 216));

        let sd = bottom.to_pixels(FrameDims::new(640, 480).unwrap(), 32, 16).unwrap();
        assert_eq!(sd, BoundingBox::new(0, 336, 640, 144));
    }

    #[test]
    fn test_early_exit_on_confident_bottom_band() {
        let selector = RegionSelector::new(RegionSelectorConfig::default());
        let detector = ScriptedDetector::new(1280, 216).with_line(
            [0],
            "Where are you going?",
            BoundingBox::new(340, 150, 600, 40),
            0.9,
        );

        let selection = selector.select(&frame(1280, 720), &detector);
        assert_eq!(selection.satisfied_by, Some(RegionTag::BottomBand));
        assert_eq!(selection.regions_searched, 1);
        assert_eq!(detector.calls(), 1);
        assert_eq!(selection.detections[0].bbox, BoundingBox::new(340, 654, 600, 40));
    }

    #[test]
    fn test_low_confidence_falls_through_all_regions() {
        let selector = RegionSelector::new(RegionSelectorConfig::default());
        let detector = ScriptedDetector::new(1280, 216).with_line(
            [0],
            "faint",
            BoundingBox::new(340, 150, 600, 40),
            0.3,
        );

        let selection = selector.select(&frame(1280, 720), &detector);
        assert_eq!(selection.satisfied_by, None);
        // five configured regions plus the full-frame pass
        assert_eq!(selection.regions_searched, 6);
        assert_eq!(detector.calls(), 6);
        assert_eq!(selection.detections.len(), 1);
    }

    #[test]
    fn test_cancelled_search_stops_before_next_region() {
        let selector = RegionSelector::new(RegionSelectorConfig::default());
        let detector = ScriptedDetector::new(1280, 216);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(selector.select_until(&frame(1280, 720), &detector, &cancel).is_none());
        assert_eq!(detector.calls(), 0);

        let live = CancellationToken::new();
        let selection = selector.select_until(&frame(1280, 720), &detector, &live).unwrap();
        assert_eq!(selection.regions_searched, 6);
        assert_eq!(detector.calls(), 6);
    }

    #[test]
    fn test_detector_failure_counts_as_no_detections() {
        let selector = RegionSelector::new(RegionSelectorConfig::default());
        let detector = ScriptedDetector::new(1280, 216).failing_on([0]);

        let selection = selector.select(&frame(1280, 720), &detector);
        assert!(selection.detections.is_empty());
        assert_eq!(selection.detector_failures, 1);
    }

    #[test]
    fn test_degenerate_regions_are_skipped() {
        let selector = RegionSelector::new(RegionSelectorConfig::default());
        let detector = ScriptedDetector::new(0, 0);

        // 60x40: every band except the full frame is below 32x16
        let selection = selector.select(&frame(60, 40), &detector);
        assert!(selection.degenerate_regions >= 3);
        assert!(selection.detections.is_empty());
    }

    #[test]
    fn test_validate_region_spec() {
        assert!(RegionSpec::new(RegionTag::BottomBand, 0.0, 0.7, 1.0, 0.3).validate().is_ok());
        assert!(RegionSpec::new(RegionTag::BottomBand, 0.0, 0.8, 1.0, 0.3).validate().is_err());
        assert!(RegionSpec::new(RegionTag::TopBand, -0.1, 0.0, 1.0, 0.2).validate().is_err());
        assert!(RegionSpec::new(RegionTag::TopBand, 0.0, 0.0, 0.0, 0.2).validate().is_err());
    }
}
