//! Vision Layer
//!
//! Text detection over frame regions. The detection engine itself is an
//! external collaborator behind [`TextDetector`]; this layer owns everything
//! around it:
//! - which regions of a frame get searched, and in what order
//! - mapping region-local boxes back to frame coordinates
//! - choosing the one detection per frame that looks like a subtitle line

pub mod gate;
pub mod ocr_preprocess;
pub mod regions;
pub mod tesseract;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use gate::{Candidate, CandidateGate, GateConfig};
pub use ocr_preprocess::{apply_preprocessing, PreprocessMode};
pub use regions::{RegionAttempt, RegionSelection, RegionSelector, RegionSelectorConfig, RegionSpec};
pub use tesseract::{TesseractConfig, TesseractDetector};

/// Axis-aligned bounding box in pixels; (x, y) is the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Shift the box by a region offset (region-local -> frame-absolute)
    pub fn translate(&self, dx: u32, dy: u32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }

    /// Inverse of [`BoundingBox::translate`]
    pub fn untranslate(&self, dx: u32, dy: u32) -> Self {
        Self {
            x: self.x.saturating_sub(dx),
            y: self.y.saturating_sub(dy),
            ..*self
        }
    }

    /// Clip the box so it fits inside a `width` x `height` area anchored at the origin
    pub fn clip_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width over height; zero-height boxes report 0
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Center point in pixels
    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x.max(other.x) as u64;
        let iy1 = self.y.max(other.y) as u64;
        let ix2 = self.right().min(other.right());
        let iy2 = self.bottom().min(other.bottom());

        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }
        let inter = ((ix2 - ix1) * (iy2 - iy1)) as f64;
        let union = self.area() as f64 + other.area() as f64 - inter;
        (inter / union.max(1.0)) as f32
    }

    /// Smallest box containing both
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox {
            x,
            y,
            width: (right - x as u64).min(u32::MAX as u64) as u32,
            height: (bottom - y as u64).min(u32::MAX as u64) as u32,
        }
    }
}

/// Named search region of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionTag {
    BottomBand,
    TopBand,
    LeftBand,
    RightBand,
    CenterBlock,
    FullFrame,
}

impl RegionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionTag::BottomBand => "bottom_band",
            RegionTag::TopBand => "top_band",
            RegionTag::LeftBand => "left_band",
            RegionTag::RightBand => "right_band",
            RegionTag::CenterBlock => "center_block",
            RegionTag::FullFrame => "full_frame",
        }
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text found by a detector, in coordinates local to the image it was given
#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    /// Detected text content
    pub text: String,
    /// Bounding box relative to the searched image
    pub bounds: BoundingBox,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
}

/// Text found in a frame, in frame-absolute coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Region whose search produced this detection
    pub region: RegionTag,
}

impl Detection {
    /// Convert a region-local result into frame coordinates.
    ///
    /// `area` is the region's pixel rectangle within the frame. The local box
    /// is clipped to the region before the offset is applied.
    pub fn from_region(found: TextRegion, area: &BoundingBox, region: RegionTag) -> Self {
        let local = found.bounds.clip_to(area.width, area.height);
        Self {
            text: found.text,
            bbox: local.translate(area.x, area.y),
            confidence: if found.confidence.is_finite() {
                found.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
            region,
        }
    }
}

/// Failure of a single text detection call
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("text detector '{detector}' failed: {message}")]
    Backend { detector: String, message: String },
    #[error("failed to encode region image: {0}")]
    Encode(String),
    #[error("text detector I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text-detection port.
///
/// Implementations receive one (possibly preprocessed) region image and return
/// every text line they find in it, with boxes local to that image.
pub trait TextDetector: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn detect(&self, image: &RgbaImage) -> Result<Vec<TextRegion>, DetectionError>;
}
