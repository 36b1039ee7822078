//! Frame data structures

use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::vision::BoundingBox;

/// Pixel dimensions of a frame; both sides are non-zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameDims {
    pub width: u32,
    pub height: u32,
}

impl FrameDims {
    /// Returns `None` when either side is zero
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }

    pub fn area(&self) -> f32 {
        self.width as f32 * self.height as f32
    }

    pub fn diagonal(&self) -> f32 {
        (self.width as f32).hypot(self.height as f32)
    }

    /// Box center normalized to [0, 1] on each axis
    pub fn normalized_center(&self, bbox: &BoundingBox) -> (f32, f32) {
        let (cx, cy) = bbox.center();
        (
            (cx / self.width as f32).clamp(0.0, 1.0),
            (cy / self.height as f32).clamp(0.0, 1.0),
        )
    }
}

/// A decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGBA pixel data
    pub image: RgbaImage,
    /// Position of the frame within the video
    pub timestamp: Duration,
}

impl Frame {
    pub fn new(image: RgbaImage, timestamp: Duration) -> Self {
        Self { image, timestamp }
    }

    /// Build a frame from raw RGBA bytes; `None` if the buffer size does not match
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32, timestamp: Duration) -> Option<Self> {
        RgbaImage::from_raw(width, height, data).map(|image| Self::new(image, timestamp))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Frame dimensions, `None` for an empty image
    pub fn dims(&self) -> Option<FrameDims> {
        FrameDims::new(self.width(), self.height())
    }

    /// Copy out a rectangle of the frame. The rectangle is clipped to the frame.
    pub fn crop(&self, rect: &BoundingBox) -> RgbaImage {
        let rect = rect.clip_to(self.width(), self.height());
        imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height).to_image()
    }
}
