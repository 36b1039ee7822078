//! Scripted frame source and text detector used by unit tests

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::capture::{
    sample_timestamps, Frame, FrameDims, FrameSource, SamplingConfig, SourceError, VideoInfo,
};
use crate::vision::{BoundingBox, DetectionError, TextDetector, TextRegion};

/// Frame source producing solid frames whose red channel carries the frame index
pub struct ScriptedSource {
    dims: Option<FrameDims>,
    duration: Duration,
    timestamps: Vec<Duration>,
    failing: HashSet<usize>,
    /// Frames decoded with the wrong size
    wrong_size: HashSet<usize>,
}

impl ScriptedSource {
    pub fn new(width: u32, height: u32, duration: Duration, sampling: &SamplingConfig) -> Self {
        Self {
            dims: FrameDims::new(width, height),
            duration,
            timestamps: sample_timestamps(duration, sampling),
            failing: HashSet::new(),
            wrong_size: HashSet::new(),
        }
    }

    /// A source whose probe always fails
    pub fn unprobeable() -> Self {
        Self {
            dims: None,
            duration: Duration::ZERO,
            timestamps: Vec::new(),
            failing: HashSet::new(),
            wrong_size: HashSet::new(),
        }
    }

    pub fn failing_frames(mut self, frames: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(frames);
        self
    }

    pub fn wrong_size_frames(mut self, frames: impl IntoIterator<Item = usize>) -> Self {
        self.wrong_size.extend(frames);
        self
    }
}

impl FrameSource for ScriptedSource {
    fn probe(&self, video: &Path) -> Result<VideoInfo, SourceError> {
        let dims = self.dims.ok_or_else(|| SourceError::ResolutionUnknown {
            path: video.to_path_buf(),
            reason: "scripted probe failure".to_string(),
        })?;
        Ok(VideoInfo {
            dims,
            duration: self.duration,
        })
    }

    fn frame_at(
        &self,
        _video: &Path,
        timestamp: Duration,
        info: &VideoInfo,
    ) -> Result<Frame, SourceError> {
        let index = self
            .timestamps
            .iter()
            .position(|t| *t == timestamp)
            .ok_or_else(|| SourceError::FrameUnavailable {
                timestamp,
                reason: "not a scripted timestamp".to_string(),
            })?;

        if self.failing.contains(&index) {
            return Err(SourceError::FrameUnavailable {
                timestamp,
                reason: "scripted decode failure".to_string(),
            });
        }

        let (width, height) = if self.wrong_size.contains(&index) {
            (info.dims.width / 2, info.dims.height / 2)
        } else {
            (info.dims.width, info.dims.height)
        };
        let image = RgbaImage::from_pixel(width, height, Rgba([index as u8, 0, 0, 255]));
        Ok(Frame::new(image, timestamp))
    }
}

/// Detector answering from a per-frame script.
///
/// It only answers for crops of one size (the searched region); every other
/// crop gets an empty result.
pub struct ScriptedDetector {
    crop_size: (u32, u32),
    script: HashMap<u8, Vec<TextRegion>>,
    failing: HashSet<u8>,
    delay: Option<Duration>,
    calls: Mutex<usize>,
}

impl ScriptedDetector {
    pub fn new(crop_width: u32, crop_height: u32) -> Self {
        Self {
            crop_size: (crop_width, crop_height),
            script: HashMap::new(),
            failing: HashSet::new(),
            delay: None,
            calls: Mutex::new(0),
        }
    }

    /// Same region-local line on each listed frame
    pub fn with_line(
        mut self,
        frames: impl IntoIterator<Item = usize>,
        text: &str,
        bounds: BoundingBox,
        confidence: f32,
    ) -> Self {
        for frame in frames {
            self.script.entry(frame as u8).or_default().push(TextRegion {
                text: text.to_string(),
                bounds,
                confidence,
            });
        }
        self
    }

    pub fn failing_on(mut self, frames: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(frames.into_iter().map(|f| f as u8));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl TextDetector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&self, image: &RgbaImage) -> Result<Vec<TextRegion>, DetectionError> {
        *self.calls.lock() += 1;
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if image.dimensions() != self.crop_size || image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let frame = image.get_pixel(0, 0)[0];
        if self.failing.contains(&frame) {
            return Err(DetectionError::Backend {
                detector: "scripted".to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(self.script.get(&frame).cloned().unwrap_or_default())
    }
}
