//! Frame Capture Layer
//!
//! Decoding is delegated to an external tool behind [`FrameSource`]. The
//! resolution of every video is probed once before any frame geometry is
//! computed; nothing downstream assumes a fixed frame size.

pub mod ffmpeg;
pub mod frame;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use ffmpeg::{FfmpegConfig, FfmpegFrameSource};
pub use frame::{Frame, FrameDims};

/// Result of probing a video before sampling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub dims: FrameDims,
    pub duration: Duration,
}

/// Frame source failures
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Fatal for the whole video
    #[error("resolution unknown for {}: {reason}", .path.display())]
    ResolutionUnknown { path: PathBuf, reason: String },
    /// Recoverable; the frame is skipped
    #[error("frame at {:.3}s unavailable: {reason}", .timestamp.as_secs_f64())]
    FrameUnavailable { timestamp: Duration, reason: String },
}

/// Frame source port
pub trait FrameSource: Send + Sync {
    /// Query resolution and duration. Called once per video.
    fn probe(&self, video: &Path) -> Result<VideoInfo, SourceError>;

    /// Decode the frame closest to `timestamp`
    fn frame_at(
        &self,
        video: &Path,
        timestamp: Duration,
        info: &VideoInfo,
    ) -> Result<Frame, SourceError>;
}

/// Frame sampling plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Number of frames sampled per video
    pub frame_count: usize,
    /// First sample position as a fraction of the duration
    pub start_fraction: f64,
    /// Last sample position as a fraction of the duration
    pub end_fraction: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            frame_count: 30,
            start_fraction: 0.02,
            end_fraction: 0.98,
        }
    }
}

/// Evenly spaced sample timestamps, ascending and de-duplicated.
///
/// A zero-length video yields a single sample at zero.
pub fn sample_timestamps(duration: Duration, config: &SamplingConfig) -> Vec<Duration> {
    if config.frame_count == 0 {
        return Vec::new();
    }
    if duration.is_zero() {
        return vec![Duration::ZERO];
    }

    let total = duration.as_secs_f64();
    let start = total * config.start_fraction.clamp(0.0, 1.0);
    let end = (total * config.end_fraction.clamp(0.0, 1.0)).max(start);

    let mut timestamps: Vec<Duration> = if config.frame_count == 1 {
        vec![Duration::from_secs_f64((start + end) / 2.0)]
    } else {
        let step = (end - start) / (config.frame_count - 1) as f64;
        (0..config.frame_count)
            .map(|i| Duration::from_secs_f64(start + step * i as f64))
            .collect()
    };
    timestamps.dedup();
    timestamps
}
