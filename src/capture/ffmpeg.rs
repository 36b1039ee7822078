//! ffmpeg/ffprobe frame source
//!
//! Resolution and duration come from `ffprobe` JSON output; single frames are
//! decoded by `ffmpeg` straight to raw RGBA on stdout.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Frame, FrameDims, FrameSource, SourceError, VideoInfo};

/// External tool locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Frame source backed by the ffmpeg command line tools
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameSource {
    config: FfmpegConfig,
}

impl FfmpegFrameSource {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }
}

impl FrameSource for FfmpegFrameSource {
    fn probe(&self, video: &Path) -> Result<VideoInfo, SourceError> {
        let unknown = |reason: String| SourceError::ResolutionUnknown {
            path: video.to_path_buf(),
            reason,
        };

        let output = Command::new(&self.config.ffprobe)
            .args(["-v", "error"])
            .args(["-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height:format=duration"])
            .args(["-of", "json"])
            .arg(video)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| unknown(format!("failed to run {}: {}", self.config.ffprobe, e)))?;

        if !output.status.success() {
            return Err(unknown(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let info = parse_probe_output(&output.stdout).map_err(unknown)?;
        debug!(
            "Probed {}: {}x{}, {:.2}s",
            video.display(),
            info.dims.width,
            info.dims.height,
            info.duration.as_secs_f64()
        );
        Ok(info)
    }

    fn frame_at(
        &self,
        video: &Path,
        timestamp: Duration,
        info: &VideoInfo,
    ) -> Result<Frame, SourceError> {
        let unavailable = |reason: String| SourceError::FrameUnavailable { timestamp, reason };

        let output = Command::new(&self.config.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-ss", &format!("{:.3}", timestamp.as_secs_f64())])
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-an", "-sn"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "-"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| unavailable(format!("failed to run {}: {}", self.config.ffmpeg, e)))?;

        if !output.status.success() {
            return Err(unavailable(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let expected = info.dims.width as usize * info.dims.height as usize * 4;
        if output.stdout.len() != expected {
            return Err(unavailable(format!(
                "decoded {} bytes, expected {} for {}x{}",
                output.stdout.len(),
                expected,
                info.dims.width,
                info.dims.height
            )));
        }

        Frame::from_rgba(output.stdout, info.dims.width, info.dims.height, timestamp)
            .ok_or_else(|| unavailable("frame buffer rejected".to_string()))
    }
}

/// Parse `ffprobe -of json` output into resolution and duration.
///
/// Missing or zero dimensions are an error. A missing duration is tolerated
/// and treated as zero, which samples a single frame.
fn parse_probe_output(stdout: &[u8]) -> Result<VideoInfo, String> {
    let probe: ProbeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("unreadable ffprobe output: {}", e))?;

    let stream = probe
        .streams
        .first()
        .ok_or_else(|| "no video stream".to_string())?;
    let dims = match (stream.width, stream.height) {
        (Some(w), Some(h)) => FrameDims::new(w, h).ok_or_else(|| format!("invalid size {}x{}", w, h))?,
        _ => return Err("video stream has no width/height".to_string()),
    };

    let seconds = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .and_then(|d| Duration::try_from_secs_f64(d).ok());
    let duration = match seconds {
        Some(d) => d,
        None => {
            warn!("ffprobe reported no duration; sampling a single frame");
            Duration::ZERO
        }
    };

    Ok(VideoInfo { dims, duration })
}
