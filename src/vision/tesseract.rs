//! Tesseract text detector
//!
//! Runs the `tesseract` CLI on a PNG of the region and groups its word-level
//! TSV rows into lines.

use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use tracing::trace;

use super::{BoundingBox, DetectionError, TextDetector, TextRegion};

/// Tesseract invocation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    /// Path or name of the tesseract binary
    pub binary: String,
    /// Language pack(s), tesseract `-l` syntax (e.g. "eng+fra")
    pub languages: String,
    /// Page segmentation mode
    pub psm: u32,
    /// Word rows below this confidence (0-100) are dropped
    pub min_word_confidence: f32,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            languages: "eng".to_string(),
            psm: 6,
            min_word_confidence: 0.0,
        }
    }
}

/// [`TextDetector`] backed by the tesseract command line tool
#[derive(Debug, Clone, Default)]
pub struct TesseractDetector {
    config: TesseractConfig,
}

impl TesseractDetector {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }
}

impl TextDetector for TesseractDetector {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn detect(&self, image: &RgbaImage) -> Result<Vec<TextRegion>, DetectionError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| DetectionError::Encode(e.to_string()))?;

        let mut child = Command::new(&self.config.binary)
            .args(["stdin", "stdout"])
            .args(["-l", &self.config.languages])
            .args(["--psm", &self.config.psm.to_string()])
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png)?;
            // stdin is closed on drop so tesseract sees EOF
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(DetectionError::Backend {
                detector: self.name().to_string(),
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let lines = parse_tsv(&String::from_utf8_lossy(&output.stdout), self.config.min_word_confidence);
        trace!("tesseract returned {} line(s)", lines.len());
        Ok(lines)
    }
}

#[derive(Default)]
struct LineAccumulator {
    words: Vec<(u32, String)>,
    bounds: Option<BoundingBox>,
    weighted_confidence: f32,
    weight: usize,
}

/// Group word rows (level 5) by (page, block, paragraph, line).
///
/// Each line becomes one region: words joined left to right, the union of the
/// word boxes, and the character-weighted mean confidence scaled to [0, 1].
fn parse_tsv(tsv: &str, min_word_confidence: f32) -> Vec<TextRegion> {
    let mut lines: BTreeMap<(i32, i32, i32, i32), LineAccumulator> = BTreeMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0].parse::<i32>().unwrap_or(0) != 5 {
            continue;
        }

        let text = cols[11].trim();
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 || conf < min_word_confidence {
            continue;
        }

        let field = |i: usize| cols[i].parse::<i32>().unwrap_or(0);
        let coord = |i: usize| cols[i].parse::<u32>().unwrap_or(0);
        let key = (field(1), field(2), field(3), field(4));
        let word_box = BoundingBox::new(coord(6), coord(7), coord(8), coord(9));

        let line = lines.entry(key).or_default();
        let len = text.chars().count().max(1);
        line.words.push((word_box.x, text.to_string()));
        line.bounds = Some(match line.bounds {
            Some(b) => b.union(&word_box),
            None => word_box,
        });
        line.weighted_confidence += conf * len as f32;
        line.weight += len;
    }

    lines
        .into_values()
        .filter_map(|mut line| {
            let bounds = line.bounds?;
            line.words.sort_by_key(|(x, _)| *x);
            let text = line
                .words
                .into_iter()
                .map(|(_, w)| w)
                .collect::<Vec<_>>()
                .join(" ");
            let confidence = (line.weighted_confidence / line.weight.max(1) as f32 / 100.0).clamp(0.0, 1.0);
            Some(TextRegion { text, bounds, confidence })
        })
        .collect()
}
