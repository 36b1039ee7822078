//! Labeled training data, one JSON object per line

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::analysis::FeatureVector;

/// One video's feature vector and ground-truth label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledVideo {
    /// Grouping key; every row of one video lands in the same partition
    pub video_id: String,
    pub label: bool,
    #[serde(flatten)]
    pub features: FeatureVector,
}

/// Read a JSON Lines dataset, skipping blank lines
pub fn load_dataset(path: &Path) -> Result<Vec<LabeledVideo>> {
    let file = File::open(path).with_context(|| format!("Failed to open dataset {}", path.display()))?;

    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row: LabeledVideo = serde_json::from_str(&line)
            .with_context(|| format!("Invalid dataset row at {}:{}", path.display(), index + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Write rows as JSON Lines, replacing any existing file
pub fn write_dataset(path: &Path, rows: &[LabeledVideo]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
