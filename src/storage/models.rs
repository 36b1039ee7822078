//! Classifier artifact store
//!
//! Every trained model is written once as `model-s{schema}-{id}.json` and
//! recorded in `manifest.json` with its checksum. Files are never overwritten;
//! retraining adds a new artifact. Loaded models are cached and handed out
//! as shared read-only handles.

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::classifier::ClassifierModel;

const MANIFEST_FILE: &str = "manifest.json";

/// Index of stored artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelEntry>,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub artifact_id: String,
    pub schema_version: u32,
    pub filename: String,
    pub sha256: String,
    pub threshold: f64,
    pub trained_at: u64,
    pub videos_total: usize,
}

/// Versioned classifier storage rooted at one directory
pub struct ModelStore {
    models_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<ClassifierModel>>>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl ModelStore {
    /// Store under the user data directory
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Store in a custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create model directory {}", models_dir.display()))?;
        Ok(Self {
            models_dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Load the manifest; a missing manifest is an empty store
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let path = self.models_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(ModelManifest::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Corrupt manifest {}", path.display()))
    }

    fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let path = self.models_dir.join(MANIFEST_FILE);
        let tmp = self.models_dir.join(format!("{}.tmp", MANIFEST_FILE));
        std::fs::write(&tmp, serde_json::to_string_pretty(manifest)?)?;
        std::fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Persist a new model artifact and register it in the manifest
    pub fn save(&self, model: &ClassifierModel) -> Result<ModelEntry> {
        model.validate()?;

        let filename = format!("model-s{}-{}.json", model.schema_version(), model.artifact_id());
        let path = self.models_dir.join(&filename);
        let bytes = serde_json::to_vec_pretty(model)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Refusing to overwrite model artifact {}", path.display()))?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        let entry = ModelEntry {
            artifact_id: model.artifact_id().to_string(),
            schema_version: model.schema_version(),
            filename,
            sha256: sha256_hex(&bytes),
            threshold: model.threshold(),
            trained_at: model.metadata().trained_at,
            videos_total: model.metadata().videos_total,
        };

        let mut manifest = self.load_manifest()?;
        manifest.models.push(entry.clone());
        self.save_manifest(&manifest)?;

        info!("Saved model {} (schema v{})", entry.artifact_id, entry.schema_version);
        Ok(entry)
    }

    /// Load one artifact by id, verifying its checksum
    pub fn load(&self, artifact_id: &str) -> Result<Arc<ClassifierModel>> {
        if let Some(model) = self.cache.read().get(artifact_id) {
            return Ok(Arc::clone(model));
        }

        let manifest = self.load_manifest()?;
        let Some(entry) = manifest.models.iter().find(|m| m.artifact_id == artifact_id) else {
            bail!("No model with id {} in {}", artifact_id, self.models_dir.display());
        };
        self.load_entry(entry)
    }

    /// Newest artifact trained against `schema_version`
    pub fn load_latest(&self, schema_version: u32) -> Result<Arc<ClassifierModel>> {
        let manifest = self.load_manifest()?;
        let Some((_, entry)) = manifest
            .models
            .iter()
            .enumerate()
            .filter(|(_, m)| m.schema_version == schema_version)
            .max_by_key(|(index, m)| (m.trained_at, *index))
        else {
            bail!(
                "No trained model for feature schema v{} in {}",
                schema_version,
                self.models_dir.display()
            );
        };

        if let Some(model) = self.cache.read().get(&entry.artifact_id) {
            return Ok(Arc::clone(model));
        }
        self.load_entry(entry)
    }

    fn load_entry(&self, entry: &ModelEntry) -> Result<Arc<ClassifierModel>> {
        let path = self.models_dir.join(&entry.filename);
        let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;

        let actual = sha256_hex(&bytes);
        if actual != entry.sha256 {
            bail!(
                "Checksum mismatch for {}: expected {}, got {}",
                path.display(),
                entry.sha256,
                actual
            );
        }

        let model: ClassifierModel =
            serde_json::from_slice(&bytes).with_context(|| format!("Invalid model file {}", path.display()))?;
        model.validate()?;
        if model.schema_version() != entry.schema_version || model.artifact_id() != entry.artifact_id {
            bail!("Model file {} does not match its manifest entry", path.display());
        }

        debug!("Loaded model {} from {}", entry.artifact_id, path.display());
        let model = Arc::new(model);
        self.cache
            .write()
            .insert(entry.artifact_id.clone(), Arc::clone(&model));
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::single_feature_model;
    use tempfile::tempdir;

    fn model_with(id: &str, schema: u32, trained_at: u64) -> ClassifierModel {
        let mut model = single_feature_model(0, 1.0, 0.0);
        model.artifact_id = id.to_string();
        model.schema_version = schema;
        model.metadata.trained_at = trained_at;
        model
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = ModelStore::with_dir(dir.path().join("models")).unwrap();
        let model = model_with("a1", 1, 100);

        let entry = store.save(&model).unwrap();
        assert_eq!(entry.filename, "model-s1-a1.json");
        assert_eq!(entry.sha256.len(), 64);

        let loaded = store.load("a1").unwrap();
        assert_eq!(*loaded, model);

        // second load is served from the cache
        let again = store.load("a1").unwrap();
        assert!(Arc::ptr_eq(&loaded, &again));
    }

    #[test]
    fn test_load_latest_per_schema() {
        let dir = tempdir().unwrap();
        let store = ModelStore::with_dir(dir.path().to_path_buf()).unwrap();

        store.save(&model_with("old", 1, 100)).unwrap();
        store.save(&model_with("new", 1, 200)).unwrap();
        store.save(&model_with("other-schema", 2, 300)).unwrap();

        assert_eq!(store.load_latest(1).unwrap().artifact_id(), "new");
        assert_eq!(store.load_latest(2).unwrap().artifact_id(), "other-schema");
        assert!(store.load_latest(3).is_err());
        assert_eq!(store.load_manifest().unwrap().models.len(), 3);
    }

    #[test]
    fn test_never_overwrites() {
        let dir = tempdir().unwrap();
        let store = ModelStore::with_dir(dir.path().to_path_buf()).unwrap();
        let model = model_with("dup", 1, 100);

        store.save(&model).unwrap();
        assert!(store.save(&model).is_err());
        assert_eq!(store.load_manifest().unwrap().models.len(), 1);
    }

    #[test]
    fn test_detects_tampering() {
        let dir = tempdir().unwrap();
        let store = ModelStore::with_dir(dir.path().to_path_buf()).unwrap();
        let entry = store.save(&model_with("t1", 1, 100)).unwrap();

        let path = dir.path().join(&entry.filename);
        let tampered = std::fs::read_to_string(&path).unwrap().replace("\"bias\": 0.0", "\"bias\": 9.0");
        std::fs::write(&path, tampered).unwrap();

        let fresh = ModelStore::with_dir(dir.path().to_path_buf()).unwrap();
        let err = fresh.load("t1").unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }
}
