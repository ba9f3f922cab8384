//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the PaddleOCR models used
//! by the fallback engine.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::PaddleConfig;

/// Set to forbid network access for model downloads
pub const OFFLINE_ENV: &str = "MARDOC_OFFLINE";

/// PaddleOCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN, Arabic + Latin charset)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [ModelType::Detection, ModelType::Recognition, ModelType::Dictionary];

    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec_arabic.onnx",
            ModelType::Dictionary => "dict_arabic.txt",
        }
    }

    /// Plausible file size range in bytes, used as a cheap integrity check
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (1_000_000, 20_000_000),
            ModelType::Recognition => (1_000_000, 30_000_000),
            ModelType::Dictionary => (100, 100_000),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub source_url: String,
    /// Seconds since the Unix epoch
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Downloads and caches ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
    det_url: String,
    rec_url: String,
    dict_url: String,
    offline: bool,
}

impl ModelManager {
    /// Model manager for the configured (or default) cache directory
    pub fn from_config(config: &PaddleConfig) -> Result<Self> {
        let models_dir = match &config.models_dir {
            Some(dir) => dir.clone(),
            None => crate::storage::get_data_dir()?.join("models"),
        };
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;

        Ok(Self {
            models_dir,
            det_url: config.det_url.clone(),
            rec_url: config.rec_url.clone(),
            dict_url: config.dict_url.clone(),
            offline: config.offline || std::env::var(OFFLINE_ENV).is_ok(),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn download_url(&self, model_type: ModelType) -> &str {
        match model_type {
            ModelType::Detection => &self.det_url,
            ModelType::Recognition => &self.rec_url,
            ModelType::Dictionary => &self.dict_url,
        }
    }

    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is already downloaded with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Availability and on-disk size of every model
    pub fn get_model_status(&self) -> Vec<(ModelType, bool, Option<u64>)> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let size = std::fs::metadata(self.model_path(model_type)).ok().map(|m| m.len());
                (model_type, self.is_model_available(model_type), size)
            })
            .collect()
    }

    /// Return the path to a model, downloading it first if needed
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        self.download_model(model_type)?;
        Ok(path)
    }

    pub fn ensure_all_models(&self) -> Result<()> {
        for model_type in ModelType::ALL {
            self.ensure_model(model_type)?;
        }
        Ok(())
    }

    fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = self.download_url(model_type);
        let path = self.model_path(model_type);

        if self.offline {
            anyhow::bail!(
                "Offline mode: cannot download models. Download {} manually and place it at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(download_file(url, &path))?;

        if !self.is_model_available(model_type) {
            anyhow::bail!(
                "Downloaded {} has an unexpected size",
                model_type.filename()
            );
        }

        self.update_manifest(model_type, sha256)?;
        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(())
    }

    fn update_manifest(&self, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = match self.load_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Ignoring unreadable model manifest: {}", e);
                ModelManifest::default()
            }
        };

        let size_bytes = std::fs::metadata(self.model_path(model_type))?.len();
        let downloaded_at = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes,
            sha256,
            source_url: self.download_url(model_type).to_string(),
            downloaded_at,
        };

        match manifest.models.iter_mut().find(|m| m.filename == model_info.filename) {
            Some(existing) => *existing = model_info,
            None => manifest.models.push(model_info),
        }

        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        std::fs::write(manifest_path, serde_json::to_string_pretty(manifest)?)?;
        Ok(())
    }
}

/// Stream `url` into `path` via a temp file; returns the SHA-256 of the body
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    let temp_path = path.with_extension("part");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);
    debug!("Downloaded {} / {:?} bytes", downloaded, total_size);

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
}

impl OnnxSession {
    /// Load a model, optionally asking for the CUDA execution provider
    pub fn new(model_path: &Path, use_gpu: bool) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        let builder = if use_gpu {
            use ort::execution_providers::CUDAExecutionProvider;
            match builder.with_execution_providers([CUDAExecutionProvider::default().build()]) {
                Ok(builder) => {
                    info!("CUDA execution provider requested");
                    builder
                }
                Err(e) => {
                    warn!("CUDA not available, using CPU: {}", e);
                    Session::builder()?
                        .with_optimization_level(GraphOptimizationLevel::Level3)?
                        .with_intra_threads(4)?
                }
            }
        } else {
            builder
        };

        let session = builder
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
        let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        Ok(Self { session })
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &Path) -> ModelManager {
        let config = PaddleConfig {
            models_dir: Some(dir.to_path_buf()),
            offline: true,
            ..PaddleConfig::default()
        };
        ModelManager::from_config(&config).unwrap()
    }

    #[test]
    fn test_model_type_filenames() {
        assert_eq!(ModelType::Detection.filename(), "det.onnx");
        assert_eq!(ModelType::Recognition.filename(), "rec_arabic.onnx");
        assert_eq!(ModelType::Dictionary.filename(), "dict_arabic.txt");
    }

    #[test]
    fn test_model_status_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let status = manager.get_model_status();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|(_, available, size)| !available && size.is_none()));
    }

    #[test]
    fn test_size_check_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        std::fs::write(manager.model_path(ModelType::Dictionary), "a\n").unwrap();
        assert!(!manager.is_model_available(ModelType::Dictionary));

        std::fs::write(manager.model_path(ModelType::Dictionary), "ا\n".repeat(200)).unwrap();
        assert!(manager.is_model_available(ModelType::Dictionary));
    }

    #[test]
    fn test_offline_mode_refuses_download() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let err = manager.ensure_model(ModelType::Detection).unwrap_err();
        assert!(err.to_string().contains("Offline mode"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        assert!(manager.load_manifest().unwrap().models.is_empty());

        std::fs::write(manager.model_path(ModelType::Dictionary), "ب\n".repeat(200)).unwrap();
        manager.update_manifest(ModelType::Dictionary, "abc".to_string()).unwrap();

        let manifest = manager.load_manifest().unwrap();
        assert_eq!(manifest.models.len(), 1);
        assert_eq!(manifest.models[0].filename, "dict_arabic.txt");
        assert_eq!(manifest.models[0].sha256, "abc");
    }
}
