//! Application Configuration
//!
//! Engine, template and pipeline settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Primary OCR engine (tesseract executable)
    pub tesseract: TesseractConfig,
    /// Fallback OCR engine (PaddleOCR via ONNX Runtime)
    pub paddle: PaddleConfig,
    /// ID card zone pipeline
    pub id_card: IdCardConfig,
    /// Vehicle registration card pipeline
    pub vehicle: VehicleConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding `cin_new.toml` / `cin_old.toml` overrides
    pub template_dir: Option<PathBuf>,
    /// Default per-request timeout in seconds (0 disables it)
    pub default_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            template_dir: None,
            default_timeout_secs: 60,
        }
    }
}

/// Tesseract settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    /// Executable name or path
    pub binary: String,
    /// Page segmentation mode for single zones
    pub psm_zone: u8,
    /// Page segmentation mode for full pages
    pub psm_page: u8,
    pub lang_fr: String,
    pub lang_ar: String,
    pub lang_mixed: String,
    /// Optional tessdata directory
    pub tessdata_dir: Option<PathBuf>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            psm_zone: 7,
            psm_page: 6,
            lang_fr: "fra".to_string(),
            lang_ar: "ara".to_string(),
            lang_mixed: "fra+ara".to_string(),
            tessdata_dir: None,
        }
    }
}

/// PaddleOCR fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddleConfig {
    /// Model cache directory (defaults to `<data_dir>/models`)
    pub models_dir: Option<PathBuf>,
    pub use_gpu: bool,
    /// Never download models; fail if they are missing
    pub offline: bool,
    /// Probability cutoff for the detection map
    pub det_threshold: f32,
    /// Minimum mean probability inside a detected box
    pub box_threshold: f32,
    /// Box expansion ratio after detection
    pub unclip_ratio: f32,
    pub det_url: String,
    pub rec_url: String,
    pub dict_url: String,
}

impl Default for PaddleConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            use_gpu: false,
            offline: false,
            det_threshold: 0.3,
            box_threshold: 0.5,
            unclip_ratio: 1.6,
            det_url: "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx"
                .to_string(),
            rec_url: "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/arabic/rec.onnx"
                .to_string(),
            dict_url: "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/arabic/dict.txt"
                .to_string(),
        }
    }
}

/// ID card settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdCardConfig {
    /// Send every Arabic zone to the fallback engine and pick the reading
    /// closest to the Latin spelling, instead of only low-confidence ones
    pub retry_arabic_zones: bool,
}

/// Vehicle registration card settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Blocks under this confidence are re-read with the fallback engine
    pub confidence_threshold: f32,
    /// Maximum fallback re-reads per request
    pub max_corrections: usize,
    /// Minimum similarity for a block to count as a field label
    pub label_similarity: f32,
    /// Anchor labels needed before a side is accepted
    pub side_anchor_min: usize,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            max_corrections: 10,
            label_similarity: 0.6,
            side_anchor_min: 3,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!(config.general.template_dir.is_none());
        assert_eq!(config.general.default_timeout_secs, 60);

        assert_eq!(config.tesseract.binary, "tesseract");
        assert_eq!(config.tesseract.psm_page, 6);
        assert_eq!(config.tesseract.lang_mixed, "fra+ara");

        assert!(!config.paddle.offline);
        assert!((config.paddle.det_threshold - 0.3).abs() < 0.001);

        assert!(!config.id_card.retry_arabic_zones);
        assert_eq!(config.vehicle.max_corrections, 10);
        assert_eq!(config.vehicle.side_anchor_min, 3);
        assert!((config.vehicle.confidence_threshold - 0.6).abs() < 0.001);
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.general.template_dir = Some(PathBuf::from("/etc/mardoc/templates"));
        config.tesseract.binary = "/opt/tesseract/bin/tesseract".to_string();
        config.vehicle.max_corrections = 4;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.general.template_dir, Some(PathBuf::from("/etc/mardoc/templates")));
        assert_eq!(parsed.tesseract.binary, "/opt/tesseract/bin/tesseract");
        assert_eq!(parsed.vehicle.max_corrections, 4);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[vehicle]\nmax_corrections = 2\n").unwrap();
        assert_eq!(parsed.vehicle.max_corrections, 2);
        assert!((parsed.vehicle.label_similarity - 0.6).abs() < 0.001);
        assert_eq!(parsed.tesseract.psm_zone, 7);

        let parsed: AppConfig = toml::from_str("[id_card]\nretry_arabic_zones = true\n").unwrap();
        assert!(parsed.id_card.retry_arabic_zones);
        assert_eq!(parsed.vehicle.max_corrections, 10);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.tesseract.lang_ar, loaded.tesseract.lang_ar);
        assert_eq!(config.paddle.rec_url, loaded.paddle.rec_url);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
