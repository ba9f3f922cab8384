//! Error taxonomy for the extraction pipeline

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the extraction pipeline.
///
/// `RegionExtraction` is recovered internally (zone omitted or fallback
/// engine used) and never escapes [`crate::DocumentExtractor::extract`].
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported document type: {0}")]
    UnsupportedDocumentType(String),

    #[error("Region '{region}' could not be extracted: {reason}")]
    RegionExtraction { region: String, reason: String },

    #[error("OCR engine '{engine}' unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Extraction worker failed: {0}")]
    Worker(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub fn engine_unavailable(engine: &str, reason: impl ToString) -> Self {
        Self::EngineUnavailable {
            engine: engine.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn region(region: &str, reason: impl ToString) -> Self {
        Self::RegionExtraction {
            region: region.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
