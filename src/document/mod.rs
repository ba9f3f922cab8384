//! Document model
//!
//! Decoded input images and the document types the pipeline understands.

pub mod detector;

use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ExtractError, Result};

/// Supported document types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// National ID card, older green/yellow design
    CinOld,
    /// National ID card, current pink/red design
    CinNew,
    /// Vehicle registration card, front face
    CarteGriseRecto,
    /// Vehicle registration card, back face
    CarteGriseVerso,
}

/// Document family, decides which pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFamily {
    IdCard,
    VehicleCard,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::CinOld,
        DocumentType::CinNew,
        DocumentType::CarteGriseRecto,
        DocumentType::CarteGriseVerso,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::CinOld => "cin_old",
            DocumentType::CinNew => "cin_new",
            DocumentType::CarteGriseRecto => "carte_grise_recto",
            DocumentType::CarteGriseVerso => "carte_grise_verso",
        }
    }

    pub fn family(&self) -> DocumentFamily {
        match self {
            DocumentType::CinOld | DocumentType::CinNew => DocumentFamily::IdCard,
            DocumentType::CarteGriseRecto | DocumentType::CarteGriseVerso => {
                DocumentFamily::VehicleCard
            }
        }
    }

    pub fn is_id_card(&self) -> bool {
        self.family() == DocumentFamily::IdCard
    }

    /// Human readable label
    pub fn display_name(&self) -> &'static str {
        match self {
            DocumentType::CinOld => "CIN (ancien modèle)",
            DocumentType::CinNew => "CIN (nouveau modèle)",
            DocumentType::CarteGriseRecto => "Carte grise (recto)",
            DocumentType::CarteGriseVerso => "Carte grise (verso)",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ExtractError::UnsupportedDocumentType(s.to_string()))
    }
}

/// A decoded document photograph plus what the caller claims it is
#[derive(Debug, Clone)]
pub struct DocumentImage {
    /// RGB pixel data
    pub pixels: RgbImage,
    /// Type declared by the caller, if any
    pub declared: Option<DocumentType>,
}

impl DocumentImage {
    pub fn new(pixels: RgbImage, declared: Option<DocumentType>) -> Self {
        Self { pixels, declared }
    }

    /// Decode an image file from disk
    pub fn open(path: &Path, declared: Option<DocumentType>) -> Result<Self> {
        let decoded = image::open(path)?;
        Ok(Self::from_dynamic(decoded, declared))
    }

    /// Decode an in-memory encoded image (PNG, JPEG, ...)
    pub fn from_bytes(bytes: &[u8], declared: Option<DocumentType>) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::from_dynamic(decoded, declared))
    }

    pub fn from_dynamic(image: DynamicImage, declared: Option<DocumentType>) -> Self {
        Self {
            pixels: image.to_rgb8(),
            declared,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Owned dynamic copy for the OCR and preprocessing layers
    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.pixels.clone())
    }
}
