//! Tesseract OCR backend
//!
//! Runs the `tesseract` executable on a temporary PNG and parses its TSV
//! output. Zone hints (`French`, `Arabic`) use the single-line page
//! segmentation mode; `Mixed` is used for full pages.

use image::{DynamicImage, ImageFormat};
use std::process::Command;
use tracing::{debug, info};

use super::{ocr_preprocess, BoundingBox, EngineKind, ExtractionBlock, LanguageHint, OcrBackend};
use crate::config::TesseractConfig;
use crate::error::{ExtractError, Result};

/// Tesseract engine wrapper
pub struct TesseractEngine {
    config: TesseractConfig,
    version: String,
}

impl TesseractEngine {
    /// Verify the executable responds and create the engine
    pub fn new(config: TesseractConfig) -> Result<Self> {
        info!("Initializing Tesseract from '{}'", config.binary);

        let output = Command::new(&config.binary)
            .arg("--version")
            .output()
            .map_err(|e| ExtractError::engine_unavailable("tesseract", e))?;

        if !output.status.success() {
            return Err(ExtractError::engine_unavailable(
                "tesseract",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        // Older releases print the version on stderr
        let banner = if output.stdout.is_empty() { &output.stderr } else { &output.stdout };
        let version = String::from_utf8_lossy(banner)
            .lines()
            .next()
            .unwrap_or("tesseract")
            .trim()
            .to_string();

        info!("Tesseract ready: {}", version);
        Ok(Self { config, version })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn languages(&self, hint: LanguageHint) -> &str {
        match hint {
            LanguageHint::French => &self.config.lang_fr,
            LanguageHint::Arabic => &self.config.lang_ar,
            LanguageHint::Mixed => &self.config.lang_mixed,
        }
    }

    fn page_segmentation(&self, hint: LanguageHint) -> u8 {
        match hint {
            LanguageHint::Mixed => self.config.psm_page,
            LanguageHint::French | LanguageHint::Arabic => self.config.psm_zone,
        }
    }
}

impl OcrBackend for TesseractEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tesseract
    }

    fn recognize(&self, image: &DynamicImage, hint: LanguageHint) -> Result<Vec<ExtractionBlock>> {
        if ocr_preprocess::is_near_blank(image) {
            debug!("Skipping blank {}x{} image", image.width(), image.height());
            return Ok(vec![]);
        }

        // Removed when dropped, whatever path we leave by
        let input = tempfile::Builder::new()
            .prefix("mardoc-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(input.path(), ImageFormat::Png)?;

        let mut command = Command::new(&self.config.binary);
        command
            .arg(input.path())
            .arg("stdout")
            .args(["--oem", "3", "--psm"])
            .arg(self.page_segmentation(hint).to_string())
            .arg("-l")
            .arg(self.languages(hint));
        if let Some(dir) = &self.config.tessdata_dir {
            command.arg("--tessdata-dir").arg(dir);
        }
        command.arg("tsv");

        let output = command.output()?;
        if !output.status.success() {
            return Err(ExtractError::region(
                "tesseract",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        let blocks = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(
            "Tesseract ({}) found {} words in {}x{} image",
            self.languages(hint),
            blocks.len(),
            image.width(),
            image.height()
        );
        Ok(blocks)
    }
}

/// Parse Tesseract TSV output into word blocks.
///
/// Columns: level page_num block_num par_num line_num word_num left top
/// width height conf text. Level 5 rows are words; confidence is 0-100
/// and -1 when Tesseract could not score the word.
pub fn parse_tsv(tsv: &str) -> Vec<ExtractionBlock> {
    let mut blocks = Vec::new();

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        if fields[0].parse::<i32>().ok() != Some(5) {
            continue;
        }

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        let Ok(conf) = fields[10].trim().parse::<f32>() else {
            continue;
        };
        let confidence = if conf < 0.0 { 0.0 } else { conf / 100.0 };

        let Some(bounds) = parse_bounds(&fields[6..10]) else {
            continue;
        };

        blocks.push(ExtractionBlock::new(text, confidence, bounds, EngineKind::Tesseract));
    }

    blocks
}

fn parse_bounds(fields: &[&str]) -> Option<BoundingBox> {
    Some(BoundingBox {
        x: fields[0].trim().parse().ok()?,
        y: fields[1].trim().parse().ok()?,
        width: fields[2].trim().parse().ok()?,
        height: fields[3].trim().parse().ok()?,
    })
}
