//! Document family detection
//!
//! Used when the caller does not declare a type. ID cards carry a strongly
//! coloured top band and their own title; vehicle cards are mostly grey
//! and print owner and make labels.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};
use crate::extraction::classifier::band_statistics;
use crate::extraction::Deadline;
use crate::vision::{recognize_region, BoundingBox, LanguageHint, OcrBackend, PreprocessProfile};

use super::{DocumentFamily, DocumentImage};

/// Top-band channel spread above which the band counts as coloured
const COLOURED_BAND: f32 = 25.0;
/// Spread used to break a score tie
const TIE_BAND: f32 = 20.0;
/// Fraction of the page searched for the card title
const TITLE_BAND: f32 = 0.30;

/// Title words, each worth 4 when found near the top
const ID_TITLE_WORDS: &[&str] = &["carte nationale", "البطاقة الوطنية", "للتعريف", "identité", "d'identité"];

/// Evidence gathered for each family
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyDetection {
    pub family: DocumentFamily,
    pub id_card_score: u32,
    pub vehicle_score: u32,
    /// Max minus min of the mean top-band channels
    pub colour_variance: f32,
    /// Keywords that contributed to a score
    pub keywords: Vec<&'static str>,
}

/// Spread between the strongest and weakest mean channel of the top band
pub fn colour_variance(image: &DocumentImage) -> f32 {
    let stats = band_statistics(&image.pixels);
    let channels = [stats.mean_r, stats.mean_g, stats.mean_b];
    let max = channels.iter().copied().fold(f32::MIN, f32::max);
    let min = channels.iter().copied().fold(f32::MAX, f32::min);
    max - min
}

/// Score both families from colour and text evidence
pub fn score_family(colour_variance: f32, top_text: &str, full_text: &str) -> FamilyDetection {
    let top = top_text.to_lowercase();
    let full = full_text.to_lowercase();

    let mut id_card_score = 0;
    let mut vehicle_score = 0;
    let mut keywords = Vec::new();

    if colour_variance > COLOURED_BAND {
        id_card_score += 3;
    } else {
        vehicle_score += 1;
    }

    for word in ID_TITLE_WORDS {
        if top.contains(word) {
            id_card_score += 4;
            keywords.push(*word);
        }
    }
    if full.contains("carte nationale") || full.contains("البطاقة الوطنية") {
        id_card_score += 5;
        keywords.push("carte nationale");
    }

    let vehicle_rules: [(&'static str, bool); 4] = [
        ("propriétaire", full.contains("propriétaire") || full.contains("المالك")),
        ("marque", full.contains("marque") || full.contains("الاسم التجاري")),
        ("genre", full.contains("genre") && full.contains("النوع")),
        ("immatriculation", full.contains("immatriculation") || full.contains("التسجيل")),
    ];
    for (word, found) in vehicle_rules {
        if found {
            vehicle_score += 3;
            keywords.push(word);
        }
    }

    let family = if id_card_score > vehicle_score {
        DocumentFamily::IdCard
    } else if vehicle_score > id_card_score {
        DocumentFamily::VehicleCard
    } else if colour_variance > TIE_BAND {
        DocumentFamily::IdCard
    } else {
        DocumentFamily::VehicleCard
    };

    FamilyDetection {
        family,
        id_card_score,
        vehicle_score,
        colour_variance,
        keywords,
    }
}

/// Decide the family of an undeclared document.
///
/// Runs one primary OCR pass over the page; if that pass fails the
/// decision rests on colour alone.
pub fn detect_family(image: &DocumentImage, backend: &dyn OcrBackend, deadline: &Deadline) -> Result<FamilyDetection> {
    let variance = colour_variance(image);
    let page = image.to_dynamic();
    let bounds = BoundingBox::new(0, 0, page.width(), page.height());

    deadline.check()?;
    let blocks = match recognize_region(backend, &page, bounds, LanguageHint::Mixed, PreprocessProfile::VehiclePage) {
        Ok(blocks) => blocks,
        Err(e @ (ExtractError::EngineUnavailable { .. } | ExtractError::Timeout(_))) => return Err(e),
        Err(e) => {
            warn!("Keyword scan failed, using colour only: {}", e);
            vec![]
        }
    };

    let title_limit = (page.height() as f32 * TITLE_BAND) as u32;
    let join = |title_only: bool| {
        blocks
            .iter()
            .filter(|b| !title_only || b.bounds.y < title_limit)
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    };

    let detection = score_family(variance, &join(true), &join(false));
    debug!(
        "Family {:?}: id_card={}, vehicle={}, variance={:.1}, keywords={:?}",
        detection.family, detection.id_card_score, detection.vehicle_score, variance, detection.keywords
    );
    Ok(detection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::testing::{block, ScriptedBackend};
    use crate::vision::EngineKind;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_colour_alone() {
        assert_eq!(score_family(60.0, "", "").family, DocumentFamily::IdCard);
        assert_eq!(score_family(5.0, "", "").family, DocumentFamily::VehicleCard);
    }

    #[test]
    fn test_keywords_outweigh_colour() {
        let detection = score_family(5.0, "ROYAUME DU MAROC CARTE NATIONALE D'IDENTITÉ", "CARTE NATIONALE D'IDENTITÉ");
        assert_eq!(detection.family, DocumentFamily::IdCard);
        assert_eq!(detection.id_card_score, 4 + 4 + 4 + 5);

        let detection = score_family(40.0, "", "Propriétaire ALAMI Marque DACIA");
        assert_eq!(detection.family, DocumentFamily::VehicleCard);
        assert_eq!(detection.vehicle_score, 6);
        assert_eq!(detection.keywords, vec!["propriétaire", "marque"]);
    }

    #[test]
    fn test_tie_uses_lower_variance_cutoff() {
        let detection = score_family(22.0, "", "");
        assert_eq!((detection.id_card_score, detection.vehicle_score), (0, 1));

        let tied = score_family(26.0, "", "Marque");
        assert_eq!((tied.id_card_score, tied.vehicle_score), (3, 3));
        assert_eq!(tied.family, DocumentFamily::IdCard);
    }

    #[test]
    fn test_genre_needs_both_languages() {
        assert_eq!(score_family(0.0, "", "Genre VP").vehicle_score, 1);
        assert_eq!(score_family(0.0, "", "Genre النوع VP").vehicle_score, 4);
    }

    #[test]
    fn test_detect_from_page() {
        let image = DocumentImage::new(RgbImage::from_pixel(600, 400, Rgb([235, 235, 235])), None);
        let backend = ScriptedBackend::new(
            EngineKind::Tesseract,
            vec![block("Propriétaire", 0.9, 20, 200, 120, 20), block("Marque", 0.9, 20, 250, 80, 20)],
        );

        let detection = detect_family(&image, &backend, &Deadline::none()).unwrap();
        assert_eq!(detection.family, DocumentFamily::VehicleCard);
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn test_title_must_be_near_top() {
        let image = DocumentImage::new(RgbImage::from_pixel(600, 400, Rgb([235, 235, 235])), None);
        let low = ScriptedBackend::new(EngineKind::Tesseract, vec![block("identité", 0.9, 20, 300, 120, 20)]);
        let detection = detect_family(&image, &low, &Deadline::none()).unwrap();
        assert_eq!(detection.id_card_score, 0);

        let high = ScriptedBackend::new(EngineKind::Tesseract, vec![block("identité", 0.9, 20, 30, 120, 20)]);
        let detection = detect_family(&image, &high, &Deadline::none()).unwrap();
        assert_eq!(detection.id_card_score, 4);
        assert_eq!(detection.family, DocumentFamily::IdCard);
    }
}
