//! Template-driven ID card extraction
//!
//! Every zone of the card template is cropped, preprocessed and read by
//! the primary engine. Zones that come back empty, below the variant's
//! confidence threshold or in the wrong script are re-read by the fallback
//! engine and the better candidate is kept.

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::document::{DocumentImage, DocumentType};
use crate::error::{ExtractError, Result};
use crate::storage::{Zone, ZoneLanguage, ZoneTemplate};
use crate::vision::ocr_preprocess::{fraction_to_pixels, safe_crop};
use crate::vision::{recognize_crop, BoundingBox, Crop, EngineKind, ExtractionBlock, OcrBackend, OcrEngines, PreprocessProfile};

use super::similarity::compare_name_ar_fr;
use super::{
    contains_arabic, has_meaningful_char, is_date_field, normalize_date, strict_filter, Deadline, FieldLanguage,
    FieldMap, FieldRecord,
};

/// Fields moved to the front of the output, in this order
pub const LEADING_FIELDS: [&str; 6] = [
    "prenom_ar",
    "prenom_fr",
    "nom_ar",
    "nom_fr",
    "lieu_naissance_ar",
    "lieu_naissance_fr",
];

/// Per-generation extraction parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantConfig {
    pub document: DocumentType,
    /// Profile for the primary engine (zones may override it)
    pub primary_profile: PreprocessProfile,
    /// Profile for the fallback engine
    pub fallback_profile: PreprocessProfile,
    /// Primary reads below this confidence go to the fallback engine
    pub confidence_threshold: f32,
}

impl VariantConfig {
    pub const CIN_NEW: VariantConfig = VariantConfig {
        document: DocumentType::CinNew,
        primary_profile: PreprocessProfile::CinNewZone,
        fallback_profile: PreprocessProfile::Raw,
        confidence_threshold: 0.80,
    };

    /// Older cards have smaller, noisier glyphs and get the stronger remediation
    pub const CIN_OLD: VariantConfig = VariantConfig {
        document: DocumentType::CinOld,
        primary_profile: PreprocessProfile::CinOldZone,
        fallback_profile: PreprocessProfile::CinOldEnhanced,
        confidence_threshold: 0.60,
    };

    pub fn for_document(document: DocumentType) -> Result<&'static VariantConfig> {
        match document {
            DocumentType::CinNew => Ok(&Self::CIN_NEW),
            DocumentType::CinOld => Ok(&Self::CIN_OLD),
            other => Err(ExtractError::UnsupportedDocumentType(format!(
                "{} is not an ID card",
                other
            ))),
        }
    }
}

/// Fields read from one ID card
#[derive(Debug, Clone, Default)]
pub struct IdCardExtraction {
    pub fields: FieldMap,
    /// Zone names in template order
    pub expected: Vec<String>,
    /// Zones that produced no value
    pub omitted: Vec<String>,
    /// Extracted fields whose final confidence is under the threshold
    pub low_confidence: Vec<String>,
    /// Zones where the fallback engine's reading was kept
    pub fallback_used: Vec<String>,
}

/// Text of one zone as read by one engine
#[derive(Debug, Clone, PartialEq)]
struct ZoneRead {
    text: String,
    confidence: f32,
    engine: EngineKind,
}

impl ZoneRead {
    /// Filter block texts and join them; None when nothing usable is left
    fn from_blocks(blocks: &[ExtractionBlock], engine: EngineKind) -> Option<Self> {
        let kept: Vec<(String, f32)> = blocks
            .iter()
            .filter_map(|b| strict_filter(&b.text).map(|text| (text, b.confidence)))
            .filter(|(text, _)| has_meaningful_char(text))
            .collect();
        if kept.is_empty() {
            return None;
        }

        let confidence = kept.iter().map(|(_, c)| c).sum::<f32>() / kept.len() as f32;
        let text = kept.into_iter().map(|(t, _)| t).collect::<Vec<_>>().join(" ");
        Some(Self {
            text,
            confidence,
            engine,
        })
    }
}

/// Both engines' readings of one zone
struct ZoneCandidates<'t> {
    zone: &'t Zone,
    primary: Option<ZoneRead>,
    fallback: Option<ZoneRead>,
}

/// Value in the wrong script for the zone
fn wrong_script(language: ZoneLanguage, text: &str) -> bool {
    match language {
        ZoneLanguage::Ar => !contains_arabic(text),
        ZoneLanguage::Fr => contains_arabic(text),
        ZoneLanguage::Mixed => false,
    }
}

/// `prenom_ar` -> `prenom_fr`
fn latin_counterpart(name: &str) -> Option<String> {
    name.strip_suffix("_ar").map(|stem| format!("{}_fr", stem))
}

/// Pick between the primary and fallback readings of a zone
fn choose(language: ZoneLanguage, primary: Option<ZoneRead>, fallback: Option<ZoneRead>, latin: Option<&str>) -> Option<ZoneRead> {
    let (primary, fallback) = match (primary, fallback) {
        (None, fallback) => return fallback,
        (Some(primary), None) => return Some(primary),
        (Some(p), Some(f)) => (p, f),
    };

    let primary_wrong = wrong_script(language, &primary.text);
    if primary_wrong != wrong_script(language, &fallback.text) {
        return Some(if primary_wrong { fallback } else { primary });
    }

    if let Some(latin) = latin {
        let primary_score = compare_name_ar_fr(&primary.text, latin).score;
        let fallback_score = compare_name_ar_fr(&fallback.text, latin).score;
        if primary_score != fallback_score {
            debug!(
                "Phonetic choice against {:?}: primary {:.2}, fallback {:.2}",
                latin, primary_score, fallback_score
            );
            return Some(if fallback_score > primary_score { fallback } else { primary });
        }
    }

    Some(if fallback.confidence > primary.confidence { fallback } else { primary })
}

/// Resize the card to the template's reference size
pub fn fit_to_template(image: &DocumentImage, template: &ZoneTemplate) -> DynamicImage {
    let page = image.to_dynamic();
    if page.width() == template.reference_width && page.height() == template.reference_height {
        return page;
    }
    debug!(
        "Resizing {}x{} to template size {}x{}",
        page.width(),
        page.height(),
        template.reference_width,
        template.reference_height
    );
    page.resize_exact(template.reference_width, template.reference_height, FilterType::Triangle)
}

/// Card resized to the template with every zone outlined
pub fn render_zones(image: &DocumentImage, template: &ZoneTemplate) -> RgbImage {
    let mut canvas = fit_to_template(image, template).to_rgb8();
    let (width, height) = canvas.dimensions();
    for zone in &template.zones {
        let bounds = fraction_to_pixels(zone.bounds, width, height);
        if bounds.width == 0 || bounds.height == 0 {
            continue;
        }
        let colour = match zone.language {
            ZoneLanguage::Ar => Rgb([0, 160, 0]),
            ZoneLanguage::Fr => Rgb([0, 0, 220]),
            ZoneLanguage::Mixed => Rgb([220, 120, 0]),
        };
        let rect = Rect::at(bounds.x as i32, bounds.y as i32).of_size(bounds.width, bounds.height);
        draw_hollow_rect_mut(&mut canvas, rect, colour);
    }
    canvas
}

/// Zone extractor for one card generation
pub struct TemplateExtractor<'a> {
    variant: &'a VariantConfig,
    template: &'a ZoneTemplate,
    engines: &'a OcrEngines,
    deadline: Deadline,
    retry_arabic: bool,
}

impl<'a> TemplateExtractor<'a> {
    pub fn new(variant: &'a VariantConfig, template: &'a ZoneTemplate, engines: &'a OcrEngines, deadline: Deadline) -> Self {
        Self {
            variant,
            template,
            engines,
            deadline,
            retry_arabic: false,
        }
    }

    /// Re-read every Arabic zone with the fallback engine, even confident
    /// ones, and keep the reading closer to the Latin spelling
    pub fn retry_arabic_zones(mut self, enabled: bool) -> Self {
        self.retry_arabic = enabled;
        self
    }

    /// Read every zone. Unreadable zones are omitted; only engine
    /// initialisation failures and timeouts abort.
    pub fn extract(&self, image: &DocumentImage) -> Result<IdCardExtraction> {
        let page = fit_to_template(image, self.template);
        let primary = self.engines.primary()?;

        let mut result = IdCardExtraction {
            expected: self.template.zones.iter().map(|z| z.name.clone()).collect(),
            ..Default::default()
        };

        let mut candidates = Vec::with_capacity(self.template.zones.len());
        for zone in &self.template.zones {
            let Crop::Region { image: region, origin } = safe_crop(&page, zone.bounds) else {
                warn!("Zone '{}' is empty at {}x{}, omitted", zone.name, page.width(), page.height());
                continue;
            };

            let profile = zone.profile.unwrap_or(self.variant.primary_profile);
            let first = self.read_zone(primary.as_ref(), &region, origin, zone, profile)?;

            let fallback = if self.needs_fallback(zone, first.as_ref()) {
                let engine = self.engines.fallback()?;
                self.read_zone(engine.as_ref(), &region, origin, zone, self.variant.fallback_profile)?
            } else {
                None
            };

            candidates.push(ZoneCandidates {
                zone,
                primary: first,
                fallback,
            });
        }

        // Latin zones first so Arabic zones can be checked against them
        let mut chosen: HashMap<String, ZoneRead> = HashMap::new();
        let (arabic, others): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| c.zone.language == ZoneLanguage::Ar);
        for candidate in others.into_iter().chain(arabic) {
            let latin = latin_counterpart(&candidate.zone.name)
                .and_then(|name| chosen.get(&name))
                .map(|read| read.text.clone());
            let fallback = candidate.fallback.clone();

            if let Some(read) = choose(candidate.zone.language, candidate.primary, candidate.fallback, latin.as_deref()) {
                if fallback.as_ref() == Some(&read) {
                    result.fallback_used.push(candidate.zone.name.clone());
                }
                chosen.insert(candidate.zone.name.clone(), read);
            }
        }

        for zone in &self.template.zones {
            let Some(read) = chosen.remove(&zone.name) else {
                result.omitted.push(zone.name.clone());
                continue;
            };

            let value = if is_date_field(&zone.name) {
                normalize_date(&read.text)
            } else {
                read.text
            };
            if read.confidence < self.variant.confidence_threshold {
                result.low_confidence.push(zone.name.clone());
            }
            result.fields.insert(FieldRecord {
                name: zone.name.clone(),
                value,
                language: FieldLanguage::from_field_name(&zone.name),
                confidence: read.confidence,
                engine: read.engine,
            });
        }

        result.fields.reorder(&LEADING_FIELDS);
        info!(
            "{}: {} of {} zones extracted ({} via fallback, {} low confidence)",
            self.variant.document,
            result.fields.len(),
            result.expected.len(),
            result.fallback_used.len(),
            result.low_confidence.len()
        );
        Ok(result)
    }

    fn needs_fallback(&self, zone: &Zone, read: Option<&ZoneRead>) -> bool {
        match read {
            None => true,
            Some(_) if self.retry_arabic && zone.language == ZoneLanguage::Ar => true,
            Some(read) => {
                read.confidence < self.variant.confidence_threshold || wrong_script(zone.language, &read.text)
            }
        }
    }

    /// One engine pass over one zone. Region failures are logged and
    /// reported as "nothing read".
    fn read_zone(
        &self,
        backend: &dyn OcrBackend,
        region: &DynamicImage,
        origin: BoundingBox,
        zone: &Zone,
        profile: PreprocessProfile,
    ) -> Result<Option<ZoneRead>> {
        self.deadline.check()?;

        match recognize_crop(backend, region, origin, zone.language.hint(), profile) {
            Ok(blocks) => {
                let read = ZoneRead::from_blocks(&blocks, backend.kind());
                debug!(
                    "Zone '{}' via {} ({:?}): {:?}",
                    zone.name,
                    backend.kind().name(),
                    profile,
                    read.as_ref().map(|r| (&r.text, r.confidence))
                );
                Ok(read)
            }
            Err(e @ (ExtractError::EngineUnavailable { .. } | ExtractError::Timeout(_))) => Err(e),
            Err(e) => {
                warn!("{}", ExtractError::region(&zone.name, e));
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::testing::{block, ScriptedBackend};
    use crate::vision::{LanguageHint, LazyEngine};
    use crate::storage::TemplateStore;
    use std::sync::Arc;
    use std::time::Duration;

    /// Returns different blocks per language hint
    struct ScriptBackend {
        kind: EngineKind,
        french: Vec<ExtractionBlock>,
        arabic: Vec<ExtractionBlock>,
    }

    impl OcrBackend for ScriptBackend {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn recognize(&self, _image: &DynamicImage, hint: LanguageHint) -> Result<Vec<ExtractionBlock>> {
            Ok(match hint {
                LanguageHint::Arabic => self.arabic.clone(),
                _ => self.french.clone(),
            })
        }
    }

    fn card() -> DocumentImage {
        DocumentImage::new(RgbImage::from_pixel(500, 315, Rgb([230, 200, 210])), None)
    }

    fn template(zones: &str) -> ZoneTemplate {
        ZoneTemplate::from_toml(&format!(
            "document = \"cin_new\"\nreference_width = 500\nreference_height = 315\n{}",
            zones
        ))
        .unwrap()
    }

    fn zone(name: &str, language: &str, y: f32) -> String {
        format!(
            "[[zones]]\nname = \"{}\"\nbounds = [0.1, {}, 0.5, 0.1]\nlanguage = \"{}\"\n",
            name, y, language
        )
    }

    #[test]
    fn test_confident_primary_skips_fallback() {
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, vec![block("AB123456", 0.95, 0, 0, 40, 10)]));
        let fallback = Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr));
        let engines = OcrEngines::from_backends(primary.clone(), fallback.clone());
        let template = template(&zone("cin", "fr", 0.8));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();

        assert_eq!(result.fields.value("cin"), Some("AB123456"));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
        assert!(result.omitted.is_empty());
        assert!(result.low_confidence.is_empty());
    }

    #[test]
    fn test_low_confidence_goes_to_fallback() {
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, vec![block("AB12E456", 0.55, 0, 0, 40, 10)]));
        let mut read = block("AB123456", 0.91, 0, 0, 40, 10);
        read.engine = EngineKind::PaddleOcr;
        let fallback = Arc::new(ScriptedBackend::new(EngineKind::PaddleOcr, vec![read]));
        let engines = OcrEngines::from_backends(primary, fallback.clone());
        let template = template(&zone("cin", "fr", 0.8));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();

        assert_eq!(fallback.calls(), 1);
        assert_eq!(result.fields.value("cin"), Some("AB123456"));
        assert_eq!(result.fields.get("cin").unwrap().engine, EngineKind::PaddleOcr);
        assert_eq!(result.fallback_used, vec!["cin".to_string()]);
    }

    #[test]
    fn test_old_card_threshold_is_lower() {
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, vec![block("AB123456", 0.65, 0, 0, 40, 10)]));
        let fallback = Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr));
        let engines = OcrEngines::from_backends(primary, fallback.clone());
        let template = ZoneTemplate {
            document: DocumentType::CinOld,
            ..template(&zone("cin", "fr", 0.8))
        };

        let result = TemplateExtractor::new(&VariantConfig::CIN_OLD, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();

        assert_eq!(fallback.calls(), 0);
        assert_eq!(result.fields.value("cin"), Some("AB123456"));
    }

    #[test]
    fn test_wrong_script_prefers_fallback() {
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, vec![block("ALAMI", 0.97, 0, 0, 40, 10)]));
        let fallback = Arc::new(ScriptedBackend::new(EngineKind::PaddleOcr, vec![block("العلمي", 0.70, 0, 0, 40, 10)]));
        let engines = OcrEngines::from_backends(primary, fallback);
        let template = template(&zone("nom_ar", "ar", 0.2));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();

        assert_eq!(result.fields.value("nom_ar"), Some("العلمي"));
        assert_eq!(result.low_confidence, vec!["nom_ar".to_string()]);
    }

    #[test]
    fn test_arabic_name_checked_against_latin_spelling() {
        let primary = Arc::new(ScriptBackend {
            kind: EngineKind::Tesseract,
            french: vec![block("MOHAMED", 0.95, 0, 0, 40, 10)],
            arabic: vec![block("فاطمة", 0.50, 0, 0, 40, 10)],
        });
        let fallback = Arc::new(ScriptBackend {
            kind: EngineKind::PaddleOcr,
            french: vec![],
            arabic: vec![block("محمد", 0.40, 0, 0, 40, 10)],
        });
        let engines = OcrEngines::from_backends(primary, fallback);
        let template = template(&format!("{}{}", zone("prenom_ar", "ar", 0.1), zone("prenom_fr", "fr", 0.3)));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();

        assert_eq!(result.fields.value("prenom_fr"), Some("MOHAMED"));
        assert_eq!(result.fields.value("prenom_ar"), Some("محمد"));
        let names: Vec<&str> = result.fields.names().collect();
        assert_eq!(names, vec!["prenom_ar", "prenom_fr"]);
    }

    #[test]
    fn test_confident_arabic_zone_retried_when_enabled() {
        let scripts = || {
            let primary = Arc::new(ScriptBackend {
                kind: EngineKind::Tesseract,
                french: vec![block("MOHAMED", 0.95, 0, 0, 40, 10)],
                arabic: vec![block("فاطمة", 0.95, 0, 0, 40, 10)],
            });
            let fallback = Arc::new(ScriptBackend {
                kind: EngineKind::PaddleOcr,
                french: vec![],
                arabic: vec![block("محمد", 0.70, 0, 0, 40, 10)],
            });
            OcrEngines::from_backends(primary, fallback)
        };
        let template = template(&format!("{}{}", zone("prenom_ar", "ar", 0.1), zone("prenom_fr", "fr", 0.3)));

        let engines = scripts();
        let default = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();
        assert_eq!(default.fields.value("prenom_ar"), Some("فاطمة"));
        assert!(default.fallback_used.is_empty());

        let engines = scripts();
        let retried = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .retry_arabic_zones(true)
            .extract(&card())
            .unwrap();
        assert_eq!(retried.fields.value("prenom_ar"), Some("محمد"));
        assert_eq!(retried.fields.value("prenom_fr"), Some("MOHAMED"));
        assert_eq!(retried.fallback_used, vec!["prenom_ar".to_string()]);
    }

    #[test]
    fn test_noisy_block_is_dropped_whole() {
        let blocks = vec![block("AB123456", 0.9, 0, 0, 40, 10), block("A|B*7", 0.9, 45, 0, 20, 10)];
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, blocks));
        let fallback = Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr));
        let engines = OcrEngines::from_backends(primary, fallback.clone());
        let template = template(&zone("cin", "fr", 0.8));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();

        assert_eq!(result.fields.value("cin"), Some("AB123456"));
        assert_eq!(fallback.calls(), 0);
    }

    #[test]
    fn test_dates_are_normalised() {
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, vec![block("29/06/1993", 0.9, 0, 0, 40, 10)]));
        let engines = OcrEngines::from_backends(primary, Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr)));
        let template = template(&zone("date_naissance", "fr", 0.5));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();
        assert_eq!(result.fields.value("date_naissance"), Some("29.06.1993"));
    }

    #[test]
    fn test_unreadable_zones_are_omitted() {
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, vec![block("|*#", 0.9, 0, 0, 40, 10)]));
        let fallback = Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr));
        let engines = OcrEngines::from_backends(primary, fallback.clone());
        let template = template(&format!("{}{}", zone("nom_fr", "fr", 0.1), zone("cin", "fr", 0.8)));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();

        assert!(result.fields.is_empty());
        assert_eq!(result.omitted, vec!["nom_fr".to_string(), "cin".to_string()]);
        assert_eq!(fallback.calls(), 2);
    }

    #[test]
    fn test_tiny_image_never_errors() {
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, vec![block("X1", 0.9, 0, 0, 1, 1)]));
        let engines = OcrEngines::from_backends(primary, Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr)));
        let store = TemplateStore::new(None);
        let template = store.get(DocumentType::CinNew).unwrap();
        let tiny = DocumentImage::new(RgbImage::new(3, 2), None);

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&tiny)
            .unwrap();
        assert_eq!(result.expected.len(), 9);
        assert_eq!(result.fields.len() + result.omitted.len(), 9);
    }

    #[test]
    fn test_zero_area_zone_is_omitted() {
        let template = ZoneTemplate::from_toml(
            "document = \"cin_new\"\nreference_width = 10\nreference_height = 10\n\
             [[zones]]\nname = \"cin\"\nbounds = [0.0, 0.0, 0.01, 0.01]\nlanguage = \"fr\"\n",
        )
        .unwrap();
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, vec![block("X1", 0.9, 0, 0, 1, 1)]));
        let engines = OcrEngines::from_backends(primary.clone(), Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr)));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none())
            .extract(&card())
            .unwrap();
        assert_eq!(result.omitted, vec!["cin".to_string()]);
        assert_eq!(primary.calls(), 0);
    }

    #[test]
    fn test_missing_engine_aborts() {
        let engines = OcrEngines::new(
            LazyEngine::new("tesseract", || Err(ExtractError::engine_unavailable("tesseract", "not installed"))),
            LazyEngine::ready(Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr))),
        );
        let template = template(&zone("cin", "fr", 0.8));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::none()).extract(&card());
        assert!(matches!(result, Err(ExtractError::EngineUnavailable { .. })));
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let primary = Arc::new(ScriptedBackend::new(EngineKind::Tesseract, vec![block("X1", 0.9, 0, 0, 1, 1)]));
        let engines = OcrEngines::from_backends(primary.clone(), Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr)));
        let template = template(&zone("cin", "fr", 0.8));

        let result = TemplateExtractor::new(&VariantConfig::CIN_NEW, &template, &engines, Deadline::after(Duration::ZERO))
            .extract(&card());
        assert!(matches!(result, Err(ExtractError::Timeout(_))));
        assert_eq!(primary.calls(), 0);
    }

    #[test]
    fn test_render_zones_outlines_template() {
        let store = TemplateStore::new(None);
        let template = store.get(DocumentType::CinNew).unwrap();
        let canvas = render_zones(&card(), &template);
        assert_eq!(canvas.dimensions(), (template.reference_width, template.reference_height));

        let cin = template.zone("cin").unwrap();
        let bounds = fraction_to_pixels(cin.bounds, canvas.width(), canvas.height());
        assert_eq!(*canvas.get_pixel(bounds.x, bounds.y), Rgb([0, 0, 220]));
    }

    #[test]
    fn test_variant_lookup() {
        assert_eq!(VariantConfig::for_document(DocumentType::CinOld).unwrap().confidence_threshold, 0.60);
        assert!(matches!(
            VariantConfig::for_document(DocumentType::CarteGriseVerso),
            Err(ExtractError::UnsupportedDocumentType(_))
        ));
    }
}
