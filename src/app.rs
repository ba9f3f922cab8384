//! Extraction Coordinator
//!
//! Owns the shared template cache and OCR engines and routes each
//! document to the ID-card or vehicle-card pipeline.

use crossbeam_channel::{bounded, RecvTimeoutError};
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::document::detector::detect_family;
use crate::document::{DocumentFamily, DocumentImage, DocumentType};
use crate::error::{ExtractError, Result};
use crate::extraction::assembler::{assemble, ExtractionResponse, PipelineOutput};
use crate::extraction::classifier::classify;
use crate::extraction::id_card::{self, TemplateExtractor, VariantConfig};
use crate::extraction::vehicle::VehicleExtractor;
use crate::extraction::Deadline;
use crate::storage::TemplateStore;
use crate::vision::OcrEngines;

/// Entry point for document extraction.
///
/// Cheap to clone; clones share templates and engines.
#[derive(Clone)]
pub struct DocumentExtractor {
    config: Arc<AppConfig>,
    templates: Arc<TemplateStore>,
    engines: Arc<OcrEngines>,
}

impl DocumentExtractor {
    /// Load templates and prepare engines. Engines start on first use.
    pub fn new(config: AppConfig) -> Result<Self> {
        let templates = TemplateStore::new(config.general.template_dir.clone());
        templates.preload()?;
        let engines = OcrEngines::from_config(&config);
        Ok(Self::with_engines(config, Arc::new(templates), Arc::new(engines)))
    }

    /// Build around existing templates and engines
    pub fn with_engines(config: AppConfig, templates: Arc<TemplateStore>, engines: Arc<OcrEngines>) -> Self {
        Self {
            config: Arc::new(config),
            templates,
            engines,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Extract fields with no time limit
    pub fn extract(&self, image: &DocumentImage) -> Result<ExtractionResponse> {
        self.run(image, Deadline::none())
    }

    /// Extract fields on a worker thread, giving up after `timeout`.
    ///
    /// The worker stops issuing OCR calls once the deadline passes, so an
    /// abandoned request winds down on its own.
    pub fn extract_with_timeout(&self, image: DocumentImage, timeout: Duration) -> Result<ExtractionResponse> {
        let (tx, rx) = bounded(1);
        let worker = self.clone();
        let deadline = Deadline::after(timeout);

        std::thread::Builder::new()
            .name("mardoc-extract".to_string())
            .spawn(move || {
                let result = worker.run(&image, deadline);
                // The caller may already have given up
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Extraction exceeded {:?}, abandoning worker", timeout);
                Err(ExtractError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(ExtractError::Worker("worker exited without a result".to_string()))
            }
        }
    }

    /// Card resized to its template with zones outlined; `None` for vehicle cards
    pub fn render_zones(&self, image: &DocumentImage, document: DocumentType) -> Result<Option<RgbImage>> {
        if !document.is_id_card() {
            return Ok(None);
        }
        let template = self.templates.get(document)?;
        Ok(Some(id_card::render_zones(image, &template)))
    }

    fn run(&self, image: &DocumentImage, deadline: Deadline) -> Result<ExtractionResponse> {
        let start = Instant::now();
        let declared = image.declared;

        let (family, detection) = match declared {
            Some(document) => (document.family(), None),
            None => {
                let primary = self.engines.primary()?;
                let detection = detect_family(image, primary.as_ref(), &deadline)?;
                (detection.family, Some(detection))
            }
        };
        debug!("Processing {}x{} image as {:?}", image.width(), image.height(), family);

        let extraction_start = Instant::now();
        let output = match family {
            DocumentFamily::IdCard => self.run_id_card(image, deadline)?,
            DocumentFamily::VehicleCard => {
                let extractor = VehicleExtractor::new(&self.config.vehicle, &self.engines, deadline);
                PipelineOutput::Vehicle(extractor.extract(image, declared)?)
            }
        };
        let extraction_time = extraction_start.elapsed();

        let response = assemble(declared, output, detection, extraction_time, start.elapsed());
        info!(
            "Extracted {} fields from {} ({:?}) in {}ms",
            response.fields.len(),
            response.resolved_type,
            response.metadata.status,
            response.metadata.timings.total_ms
        );
        if response.type_overridden {
            warn!(
                "Declared type {:?} overridden by detected {}",
                declared, response.resolved_type
            );
        }
        Ok(response)
    }

    fn run_id_card(&self, image: &DocumentImage, deadline: Deadline) -> Result<PipelineOutput> {
        let classification = classify(&image.pixels);
        info!(
            "Classified ID card as {} (new {}, old {})",
            classification.variant, classification.score_new, classification.score_old
        );

        let variant = VariantConfig::for_document(classification.variant)?;
        let template = self.templates.get(variant.document)?;
        let extraction = TemplateExtractor::new(variant, &template, &self.engines, deadline)
            .retry_arabic_zones(self.config.id_card.retry_arabic_zones)
            .extract(image)?;

        Ok(PipelineOutput::IdCard {
            extraction,
            classification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::assembler::ExtractionStatus;
    use crate::vision::testing::{block, ScriptedBackend};
    use crate::vision::{EngineKind, ExtractionBlock, LanguageHint, LazyEngine, OcrBackend};
    use image::{DynamicImage, Rgb};

    fn extractor(primary: ScriptedBackend, fallback: ScriptedBackend) -> DocumentExtractor {
        DocumentExtractor::with_engines(
            AppConfig::default(),
            Arc::new(TemplateStore::new(None)),
            Arc::new(OcrEngines::from_backends(Arc::new(primary), Arc::new(fallback))),
        )
    }

    fn red_card() -> RgbImage {
        RgbImage::from_pixel(1000, 630, Rgb([205, 90, 110]))
    }

    struct SlowBackend;

    impl OcrBackend for SlowBackend {
        fn kind(&self) -> EngineKind {
            EngineKind::Tesseract
        }

        fn recognize(&self, _image: &DynamicImage, _hint: LanguageHint) -> Result<Vec<ExtractionBlock>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(vec![])
        }
    }

    #[test]
    fn test_blank_vehicle_card() {
        let app = extractor(
            ScriptedBackend::empty(EngineKind::Tesseract),
            ScriptedBackend::empty(EngineKind::PaddleOcr),
        );
        let image = DocumentImage::new(
            RgbImage::from_pixel(800, 500, Rgb([255, 255, 255])),
            Some(DocumentType::CarteGriseRecto),
        );

        let response = app.extract(&image).unwrap();
        assert!(response.success);
        assert!(response.fields.is_empty());
        assert_eq!(response.resolved_type, DocumentType::CarteGriseRecto);
        assert_eq!(response.metadata.status, ExtractionStatus::NoFieldsFound);
        assert!(response.metadata.family_detection.is_none());
    }

    #[test]
    fn test_colour_overrides_declared_variant() {
        let app = extractor(
            ScriptedBackend::new(EngineKind::Tesseract, vec![block("AB123456", 0.95, 2, 2, 60, 20)]),
            ScriptedBackend::empty(EngineKind::PaddleOcr),
        );
        let image = DocumentImage::new(red_card(), Some(DocumentType::CinOld));

        let response = app.extract(&image).unwrap();
        assert_eq!(response.resolved_type, DocumentType::CinNew);
        assert!(response.type_overridden);
        assert_eq!(response.fields.value("cin"), Some("AB123456"));
        assert!(response.metadata.classification.is_some());
    }

    #[test]
    fn test_undeclared_vehicle_card_is_detected() {
        let blocks = vec![
            block("Propriétaire", 0.9, 20, 200, 120, 20),
            block("Marque", 0.9, 20, 300, 80, 20),
        ];
        let app = extractor(
            ScriptedBackend::new(EngineKind::Tesseract, blocks),
            ScriptedBackend::empty(EngineKind::PaddleOcr),
        );
        let image = DocumentImage::new(RgbImage::from_pixel(1000, 600, Rgb([230, 230, 230])), None);

        let response = app.extract(&image).unwrap();
        let detection = response.metadata.family_detection.as_ref().unwrap();
        assert_eq!(detection.family, DocumentFamily::VehicleCard);
        assert!(!response.resolved_type.is_id_card());
        assert!(!response.type_overridden);
    }

    #[test]
    fn test_missing_engine_is_fatal() {
        let engines = OcrEngines::new(
            LazyEngine::new("tesseract", || Err(ExtractError::engine_unavailable("tesseract", "not installed"))),
            LazyEngine::ready(Arc::new(ScriptedBackend::empty(EngineKind::PaddleOcr))),
        );
        let app = DocumentExtractor::with_engines(AppConfig::default(), Arc::new(TemplateStore::new(None)), Arc::new(engines));

        let result = app.extract(&DocumentImage::new(red_card(), Some(DocumentType::CinNew)));
        assert!(matches!(result, Err(ExtractError::EngineUnavailable { .. })));
    }

    #[test]
    fn test_timeout() {
        let engines = OcrEngines::from_backends(Arc::new(SlowBackend), Arc::new(SlowBackend));
        let app = DocumentExtractor::with_engines(AppConfig::default(), Arc::new(TemplateStore::new(None)), Arc::new(engines));
        let image = DocumentImage::new(red_card(), Some(DocumentType::CinNew));

        let started = Instant::now();
        let result = app.extract_with_timeout(image, Duration::from_millis(50));
        assert!(matches!(result, Err(ExtractError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn test_fast_request_within_timeout() {
        let app = extractor(
            ScriptedBackend::empty(EngineKind::Tesseract),
            ScriptedBackend::empty(EngineKind::PaddleOcr),
        );
        let image = DocumentImage::new(
            RgbImage::from_pixel(400, 300, Rgb([255, 255, 255])),
            Some(DocumentType::CarteGriseVerso),
        );

        let response = app.extract_with_timeout(image, Duration::from_secs(5)).unwrap();
        assert_eq!(response.metadata.status, ExtractionStatus::NoFieldsFound);
    }

    #[test]
    fn test_render_zones() {
        let app = extractor(
            ScriptedBackend::empty(EngineKind::Tesseract),
            ScriptedBackend::empty(EngineKind::PaddleOcr),
        );
        let image = DocumentImage::new(RgbImage::from_pixel(500, 315, Rgb([200, 200, 200])), None);

        let rendered = app.render_zones(&image, DocumentType::CinNew).unwrap().unwrap();
        assert_eq!(rendered.dimensions(), (1000, 630));
        assert!(app.render_zones(&image, DocumentType::CarteGriseRecto).unwrap().is_none());
    }
}
