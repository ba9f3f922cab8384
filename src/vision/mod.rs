//! Vision/OCR Layer
//!
//! Text extraction on document images. Two backends are supported:
//! - Tesseract (primary, runs the `tesseract` executable)
//! - PaddleOCR via ONNX Runtime (fallback)
//!
//! Pipelines never talk to a backend directly; they go through
//! [`OcrEngines`], which owns lazily initialised handles and can be built
//! from injected backends in tests.

pub mod models;
pub mod ocr;
pub mod ocr_preprocess;
pub mod preprocess;
pub mod tesseract;

use image::DynamicImage;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::Result;

pub use models::{ModelManager, ModelType, OnnxSession};
pub use ocr::PaddleOcrEngine;
pub use ocr_preprocess::{apply_profile, Crop, PreprocessProfile, PreprocessResult};
pub use tesseract::TesseractEngine;

/// Which engine produced a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Tesseract,
    PaddleOcr,
}

impl EngineKind {
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::Tesseract => "tesseract",
            EngineKind::PaddleOcr => "paddleocr",
        }
    }
}

/// Arabic block (U+0600 - U+06FF)
pub fn is_arabic_char(c: char) -> bool {
    ('\u{0600}'..='\u{06FF}').contains(&c)
}

/// Script the caller expects in a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageHint {
    French,
    Arabic,
    Mixed,
}

/// Axis-aligned pixel box
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn center_y(&self) -> f32 {
        self.y as f32 + self.height as f32 / 2.0
    }

    /// Smallest box covering both
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }
}

/// One recognised piece of text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionBlock {
    /// Recognised text
    pub text: String,
    /// Confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Position in the image handed to the engine
    pub bounds: BoundingBox,
    /// Engine that produced the text
    pub engine: EngineKind,
}

impl ExtractionBlock {
    pub fn new(text: impl Into<String>, confidence: f32, bounds: BoundingBox, engine: EngineKind) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bounds,
            engine,
        }
    }
}

/// An OCR engine
pub trait OcrBackend: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Recognise text in `image`. Blank images yield an empty list, not an error.
    fn recognize(&self, image: &DynamicImage, hint: LanguageHint) -> Result<Vec<ExtractionBlock>>;
}

type EngineInit = Box<dyn Fn() -> Result<Arc<dyn OcrBackend>> + Send + Sync>;

/// Engine handle created on first use.
///
/// The first caller runs the initialiser while holding the slot lock, so
/// concurrent callers wait and then reuse the same instance. Failed
/// initialisations are not cached.
pub struct LazyEngine {
    name: &'static str,
    slot: Mutex<Option<Arc<dyn OcrBackend>>>,
    init: EngineInit,
}

impl LazyEngine {
    pub fn new(
        name: &'static str,
        init: impl Fn() -> Result<Arc<dyn OcrBackend>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
            init: Box::new(init),
        }
    }

    /// Handle around an already constructed backend
    pub fn ready(backend: Arc<dyn OcrBackend>) -> Self {
        let name = backend.kind().name();
        let slot = Mutex::new(Some(backend.clone()));
        Self {
            name,
            slot,
            init: Box::new(move || Ok(backend.clone())),
        }
    }

    pub fn get(&self) -> Result<Arc<dyn OcrBackend>> {
        let mut slot = self.slot.lock();
        if let Some(engine) = slot.as_ref() {
            return Ok(engine.clone());
        }

        info!("Initializing {} OCR backend", self.name);
        let start = Instant::now();
        let engine = (self.init)()?;
        info!("{} initialized in {:?}", self.name, start.elapsed());
        *slot = Some(engine.clone());
        Ok(engine)
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Primary and fallback engine handles, shared by all requests
pub struct OcrEngines {
    primary: LazyEngine,
    fallback: LazyEngine,
}

impl OcrEngines {
    /// Tesseract primary, PaddleOCR fallback, both created on first use
    pub fn from_config(config: &AppConfig) -> Self {
        let tess_config = config.tesseract.clone();
        let paddle_config = config.paddle.clone();

        Self {
            primary: LazyEngine::new("tesseract", move || {
                let engine: Arc<dyn OcrBackend> = Arc::new(TesseractEngine::new(tess_config.clone())?);
                Ok(engine)
            }),
            fallback: LazyEngine::new("paddleocr", move || {
                let engine: Arc<dyn OcrBackend> = Arc::new(PaddleOcrEngine::from_config(&paddle_config)?);
                Ok(engine)
            }),
        }
    }

    pub fn new(primary: LazyEngine, fallback: LazyEngine) -> Self {
        Self { primary, fallback }
    }

    /// Use the given backends as-is
    pub fn from_backends(primary: Arc<dyn OcrBackend>, fallback: Arc<dyn OcrBackend>) -> Self {
        Self {
            primary: LazyEngine::ready(primary),
            fallback: LazyEngine::ready(fallback),
        }
    }

    pub fn primary(&self) -> Result<Arc<dyn OcrBackend>> {
        self.primary.get()
    }

    pub fn fallback(&self) -> Result<Arc<dyn OcrBackend>> {
        self.fallback.get()
    }
}

/// Crop `bounds` out of `page`, preprocess, recognise, and map the
/// resulting boxes back into page coordinates.
///
/// Small regions are upscaled first; a region outside the page yields no
/// blocks.
pub fn recognize_region(
    backend: &dyn OcrBackend,
    page: &DynamicImage,
    bounds: BoundingBox,
    hint: LanguageHint,
    profile: PreprocessProfile,
) -> Result<Vec<ExtractionBlock>> {
    let Crop::Region { image: region, origin } = ocr_preprocess::crop_pixels(page, bounds) else {
        debug!("Region {:?} is outside the page, skipping", bounds);
        return Ok(vec![]);
    };
    recognize_crop(backend, &region, origin, hint, profile)
}

/// Like [`recognize_region`] for a region already cut out at `origin`
pub fn recognize_crop(
    backend: &dyn OcrBackend,
    region: &DynamicImage,
    origin: BoundingBox,
    hint: LanguageHint,
    profile: PreprocessProfile,
) -> Result<Vec<ExtractionBlock>> {
    let auto_scale = ocr_preprocess::auto_upscale_factor(origin.width, origin.height);
    let region = if auto_scale > 1 && profile.scale() == 1 {
        debug!(
            "Auto-upscaling small region from {}x{} by {}x",
            origin.width, origin.height, auto_scale
        );
        ocr_preprocess::upscale(region, auto_scale)
    } else {
        region.clone()
    };
    let base_scale = if profile.scale() == 1 { auto_scale } else { 1 };

    let processed = apply_profile(&region, profile);
    let scale_factor = 1.0 / (base_scale * processed.scale) as f32;

    let blocks = backend.recognize(&processed.image, hint)?;
    Ok(blocks
        .into_iter()
        .map(|b| ExtractionBlock {
            bounds: BoundingBox {
                x: origin.x + (b.bounds.x as f32 * scale_factor) as u32,
                y: origin.y + (b.bounds.y as f32 * scale_factor) as u32,
                width: (b.bounds.width as f32 * scale_factor) as u32,
                height: (b.bounds.height as f32 * scale_factor) as u32,
            },
            ..b
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted OCR backends for pipeline tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the same blocks for every call and counts calls
    pub struct ScriptedBackend {
        pub kind: EngineKind,
        pub blocks: Vec<ExtractionBlock>,
        pub calls: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn new(kind: EngineKind, blocks: Vec<ExtractionBlock>) -> Self {
            Self {
                kind,
                blocks,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn empty(kind: EngineKind) -> Self {
            Self::new(kind, vec![])
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl OcrBackend for ScriptedBackend {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn recognize(&self, _image: &DynamicImage, _hint: LanguageHint) -> Result<Vec<ExtractionBlock>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.blocks.clone())
        }
    }

    pub fn block(text: &str, confidence: f32, x: u32, y: u32, width: u32, height: u32) -> ExtractionBlock {
        ExtractionBlock::new(text, confidence, BoundingBox::new(x, y, width, height), EngineKind::Tesseract)
    }
}
