//! PaddleOCR backend
//!
//! Text detection (DBNet) and recognition (CRNN with CTC decoding) through
//! ONNX Runtime. Used as the fallback engine for low-confidence or empty
//! primary reads.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

use super::models::{ModelManager, ModelType, OnnxSession};
use super::preprocess::{prepare_detection, prepare_recognition, TensorConfig};
use super::{ocr_preprocess, BoundingBox, EngineKind, ExtractionBlock, LanguageHint, OcrBackend};
use crate::config::PaddleConfig;
use crate::error::{ExtractError, Result};

/// Detection boxes with a shorter side than this (in map pixels) are noise
const MIN_BOX_SIDE: u32 = 3;
/// Upper bound on candidate regions per image
const MAX_CANDIDATES: usize = 1000;

/// OCR engine using PaddleOCR models via ONNX Runtime
pub struct PaddleOcrEngine {
    detector: Mutex<OnnxSession>,
    recognizer: Mutex<OnnxSession>,
    charset: Vec<String>,
    tensors: TensorConfig,
    det_threshold: f32,
    box_threshold: f32,
    unclip_ratio: f32,
}

impl PaddleOcrEngine {
    /// Fetch (if needed) and load the configured models
    pub fn from_config(config: &PaddleConfig) -> Result<Self> {
        let unavailable = |e: anyhow::Error| ExtractError::engine_unavailable("paddleocr", format!("{:#}", e));

        let manager = ModelManager::from_config(config).map_err(unavailable)?;
        let det_path = manager.ensure_model(ModelType::Detection).map_err(unavailable)?;
        let rec_path = manager.ensure_model(ModelType::Recognition).map_err(unavailable)?;
        let dict_path = manager.ensure_model(ModelType::Dictionary).map_err(unavailable)?;

        let detector = OnnxSession::new(&det_path, config.use_gpu).map_err(unavailable)?;
        let recognizer = OnnxSession::new(&rec_path, config.use_gpu).map_err(unavailable)?;
        let charset = load_charset(&dict_path)?;

        info!("PaddleOCR ready with {} recognisable symbols", charset.len() - 1);

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
            charset,
            tensors: TensorConfig::default(),
            det_threshold: config.det_threshold,
            box_threshold: config.box_threshold,
            unclip_ratio: config.unclip_ratio,
        })
    }

    /// Text boxes in image coordinates with their detection scores
    fn detect(&self, image: &image::RgbImage) -> Result<Vec<(BoundingBox, f32)>> {
        let input = prepare_detection(image, &self.tensors);
        let (_, _, map_height, map_width) = input.tensor.dim();

        let tensor = TensorRef::from_array_view(&input.tensor).map_err(inference_error)?;
        let mut session = self.detector.lock();
        let outputs = session
            .session_mut()
            .run(ort::inputs![tensor])
            .map_err(inference_error)?;
        let (shape, probabilities) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;

        // Output is (1, 1, H, W)
        if shape.len() != 4 || probabilities.len() != map_width * map_height {
            return Err(ExtractError::region(
                "paddleocr",
                format!("unexpected detection output shape {:?}", shape),
            ));
        }

        let boxes = boxes_from_probability_map(
            probabilities,
            map_width as u32,
            map_height as u32,
            self.det_threshold,
            self.box_threshold,
            self.unclip_ratio,
        );

        Ok(boxes
            .into_iter()
            .map(|(b, score)| {
                let scaled = BoundingBox {
                    x: (b.x as f32 * input.scale_x) as u32,
                    y: (b.y as f32 * input.scale_y) as u32,
                    width: (b.width as f32 * input.scale_x).ceil() as u32,
                    height: (b.height as f32 * input.scale_y).ceil() as u32,
                };
                (scaled, score)
            })
            .collect())
    }

    fn read_line(&self, crop: &image::RgbImage) -> Result<(String, f32)> {
        let input = prepare_recognition(crop, &self.tensors);
        let tensor = TensorRef::from_array_view(&input).map_err(inference_error)?;

        let mut session = self.recognizer.lock();
        let outputs = session
            .session_mut()
            .run(ort::inputs![tensor])
            .map_err(inference_error)?;
        let (shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;

        // Output is (1, T, C)
        if shape.len() != 3 {
            return Err(ExtractError::region(
                "paddleocr",
                format!("unexpected recognition output shape {:?}", shape),
            ));
        }
        let steps = shape[1] as usize;
        let classes = shape[2] as usize;

        Ok(ctc_greedy_decode(logits, steps, classes, &self.charset))
    }
}

impl OcrBackend for PaddleOcrEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::PaddleOcr
    }

    fn recognize(&self, image: &DynamicImage, _hint: LanguageHint) -> Result<Vec<ExtractionBlock>> {
        if ocr_preprocess::is_near_blank(image) {
            return Ok(vec![]);
        }

        let rgb = image.to_rgb8();
        let boxes = self.detect(&rgb)?;
        debug!("PaddleOCR detected {} text boxes", boxes.len());

        let mut blocks = Vec::with_capacity(boxes.len());
        for (bounds, _score) in boxes {
            let x = bounds.x.min(rgb.width());
            let y = bounds.y.min(rgb.height());
            let width = bounds.width.min(rgb.width() - x);
            let height = bounds.height.min(rgb.height() - y);
            if width == 0 || height == 0 {
                continue;
            }

            let crop = image::imageops::crop_imm(&rgb, x, y, width, height).to_image();
            let (text, confidence) = self.read_line(&crop)?;
            if text.trim().is_empty() {
                continue;
            }
            blocks.push(ExtractionBlock::new(
                text.trim(),
                confidence,
                BoundingBox::new(x, y, width, height),
                EngineKind::PaddleOcr,
            ));
        }

        // Reading order: top to bottom, then left to right
        blocks.sort_by(|a, b| {
            (a.bounds.y, a.bounds.x).cmp(&(b.bounds.y, b.bounds.x))
        });
        Ok(blocks)
    }
}

fn inference_error(e: ort::Error) -> ExtractError {
    ExtractError::region("paddleocr", e)
}

/// Read the dictionary: index 0 is the CTC blank, a trailing space is appended
pub fn load_charset(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(charset_from_dictionary(&content))
}

fn charset_from_dictionary(content: &str) -> Vec<String> {
    let mut charset = vec![String::new()];
    charset.extend(
        content
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(str::to_string),
    );
    charset.push(" ".to_string());
    charset
}

/// Threshold a DBNet probability map and turn connected regions into
/// expanded boxes (map coordinates) with their mean probability
pub fn boxes_from_probability_map(
    probabilities: &[f32],
    width: u32,
    height: u32,
    det_threshold: f32,
    box_threshold: f32,
    unclip_ratio: f32,
) -> Vec<(BoundingBox, f32)> {
    let bitmap = GrayImage::from_fn(width, height, |x, y| {
        let p = probabilities[(y * width + x) as usize];
        Luma([if p > det_threshold { 255 } else { 0 }])
    });

    let mut boxes = Vec::new();
    for contour in find_contours::<u32>(&bitmap).into_iter().take(MAX_CANDIDATES) {
        if contour.border_type != BorderType::Outer || contour.points.is_empty() {
            continue;
        }

        let min_x = contour.points.iter().map(|p| p.x).min().unwrap_or(0);
        let max_x = contour.points.iter().map(|p| p.x).max().unwrap_or(0);
        let min_y = contour.points.iter().map(|p| p.y).min().unwrap_or(0);
        let max_y = contour.points.iter().map(|p| p.y).max().unwrap_or(0);
        let box_w = max_x - min_x + 1;
        let box_h = max_y - min_y + 1;
        if box_w.min(box_h) < MIN_BOX_SIDE {
            continue;
        }

        let mut sum = 0.0f32;
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                sum += probabilities[(y * width + x) as usize];
            }
        }
        let score = sum / (box_w * box_h) as f32;
        if score < box_threshold {
            continue;
        }

        // Offset distance = area * ratio / perimeter, as in the DB paper
        let distance = (box_w * box_h) as f32 * unclip_ratio / (2 * (box_w + box_h)) as f32;
        let pad = distance.round() as u32;
        let x = min_x.saturating_sub(pad);
        let y = min_y.saturating_sub(pad);
        let right = (max_x + 1 + pad).min(width);
        let bottom = (max_y + 1 + pad).min(height);

        boxes.push((BoundingBox::new(x, y, right - x, bottom - y), score));
    }

    boxes
}

/// Greedy CTC decoding over a (steps x classes) probability matrix.
///
/// Repeated indices collapse, the blank (index 0) is dropped, and the
/// confidence is the mean probability of the emitted symbols.
pub fn ctc_greedy_decode(logits: &[f32], steps: usize, classes: usize, charset: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut probs = Vec::new();
    let mut previous = 0usize;

    for step in 0..steps {
        let row = &logits[step * classes..(step + 1) * classes];
        let (index, prob) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        if index != 0 && index != previous {
            if let Some(symbol) = charset.get(index) {
                text.push_str(symbol);
                probs.push(prob);
            }
        }
        previous = index;
    }

    let confidence = if probs.is_empty() {
        0.0
    } else {
        probs.iter().sum::<f32>() / probs.len() as f32
    };

    if text.chars().any(super::is_arabic_char) {
        (logical_order(&text), confidence)
    } else {
        (text, confidence)
    }
}

/// The Arabic model emits symbols left to right in visual order. Reverse
/// the sequence while keeping runs of Latin letters and digits intact.
fn logical_order(visual: &str) -> String {
    let keeps_run = |c: char| c.is_ascii_alphanumeric() || ":*./%+-".contains(c);

    let mut segments: Vec<String> = Vec::new();
    let mut run = String::new();
    for c in visual.chars() {
        if keeps_run(c) {
            run.push(c);
        } else {
            if !run.is_empty() {
                segments.push(std::mem::take(&mut run));
            }
            segments.push(c.to_string());
        }
    }
    if !run.is_empty() {
        segments.push(run);
    }

    segments.reverse();
    segments.concat()
}
