//! Vehicle registration card extraction
//!
//! The card has no fixed geometry worth templating, so the page is read
//! once, clustered into lines, and values are found next to their printed
//! labels: right of a French label, left of an Arabic one.
//!
//! Stages run in a fixed order:
//! `Loaded -> OcrScanned -> LinesGrouped -> BlocksMerged -> SideClassified
//! -> FieldsTagged -> LowConfCorrected -> ZoneFiltered -> Parsed`.
//! A page without usable lines ends in `NoFieldsFound`.

use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::VehicleConfig;
use crate::document::{DocumentFamily, DocumentImage, DocumentType};
use crate::error::{ExtractError, Result};
use crate::vision::{
    recognize_region, BoundingBox, LanguageHint, OcrBackend, OcrEngines, PreprocessProfile,
};

use super::layout::{dynamic_tolerance, group_lines, merge_lines, KeyTag, LayoutBlock, Line};
use super::similarity::fuzzy_text_similarity;
use super::{
    has_meaningful_char, is_arabic_or_digit, is_date_field, normalize_date, Deadline, FieldLanguage, FieldMap,
    FieldRecord,
};

/// Similarity at which any text is treated as a label rather than a value
const KEY_SIMILARITY: f32 = 0.65;
/// Horizontal slack when following a multi-line value onto the next line
const CONTINUATION_SLACK: f32 = 20.0;

/// One printed field label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLabel {
    /// Output key, suffixed with `_fr` / `_ar`
    pub key: &'static str,
    pub fr: &'static str,
    pub ar: &'static str,
    /// Value may continue on the following lines
    pub multi_line: bool,
}

const fn label(key: &'static str, fr: &'static str, ar: &'static str) -> FieldLabel {
    FieldLabel {
        key,
        fr,
        ar,
        multi_line: false,
    }
}

pub const RECTO_FIELDS: &[FieldLabel] = &[
    label("numero_immatriculation", "Numéro d'immatriculation", "رقم التسجيل"),
    label("immatriculation_anterieure", "Immatriculation antérieure", "الترقيم السابق"),
    label("premiere_mise_circulation", "Première mise en circulation", "أول شروع في الإستخدام"),
    label("mc_maroc", "M.C au maroc", "أول استخدام بالمغرب"),
    label("date_mutation", "Mutation le", "تحويل بتاريخ"),
    label("usage", "Usage", "نوع الإستعمال"),
    FieldLabel {
        key: "proprietaire",
        fr: "Propriétaire",
        ar: "المالك",
        multi_line: true,
    },
    FieldLabel {
        key: "adresse",
        fr: "Adresse",
        ar: "العنوان",
        multi_line: true,
    },
    label("fin_validite", "Fin de validité", "نهاية الصلاحية"),
];

pub const VERSO_FIELDS: &[FieldLabel] = &[
    label("marque", "Marque", "الاسم التجاري"),
    label("type", "Type", "الصنف"),
    label("genre", "Genre", "النوع"),
    label("modele", "Modèle", "النموذج"),
    label("type_carburant", "Type carburant", "نوع الوقود"),
    label("numero_chassis", "N° du chassis", "رقم الإطار الحديدي"),
    label("nombre_cylindres", "Nombre de cylindres", "عدد الأسطوانات"),
    label("puissance_fiscale", "Puissance fiscale", "القوة الجبائية"),
    label("nombre_places", "Nombre de places", "عدد المقاعد"),
    label("ptac", "P.T.A.C", "الوزن جمالي"),
    label("poids_vide", "Poids à vide", "الوزن الفارغ"),
    label("ptra", "P.T.R.A", "الوزن الإجمالي مع المجرور"),
    label("restrictions", "Restrictions", "التقييدات"),
];

/// Layout parameters of one card face
#[derive(Debug)]
pub struct SideProfile {
    pub document: DocumentType,
    pub fields: &'static [FieldLabel],
    /// French labels that identify this face
    pub anchors: &'static [&'static str],
    /// Lines must start inside this band (fractions of the page height)
    pub band: (f32, f32),
    /// Merge gap in average glyph widths
    pub merge_spacing: f32,
}

pub const RECTO: SideProfile = SideProfile {
    document: DocumentType::CarteGriseRecto,
    fields: RECTO_FIELDS,
    anchors: &["Propriétaire", "Adresse", "Usage"],
    band: (0.20, 0.90),
    merge_spacing: 2.0,
};

pub const VERSO: SideProfile = SideProfile {
    document: DocumentType::CarteGriseVerso,
    fields: VERSO_FIELDS,
    anchors: &["Marque", "Type", "Genre", "Modèle"],
    band: (0.001, 0.95),
    merge_spacing: 1.8,
};

impl SideProfile {
    pub fn for_document(document: DocumentType) -> Result<&'static SideProfile> {
        match document {
            DocumentType::CarteGriseRecto => Ok(&RECTO),
            DocumentType::CarteGriseVerso => Ok(&VERSO),
            other => Err(ExtractError::UnsupportedDocumentType(format!(
                "{} is not a vehicle card face",
                other
            ))),
        }
    }

    /// Pixel rows a line may start on
    fn band_rows(&self, page_height: u32) -> (f32, f32) {
        let h = page_height as f32;
        (self.band.0 * h, self.band.1 * h)
    }

    fn in_band(&self, line: &Line, page_height: u32) -> bool {
        let (top, bottom) = self.band_rows(page_height);
        line.top().is_some_and(|y| (top..=bottom).contains(&(y as f32)))
    }

    /// Text resembles any label of this face
    fn looks_like_key(&self, text: &str) -> bool {
        self.fields.iter().any(|f| {
            fuzzy_text_similarity(text, f.fr) >= KEY_SIMILARITY || fuzzy_text_similarity(text, f.ar) >= KEY_SIMILARITY
        })
    }

    fn line_has_key(&self, line: &Line) -> bool {
        line.blocks.iter().any(|b| b.is_key() || self.looks_like_key(&b.text))
    }
}

/// Pipeline position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStage {
    Loaded,
    OcrScanned,
    LinesGrouped,
    BlocksMerged,
    SideClassified,
    FieldsTagged,
    LowConfCorrected,
    ZoneFiltered,
    Parsed,
    NoFieldsFound,
}

impl VehicleStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VehicleStage::Parsed | VehicleStage::NoFieldsFound)
    }

    fn advance(&mut self, next: VehicleStage) {
        debug!("Vehicle pipeline: {} -> {}", self, next);
        *self = next;
    }
}

impl fmt::Display for VehicleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VehicleStage::Loaded => "loaded",
            VehicleStage::OcrScanned => "ocr_scanned",
            VehicleStage::LinesGrouped => "lines_grouped",
            VehicleStage::BlocksMerged => "blocks_merged",
            VehicleStage::SideClassified => "side_classified",
            VehicleStage::FieldsTagged => "fields_tagged",
            VehicleStage::LowConfCorrected => "low_conf_corrected",
            VehicleStage::ZoneFiltered => "zone_filtered",
            VehicleStage::Parsed => "parsed",
            VehicleStage::NoFieldsFound => "no_fields_found",
        };
        write!(f, "{}", name)
    }
}

/// Which face the page shows and on what evidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideDecision {
    pub side: DocumentType,
    pub recto_anchors: usize,
    pub verso_anchors: usize,
    /// A vehicle face was declared and the page showed the other one
    pub overridden: bool,
}

/// Count the distinct anchors of each face among the merged blocks and
/// pick a face.
///
/// A face reaching `min_anchors` while the other does not wins; otherwise
/// the higher count wins. Equal counts keep the declared face, or recto
/// when none was declared.
pub fn classify_side(lines: &[Line], declared: Option<DocumentType>, min_anchors: usize, similarity: f32) -> SideDecision {
    let count = |anchors: &[&str]| {
        anchors
            .iter()
            .filter(|anchor| {
                lines
                    .iter()
                    .flat_map(|l| l.blocks.iter())
                    .any(|b| !b.text.is_empty() && fuzzy_text_similarity(&b.text, anchor) >= similarity)
            })
            .count()
    };
    let recto_anchors = count(RECTO.anchors);
    let verso_anchors = count(VERSO.anchors);

    let declared_side = declared.filter(|d| d.family() == DocumentFamily::VehicleCard);
    let recto_ok = recto_anchors >= min_anchors;
    let verso_ok = verso_anchors >= min_anchors;

    let side = if recto_ok && !verso_ok {
        DocumentType::CarteGriseRecto
    } else if verso_ok && !recto_ok {
        DocumentType::CarteGriseVerso
    } else if recto_anchors > verso_anchors {
        DocumentType::CarteGriseRecto
    } else if verso_anchors > recto_anchors {
        DocumentType::CarteGriseVerso
    } else {
        declared_side.unwrap_or(DocumentType::CarteGriseRecto)
    };

    SideDecision {
        side,
        recto_anchors,
        verso_anchors,
        overridden: declared_side.is_some_and(|d| d != side),
    }
}

/// Best label for `text` in one language, if similar enough
fn best_label(text: &str, fields: &'static [FieldLabel], arabic: bool, threshold: f32) -> Option<&'static FieldLabel> {
    let mut best: Option<(&'static FieldLabel, f32)> = None;
    for field in fields {
        let label = if arabic { field.ar } else { field.fr };
        let ratio = fuzzy_text_similarity(text, label);
        if best.map_or(true, |(_, r)| ratio > r) {
            best = Some((field, ratio));
        }
    }
    best.filter(|(_, r)| *r >= threshold).map(|(f, _)| f)
}

/// Mark the first label on each line.
///
/// A tagged block takes the canonical label text. Lines are trimmed to the
/// label's value side: blocks right of an Arabic label and left of a
/// French label are dropped.
pub fn tag_fields(lines: &mut [Line], side: &SideProfile, threshold: f32) {
    for line in lines.iter_mut() {
        let mut cut = None;
        for (idx, block) in line.blocks.iter_mut().enumerate() {
            let tagged = best_label(&block.text, side.fields, false, threshold)
                .map(|f| (f, false))
                .or_else(|| best_label(&block.text, side.fields, true, threshold).map(|f| (f, true)));

            match tagged {
                Some((field, arabic)) => {
                    block.text = if arabic { field.ar } else { field.fr }.to_string();
                    block.key = Some(KeyTag {
                        field: field.key,
                        arabic,
                    });
                    block.confidence = 0.9;
                    cut = Some((idx, arabic));
                    break;
                }
                None => block.key = None,
            }
        }

        match cut {
            Some((idx, true)) => line.blocks.truncate(idx + 1),
            Some((idx, false)) => {
                line.blocks.drain(..idx);
            }
            None => {}
        }
    }
}

/// Crop around a block, reaching to the neighbouring lines and blocks
pub fn expanded_bounds(lines: &[Line], line_idx: usize, block_idx: usize, width: u32, height: u32) -> BoundingBox {
    let line = &lines[line_idx];
    let block = &line.blocks[block_idx].bounds;

    let prev_bottom = line_idx
        .checked_sub(1)
        .and_then(|i| lines[i].bottom())
        .unwrap_or(0);
    let next_top = lines
        .get(line_idx + 1)
        .and_then(Line::min_top)
        .unwrap_or(height.saturating_sub(10));
    let top = block.y.min(prev_bottom);
    let bottom = block.bottom().max(next_top).min(height);

    let prev_right = block_idx
        .checked_sub(1)
        .map(|i| line.blocks[i].bounds.right())
        .unwrap_or(0);
    let next_left = line.blocks.get(block_idx + 1).map(|b| b.bounds.x).unwrap_or(width);
    let left = block.x.min(prev_right);
    let right = block.right().max(next_left).min(width);

    BoundingBox {
        x: left,
        y: top,
        width: right.saturating_sub(left).max(1),
        height: bottom.saturating_sub(top).max(1),
    }
}

/// Drop lines outside the face's band and non-key blocks without a letter or digit
pub fn filter_zone(lines: Vec<Line>, side: &SideProfile, page_height: u32) -> Vec<Line> {
    lines
        .into_iter()
        .filter(|line| side.in_band(line, page_height))
        .map(|mut line| {
            line.blocks.retain(|b| b.is_key() || has_meaningful_char(&b.text));
            line
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Value read for one language of one field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedValue {
    pub text: String,
    pub confidence: f32,
    pub engine: Option<crate::vision::EngineKind>,
}

/// French and Arabic values found next to one label pair
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedField {
    pub key: &'static str,
    pub fr: ParsedValue,
    pub ar: ParsedValue,
}

fn position_of(line: &Line, label: &str) -> Option<usize> {
    line.blocks
        .iter()
        .position(|b| fuzzy_text_similarity(&b.text, label) >= KEY_SIMILARITY)
}

fn value_from(block: &LayoutBlock, side: &SideProfile) -> ParsedValue {
    if side.looks_like_key(&block.text) {
        return ParsedValue::default();
    }
    ParsedValue {
        text: block.text.clone(),
        confidence: block.confidence,
        engine: Some(block.engine),
    }
}

/// Continuation text on a following line: first block right of a French
/// label in the left half, or last block left of an Arabic label in the
/// right half
fn continuation(key: &LayoutBlock, next: &Line, arabic: bool, page_width: u32) -> Option<String> {
    let mid = page_width as f32 / 2.0;
    let key_x = key.bounds.x as f32;
    if arabic {
        let limit = key_x + key.bounds.width as f32 - CONTINUATION_SLACK;
        next.blocks
            .iter()
            .rev()
            .find(|b| (b.bounds.x as f32) < limit && b.bounds.right() as f32 > mid)
            .map(|b| b.text.clone())
    } else {
        next.blocks
            .iter()
            .find(|b| b.bounds.x as f32 > key_x + CONTINUATION_SLACK && (b.bounds.x as f32) < mid)
            .map(|b| b.text.clone())
    }
}

fn extract_value(
    lines: &[Line],
    idx: usize,
    key_pos: Option<usize>,
    field: &FieldLabel,
    arabic: bool,
    side: &SideProfile,
    page_width: u32,
) -> ParsedValue {
    let line = &lines[idx];
    let Some(pos) = key_pos else {
        return ParsedValue::default();
    };

    let neighbour = if arabic { pos.checked_sub(1) } else { Some(pos + 1) };
    let mut value = neighbour
        .and_then(|i| line.blocks.get(i))
        .map(|b| value_from(b, side))
        .unwrap_or_default();

    if field.multi_line {
        let key = &line.blocks[pos];
        for next in lines[idx + 1..].iter().take_while(|l| !side.line_has_key(l)) {
            if let Some(extra) = continuation(key, next, arabic, page_width) {
                value.text = format!("{} {}", value.text, extra).trim().to_string();
            }
        }
    }
    value
}

/// Pair each label with the value beside it. One field per line.
pub fn parse_lines(lines: &[Line], side: &SideProfile, page_width: u32) -> Vec<ParsedField> {
    let mut parsed = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        for field in side.fields {
            let pos_fr = position_of(line, field.fr);
            let pos_ar = position_of(line, field.ar);
            if pos_fr.is_none() && pos_ar.is_none() {
                continue;
            }

            parsed.push(ParsedField {
                key: field.key,
                fr: extract_value(lines, idx, pos_fr, field, false, side, page_width),
                ar: extract_value(lines, idx, pos_ar, field, true, side, page_width),
            });
            break;
        }
    }
    parsed
}

fn record(name: String, value: &ParsedValue) -> FieldRecord {
    let text = if is_date_field(&name) {
        normalize_date(&value.text)
    } else {
        value.text.trim().to_string()
    };
    FieldRecord {
        language: FieldLanguage::from_field_name(&name),
        name,
        value: text,
        confidence: value.confidence,
        engine: value.engine.unwrap_or(crate::vision::EngineKind::Tesseract),
    }
}

/// Turn label/value pairs into `<key>_fr` / `<key>_ar` fields.
///
/// Identical French and Arabic readings are one value, keyed `_ar` when it
/// holds Arabic letters or digits and `_fr` otherwise. A later reading of a
/// key replaces the earlier one but keeps its position.
pub fn flatten(parsed: &[ParsedField]) -> FieldMap {
    let mut fields = FieldMap::new();
    for item in parsed {
        let fr = item.fr.text.trim();
        let ar = item.ar.text.trim();
        if fr.is_empty() && ar.is_empty() {
            continue;
        }

        if fr == ar {
            let suffix = if is_arabic_or_digit(fr) { "ar" } else { "fr" };
            fields.upsert(record(format!("{}_{}", item.key, suffix), &item.fr));
            continue;
        }
        if !fr.is_empty() {
            fields.upsert(record(format!("{}_fr", item.key), &item.fr));
        }
        if !ar.is_empty() {
            fields.upsert(record(format!("{}_ar", item.key), &item.ar));
        }
    }
    fields
}

/// Fields read from one vehicle card face
#[derive(Debug, Clone)]
pub struct VehicleExtraction {
    pub fields: FieldMap,
    pub stage: VehicleStage,
    pub side: SideDecision,
    /// Vocabulary keys of the detected face
    pub expected: Vec<String>,
    /// Vocabulary keys with no value
    pub omitted: Vec<String>,
    pub low_confidence: Vec<String>,
    /// Blocks re-read by the fallback engine
    pub corrections: usize,
}

impl VehicleExtraction {
    fn empty(side: SideDecision, stage: VehicleStage) -> Self {
        let expected: Vec<String> = SideProfile::for_document(side.side)
            .map(|p| p.fields.iter().map(|f| f.key.to_string()).collect())
            .unwrap_or_default();
        Self {
            fields: FieldMap::new(),
            stage,
            omitted: expected.clone(),
            expected,
            side,
            low_confidence: vec![],
            corrections: 0,
        }
    }
}

/// Layout extractor for vehicle registration cards
pub struct VehicleExtractor<'a> {
    config: &'a VehicleConfig,
    engines: &'a OcrEngines,
    deadline: Deadline,
}

impl<'a> VehicleExtractor<'a> {
    pub fn new(config: &'a VehicleConfig, engines: &'a OcrEngines, deadline: Deadline) -> Self {
        Self {
            config,
            engines,
            deadline,
        }
    }

    /// Run the stage sequence on a page. `declared` is the caller's face, if any.
    pub fn extract(&self, image: &DocumentImage, declared: Option<DocumentType>) -> Result<VehicleExtraction> {
        let mut stage = VehicleStage::Loaded;
        let page = image.to_dynamic();
        let (width, height) = (page.width(), page.height());
        let initial = SideProfile::for_document(
            declared
                .filter(|d| d.family() == DocumentFamily::VehicleCard)
                .unwrap_or(DocumentType::CarteGriseRecto),
        )?;
        let no_fields = |stage: &mut VehicleStage| -> Result<VehicleExtraction> {
            stage.advance(VehicleStage::NoFieldsFound);
            info!("No usable text on vehicle card");
            let side = classify_side(&[], declared, self.config.side_anchor_min, self.config.label_similarity);
            Ok(VehicleExtraction::empty(side, *stage))
        };

        let blocks = self.scan_page(&page)?;
        stage.advance(VehicleStage::OcrScanned);
        if blocks.is_empty() {
            return no_fields(&mut stage);
        }

        let tolerance = dynamic_tolerance(&blocks);
        let grouped = group_lines(blocks, tolerance);
        stage.advance(VehicleStage::LinesGrouped);

        let mut lines = merge_lines(&grouped, initial.merge_spacing);
        stage.advance(VehicleStage::BlocksMerged);
        if lines.is_empty() {
            return no_fields(&mut stage);
        }

        let decision = classify_side(&lines, declared, self.config.side_anchor_min, self.config.label_similarity);
        let side = SideProfile::for_document(decision.side)?;
        if side.document != initial.document {
            lines = merge_lines(&grouped, side.merge_spacing);
        }
        info!(
            "Vehicle card side: {} (recto anchors {}, verso anchors {}{})",
            decision.side,
            decision.recto_anchors,
            decision.verso_anchors,
            if decision.overridden { ", overrides declared side" } else { "" }
        );
        stage.advance(VehicleStage::SideClassified);

        tag_fields(&mut lines, side, self.config.label_similarity);
        stage.advance(VehicleStage::FieldsTagged);

        let corrections = self.correct_low_confidence(&page, &mut lines, side)?;
        stage.advance(VehicleStage::LowConfCorrected);

        let mut lines = filter_zone(lines, side, height);
        tag_fields(&mut lines, side, self.config.label_similarity);
        stage.advance(VehicleStage::ZoneFiltered);
        if lines.is_empty() {
            stage.advance(VehicleStage::NoFieldsFound);
            let mut result = VehicleExtraction::empty(decision, stage);
            result.corrections = corrections;
            return Ok(result);
        }

        let parsed = parse_lines(&lines, side, width);
        let fields = flatten(&parsed);
        stage.advance(VehicleStage::Parsed);

        let expected: Vec<String> = side.fields.iter().map(|f| f.key.to_string()).collect();
        let omitted = expected
            .iter()
            .filter(|key| {
                !fields
                    .names()
                    .any(|name| name.strip_prefix(key.as_str()).is_some_and(|rest| rest == "_fr" || rest == "_ar"))
            })
            .cloned()
            .collect();
        let low_confidence = fields
            .iter()
            .filter(|r| r.confidence < self.config.confidence_threshold)
            .map(|r| r.name.clone())
            .collect();

        info!(
            "{}: {} fields from {} lines, {} corrections",
            decision.side,
            fields.len(),
            lines.len(),
            corrections
        );

        Ok(VehicleExtraction {
            fields,
            stage,
            side: decision,
            expected,
            omitted,
            low_confidence,
            corrections,
        })
    }

    /// Full-page primary pass
    fn scan_page(&self, page: &DynamicImage) -> Result<Vec<crate::vision::ExtractionBlock>> {
        self.deadline.check()?;
        let primary = self.engines.primary()?;
        let bounds = BoundingBox::new(0, 0, page.width(), page.height());

        match recognize_region(primary.as_ref(), page, bounds, LanguageHint::Mixed, PreprocessProfile::VehiclePage) {
            Ok(blocks) => {
                debug!("Page scan returned {} blocks", blocks.len());
                Ok(blocks)
            }
            Err(e @ (ExtractError::EngineUnavailable { .. } | ExtractError::Timeout(_))) => Err(e),
            Err(e) => {
                warn!("{}", ExtractError::region("page", e));
                Ok(vec![])
            }
        }
    }

    /// Re-read low-confidence value blocks inside the band with the
    /// fallback engine, up to the configured number of attempts
    fn correct_low_confidence(&self, page: &DynamicImage, lines: &mut [Line], side: &SideProfile) -> Result<usize> {
        let (width, height) = (page.width(), page.height());
        let mut fallback: Option<std::sync::Arc<dyn OcrBackend>> = None;
        let mut attempts = 0;

        for line_idx in 0..lines.len() {
            if !side.in_band(&lines[line_idx], height) {
                continue;
            }
            for block_idx in 0..lines[line_idx].blocks.len() {
                if attempts >= self.config.max_corrections {
                    debug!("Correction limit of {} reached", self.config.max_corrections);
                    return Ok(attempts);
                }

                let block = &lines[line_idx].blocks[block_idx];
                if block.confidence >= self.config.confidence_threshold
                    || block.is_key()
                    || side.looks_like_key(&block.text)
                {
                    continue;
                }

                let bounds = expanded_bounds(lines, line_idx, block_idx, width, height);
                self.deadline.check()?;
                let engine = match &fallback {
                    Some(engine) => engine.clone(),
                    None => {
                        let engine = self.engines.fallback()?;
                        fallback = Some(engine.clone());
                        engine
                    }
                };
                attempts += 1;

                match recognize_region(engine.as_ref(), page, bounds, LanguageHint::Mixed, PreprocessProfile::Raw) {
                    Ok(found) => {
                        let Some(best) = found.into_iter().find(|b| !b.text.trim().is_empty()) else {
                            continue;
                        };
                        let block = &mut lines[line_idx].blocks[block_idx];
                        debug!("Corrected {:?} -> {:?} ({:.2})", block.text, best.text, best.confidence);
                        block.text = best.text.trim().to_string();
                        block.confidence = best.confidence;
                        block.bounds = best.bounds;
                        block.engine = best.engine;
                    }
                    Err(e @ ExtractError::Timeout(_)) => return Err(e),
                    Err(e) => warn!("Correction of {:?} failed: {}", lines[line_idx].blocks[block_idx].text, e),
                }
            }
        }
        Ok(attempts)
    }
}
