//! Line and block clustering for free-form card pages
//!
//! Word boxes from a full-page OCR pass are grouped into lines by their
//! vertical centres, then neighbouring words on a line are merged into
//! phrases when the horizontal gap is small relative to the average glyph
//! width.

use crate::vision::{BoundingBox, EngineKind, ExtractionBlock};

use super::{clean_text, contains_arabic};

/// Tolerance used when no block has a usable height
pub const DEFAULT_TOLERANCE: f32 = 10.0;
/// Glyph width assumed when a line carries no characters
pub const DEFAULT_CHAR_WIDTH: f32 = 5.0;

/// Label recognised on a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTag {
    /// Output key of the field, e.g. `proprietaire`
    pub field: &'static str,
    /// Matched the Arabic label rather than the French one
    pub arabic: bool,
}

/// Block on a page, possibly tagged as a field label
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBlock {
    pub text: String,
    pub confidence: f32,
    pub bounds: BoundingBox,
    pub engine: EngineKind,
    pub key: Option<KeyTag>,
}

impl LayoutBlock {
    pub fn is_key(&self) -> bool {
        self.key.is_some()
    }
}

impl From<ExtractionBlock> for LayoutBlock {
    fn from(block: ExtractionBlock) -> Self {
        Self {
            text: clean_text(&block.text),
            confidence: block.confidence,
            bounds: block.bounds,
            engine: block.engine,
            key: None,
        }
    }
}

/// Blocks sharing a vertical band, ordered left to right
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Line {
    pub blocks: Vec<LayoutBlock>,
}

impl Line {
    pub fn new(blocks: Vec<LayoutBlock>) -> Self {
        Self { blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Top of the first block
    pub fn top(&self) -> Option<u32> {
        self.blocks.first().map(|b| b.bounds.y)
    }

    /// Lowest block bottom
    pub fn bottom(&self) -> Option<u32> {
        self.blocks.iter().map(|b| b.bounds.bottom()).max()
    }

    /// Highest block top
    pub fn min_top(&self) -> Option<u32> {
        self.blocks.iter().map(|b| b.bounds.y).min()
    }

    fn mean_center(&self) -> f32 {
        let sum: f32 = self.blocks.iter().map(|b| b.bounds.center_y()).sum();
        sum / self.blocks.len().max(1) as f32
    }

    fn sort_by_x(&mut self) {
        self.blocks.sort_by_key(|b| b.bounds.x);
    }
}

/// Half the average block height, clamped to 6..=30 pixels
pub fn dynamic_tolerance(blocks: &[ExtractionBlock]) -> f32 {
    let heights: Vec<u32> = blocks.iter().map(|b| b.bounds.height).filter(|h| *h > 0).collect();
    if heights.is_empty() {
        return DEFAULT_TOLERANCE;
    }
    let average = heights.iter().sum::<u32>() as f32 / heights.len() as f32;
    (average * 0.5).trunc().clamp(6.0, 30.0)
}

/// Group blocks into lines.
///
/// Blocks are visited top to bottom and join the first line whose mean
/// vertical centre lies within `tolerance`; otherwise they start a new line.
pub fn group_lines(blocks: Vec<ExtractionBlock>, tolerance: f32) -> Vec<Line> {
    let mut blocks: Vec<LayoutBlock> = blocks.into_iter().map(LayoutBlock::from).collect();
    blocks.sort_by(|a, b| a.bounds.center_y().total_cmp(&b.bounds.center_y()));

    let mut lines: Vec<Line> = Vec::new();
    for block in blocks {
        let center = block.bounds.center_y();
        match lines.iter_mut().find(|line| (center - line.mean_center()).abs() <= tolerance) {
            Some(line) => line.blocks.push(block),
            None => lines.push(Line::new(vec![block])),
        }
    }

    for line in &mut lines {
        line.sort_by_x();
    }
    lines
}

/// Total block width over total character count
pub fn average_char_width(line: &Line) -> f32 {
    let width: u32 = line.blocks.iter().map(|b| b.bounds.width).sum();
    let chars: usize = line.blocks.iter().map(|b| b.text.trim().chars().count()).sum();
    if chars == 0 {
        DEFAULT_CHAR_WIDTH
    } else {
        width as f32 / chars as f32
    }
}

/// Merge words separated by at most `spacing` average glyph widths.
///
/// Arabic runs read right to left, so an Arabic neighbour is prepended.
pub fn merge_line(line: &Line, spacing: f32) -> Line {
    let mut blocks = line.blocks.clone();
    blocks.sort_by_key(|b| b.bounds.x);
    let max_gap = spacing * average_char_width(line);

    let mut iter = blocks.into_iter();
    let Some(mut current) = iter.next() else {
        return Line::default();
    };

    let mut merged = Vec::new();
    for block in iter {
        let gap = block.bounds.x as f32 - current.bounds.right() as f32;
        if gap > max_gap {
            merged.push(std::mem::replace(&mut current, block));
            continue;
        }

        current.text = if contains_arabic(&current.text) || contains_arabic(&block.text) {
            join_words(&block.text, &current.text)
        } else {
            join_words(&current.text, &block.text)
        };
        current.bounds = current.bounds.union(&block.bounds);
        current.confidence = (current.confidence + block.confidence) / 2.0;
    }
    merged.push(current);

    Line::new(merged)
}

fn join_words(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, _) => second.to_string(),
        (_, true) => first.to_string(),
        _ => format!("{} {}", first, second),
    }
}

/// [`merge_line`] over every line, dropping lines left empty
pub fn merge_lines(lines: &[Line], spacing: f32) -> Vec<Line> {
    lines
        .iter()
        .map(|line| merge_line(line, spacing))
        .filter(|line| !line.is_empty())
        .collect()
}
