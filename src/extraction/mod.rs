//! Field extraction
//!
//! ID-card classification and zone extraction, vehicle-card layout
//! analysis, and assembly of the final bilingual field map.

pub mod assembler;
pub mod classifier;
pub mod id_card;
pub mod layout;
pub mod similarity;
pub mod vehicle;

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::time::{Duration, Instant};

use crate::error::{ExtractError, Result};
use crate::vision::{is_arabic_char, EngineKind};

/// Language of an extracted value
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldLanguage {
    Fr,
    Ar,
    Neutral,
}

impl FieldLanguage {
    /// Language implied by a field name suffix
    pub fn from_field_name(name: &str) -> Self {
        if name.ends_with("_ar") {
            FieldLanguage::Ar
        } else if name.ends_with("_fr") {
            FieldLanguage::Fr
        } else {
            FieldLanguage::Neutral
        }
    }
}

/// One extracted field
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldRecord {
    pub name: String,
    pub value: String,
    pub language: FieldLanguage,
    pub confidence: f32,
    pub engine: EngineKind,
}

/// Insertion-ordered field map with at most one record per name.
///
/// Serialises as a JSON object of name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    records: Vec<FieldRecord>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; returns false (and keeps the existing one) on a duplicate name
    pub fn insert(&mut self, record: FieldRecord) -> bool {
        if self.contains(&record.name) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Add a record, replacing any existing one of the same name in place
    pub fn upsert(&mut self, record: FieldRecord) {
        match self.records.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Value of a field, if present
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|r| r.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldRecord> {
        self.records.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Move the listed names to the front, in the listed order
    pub fn reorder(&mut self, leading: &[&str]) {
        let mut ordered = Vec::with_capacity(self.records.len());
        for name in leading {
            if let Some(pos) = self.records.iter().position(|r| r.name == *name) {
                ordered.push(self.records.remove(pos));
            }
        }
        ordered.append(&mut self.records);
        self.records = ordered;
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.name, &record.value)?;
        }
        map.end()
    }
}

/// Point in time after which no new OCR work may start
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    pub fn none() -> Self {
        Self {
            at: None,
            budget: Duration::ZERO,
        }
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Error out when the deadline has passed
    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(ExtractError::Timeout(self.budget))
        } else {
            Ok(())
        }
    }
}

pub fn contains_arabic(text: &str) -> bool {
    text.chars().any(is_arabic_char)
}

/// Arabic letters (including the supplement and extended-A blocks) or
/// ASCII digits; numeric values count as Arabic-side text
pub fn is_arabic_or_digit(text: &str) -> bool {
    text.chars().any(|c| {
        is_arabic_char(c) || c.is_ascii_digit() || matches!(c, '\u{0750}'..='\u{077F}' | '\u{08A0}'..='\u{08FF}')
    })
}

pub fn contains_latin(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic() && !is_arabic_char(c))
}

/// At least one letter or digit
pub fn has_meaningful_char(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// Arabic-Indic and Eastern Arabic-Indic digits to ASCII
fn ascii_digit(c: char) -> Option<char> {
    match c {
        '0'..='9' => Some(c),
        '\u{0660}'..='\u{0669}' => char::from_digit(c as u32 - 0x0660, 10),
        '\u{06F0}'..='\u{06F9}' => char::from_digit(c as u32 - 0x06F0, 10),
        _ => None,
    }
}

/// Rewrite a date to `DD.MM.YYYY` when it holds exactly eight digits;
/// anything else is returned trimmed but otherwise unchanged
pub fn normalize_date(text: &str) -> String {
    let digits: String = text.chars().filter_map(ascii_digit).collect();
    if digits.len() == 8 {
        format!("{}.{}.{}", &digits[0..2], &digits[2..4], &digits[4..8])
    } else {
        text.trim().to_string()
    }
}

/// Date-shaped field names
pub fn is_date_field(name: &str) -> bool {
    name.contains("date")
        || name.starts_with("premiere_mise")
        || name.starts_with("fin_validite")
        || name.starts_with("mc_maroc")
}

/// Characters a zone value may carry: ASCII letters and digits, Arabic,
/// whitespace and `. / -`
pub fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '.' | '/' | '-') || is_arabic_char(c)
}

/// Drop invisible formatting marks (bidi controls, zero-width, BOM) and
/// collapse whitespace
pub fn clean_text(text: &str) -> String {
    let visible: String = text.chars().filter(|c| !is_format_char(*c)).collect();
    visible.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' | '\u{FEFF}' | '\u{061C}' | '\u{00AD}'
    )
}

/// Cleaned block text, or None when any character falls outside
/// [`is_allowed_char`]. A block with stray symbols is discarded whole.
pub fn strict_filter(text: &str) -> Option<String> {
    let cleaned = clean_text(text);
    if cleaned.is_empty() || !cleaned.chars().all(is_allowed_char) {
        return None;
    }
    Some(cleaned)
}
