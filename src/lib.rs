//! mardoc - field extraction for Moroccan identity and vehicle documents
//!
//! Reads photographs of national ID cards (old and new CIN) and vehicle
//! registration cards (carte grise, both faces) and returns typed,
//! bilingual field maps.

pub mod app;
pub mod config;
pub mod document;
pub mod error;
pub mod extraction;
pub mod storage;
pub mod vision;

pub use app::DocumentExtractor;
pub use document::{DocumentFamily, DocumentImage, DocumentType};
pub use error::{ExtractError, Result};
pub use extraction::assembler::ExtractionResponse;
