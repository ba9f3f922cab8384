//! Response assembly
//!
//! Combines a pipeline's fields with the type decisions and timings into
//! the public, serialisable response.

use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::document::detector::FamilyDetection;
use crate::document::DocumentType;

use super::classifier::ClassificationOutcome;
use super::id_card::IdCardExtraction;
use super::vehicle::{SideDecision, VehicleExtraction, VehicleStage};
use super::FieldMap;

/// Overall outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Every expected field was found
    Complete,
    /// Some fields were found
    Partial,
    /// Nothing usable was read; still a successful call
    NoFieldsFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timings {
    pub extraction_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub status: ExtractionStatus,
    pub expected_fields: usize,
    pub extracted_fields: usize,
    pub omitted_fields: Vec<String>,
    pub low_confidence_fields: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallback_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_detection: Option<FamilyDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side_detection: Option<SideDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_stage: Option<VehicleStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrections: Option<usize>,
    pub timings: Timings,
}

/// Public result of one extraction
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResponse {
    pub success: bool,
    pub request_id: String,
    pub declared_type: Option<DocumentType>,
    pub resolved_type: DocumentType,
    /// The declared type disagreed with what the image shows
    pub type_overridden: bool,
    pub fields: FieldMap,
    pub metadata: ResponseMetadata,
}

/// Raw output of one of the two pipelines
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    IdCard {
        extraction: IdCardExtraction,
        classification: ClassificationOutcome,
    },
    Vehicle(VehicleExtraction),
}

fn status(fields: &FieldMap, omitted: &[String]) -> ExtractionStatus {
    if fields.is_empty() {
        ExtractionStatus::NoFieldsFound
    } else if omitted.is_empty() {
        ExtractionStatus::Complete
    } else {
        ExtractionStatus::Partial
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Build the response for a finished pipeline
pub fn assemble(
    declared: Option<DocumentType>,
    output: PipelineOutput,
    family_detection: Option<FamilyDetection>,
    extraction_time: Duration,
    total_time: Duration,
) -> ExtractionResponse {
    let timings = Timings {
        extraction_ms: millis(extraction_time),
        total_ms: millis(total_time),
    };

    let (resolved_type, fields, metadata) = match output {
        PipelineOutput::IdCard {
            extraction,
            classification,
        } => {
            let metadata = ResponseMetadata {
                status: status(&extraction.fields, &extraction.omitted),
                expected_fields: extraction.expected.len(),
                extracted_fields: extraction.expected.len() - extraction.omitted.len(),
                omitted_fields: extraction.omitted,
                low_confidence_fields: extraction.low_confidence,
                fallback_fields: extraction.fallback_used,
                family_detection,
                classification: Some(classification.clone()),
                side_detection: None,
                vehicle_stage: None,
                corrections: None,
                timings,
            };
            (classification.variant, extraction.fields, metadata)
        }
        PipelineOutput::Vehicle(extraction) => {
            let metadata = ResponseMetadata {
                status: status(&extraction.fields, &extraction.omitted),
                expected_fields: extraction.expected.len(),
                extracted_fields: extraction.expected.len() - extraction.omitted.len(),
                omitted_fields: extraction.omitted,
                low_confidence_fields: extraction.low_confidence,
                fallback_fields: vec![],
                family_detection,
                classification: None,
                side_detection: Some(extraction.side.clone()),
                vehicle_stage: Some(extraction.stage),
                corrections: Some(extraction.corrections),
                timings,
            };
            (extraction.side.side, extraction.fields, metadata)
        }
    };

    ExtractionResponse {
        success: true,
        request_id: Uuid::new_v4().to_string(),
        declared_type: declared,
        resolved_type,
        type_overridden: declared.is_some_and(|d| d != resolved_type),
        fields,
        metadata,
    }
}
