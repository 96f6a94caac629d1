//! Result types produced by the pipeline.
//!
//! [`PageResult`] and [`ChunkOutcome`] only live for the duration of one
//! run; [`MergedRecord`] is what the caller persists. A `MergedRecord`
//! serialises as a flat JSON object whose only reserved key is
//! `_processing_metadata`.

use crate::error::ChunkError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The sentinel the model is told to use for missing or unreadable fields.
pub const NOT_AVAILABLE: &str = "N/A";

/// Reserved key carrying [`ProcessingMetadata`] in serialised records.
pub const METADATA_KEY: &str = "_processing_metadata";

/// `Null`, `""` and `"N/A"` (whitespace-trimmed) count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s == NOT_AVAILABLE
        }
        _ => false,
    }
}

/// How a page's fields were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// The model answered with parseable JSON.
    #[default]
    Model,
    /// The model answered in prose; fields were recovered from `key: value` lines.
    KeyValueScan,
    /// Nothing structured was recovered; raw text came from local OCR.
    OcrFallback,
    /// Nothing structured was recovered; the model's raw text was kept.
    RawText,
}

/// Fields extracted from one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-based page number within the whole document.
    pub page_index: usize,
    pub fields: Map<String, Value>,
    /// Per-field confidence in [0, 1], when the model reported one.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub confidence: BTreeMap<String, f32>,
    #[serde(default)]
    pub method: ExtractionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
}

impl PageResult {
    pub fn new(page_index: usize, fields: Map<String, Value>) -> Self {
        Self {
            page_index,
            fields,
            ..Default::default()
        }
    }
}

/// What happened to one chunk `[start, end)` (0-based pages).
#[derive(Debug, Clone, Default)]
pub struct ChunkOutcome {
    pub start: usize,
    pub end: usize,
    pub pages: Vec<PageResult>,
    /// Set when every attempt failed.
    pub failure: Option<String>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

impl ChunkOutcome {
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// The failure as a [`ChunkError`], if the chunk failed.
    pub fn error(&self) -> Option<ChunkError> {
        self.failure.as_ref().map(|detail| ChunkError {
            start: self.start,
            end: self.end,
            attempts: self.attempts,
            detail: detail.clone(),
        })
    }

    /// The failure attributed to its 1-based inclusive page range.
    pub fn failure_record(&self) -> Option<ChunkFailure> {
        self.failure.as_ref().map(|reason| ChunkFailure {
            first_page: self.start + 1,
            last_page: self.end,
            reason: reason.clone(),
        })
    }

    pub fn into_result(self) -> Result<Vec<PageResult>, ChunkError> {
        match self.error() {
            Some(e) => Err(e),
            None => Ok(self.pages),
        }
    }
}

/// A chunk that failed, attributed to its page range (1-based, inclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub first_page: usize,
    pub last_page: usize,
    pub reason: String,
}

/// The `_processing_metadata` block attached to every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub process_id: String,
    pub processing_time_seconds: f64,
    pub page_count: usize,
    pub pages_extracted: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<ChunkFailure>,
    pub schema_used: bool,
    /// UTC, RFC 3339.
    pub timestamp: String,
    pub memory_peak_mb: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub confidence_scores: BTreeMap<String, f32>,
}

/// One document's merged fields plus processing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(rename = "_processing_metadata")]
    pub metadata: ProcessingMetadata,
}

impl MergedRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The record as one JSON object (fields + `_processing_metadata`).
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_values() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&json!("")));
        assert!(is_empty_value(&json!("  N/A ")));
        assert!(!is_empty_value(&json!("n/a is a word here")));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!([])));
    }

    #[test]
    fn record_serialises_flat_with_reserved_metadata_key() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("ACME"));
        let record = MergedRecord {
            fields,
            metadata: ProcessingMetadata {
                process_id: "proc_1".into(),
                processing_time_seconds: 1.25,
                page_count: 2,
                pages_extracted: 2,
                chunks_processed: 1,
                chunks_failed: 0,
                failed_chunks: vec![],
                schema_used: false,
                timestamp: "2026-01-01T00:00:00Z".into(),
                memory_peak_mb: 12.5,
                confidence_scores: BTreeMap::new(),
            },
        };

        let v = record.to_json();
        assert_eq!(v["name"], "ACME");
        assert_eq!(v[METADATA_KEY]["page_count"], 2);
        assert!(v[METADATA_KEY].get("failed_chunks").is_none());

        let back: MergedRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn failed_chunk_reports_one_based_range() {
        let outcome = ChunkOutcome {
            start: 3,
            end: 6,
            failure: Some("timeout".into()),
            attempts: 3,
            ..Default::default()
        };
        assert!(outcome.is_failed());
        let failure = outcome.failure_record().unwrap();
        assert_eq!((failure.first_page, failure.last_page), (4, 6));
        assert_eq!(failure.reason, "timeout");

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!((err.start, err.end), (3, 6));
    }

    #[test]
    fn successful_chunk_yields_its_pages() {
        let outcome = ChunkOutcome {
            start: 0,
            end: 2,
            pages: vec![PageResult::new(1, Map::new()), PageResult::new(2, Map::new())],
            failure: None,
            attempts: 2,
        };
        assert!(outcome.failure_record().is_none());
        assert_eq!(outcome.into_result().unwrap().len(), 2);
    }
}
