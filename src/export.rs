//! Spreadsheet export.
//!
//! One row per record, one column per field. Columns are the sorted union
//! of every record's field names, after a leading `Document #` column.
//! Cells hold scalars as text; arrays and objects become compact JSON
//! strings. A field a record lacks is written as `"N/A"`.

use crate::output::{is_empty_value, MergedRecord, NOT_AVAILABLE};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub const DOCUMENT_COLUMN: &str = "Document #";

/// Metadata columns appended when `include_metadata` is set.
const METADATA_COLUMNS: [&str; 6] = [
    "process_id",
    "page_count",
    "pages_extracted",
    "chunks_failed",
    "processing_time_seconds",
    "timestamp",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV flush failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Render one cell. `null` becomes `"N/A"`.
pub fn flatten_value(value: &Value) -> String {
    match value {
        Value::Null => NOT_AVAILABLE.to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Write `records` as CSV bytes.
///
/// An empty slice yields a single `No data to export` row.
pub fn export_csv(records: &[MergedRecord], include_metadata: bool) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());

    if records.is_empty() {
        writer.write_record(["No data to export"])?;
        return finish(writer);
    }

    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();

    let mut header: Vec<&str> = Vec::with_capacity(columns.len() + 1 + METADATA_COLUMNS.len());
    header.push(DOCUMENT_COLUMN);
    header.extend(columns.iter().copied());
    if include_metadata {
        header.extend(METADATA_COLUMNS);
    }
    writer.write_record(&header)?;

    for (n, record) in records.iter().enumerate() {
        let mut row = Vec::with_capacity(header.len());
        row.push((n + 1).to_string());
        for column in &columns {
            row.push(
                record
                    .fields
                    .get(*column)
                    .map(flatten_value)
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            );
        }
        if include_metadata {
            let m = &record.metadata;
            row.push(m.process_id.clone());
            row.push(m.page_count.to_string());
            row.push(m.pages_extracted.to_string());
            row.push(m.chunks_failed.to_string());
            row.push(format!("{:.2}", m.processing_time_seconds));
            row.push(m.timestamp.clone());
        }
        writer.write_record(&row)?;
    }

    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, ExportError> {
    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

/// Fill statistics for one field across a batch of records.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStats {
    pub filled: usize,
    pub empty: usize,
}

impl FieldStats {
    /// Percentage of records with a non-empty value, 0–100.
    pub fn fill_rate(&self) -> f64 {
        let total = self.filled + self.empty;
        if total == 0 {
            0.0
        } else {
            self.filled as f64 * 100.0 / total as f64
        }
    }
}

/// Per-field filled/empty counts, keyed by field name.
///
/// Only fields a record actually carries are counted for that record.
pub fn field_statistics(records: &[MergedRecord]) -> BTreeMap<String, FieldStats> {
    let mut stats: BTreeMap<String, FieldStats> = BTreeMap::new();
    for record in records {
        for (field, value) in &record.fields {
            let entry = stats
                .entry(field.clone())
                .or_insert(FieldStats { filled: 0, empty: 0 });
            if is_empty_value(value) {
                entry.empty += 1;
            } else {
                entry.filled += 1;
            }
        }
    }
    stats
}

/// Write [`field_statistics`] as a CSV table.
pub fn export_field_stats_csv(records: &[MergedRecord]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(["Field Name", "Filled Count", "N/A Count", "Fill Rate %"])?;
    for (field, s) in field_statistics(records) {
        writer.write_record([
            field,
            s.filled.to_string(),
            s.empty.to_string(),
            format!("{:.1}", s.fill_rate()),
        ])?;
    }
    finish(writer)
}
