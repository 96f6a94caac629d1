//! # pdf2sheet
//!
//! Extract structured data from scanned PDFs with a vision model and export
//! it to spreadsheets.
//!
//! Scanned documents have no text layer, so each page is rasterised, cleaned
//! up, and handed to a vision-capable LLM that returns the fields it can
//! read as JSON. Page results are merged into one record per document, with
//! processing metadata attached, and records can be written out as CSV.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    validate the file, count pages (pdfium → pdfinfo → pdftoppm)
//!  ├─ 2. Chunk    split pages into runs of `chunk_size`, processed in order
//!  │    ├─ Render   rasterise via pdfium (spawn_blocking), fit to 2000×2000
//!  │    ├─ Enhance  deskew, denoise, CLAHE, sharpen
//!  │    ├─ Extract  one time-boxed vision call per page, tolerant parsing,
//!  │    │           local OCR when the model yields nothing
//!  │    └─ Retry    the whole chunk, 2 s then 4 s backoff
//!  ├─ 3. Merge    first non-empty value per field, in page order
//!  └─ 4. Output   MergedRecord { fields…, _processing_metadata }
//! ```
//!
//! A failed chunk is recorded and skipped; the document only fails when no
//! page produced anything.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2sheet::{DocumentProcessor, ExtractionSchema, FieldSpec, ProcessorConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / EDGEQUAKE_LLM_PROVIDER
//!     let processor = DocumentProcessor::from_config(ProcessorConfig::default())?;
//!     let schema = ExtractionSchema::new()
//!         .with_field("invoice_number", FieldSpec::new("string", "Invoice number"))
//!         .with_field("total", FieldSpec::new("number", "Grand total"))
//!         .require("total");
//!
//!     let record = processor.process_pdf(Path::new("invoice.pdf"), Some(&schema)).await?;
//!     println!("{}", serde_json::to_string_pretty(&record)?);
//!
//!     let csv = pdf2sheet::export_csv(&[record], true)?;
//!     std::fs::write("invoices.csv", csv)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Background jobs
//!
//! [`jobs::JobRunner`] queues documents for a [`jobs::Worker`]; each job
//! moves `pending → processing → completed | failed` and always ends in a
//! terminal status. [`jobs::HealthMonitor`] watches the queue.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2sheet` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod jobs;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ProcessorConfig, ProcessorConfigBuilder};
pub use error::{ChunkError, InputProblem, JobError, PageError, ProcessingError};
pub use export::{export_csv, flatten_value, ExportError};
pub use metrics::{MetricsSink, ProcessingMetrics};
pub use output::{ExtractionMethod, MergedRecord, PageResult, ProcessingMetadata};
pub use process::DocumentProcessor;
pub use progress::{NoopProgressCallback, ProcessingProgressCallback, ProgressCallback};
pub use schema::{ExtractionSchema, FieldSpec};
