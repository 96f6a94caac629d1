//! Pipeline controller: one PDF in, one [`MergedRecord`] out.
//!
//! ```text
//! validate ─▶ page count ─▶ chunk 1 ─▶ pause ─▶ chunk 2 ─▶ … ─▶ merge ─▶ metadata
//!                            │ failed? record it and keep going
//! ```
//!
//! Chunks run strictly one after another. A failed chunk is attributed to
//! its page range in `_processing_metadata.failed_chunks` and never aborts
//! the document; only "no page produced anything" does. The whole run is
//! bounded by `config.deadline`.

use crate::config::ProcessorConfig;
use crate::error::ProcessingError;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::output::{ChunkFailure, ChunkOutcome, MergedRecord, PageResult, ProcessingMetadata};
use crate::pipeline::chunk::{chunk_ranges, ChunkProcessor};
use crate::pipeline::enhance::ImageEnhancer;
use crate::pipeline::extract::{ExtractionClient, LlmVisionBackend, SchemaDetection, VisionBackend};
use crate::pipeline::input::validate_pdf;
use crate::pipeline::memory::{round2, MemoryMonitor};
use crate::pipeline::merge::{average_confidence, fill_required, merge};
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer, LARGE_DOCUMENT_PAGES};
use crate::progress::{ProcessingProgressCallback, ProgressCallback};
use crate::schema::ExtractionSchema;
use chrono::{SecondsFormat, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Owns the pipeline stages and runs documents through them.
pub struct DocumentProcessor {
    config: ProcessorConfig,
    chunks: ChunkProcessor,
    metrics: Arc<dyn MetricsSink>,
}

impl DocumentProcessor {
    /// Build a processor around explicit rasteriser and vision backends.
    ///
    /// The extraction client and enhancer are derived from `config`.
    pub fn new(
        config: ProcessorConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        backend: Arc<dyn VisionBackend>,
    ) -> Self {
        let client = ExtractionClient::from_config(backend, &config);
        Self::with_client(config, rasterizer, client)
    }

    /// Like [`DocumentProcessor::new`] with a pre-built extraction client
    /// (custom OCR engine, for example).
    pub fn with_client(
        config: ProcessorConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        client: ExtractionClient,
    ) -> Self {
        let enhancer = config.enhance.then(ImageEnhancer::default);
        let chunks = ChunkProcessor::new(rasterizer, client, config.max_attempts, config.backoff_base)
            .with_enhancer(enhancer);
        Self {
            config,
            chunks,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Production wiring: pdfium rasteriser and the configured LLM provider.
    pub fn from_config(config: ProcessorConfig) -> Result<Self, ProcessingError> {
        let rasterizer = Arc::new(PdfiumRasterizer::from_config(&config));
        let backend = Arc::new(LlmVisionBackend::from_config(&config)?);
        Ok(Self::new(config, rasterizer, backend))
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process one PDF.
    ///
    /// Returns a record even when some chunks failed; check
    /// `metadata.chunks_failed`. Fails only for bad input, an unreadable or
    /// empty document, no extracted pages at all, or the deadline.
    pub async fn process_pdf(
        &self,
        path: &Path,
        schema: Option<&ExtractionSchema>,
    ) -> Result<MergedRecord, ProcessingError> {
        let progress = self.config.progress_callback.clone();
        self.process_pdf_with_progress(path, schema, progress).await
    }

    /// [`DocumentProcessor::process_pdf`] with a per-call progress callback
    /// in place of the configured one.
    pub async fn process_pdf_with_progress(
        &self,
        path: &Path,
        schema: Option<&ExtractionSchema>,
        progress: Option<ProgressCallback>,
    ) -> Result<MergedRecord, ProcessingError> {
        let started = Instant::now();
        let process_id = format!("proc_{}", Uuid::new_v4().simple());
        let span = info_span!("process_pdf", process_id = %process_id);

        info!(
            parent: &span,
            "Processing {} (schema: {})",
            path.display(),
            schema.is_some()
        );

        let deadline = self.config.deadline;
        let run = self.run(path, schema, progress.as_deref(), &process_id, started);
        let outcome = match timeout(deadline, run).instrument(span.clone()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProcessingError::Timeout {
                secs: deadline.as_secs(),
            }),
        };

        span.in_scope(|| {
            match &outcome {
                Ok(record) => {
                    self.metrics.record_success(started.elapsed());
                    info!(
                        "Done in {:.2}s: {} field(s), {} page(s), {} failed chunk(s)",
                        record.metadata.processing_time_seconds,
                        record.fields.len(),
                        record.metadata.pages_extracted,
                        record.metadata.chunks_failed
                    );
                }
                Err(e) => {
                    self.metrics.record_failure(e);
                    error!(
                        "Failed after {:.2}s ({}): {}",
                        started.elapsed().as_secs_f64(),
                        e.kind(),
                        e
                    );
                }
            }
        });
        outcome
    }

    async fn run(
        &self,
        path: &Path,
        schema: Option<&ExtractionSchema>,
        cb: Option<&dyn ProcessingProgressCallback>,
        process_id: &str,
        started: Instant,
    ) -> Result<MergedRecord, ProcessingError> {
        // ── Step 1: Validate input ───────────────────────────────────────────
        validate_pdf(path)?;

        let mut memory = MemoryMonitor::new();
        info!("Memory before processing: {:.1} MB", memory.sample_mb());

        // ── Step 2: Page count ───────────────────────────────────────────────
        let page_count = self.page_count(path).await?;
        if page_count == 0 {
            return Err(ProcessingError::EmptyDocument {
                path: path.to_path_buf(),
            });
        }
        if page_count > LARGE_DOCUMENT_PAGES {
            warn!("Large document: {} pages", page_count);
        }

        // ── Step 3: Chunks, sequentially ─────────────────────────────────────
        let ranges = chunk_ranges(page_count, self.config.chunk_size);
        let total_chunks = ranges.len();
        info!(
            "{} page(s) in {} chunk(s) of up to {}",
            page_count, total_chunks, self.config.chunk_size
        );
        if let Some(cb) = cb {
            cb.on_processing_start(page_count, total_chunks);
        }

        let mut pages: Vec<PageResult> = Vec::new();
        let mut outcomes: Vec<ChunkOutcome> = Vec::with_capacity(total_chunks);

        for (i, &(start, end)) in ranges.iter().enumerate() {
            let chunk_no = i + 1;
            if let Some(cb) = cb {
                cb.on_chunk_start(chunk_no, total_chunks, start + 1, end);
            }
            info!("Chunk {}/{}: pages {}-{}", chunk_no, total_chunks, start + 1, end);

            let mut outcome = self.chunks.run_chunk(path, start, end, schema).await;
            match outcome.error() {
                None => {
                    if outcome.pages.is_empty() {
                        warn!("Chunk {}/{} produced no pages", chunk_no, total_chunks);
                    }
                    if let Some(cb) = cb {
                        cb.on_chunk_complete(chunk_no, total_chunks, outcome.pages.len());
                    }
                    pages.append(&mut outcome.pages);
                }
                Some(e) => {
                    error!("Chunk {}/{} failed: {}", chunk_no, total_chunks, e);
                    if let Some(cb) = cb {
                        cb.on_chunk_error(chunk_no, total_chunks, &e.to_string());
                    }
                }
            }
            outcomes.push(outcome);

            // Page bitmaps are already dropped with the chunk; the check
            // only reports pressure and feeds the peak.
            memory.check(self.config.memory_threshold_mb);

            if chunk_no < total_chunks && !self.config.chunk_pause.is_zero() {
                sleep(self.config.chunk_pause).await;
            }
        }

        let failed_chunks: Vec<ChunkFailure> =
            outcomes.iter().filter_map(ChunkOutcome::failure_record).collect();
        let chunks_processed = outcomes.iter().filter(|o| !o.is_failed()).count();

        if let Some(cb) = cb {
            cb.on_processing_complete(page_count, pages.len());
        }
        if !failed_chunks.is_empty() {
            warn!(
                "{}/{} chunk(s) failed: {:?}",
                failed_chunks.len(),
                total_chunks,
                failed_chunks
                    .iter()
                    .map(|f| format!("{}-{}", f.first_page, f.last_page))
                    .collect::<Vec<_>>()
            );
        }

        // ── Step 4: Anything at all? ─────────────────────────────────────────
        if pages.is_empty() {
            return Err(ProcessingError::NoDataExtracted {
                failed_chunks: failed_chunks.len(),
                total_chunks,
            });
        }

        // ── Step 5: Merge ────────────────────────────────────────────────────
        pages.sort_by_key(|p| p.page_index);
        let mut fields = merge(&pages);
        if let Some(schema) = schema {
            fill_required(&mut fields, schema);
        }
        let confidence_scores = average_confidence(&pages);
        info!("Merged {} page(s) into {} field(s)", pages.len(), fields.len());

        // ── Step 6: Metadata ─────────────────────────────────────────────────
        memory.sample_mb();
        let metadata = ProcessingMetadata {
            process_id: process_id.to_string(),
            processing_time_seconds: round2(started.elapsed().as_secs_f64()),
            page_count,
            pages_extracted: pages.len(),
            chunks_processed,
            chunks_failed: failed_chunks.len(),
            failed_chunks,
            schema_used: schema.is_some(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            memory_peak_mb: memory.peak_mb(),
            confidence_scores,
        };

        Ok(MergedRecord { fields, metadata })
    }

    /// Render the first page and ask the model what kind of document it is.
    ///
    /// Model failures fall back to the generic schema; only an unreadable
    /// or empty document is an error.
    pub async fn detect_schema(
        &self,
        path: &Path,
        hint: Option<&str>,
    ) -> Result<SchemaDetection, ProcessingError> {
        validate_pdf(path)?;
        let mut images = self
            .chunks
            .render(path, 0, 1)
            .await
            .map_err(|detail| ProcessingError::UnreadablePdf {
                path: path.to_path_buf(),
                detail,
            })?;
        let Some(first) = images.pop() else {
            return Err(ProcessingError::EmptyDocument {
                path: path.to_path_buf(),
            });
        };
        Ok(self.chunks.client().detect_schema(&first, hint).await)
    }

    async fn page_count(&self, path: &Path) -> Result<usize, ProcessingError> {
        let rasterizer = Arc::clone(self.chunks.rasterizer());
        let path = path.to_path_buf();
        let count = tokio::task::spawn_blocking(move || rasterizer.page_count(&path))
            .await
            .map_err(|e| ProcessingError::Internal(format!("Page count task panicked: {}", e)))??;
        info!("Page count: {}", count);
        Ok(count)
    }
}
