//! Progress-callback trait for per-chunk processing events.
//!
//! Inject an [`Arc<dyn ProcessingProgressCallback>`] via
//! [`crate::config::ProcessorConfigBuilder::progress_callback`] to receive
//! events as the pipeline walks through a document. The job worker uses it to
//! move a job's `progress` forward; the CLI uses it to drive a progress bar.
//!
//! # Example
//!
//! ```rust
//! use pdf2sheet::{ProcessingProgressCallback, ProcessorConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     chunks: AtomicUsize,
//! }
//!
//! impl ProcessingProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, pages_extracted: usize) {
//!         self.chunks.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("chunk {chunk}/{total_chunks}: {pages_extracted} page(s)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { chunks: AtomicUsize::new(0) });
//!
//! let config = ProcessorConfig::builder()
//!     .progress_callback(counter as Arc<dyn ProcessingProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline controller as it processes each chunk.
///
/// Chunks run sequentially, so calls for one document never overlap, but a
/// single callback may be shared by several concurrent jobs. All methods have
/// default no-op implementations.
pub trait ProcessingProgressCallback: Send + Sync {
    /// Called once after the page count is known.
    fn on_processing_start(&self, total_pages: usize, total_chunks: usize) {
        let _ = (total_pages, total_chunks);
    }

    /// Called before a chunk is rasterised.
    ///
    /// * `chunk`: 1-indexed chunk number
    /// * `first_page`, `last_page`: 1-indexed inclusive page range
    fn on_chunk_start(&self, chunk: usize, total_chunks: usize, first_page: usize, last_page: usize) {
        let _ = (chunk, total_chunks, first_page, last_page);
    }

    /// Called when a chunk finished, possibly with zero pages.
    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, pages_extracted: usize) {
        let _ = (chunk, total_chunks, pages_extracted);
    }

    /// Called when a chunk failed after all attempts.
    fn on_chunk_error(&self, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (chunk, total_chunks, error);
    }

    /// Called once after every chunk has been attempted.
    fn on_processing_complete(&self, total_pages: usize, pages_extracted: usize) {
        let _ = (total_pages, pages_extracted);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ProcessingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessorConfig`].
pub type ProgressCallback = Arc<dyn ProcessingProgressCallback>;
