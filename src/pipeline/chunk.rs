//! Chunk processor: rasterise, enhance and extract a fixed run of pages,
//! retrying the whole run with exponential backoff.
//!
//! Pages inside an attempt are independent. A page that fails is logged and
//! skipped, and the chunk returns whatever pages succeeded. An attempt only
//! counts as failed when rasterisation fails, or when pages were rendered
//! but every one of them failed; that is how a page-level timeout ends up
//! retried at chunk level.

use crate::error::{ChunkError, PageError};
use crate::output::{ChunkOutcome, PageResult};
use crate::pipeline::enhance::ImageEnhancer;
use crate::pipeline::extract::ExtractionClient;
use crate::pipeline::render::PageRasterizer;
use crate::retry::{exponential_backoff, retry};
use crate::schema::ExtractionSchema;
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Split `total` pages into `[start, end)` ranges of at most `size` pages.
///
/// `size == 0` is treated as 1.
pub fn chunk_ranges(total: usize, size: usize) -> Vec<(usize, usize)> {
    let size = size.max(1);
    (0..total)
        .step_by(size)
        .map(|start| (start, (start + size).min(total)))
        .collect()
}

pub struct ChunkProcessor {
    rasterizer: Arc<dyn PageRasterizer>,
    enhancer: Option<ImageEnhancer>,
    client: ExtractionClient,
    max_attempts: u32,
    backoff_base: Duration,
}

impl ChunkProcessor {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        client: ExtractionClient,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            rasterizer,
            enhancer: None,
            client,
            max_attempts,
            backoff_base,
        }
    }

    pub fn with_enhancer(mut self, enhancer: Option<ImageEnhancer>) -> Self {
        self.enhancer = enhancer;
        self
    }

    pub fn rasterizer(&self) -> &Arc<dyn PageRasterizer> {
        &self.rasterizer
    }

    pub fn client(&self) -> &ExtractionClient {
        &self.client
    }

    /// Process 0-based pages `[start, end)`.
    ///
    /// Returns `Ok(vec![])` when the range renders to no images. Result page
    /// indices are 1-based and document-wide. After `max_attempts` failed
    /// attempts the last failure is returned as a [`ChunkError`].
    pub async fn process_chunk(
        &self,
        path: &Path,
        start: usize,
        end: usize,
        schema: Option<&ExtractionSchema>,
    ) -> Result<Vec<PageResult>, ChunkError> {
        self.run_chunk(path, start, end, schema).await.into_result()
    }

    /// [`ChunkProcessor::process_chunk`] as a [`ChunkOutcome`] carrying the
    /// range and the number of attempts used.
    pub async fn run_chunk(
        &self,
        path: &Path,
        start: usize,
        end: usize,
        schema: Option<&ExtractionSchema>,
    ) -> ChunkOutcome {
        let mut attempts = 0;
        let result = retry(
            self.max_attempts,
            exponential_backoff(self.backoff_base),
            |attempt| {
                attempts = attempt;
                self.attempt(path, start, end, schema, attempt)
            },
        )
        .await;

        let (pages, failure) = match result {
            Ok(pages) => (pages, None),
            Err(detail) => (Vec::new(), Some(detail)),
        };
        ChunkOutcome {
            start,
            end,
            pages,
            failure,
            attempts,
        }
    }

    async fn attempt(
        &self,
        path: &Path,
        start: usize,
        end: usize,
        schema: Option<&ExtractionSchema>,
        attempt: u32,
    ) -> Result<Vec<PageResult>, String> {
        debug!("Pages {}-{}: attempt {}", start + 1, end, attempt);

        let images = self.render(path, start, end).await?;
        if images.is_empty() {
            info!("Pages {}-{}: no images rendered", start + 1, end);
            return Ok(Vec::new());
        }

        let rendered = images.len();
        let mut results = Vec::with_capacity(rendered);
        let mut last_error: Option<PageError> = None;
        for (offset, image) in images.iter().enumerate() {
            let page_index = start + offset + 1;
            match self.client.extract(image, schema, page_index).await {
                Ok(page) => results.push(page),
                Err(e) => {
                    warn!("{}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if results.is_empty() => Err(format!("all {rendered} page(s) failed; last error: {e}")),
            _ => Ok(results),
        }
    }

    /// Rasterise and enhance on the blocking pool.
    pub(crate) async fn render(&self, path: &Path, start: usize, end: usize) -> Result<Vec<DynamicImage>, String> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let enhancer = self.enhancer.clone();
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<Vec<DynamicImage>, PageError> {
            let images = rasterizer.rasterize(&path, start, end)?;
            Ok(match enhancer {
                Some(enhancer) => images.iter().map(|img| enhancer.enhance(img)).collect(),
                None => images,
            })
        })
        .await
        .map_err(|e| format!("render task panicked: {e}"))?
        .map_err(|e| e.to_string())
    }
}
