//! Job queue: [`JobRunner`] enqueues, [`Worker`] processes one job at a time.

use super::store::JobStore;
use super::{DocumentRef, Job, JobId, JobStatusReport};
use crate::error::JobError;
use crate::process::DocumentProcessor;
use crate::progress::{ProcessingProgressCallback, ProgressCallback};
use crate::schema::ExtractionSchema;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Progress reported once the page count is known.
const STARTED_PROGRESS: f32 = 0.1;
/// Progress span covered by the chunks.
const CHUNK_PROGRESS_SPAN: f32 = 0.85;

/// Front end of the queue. Cheap to clone.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    queue: mpsc::Sender<JobId>,
}

impl JobRunner {
    /// Create a runner and the worker that drains its queue.
    ///
    /// The worker does nothing until [`Worker::run`] is awaited or spawned.
    pub fn new(
        store: Arc<dyn JobStore>,
        processor: Arc<DocumentProcessor>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, Worker) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let runner = Self {
            store: Arc::clone(&store),
            queue: tx,
        };
        let worker = Worker {
            store,
            processor,
            rx,
            cancel,
        };
        (runner, worker)
    }

    /// Record a pending job and queue it.
    ///
    /// Refused with [`JobError::AlreadyActive`] while another job for the
    /// same document is pending or processing.
    pub async fn enqueue(
        &self,
        document: DocumentRef,
        schema: Option<ExtractionSchema>,
    ) -> Result<JobId, JobError> {
        let job = Job::new(document, schema);
        let id = job.id;
        let document_id = job.document.id.clone();
        self.store.insert(job).await?;

        if self.queue.send(id).await.is_err() {
            // Nobody will ever pick it up.
            self.store
                .fail(id, JobError::QueueClosed.to_string())
                .await
                .ok();
            return Err(JobError::QueueClosed);
        }
        info!("Queued job {} for document '{}'", id, document_id);
        Ok(id)
    }

    pub async fn status(&self, id: JobId) -> Result<JobStatusReport, JobError> {
        self.store
            .get(id)
            .await
            .map(|job| job.report())
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Poll until the job is terminal.
    pub async fn wait(&self, id: JobId, poll: Duration) -> Result<JobStatusReport, JobError> {
        loop {
            let report = self.status(id).await?;
            if report.status.is_terminal() {
                return Ok(report);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Number of jobs queued but not yet picked up.
    pub fn queue_depth(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}

/// Drains the queue, one job at a time.
pub struct Worker {
    store: Arc<dyn JobStore>,
    processor: Arc<DocumentProcessor>,
    rx: mpsc::Receiver<JobId>,
    cancel: CancellationToken,
}

impl Worker {
    /// Run until cancelled or until every [`JobRunner`] clone is dropped.
    ///
    /// On the way out, jobs still in the queue are marked failed.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Job worker cancelled");
                    break;
                }

                next = self.rx.recv() => {
                    let Some(id) = next else {
                        debug!("Job worker shutting down - queue closed");
                        break;
                    };
                    self.process(id).await;
                }
            }
        }

        self.rx.close();
        while let Ok(id) = self.rx.try_recv() {
            if let Err(e) = self
                .store
                .fail(id, "Worker shut down before the job started".into())
                .await
            {
                warn!("Could not fail abandoned job {}: {}", id, e);
            }
        }
        debug!("Job worker stopped");
    }

    async fn process(&self, id: JobId) {
        let Some(job) = self.store.get(id).await else {
            warn!("Job {} vanished from the store", id);
            return;
        };
        if let Err(e) = self.store.mark_processing(id).await {
            warn!("Skipping job {}: {}", id, e);
            return;
        }
        info!("Job {}: processing {}", id, job.document.path.display());

        let (tx, mut rx) = mpsc::unbounded_channel::<f32>();
        let store = Arc::clone(&self.store);
        let forwarder = tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                if let Err(e) = store.set_progress(id, p).await {
                    debug!("Job {}: progress update dropped: {}", id, e);
                }
            }
        });
        let progress: ProgressCallback = Arc::new(JobProgress { tx });

        let run = AssertUnwindSafe(self.processor.process_pdf_with_progress(
            &job.document.path,
            job.schema.as_ref(),
            Some(progress),
        ))
        .catch_unwind();

        let outcome = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Err("Job cancelled during shutdown".to_string()),

            result = run => match result {
                Ok(Ok(record)) => Ok(record),
                Ok(Err(e)) => Err(e.to_string()),
                Err(panic) => Err(format!("Worker panicked: {}", panic_message(panic.as_ref()))),
            },
        };

        // The callback went away with the processing future; flush what it sent.
        if forwarder.await.is_err() {
            warn!("Job {}: progress forwarder panicked", id);
        }

        let stored = match outcome {
            Ok(record) => {
                info!(
                    "Job {} completed: {} field(s), {} failed chunk(s)",
                    id,
                    record.fields.len(),
                    record.metadata.chunks_failed
                );
                self.store.complete(id, record).await
            }
            Err(message) => {
                error!("Job {} failed: {}", id, message);
                self.store.fail(id, message).await
            }
        };
        if let Err(e) = stored {
            error!("Job {}: could not record outcome: {}", id, e);
        }
    }
}

/// Maps chunk events onto job progress.
struct JobProgress {
    tx: mpsc::UnboundedSender<f32>,
}

impl JobProgress {
    fn chunk_done(&self, chunk: usize, total_chunks: usize) {
        let fraction = chunk as f32 / total_chunks.max(1) as f32;
        let _ = self.tx.send(STARTED_PROGRESS + CHUNK_PROGRESS_SPAN * fraction);
    }
}

impl ProcessingProgressCallback for JobProgress {
    fn on_processing_start(&self, _total_pages: usize, _total_chunks: usize) {
        let _ = self.tx.send(STARTED_PROGRESS);
    }

    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, _pages_extracted: usize) {
        self.chunk_done(chunk, total_chunks);
    }

    fn on_chunk_error(&self, chunk: usize, total_chunks: usize, _error: &str) {
        self.chunk_done(chunk, total_chunks);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let p: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(p.as_ref()), "static str");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(p.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn chunk_events_map_into_progress_range() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cb = JobProgress { tx };
        cb.on_processing_start(9, 3);
        cb.on_chunk_complete(1, 3, 3);
        cb.on_chunk_error(3, 3, "boom");
        drop(cb);

        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            seen.push(p);
        }
        assert_eq!(seen.len(), 3);
        assert!((seen[0] - 0.1).abs() < 1e-6);
        assert!(seen[1] > seen[0] && seen[2] > seen[1]);
        assert!(seen[2] <= 1.0);
    }
}
