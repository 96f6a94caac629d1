//! CLI binary for pdf2sheet.
//!
//! Maps flags to `ProcessorConfig`, runs one document directly or many
//! through the job queue, and writes JSON or CSV.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2sheet::export::export_field_stats_csv;
use pdf2sheet::jobs::{
    DocumentRef, HealthMonitor, HealthThresholds, InMemoryJobStore, JobRunner, JobStatus, JobStore,
    DEFAULT_TERMINAL_RETENTION,
};
use pdf2sheet::{
    export_csv, DocumentProcessor, ExtractionSchema, MergedRecord, ProcessingMetrics,
    ProcessingProgressCallback, ProcessorConfig, ProgressCallback,
};
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Chunk-level progress bar for a single document.
struct CliProgressCallback {
    bar: ProgressBar,
    failed_chunks: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Counting pages…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failed_chunks: AtomicUsize::new(0),
        })
    }
}

impl ProcessingProgressCallback for CliProgressCallback {
    fn on_processing_start(&self, total_pages: usize, total_chunks: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} chunks  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_chunks as u64);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_pages} pages in {total_chunks} chunk(s)"))
        ));
    }

    fn on_chunk_start(&self, _chunk: usize, _total_chunks: usize, first_page: usize, last_page: usize) {
        self.bar.set_message(format!("pages {first_page}-{last_page}"));
    }

    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, pages_extracted: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            green("✓"),
            chunk,
            total_chunks,
            dim(&format!("{pages_extracted} page(s)")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk: usize, total_chunks: usize, error: &str) {
        self.failed_chunks.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            red("✗"),
            chunk,
            total_chunks,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_processing_complete(&self, total_pages: usize, pages_extracted: usize) {
        self.bar.finish_and_clear();
        let failed = self.failed_chunks.load(Ordering::SeqCst);
        eprintln!(
            "{} {}/{} pages extracted{}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&pages_extracted.to_string()),
            total_pages,
            if failed == 0 {
                String::new()
            } else {
                format!("  ({} chunk(s) failed)", red(&failed.to_string()))
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Free-form extraction, JSON to stdout
  pdf2sheet scan.pdf

  # Schema-driven extraction of a batch into one spreadsheet
  pdf2sheet --schema invoice.json -o invoices.csv scans/*.pdf

  # Ask the model what fields page 1 has
  pdf2sheet --detect-schema scan.pdf > suggested.json

  # Skip image clean-up and local OCR
  pdf2sheet --no-enhance --no-ocr scan.pdf

SCHEMA FILE:
  {
    "name": "Invoice",
    "fields": {
      "invoice_number": {"type": "string", "description": "Invoice number"},
      "total": {"type": "number", "description": "Grand total"}
    },
    "required_fields": ["total"]
  }

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY           OpenAI API key
  ANTHROPIC_API_KEY        Anthropic API key
  GEMINI_API_KEY           Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER   Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL          Override model ID
  PDFIUM_DYNAMIC_LIB_PATH  libpdfium, or the directory containing it
  RUST_LOG                 Log filter, overrides --verbose/--quiet

  Without pdfium, page counting and rendering fall back to poppler's
  pdfinfo and pdftoppm. OCR fallback needs the tesseract binary.
"#;

/// Extract structured data from scanned PDFs into JSON or CSV.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2sheet",
    version,
    about = "Extract structured data from scanned PDFs into JSON or CSV",
    long_about = "Rasterises scanned PDF pages, asks a vision LLM for the fields on each page, \
merges them into one record per document, and writes JSON or a CSV spreadsheet.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to process.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON file describing the fields to extract.
    #[arg(short, long, env = "PDF2SHEET_SCHEMA")]
    schema: Option<PathBuf>,

    /// Write output to this file instead of stdout (`.csv` selects CSV).
    #[arg(short, long, env = "PDF2SHEET_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format. Defaults to the output file's extension, else JSON.
    #[arg(long, value_enum, env = "PDF2SHEET_FORMAT")]
    format: Option<OutputFormat>,

    /// Leave processing metadata columns out of CSV output.
    #[arg(long, env = "PDF2SHEET_NO_METADATA")]
    no_metadata: bool,

    /// Also write per-field fill statistics as CSV to this file.
    #[arg(long)]
    field_stats: Option<PathBuf>,

    /// Suggest a schema from page 1 of the first input and exit.
    #[arg(long)]
    detect_schema: bool,

    /// Hint passed to schema detection (e.g. "invoice").
    #[arg(long, requires = "detect_schema")]
    hint: Option<String>,

    /// Skip deskew / denoise / contrast / sharpen.
    #[arg(long, env = "PDF2SHEET_NO_ENHANCE")]
    no_enhance: bool,

    /// Disable local OCR when the model returns nothing usable.
    #[arg(long, env = "PDF2SHEET_NO_OCR")]
    no_ocr: bool,

    /// Pages per chunk.
    #[arg(long, env = "PDF2SHEET_CHUNK_SIZE", default_value_t = 3)]
    chunk_size: usize,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2SHEET_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Attempts per chunk.
    #[arg(long, env = "PDF2SHEET_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Per-page model call timeout in seconds.
    #[arg(long, env = "PDF2SHEET_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Per-document deadline in seconds.
    #[arg(long, env = "PDF2SHEET_DEADLINE", default_value_t = 300)]
    deadline: u64,

    /// Vision model ID (default gpt-4o).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// pdfium shared library, or the directory containing it.
    #[arg(long, env = "PDFIUM_DYNAMIC_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Disable the progress bar.
    #[arg(long, env = "PDF2SHEET_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2SHEET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2SHEET_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Csv,
}

impl Cli {
    fn output_format(&self) -> OutputFormat {
        if let Some(f) = self.format {
            return f;
        }
        match self.output.as_deref().and_then(Path::extension) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => OutputFormat::Csv,
            _ => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let (inputs, duplicates) = dedupe_inputs(std::mem::take(&mut cli.inputs));
    cli.inputs = inputs;
    if !cli.quiet {
        for path in &duplicates {
            eprintln!("{} {}", cyan("⚠"), dim(&format!("Skipping duplicate input {}", path.display())));
        }
    }

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs for a single document.
    let show_progress = !cli.quiet && !cli.no_progress && cli.inputs.len() == 1 && !cli.detect_schema;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let schema = match &cli.schema {
        Some(path) => Some(load_schema(path).await?),
        None => None,
    };

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ProcessingProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;
    let metrics = Arc::new(ProcessingMetrics::new());
    let processor = DocumentProcessor::from_config(config)
        .context("Failed to set up the vision provider")?
        .with_metrics(Arc::clone(&metrics) as Arc<dyn pdf2sheet::MetricsSink>);

    // ── Schema detection mode ────────────────────────────────────────────
    if cli.detect_schema {
        let input = &cli.inputs[0];
        let detection = processor
            .detect_schema(input, cli.hint.as_deref())
            .await
            .with_context(|| format!("Schema detection failed for {}", input.display()))?;
        let json = serde_json::to_string_pretty(&detection).context("Failed to serialise schema")?;
        write_output(cli.output.as_deref(), json.as_bytes())?;
        return Ok(());
    }

    // ── Process ──────────────────────────────────────────────────────────
    let (records, failures) = if cli.inputs.len() == 1 {
        let input = &cli.inputs[0];
        let record = processor
            .process_pdf(input, schema.as_ref())
            .await
            .with_context(|| format!("Processing failed for {}", input.display()))?;
        (vec![record], Vec::new())
    } else {
        run_batch(&cli, processor, schema, Arc::clone(&metrics)).await?
    };

    // ── Output ───────────────────────────────────────────────────────────
    let bytes = match cli.output_format() {
        OutputFormat::Csv => export_csv(&records, !cli.no_metadata).context("Failed to write CSV")?,
        OutputFormat::Json => {
            let json = if records.len() == 1 {
                serde_json::to_string_pretty(&records[0])
            } else {
                serde_json::to_string_pretty(&records)
            };
            let mut bytes = json.context("Failed to serialise records")?.into_bytes();
            bytes.push(b'\n');
            bytes
        }
    };
    write_output(cli.output.as_deref(), &bytes)?;

    if let Some(path) = &cli.field_stats {
        let stats = export_field_stats_csv(&records).context("Failed to write field statistics")?;
        std::fs::write(path, stats)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if !cli.quiet {
        let snap = metrics.snapshot();
        eprintln!(
            "{}  {}/{} document(s)  avg {:.1}s{}",
            if failures.is_empty() { green("✔") } else { cyan("⚠") },
            snap.successful_documents,
            snap.total_documents,
            snap.average_processing_time_secs,
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
        for (path, error) in &failures {
            eprintln!("  {} {}  {}", red("✗"), path.display(), dim(error));
        }
    }

    if !failures.is_empty() {
        bail!("{} of {} document(s) failed", failures.len(), cli.inputs.len());
    }
    Ok(())
}

/// Queue every input, wait for all of them, and split results from failures.
async fn run_batch(
    cli: &Cli,
    processor: DocumentProcessor,
    schema: Option<ExtractionSchema>,
    metrics: Arc<ProcessingMetrics>,
) -> Result<(Vec<MergedRecord>, Vec<(PathBuf, String)>)> {
    let cancel = CancellationToken::new();
    // Every job must still be readable when its turn to be collected comes.
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::with_retention(
        cli.inputs.len().max(DEFAULT_TERMINAL_RETENTION),
    ));
    let (runner, worker) = JobRunner::new(
        Arc::clone(&store),
        Arc::new(processor),
        cli.inputs.len(),
        cancel.clone(),
    );
    let worker = tokio::spawn(worker.run());
    let health = Arc::new(HealthMonitor::new(
        Arc::clone(&store),
        HealthThresholds::default(),
        Duration::from_secs(30),
    )
    .with_metrics(metrics))
    .spawn(cancel.clone());

    let mut queued = Vec::with_capacity(cli.inputs.len());
    for path in &cli.inputs {
        let id = runner
            .enqueue(DocumentRef::from_path(path), schema.clone())
            .await
            .with_context(|| format!("Failed to queue {}", path.display()))?;
        queued.push((path.clone(), id));
    }
    if !cli.quiet {
        eprintln!("{} {}", cyan("◆"), bold(&format!("Queued {} document(s)", queued.len())));
    }

    let mut records = Vec::new();
    let mut failures = Vec::new();
    for (path, id) in queued {
        let report = runner.wait(id, Duration::from_millis(250)).await?;
        match (report.status, report.result) {
            (JobStatus::Completed, Some(record)) => {
                if !cli.quiet {
                    eprintln!(
                        "  {} {}  {}",
                        green("✓"),
                        path.display(),
                        dim(&format!(
                            "{} field(s), {} failed chunk(s)",
                            record.fields.len(),
                            record.metadata.chunks_failed
                        ))
                    );
                }
                records.push(record);
            }
            (status, _) => {
                let error = report.error.unwrap_or_else(|| format!("job ended {status}"));
                if !cli.quiet {
                    eprintln!("  {} {}  {}", red("✗"), path.display(), red(&error));
                }
                failures.push((path, error));
            }
        }
    }

    cancel.cancel();
    drop(runner);
    worker.await.context("Job worker panicked")?;
    health.await.context("Health monitor panicked")?;
    Ok((records, failures))
}

async fn load_schema(path: &Path) -> Result<ExtractionSchema> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read schema from {}", path.display()))?;
    ExtractionSchema::from_json(&text)
        .with_context(|| format!("Invalid schema in {}", path.display()))
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(bytes).context("Failed to write to stdout")?;
            if !bytes.ends_with(b"\n") {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}

/// Drop inputs that name a file already listed, keeping first occurrences.
///
/// Paths are compared after canonicalisation; a path that cannot be
/// resolved (missing file) is compared as given and left for the job to
/// report.
fn dedupe_inputs(inputs: Vec<PathBuf>) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(inputs.len());
    let mut duplicates = Vec::new();
    for path in inputs {
        let key = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if seen.insert(key) {
            kept.push(path);
        } else {
            duplicates.push(path);
        }
    }
    (kept, duplicates)
}

/// Map CLI args to `ProcessorConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ProcessorConfig> {
    let mut builder = ProcessorConfig::builder()
        .dpi(cli.dpi)
        .chunk_size(cli.chunk_size)
        .max_attempts(cli.max_attempts)
        .api_timeout(Duration::from_secs(cli.api_timeout))
        .deadline(Duration::from_secs(cli.deadline))
        .enhance(!cli.no_enhance)
        .ocr_fallback(!cli.no_ocr);

    if let Some(model) = &cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(path) = &cli.pdfium_lib {
        builder = builder.pdfium_library_path(path.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_inputs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let scan = dir.path().join("scan.pdf");
        let other = dir.path().join("other.pdf");
        std::fs::write(&scan, b"%PDF-1.4\n").unwrap();
        std::fs::write(&other, b"%PDF-1.4\n").unwrap();
        let via_dot = dir.path().join(".").join("scan.pdf");

        let (kept, duplicates) = dedupe_inputs(vec![scan.clone(), other.clone(), via_dot.clone(), scan.clone()]);
        assert_eq!(kept, vec![scan.clone(), other]);
        assert_eq!(duplicates, vec![via_dot, scan]);
    }

    #[test]
    fn missing_inputs_are_compared_as_given() {
        let a = PathBuf::from("/no/such/a.pdf");
        let b = PathBuf::from("/no/such/b.pdf");
        let (kept, duplicates) = dedupe_inputs(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(kept, vec![a.clone(), b]);
        assert_eq!(duplicates, vec![a]);
    }
}
