//! Configuration types for scanned-PDF extraction.
//!
//! All processing behaviour is controlled through [`ProcessorConfig`], built
//! via its [`ProcessorConfigBuilder`]. Every knob lives in one struct so a
//! config can be shared between the CLI, the job worker and tests.

use crate::error::ProcessingError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default vision model when neither the caller nor the environment picks one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for processing one PDF into a [`crate::output::MergedRecord`].
///
/// Built via [`ProcessorConfig::builder()`] or using
/// [`ProcessorConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2sheet::ProcessorConfig;
///
/// let config = ProcessorConfig::builder()
///     .dpi(150)
///     .chunk_size(5)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 5);
/// ```
#[derive(Clone)]
pub struct ProcessorConfig {
    /// Rendering DPI for rasterised pages. Range: 72–400. Default: 200.
    ///
    /// Scans usually carry small print; 200 DPI keeps it legible to the model
    /// before the resolution cap below kicks in.
    pub dpi: u32,

    /// Maximum page image width after rendering. Default: 2000.
    pub max_image_width: u32,

    /// Maximum page image height after rendering. Default: 2000.
    pub max_image_height: u32,

    /// Pages rendered and extracted together. Default: 3.
    ///
    /// This is the memory-control knob: at most `chunk_size` page bitmaps are
    /// alive at once.
    pub chunk_size: usize,

    /// Attempts per chunk before it is recorded as failed. Default: 3.
    pub max_attempts: u32,

    /// Base of the exponential backoff between chunk attempts. Default: 1 s.
    ///
    /// The wait before attempt `n + 1` is `backoff_base × 2ⁿ`: 2 s, then 4 s.
    pub backoff_base: Duration,

    /// Time box for a single vision-model call. Default: 60 s.
    pub api_timeout: Duration,

    /// Overall deadline for one document. Default: 300 s.
    pub deadline: Duration,

    /// Pause between consecutive chunks. Default: 500 ms.
    pub chunk_pause: Duration,

    /// Resident-memory level above which chunk buffers are released early
    /// and a warning is logged. Default: 1000 MB.
    pub memory_threshold_mb: u64,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// PNG payloads above this size are re-encoded as JPEG. Default: 8 MiB.
    pub max_image_bytes: usize,

    /// Model identifier, e.g. "gpt-4o". If None, [`DEFAULT_MODEL`] or the
    /// provider default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Run deskew/denoise/contrast/sharpen before extraction. Default: true.
    pub enhance: bool,

    /// Fall back to local OCR when the model's answer holds no fields. Default: true.
    pub ocr_fallback: bool,

    /// Directory or file of the pdfium shared library. Falls back to the
    /// `PDFIUM_DYNAMIC_LIB_PATH` environment variable, then the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Per-chunk progress events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_image_width: 2000,
            max_image_height: 2000,
            chunk_size: 3,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            api_timeout: Duration::from_secs(60),
            deadline: Duration::from_secs(300),
            chunk_pause: Duration::from_millis(500),
            memory_threshold_mb: 1000,
            temperature: 0.1,
            max_tokens: 4096,
            max_image_bytes: 8 * 1024 * 1024,
            model: None,
            provider_name: None,
            provider: None,
            enhance: true,
            ocr_fallback: true,
            pdfium_library_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ProcessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfig")
            .field("dpi", &self.dpi)
            .field("max_image_width", &self.max_image_width)
            .field("max_image_height", &self.max_image_height)
            .field("chunk_size", &self.chunk_size)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("api_timeout", &self.api_timeout)
            .field("deadline", &self.deadline)
            .field("chunk_pause", &self.chunk_pause)
            .field("memory_threshold_mb", &self.memory_threshold_mb)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("enhance", &self.enhance)
            .field("ocr_fallback", &self.ocr_fallback)
            .finish()
    }
}

impl ProcessorConfig {
    /// Create a new builder for `ProcessorConfig`.
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model name that will be sent to the provider.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`ProcessorConfig`].
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl fmt::Debug for ProcessorConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ProcessorConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_image_size(mut self, width: u32, height: u32) -> Self {
        self.config.max_image_width = width;
        self.config.max_image_height = height;
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.config.backoff_base = base;
        self
    }

    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.config.api_timeout = timeout;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = deadline;
        self
    }

    pub fn chunk_pause(mut self, pause: Duration) -> Self {
        self.config.chunk_pause = pause;
        self
    }

    pub fn memory_threshold_mb(mut self, mb: u64) -> Self {
        self.config.memory_threshold_mb = mb;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_image_bytes(mut self, n: usize) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn enhance(mut self, v: bool) -> Self {
        self.config.enhance = v;
        self
    }

    pub fn ocr_fallback(mut self, v: bool) -> Self {
        self.config.ocr_fallback = v;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessorConfig, ProcessingError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ProcessingError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.chunk_size == 0 {
            return Err(ProcessingError::InvalidConfig(
                "Chunk size must be ≥ 1".into(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(ProcessingError::InvalidConfig(
                "Max attempts must be ≥ 1".into(),
            ));
        }
        if c.max_image_width < 100 || c.max_image_height < 100 {
            return Err(ProcessingError::InvalidConfig(format!(
                "Maximum image size must be at least 100×100, got {}×{}",
                c.max_image_width, c.max_image_height
            )));
        }
        if c.api_timeout.is_zero() || c.deadline.is_zero() {
            return Err(ProcessingError::InvalidConfig(
                "Timeouts must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ProcessorConfig::default();
        assert_eq!(c.dpi, 200);
        assert_eq!((c.max_image_width, c.max_image_height), (2000, 2000));
        assert_eq!(c.chunk_size, 3);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.backoff_base, Duration::from_secs(1));
        assert_eq!(c.api_timeout, Duration::from_secs(60));
        assert_eq!(c.deadline, Duration::from_secs(300));
        assert_eq!(c.chunk_pause, Duration::from_millis(500));
        assert_eq!(c.memory_threshold_mb, 1000);
        assert_eq!(c.max_tokens, 4096);
        assert!((c.temperature - 0.1).abs() < f32::EPSILON);
        assert!(c.enhance && c.ocr_fallback);
        assert_eq!(c.model_or_default(), DEFAULT_MODEL);
    }

    #[test]
    fn builder_rejects_out_of_range_dpi() {
        let err = ProcessorConfig::builder().dpi(600).build().unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidConfig(_)));
        assert!(err.to_string().contains("600"));
    }

    #[test]
    fn builder_rejects_zero_chunk_size_and_attempts() {
        assert!(ProcessorConfig::builder().chunk_size(0).build().is_err());
        assert!(ProcessorConfig::builder().max_attempts(0).build().is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let c = ProcessorConfig::builder()
            .chunk_size(5)
            .max_image_size(1000, 1200)
            .enhance(false)
            .model("claude-sonnet-4-20250514")
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.chunk_size, 5);
        assert_eq!(c.max_image_height, 1200);
        assert!(!c.enhance);
        assert_eq!(c.model_or_default(), "claude-sonnet-4-20250514");
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn debug_hides_provider() {
        let dbg = format!("{:?}", ProcessorConfig::default());
        assert!(dbg.contains("ProcessorConfig"));
        assert!(dbg.contains("chunk_size: 3"));
    }
}
