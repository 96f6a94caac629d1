//! Extraction client: one page image in, one [`PageResult`] out.
//!
//! The network call goes through the [`VisionBackend`] seam so that the
//! chunk processor and its tests never depend on a live provider. All prompt
//! text lives in [`crate::prompts`]; all response-shape handling lives in
//! [`super::parse`]. What is left here is the order of fallbacks:
//!
//! ```text
//! model JSON ──▶ key: value scan ──▶ local OCR ──▶ model raw text ──▶ EmptyResponse
//! ```
//!
//! The call is time-boxed by `api_timeout`. A timeout or provider error is a
//! [`PageError`]; it is not retried here. The chunk processor decides
//! whether the whole chunk is retried.

use crate::config::ProcessorConfig;
use crate::error::{PageError, ProcessingError};
use crate::output::{ExtractionMethod, PageResult};
use crate::pipeline::encode::encode_page;
use crate::pipeline::ocr::{OcrEngine, TesseractCli};
use crate::pipeline::parse::{parse_json_object, parse_response, Extraction};
use crate::prompts;
use crate::schema::{ExtractionSchema, FieldSpec};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Field under which unstructured page text is kept.
pub const RAW_TEXT_FIELD: &str = "raw_text";

/// A failed vision call, as reported by the backend.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct VisionError(pub String);

/// Sends one prompt plus one image to a vision-capable model.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, image: ImageData) -> Result<String, VisionError>;
}

/// [`VisionBackend`] over an `edgequake-llm` provider.
pub struct LlmVisionBackend {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmVisionBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ProcessorConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, ProcessingError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VisionBackend for LlmVisionBackend {
    async fn complete(&self, prompt: &str, image: ImageData) -> Result<String, VisionError> {
        let messages = vec![ChatMessage::user_with_images(prompt, vec![image])];
        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| VisionError(e.to_string()))?;
        debug!(
            "Vision call: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ProcessingError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ProcessingError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is
/// 2. `config.provider_name` with `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
/// 4. OpenAI when `OPENAI_API_KEY` is set
/// 5. `ProviderFactory::from_env()` auto-detection
pub fn resolve_provider(config: &ProcessorConfig) -> Result<Arc<dyn LLMProvider>, ProcessingError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", config.model_or_default());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ProcessingError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Result of [`ExtractionClient::detect_schema`].
#[derive(Debug, Clone, Serialize)]
pub struct SchemaDetection {
    pub detected_type: String,
    pub confidence: f32,
    pub suggested_schema: ExtractionSchema,
    pub sample_extraction: Map<String, Value>,
}

impl SchemaDetection {
    /// The schema offered when detection fails.
    pub fn generic() -> Self {
        let schema = ExtractionSchema {
            name: Some("Generic Document".to_string()),
            description: Some("Generic document schema".to_string()),
            ..Default::default()
        }
        .with_field("text_content", FieldSpec::new("string", "Full text content"))
        .with_field("date", FieldSpec::new("date", "Document date"))
        .with_field("title", FieldSpec::new("string", "Document title"));

        Self {
            detected_type: "generic".to_string(),
            confidence: 0.5,
            suggested_schema: schema,
            sample_extraction: Map::new(),
        }
    }

    fn from_response(text: &str) -> Option<Self> {
        let mut obj = parse_json_object(text)?;
        let detected_type = match obj.shift_remove("detected_type")? {
            Value::String(s) if !s.trim().is_empty() => s,
            _ => return None,
        };
        let fields = match obj.shift_remove("fields")? {
            Value::Object(f) => f,
            _ => return None,
        };
        let required_fields = obj
            .get("required_fields")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0) as f32)
            .unwrap_or(0.9);
        let sample_extraction = match obj.shift_remove("sample_extraction") {
            Some(Value::Object(m)) => m,
            _ => Map::new(),
        };

        Some(Self {
            suggested_schema: ExtractionSchema {
                name: Some(detected_type.clone()),
                description: obj.get("description").and_then(Value::as_str).map(String::from),
                fields,
                required_fields,
            },
            detected_type,
            confidence,
            sample_extraction,
        })
    }
}

/// Drives one vision call per page and applies the fallback chain.
#[derive(Clone)]
pub struct ExtractionClient {
    backend: Arc<dyn VisionBackend>,
    ocr: Option<Arc<dyn OcrEngine>>,
    api_timeout: Duration,
    max_image_bytes: usize,
}

impl ExtractionClient {
    pub fn new(backend: Arc<dyn VisionBackend>, api_timeout: Duration, max_image_bytes: usize) -> Self {
        Self {
            backend,
            ocr: None,
            api_timeout,
            max_image_bytes,
        }
    }

    /// Client with the timeout and payload cap from `config`, and Tesseract
    /// as OCR fallback when `config.ocr_fallback` is set.
    pub fn from_config(backend: Arc<dyn VisionBackend>, config: &ProcessorConfig) -> Self {
        let client = Self::new(backend, config.api_timeout, config.max_image_bytes);
        if config.ocr_fallback {
            client.with_ocr(Arc::new(TesseractCli::default()))
        } else {
            client
        }
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Send one prompt and one image; time-boxed.
    async fn call(&self, prompt: &str, image: &DynamicImage, page: usize) -> Result<String, PageError> {
        let data = encode_page(image, self.max_image_bytes).map_err(|e| PageError::Render {
            page,
            detail: format!("encoding failed: {e}"),
        })?;

        match timeout(self.api_timeout, self.backend.complete(prompt, data)).await {
            Err(_) => Err(PageError::Timeout {
                page,
                secs: self.api_timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(PageError::ModelCall {
                page,
                detail: e.to_string(),
            }),
            Ok(Ok(text)) => Ok(text),
        }
    }

    /// Extract fields from one page. `page_index` is 1-based and document-wide.
    pub async fn extract(
        &self,
        image: &DynamicImage,
        schema: Option<&ExtractionSchema>,
        page_index: usize,
    ) -> Result<PageResult, PageError> {
        let prompt = prompts::extraction_prompt(schema);
        let text = self.call(&prompt, image, page_index).await?;

        let raw = match parse_response(&text) {
            Extraction::Structured {
                fields,
                confidence,
                document_type,
                method,
            } if !fields.is_empty() => {
                debug!("Page {}: {} field(s) via {:?}", page_index, fields.len(), method);
                return Ok(PageResult {
                    page_index,
                    fields,
                    confidence,
                    method,
                    document_type,
                });
            }
            Extraction::Structured { .. } => String::new(),
            Extraction::RawText(t) => t,
        };

        if let Some(ocr_text) = self.run_ocr(image, page_index).await {
            info!("Page {}: no fields from model, kept OCR text", page_index);
            return Ok(raw_text_page(page_index, ocr_text, ExtractionMethod::OcrFallback));
        }
        if !raw.is_empty() {
            warn!("Page {}: no fields from model, kept raw response text", page_index);
            return Ok(raw_text_page(page_index, raw, ExtractionMethod::RawText));
        }
        Err(PageError::EmptyResponse { page: page_index })
    }

    async fn run_ocr(&self, image: &DynamicImage, page_index: usize) -> Option<String> {
        let ocr = Arc::clone(self.ocr.as_ref()?);
        let image = image.clone();
        match tokio::task::spawn_blocking(move || ocr.recognize(&image)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!("Page {}: OCR fallback failed: {}", page_index, e);
                None
            }
            Err(e) => {
                warn!("Page {}: OCR task panicked: {}", page_index, e);
                None
            }
        }
    }

    /// Suggest a schema from a sample page. Any failure (call error,
    /// timeout, unparseable answer) yields [`SchemaDetection::generic`].
    pub async fn detect_schema(&self, image: &DynamicImage, hint: Option<&str>) -> SchemaDetection {
        let prompt = prompts::schema_detection_prompt(hint);
        match self.call(&prompt, image, 1).await {
            Ok(text) => SchemaDetection::from_response(&text).unwrap_or_else(|| {
                warn!("Schema detection answer was not usable; using generic schema");
                SchemaDetection::generic()
            }),
            Err(e) => {
                warn!("Schema detection failed: {}; using generic schema", e);
                SchemaDetection::generic()
            }
        }
    }
}

fn raw_text_page(page_index: usize, text: String, method: ExtractionMethod) -> PageResult {
    let mut fields = Map::new();
    fields.insert(RAW_TEXT_FIELD.to_string(), Value::String(text));
    PageResult {
        page_index,
        fields,
        method,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::OcrError;
    use std::sync::Mutex;

    struct Scripted {
        answer: Result<String, VisionError>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(text.to_string()),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VisionBackend for Scripted {
        async fn complete(&self, prompt: &str, _image: ImageData) -> Result<String, VisionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            tokio::time::sleep(self.delay).await;
            self.answer.clone()
        }
    }

    struct FixedOcr(&'static str);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _img: &DynamicImage) -> Result<String, OcrError> {
            Ok(self.0.to_string())
        }
    }

    fn page() -> DynamicImage {
        DynamicImage::new_luma8(16, 16)
    }

    fn client(backend: Arc<dyn VisionBackend>) -> ExtractionClient {
        ExtractionClient::new(backend, Duration::from_secs(60), 8 * 1024 * 1024)
    }

    #[tokio::test]
    async fn structured_answer_becomes_page_result() {
        let backend = Scripted::answering(r#"{"fields": {"total": "5"}, "confidence": {"total": 0.8}}"#);
        let result = client(backend.clone()).extract(&page(), None, 4).await.unwrap();
        assert_eq!(result.page_index, 4);
        assert_eq!(result.fields["total"], "5");
        assert_eq!(result.method, ExtractionMethod::Model);
        assert!(backend.prompts.lock().unwrap()[0].contains("document_type"));
    }

    #[tokio::test]
    async fn schema_is_sent_in_prompt() {
        let backend = Scripted::answering(r#"{"invoice_no": "A1"}"#);
        let schema = ExtractionSchema::new().with_field("invoice_no", FieldSpec::new("string", "Invoice number"));
        client(backend.clone()).extract(&page(), Some(&schema), 1).await.unwrap();
        assert!(backend.prompts.lock().unwrap()[0].contains("Invoice number"));
    }

    #[tokio::test]
    async fn prose_without_fields_uses_ocr_then_raw_text() {
        let prose = "I cannot read this page clearly.";
        let with_ocr = client(Scripted::answering(prose)).with_ocr(Arc::new(FixedOcr("SCANNED TEXT")));
        let r = with_ocr.extract(&page(), None, 2).await.unwrap();
        assert_eq!(r.method, ExtractionMethod::OcrFallback);
        assert_eq!(r.fields[RAW_TEXT_FIELD], "SCANNED TEXT");

        let without_ocr = client(Scripted::answering(prose));
        let r = without_ocr.extract(&page(), None, 2).await.unwrap();
        assert_eq!(r.method, ExtractionMethod::RawText);
        assert_eq!(r.fields[RAW_TEXT_FIELD], prose);
    }

    #[tokio::test]
    async fn empty_answer_without_ocr_is_a_page_error() {
        let err = client(Scripted::answering("   ")).extract(&page(), None, 3).await.unwrap_err();
        assert!(matches!(err, PageError::EmptyResponse { page: 3 }));
    }

    #[tokio::test]
    async fn provider_error_is_a_model_call_error() {
        let backend = Arc::new(Scripted {
            answer: Err(VisionError("rate limited".into())),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        });
        let err = client(backend).extract(&page(), None, 1).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let backend = Arc::new(Scripted {
            answer: Ok("{}".into()),
            delay: Duration::from_secs(120),
            prompts: Mutex::new(Vec::new()),
        });
        let err = client(backend).extract(&page(), None, 5).await.unwrap_err();
        assert!(matches!(err, PageError::Timeout { page: 5, secs: 60 }));
    }

    #[tokio::test]
    async fn schema_detection_parses_answer() {
        let backend = Scripted::answering(
            r#"{"detected_type": "receipt", "confidence": 0.8,
                "fields": {"total": {"type": "number", "description": "Total paid"}},
                "required_fields": ["total"], "sample_extraction": {"total": 12}}"#,
        );
        let d = client(backend).detect_schema(&page(), Some("shop receipts")).await;
        assert_eq!(d.detected_type, "receipt");
        assert_eq!(d.suggested_schema.required_fields, vec!["total"]);
        assert_eq!(d.suggested_schema.field("total").unwrap().field_type, "number");
        assert_eq!(d.sample_extraction["total"], 12);
    }

    #[tokio::test]
    async fn schema_detection_falls_back_to_generic() {
        let d = client(Scripted::answering("no idea")).detect_schema(&page(), None).await;
        assert_eq!(d.detected_type, "generic");
        assert_eq!(d.confidence, 0.5);
        assert!(d.suggested_schema.fields.contains_key("text_content"));
    }
}
