//! Local OCR used when the vision model's answer yields no fields.
//!
//! OCR text is never parsed into fields; it is kept as the page's raw text
//! so the scan's content is not lost entirely.

use image::DynamicImage;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Blocking text recognition over one page image.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, img: &DynamicImage) -> Result<String, OcrError>;
}

/// Tesseract via its command-line binary.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    pub language: String,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
        }
    }
}

impl TesseractCli {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, img: &DynamicImage) -> Result<String, OcrError> {
        let dir = tempfile::tempdir()?;
        let image_path = dir.path().join("page.png");
        img.save_with_format(&image_path, image::ImageFormat::Png)?;

        let output = Command::new("tesseract")
            .arg(&image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
                debug!("tesseract recognised {} chars", text.len());
                Ok(text)
            }
            Ok(output) => Err(OcrError::Failed(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::BackendNotAvailable(
                "tesseract not found (install tesseract-ocr)".to_string(),
            )),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_language_is_english() {
        assert_eq!(TesseractCli::default().language, "eng");
    }

    #[test]
    fn missing_binary_is_reported_not_panicked() {
        // Either tesseract is installed and returns text for a blank page,
        // or the error names the missing backend.
        let img = DynamicImage::new_luma8(32, 32);
        match TesseractCli::default().recognize(&img) {
            Ok(text) => assert!(text.len() < 32),
            Err(e) => assert!(!e.to_string().is_empty()),
        }
    }
}
