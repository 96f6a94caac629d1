//! Pipeline stages for scanned-PDF extraction.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ enhance ──▶ encode ──▶ extract ──▶ parse ──▶ merge
//! (checks)  (pdfium)   (imageproc) (base64)   (VLM)      (JSON)    (record)
//!                                               │
//!                                               └──▶ ocr (fallback)
//! ```
//!
//! 1. [`input`]  : reject missing, non-regular and empty files
//! 2. [`render`] : page count and page-range rasterisation behind
//!    [`render::PageRasterizer`]; runs in `spawn_blocking`
//! 3. [`enhance`]: optional deskew, denoise, contrast and sharpen
//! 4. [`encode`] : PNG (or JPEG when oversized) → base64 `ImageData`
//! 5. [`extract`]: one time-boxed vision call per page behind
//!    [`extract::VisionBackend`]
//! 6. [`parse`]  : tolerant response parsing into [`parse::Extraction`]
//! 7. [`ocr`]    : local OCR when the model yields no fields
//! 8. [`chunk`]  : run steps 2–7 over a page range with retry/backoff
//! 9. [`merge`]  : first-non-empty merge into one record
//! 10. [`memory`]: RSS sampling between chunks

pub mod chunk;
pub mod encode;
pub mod enhance;
pub mod extract;
pub mod input;
pub mod memory;
pub mod merge;
pub mod ocr;
pub mod parse;
pub mod render;
