//! PDF rasterisation: count pages and render page ranges to `DynamicImage`.
//!
//! ## Why a trait?
//!
//! The chunk processor only needs "how many pages" and "give me pages
//! `[start, end)` as images". [`PageRasterizer`] is that seam; tests plug in
//! synthetic images and production uses [`PdfiumRasterizer`].
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state, and the poppler fallback
//! shells out. Both are blocking, so callers run [`PageRasterizer`] methods
//! inside `tokio::task::spawn_blocking`. One call renders its pages one
//! after another on that single thread; the chunk size, not a thread count,
//! bounds how many bitmaps are alive at once.

use crate::error::{PageError, ProcessingError};
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Documents above this many pages are processed but logged.
pub const LARGE_DOCUMENT_PAGES: usize = 50;

/// Page counting and page-range rendering.
pub trait PageRasterizer: Send + Sync {
    /// Total pages in the document.
    ///
    /// Returns [`ProcessingError::UnreadablePdf`] when the document cannot be
    /// read at all. A readable document with no pages returns `Ok(0)`.
    fn page_count(&self, path: &Path) -> Result<usize, ProcessingError>;

    /// Render 0-based pages `[start, end)`, each already fitted within the
    /// configured maximum size. Pages past the end of the document are
    /// skipped, so the result may be shorter than `end - start`.
    fn rasterize(&self, path: &Path, start: usize, end: usize) -> Result<Vec<DynamicImage>, PageError>;
}

/// Downsize `img` to fit within `max_w × max_h`, preserving aspect ratio.
///
/// Images already inside the box are returned unchanged; nothing is upscaled.
/// Uses Lanczos3 resampling.
pub fn fit_within(img: DynamicImage, max_w: u32, max_h: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w <= max_w && h <= max_h {
        return img;
    }
    let resized = img.resize(max_w, max_h, FilterType::Lanczos3);
    debug!(
        "Resized page image {}x{} → {}x{}",
        w,
        h,
        resized.width(),
        resized.height()
    );
    resized
}

/// Production rasteriser: pdfium first, poppler command-line tools second.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    pub dpi: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(dpi: u32, max_width: u32, max_height: u32) -> Self {
        Self {
            dpi,
            max_width,
            max_height,
            library_path: None,
        }
    }

    pub fn with_library_path(mut self, path: Option<PathBuf>) -> Self {
        self.library_path = path;
        self
    }

    pub fn from_config(config: &crate::config::ProcessorConfig) -> Self {
        Self::new(config.dpi, config.max_image_width, config.max_image_height)
            .with_library_path(config.pdfium_library_path.clone())
    }

    /// Bind pdfium without panicking when the shared library is missing.
    ///
    /// Lookup order: the configured path, `PDFIUM_DYNAMIC_LIB_PATH`, then the
    /// system library search path.
    fn bind(&self) -> Result<Pdfium, String> {
        let configured = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_DYNAMIC_LIB_PATH").map(PathBuf::from));

        let bindings = match configured {
            Some(p) if p.is_file() => Pdfium::bind_to_library(&p),
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| format!("pdfium library unavailable: {:?}", e))?;

        Ok(Pdfium::new(bindings))
    }

    fn pdfium_page_count(&self, path: &Path) -> Result<usize, String> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| format!("pdfium: {:?}", e))?;
        Ok(document.pages().len() as usize)
    }

    fn pdfium_render(&self, path: &Path, start: usize, end: usize) -> Result<Vec<DynamicImage>, String> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| format!("pdfium: {:?}", e))?;

        let pages = document.pages();
        let total = pages.len() as usize;
        let render_config = PdfRenderConfig::new().scale_page_by_factor(self.dpi as f32 / 72.0);

        let mut images = Vec::with_capacity(end.saturating_sub(start));
        for idx in start..end.min(total) {
            let page = pages
                .get(idx as u16)
                .map_err(|e| format!("page {}: {:?}", idx + 1, e))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| format!("page {}: {:?}", idx + 1, e))?;
            let image = fit_within(bitmap.as_image(), self.max_width, self.max_height);
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }
        if end > total {
            warn!("Pages {}-{} are past the end of the document ({} pages)", total + 1, end, total);
        }
        Ok(images)
    }

    /// poppler fallback. `pdftoppm` takes 1-based inclusive bounds.
    fn pdftoppm_render(&self, path: &Path, start: usize, end: usize) -> Result<Vec<DynamicImage>, String> {
        let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
        let prefix = dir.path().join("page");
        let first = (start + 1).to_string();
        let last = end.to_string();

        let output = Command::new("pdftoppm")
            .args(["-png", "-r", &self.dpi.to_string(), "-f", &first, "-l", &last])
            .arg(path)
            .arg(&prefix)
            .output()
            .map_err(|e| format!("pdftoppm (install poppler-utils): {}", e))?;
        if !output.status.success() {
            return Err(format!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        // pdftoppm zero-pads page numbers to a common width, so a
        // lexicographic sort is page order.
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir.path())
            .map_err(|e| e.to_string())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        files.sort();

        files
            .iter()
            .map(|f| {
                image::open(f)
                    .map(|img| fit_within(img, self.max_width, self.max_height))
                    .map_err(|e| format!("{}: {}", f.display(), e))
            })
            .collect()
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self, path: &Path) -> Result<usize, ProcessingError> {
        let mut failures = Vec::new();

        match self.pdfium_page_count(path) {
            Ok(n) => return Ok(n),
            Err(e) => failures.push(e),
        }
        match pdfinfo_page_count(path) {
            Ok(n) => {
                info!("Page count from pdfinfo: {}", n);
                return Ok(n);
            }
            Err(e) => failures.push(e),
        }
        match pdftoppm_probe(path) {
            Ok(n) => {
                warn!("Page count unknown; probing page 1 succeeded, assuming {} page(s)", n);
                return Ok(n);
            }
            Err(e) => failures.push(e),
        }

        Err(ProcessingError::UnreadablePdf {
            path: path.to_path_buf(),
            detail: failures.join("; "),
        })
    }

    fn rasterize(&self, path: &Path, start: usize, end: usize) -> Result<Vec<DynamicImage>, PageError> {
        if start >= end {
            return Ok(Vec::new());
        }
        match self.pdfium_render(path, start, end) {
            Ok(images) => Ok(images),
            Err(pdfium_err) => {
                debug!("pdfium render failed ({}); trying pdftoppm", pdfium_err);
                self.pdftoppm_render(path, start, end)
                    .map_err(|e| PageError::Render {
                        page: start + 1,
                        detail: format!("{pdfium_err}; {e}"),
                    })
            }
        }
    }
}

/// Parse the `Pages:` line of `pdfinfo` output.
pub fn parse_pdfinfo_pages(stdout: &str) -> Option<usize> {
    stdout
        .lines()
        .find(|l| l.starts_with("Pages:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse().ok())
}

fn pdfinfo_page_count(path: &Path) -> Result<usize, String> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .map_err(|e| format!("pdfinfo (install poppler-utils): {}", e))?;
    if !output.status.success() {
        return Err(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| "pdfinfo printed no Pages: line".to_string())
}

/// Conversion-based estimate: if page 1 converts, the document has at least
/// one page. Used only when nothing can report an exact count.
fn pdftoppm_probe(path: &Path) -> Result<usize, String> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let status = Command::new("pdftoppm")
        .args(["-png", "-r", "72", "-f", "1", "-l", "1", "-singlefile"])
        .arg(path)
        .arg(dir.path().join("probe"))
        .status()
        .map_err(|e| format!("pdftoppm (install poppler-utils): {}", e))?;
    if status.success() {
        Ok(1)
    } else {
        Err(format!("pdftoppm could not convert page 1 ({})", status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn oversized_image_fits_box_and_keeps_ratio() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(4000, 3000, Luma([200])));
        let out = fit_within(img, 2000, 2000);
        assert!(out.width() <= 2000 && out.height() <= 2000);
        assert_eq!((out.width(), out.height()), (2000, 1500));
    }

    #[test]
    fn tall_image_is_bounded_by_height() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(1000, 4000));
        let out = fit_within(img, 2000, 2000);
        assert_eq!((out.width(), out.height()), (500, 2000));
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(800, 600));
        let out = fit_within(img, 2000, 2000);
        assert_eq!((out.width(), out.height()), (800, 600));
    }

    #[test]
    fn pdfinfo_pages_line_is_parsed() {
        let out = "Title:          scan\nProducer:       x\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_pages(out), Some(12));
        assert_eq!(parse_pdfinfo_pages("Title: x\n"), None);
    }

    #[test]
    fn garbage_file_is_unreadable() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"definitely not a pdf").unwrap();
        let r = PdfiumRasterizer::new(200, 2000, 2000);
        let err = r.page_count(f.path()).unwrap_err();
        assert!(matches!(err, ProcessingError::UnreadablePdf { .. }), "got: {err}");
    }

    #[test]
    fn empty_range_renders_nothing() {
        let r = PdfiumRasterizer::new(200, 2000, 2000);
        let images = r.rasterize(Path::new("/nonexistent.pdf"), 3, 3).unwrap();
        assert!(images.is_empty());
    }
}
