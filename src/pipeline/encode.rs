//! Image encoding: `DynamicImage` → base64 payload wrapped in `ImageData`.
//!
//! Pages are sent as lossless PNG. A scan that is still too large after
//! resizing (photographic noise compresses badly) is re-encoded as JPEG so
//! the request stays under provider upload limits.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;
use tracing::{debug, warn};

/// Quality used when a page must fall back to JPEG.
pub const JPEG_FALLBACK_QUALITY: u8 = 85;

/// Encode a page as base64 PNG, or JPEG when the PNG exceeds `max_bytes`.
///
/// `detail: "high"` asks GPT-4-class models for the full tile budget so
/// small print survives.
pub fn encode_page(img: &DynamicImage, max_bytes: usize) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let mime = if buf.len() > max_bytes {
        let png_len = buf.len();
        buf.clear();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_FALLBACK_QUALITY);
            encoder.encode_image(&img.to_rgb8())?;
        }
        warn!(
            "PNG payload {} bytes exceeds {} bytes; sent as JPEG ({} bytes)",
            png_len,
            max_bytes,
            buf.len()
        );
        "image/jpeg"
    } else {
        "image/png"
    };

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64 ({})", b64.len(), mime);

    Ok(ImageData::new(b64, mime).with_detail("high"))
}
