//! Scan clean-up before extraction: deskew → denoise → contrast → sharpen.
//!
//! Every step works on the luminance channel; the result is a grayscale
//! image. Colour carries nothing a vision model needs to read a scanned
//! form, and dropping it cuts the encoded payload roughly in three.
//!
//! The enhancer is a pure function of its input. Skipping it only affects
//! extraction accuracy, never correctness.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::hough::{detect_lines, LineDetectionOptions};
use tracing::debug;

/// Rotations smaller than this (degrees) are left alone.
pub const MIN_DESKEW_DEGREES: f32 = 0.5;

/// Only lines within this many degrees of horizontal vote on the skew.
const MAX_SKEW_DEGREES: f32 = 45.0;

/// Tunables for [`ImageEnhancer`].
#[derive(Debug, Clone)]
pub struct EnhanceOptions {
    pub deskew: bool,
    /// Median filter radius in pixels; 0 disables denoising.
    pub denoise_radius: u32,
    /// CLAHE clip limit, relative to a uniform histogram.
    pub clahe_clip_limit: f32,
    /// CLAHE tiles per axis.
    pub clahe_grid: u32,
    pub sharpen: bool,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            deskew: true,
            denoise_radius: 1,
            clahe_clip_limit: 3.0,
            clahe_grid: 8,
            sharpen: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageEnhancer {
    pub options: EnhanceOptions,
}

impl ImageEnhancer {
    pub fn new(options: EnhanceOptions) -> Self {
        Self { options }
    }

    pub fn enhance(&self, img: &DynamicImage) -> DynamicImage {
        let mut gray = img.to_luma8();

        if self.options.deskew {
            gray = deskew(&gray);
        }
        if self.options.denoise_radius > 0 {
            let r = self.options.denoise_radius;
            gray = median_filter(&gray, r, r);
        }
        gray = clahe(&gray, self.options.clahe_clip_limit, self.options.clahe_grid);
        if self.options.sharpen {
            gray = sharpen(&gray);
        }

        DynamicImage::ImageLuma8(gray)
    }
}

/// Dominant skew of text lines in degrees (positive = sloping down to the
/// right), or `None` when no near-horizontal line was found.
pub fn detect_skew(gray: &GrayImage) -> Option<f32> {
    let edges = canny(gray, 50.0, 150.0);
    let options = LineDetectionOptions {
        vote_threshold: (gray.width() / 4).max(20),
        suppression_radius: 8,
    };

    let mut angles: Vec<f32> = detect_lines(&edges, options)
        .into_iter()
        .map(|line| line.angle_in_degrees as f32 - 90.0)
        .filter(|a| a.abs() <= MAX_SKEW_DEGREES)
        .collect();
    if angles.is_empty() {
        return None;
    }

    angles.sort_by(|a, b| a.total_cmp(b));
    let mid = angles.len() / 2;
    let median = if angles.len() % 2 == 0 {
        (angles[mid - 1] + angles[mid]) / 2.0
    } else {
        angles[mid]
    };
    Some(median)
}

/// Rotate the page so its dominant text lines are horizontal.
///
/// Exposed corners are filled with white (paper). Skews at or below
/// [`MIN_DESKEW_DEGREES`] return the input unchanged.
pub fn deskew(gray: &GrayImage) -> GrayImage {
    match detect_skew(gray) {
        Some(angle) if angle.abs() > MIN_DESKEW_DEGREES => {
            debug!("Deskewing page by {:.1}°", -angle);
            // rotate_about_center turns clockwise for positive angles.
            rotate_about_center(gray, (-angle).to_radians(), Interpolation::Bicubic, Luma([255]))
        }
        _ => gray.clone(),
    }
}

/// Contrast-limited adaptive histogram equalisation over a `grid × grid`
/// tiling, with bilinear blending between neighbouring tile mappings.
pub fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let gx = grid.clamp(1, w);
    let gy = grid.clamp(1, h);
    let tile_w = w.div_ceil(gx);
    let tile_h = h.div_ceil(gy);

    let mut luts = vec![[0u8; 256]; (gx * gy) as usize];
    for ty in 0..gy {
        for tx in 0..gx {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            luts[(ty * gx + tx) as usize] = tile_lut(gray, x0, y0, x1, y1, clip_limit);
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        // Position relative to tile centres.
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = fy.floor().clamp(0.0, (gy - 1) as f32) as u32;
        let ty1 = (ty0 + 1).min(gy - 1);
        let wy = (fy - ty0 as f32).clamp(0.0, 1.0);

        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = fx.floor().clamp(0.0, (gx - 1) as f32) as u32;
            let tx1 = (tx0 + 1).min(gx - 1);
            let wx = (fx - tx0 as f32).clamp(0.0, 1.0);

            let v = gray.get_pixel(x, y)[0] as usize;
            let at = |tx: u32, ty: u32| luts[(ty * gx + tx) as usize][v] as f32;
            let top = at(tx0, ty0) * (1.0 - wx) + at(tx1, ty0) * wx;
            let bottom = at(tx0, ty1) * (1.0 - wx) + at(tx1, ty1) * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

fn tile_lut(gray: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[gray.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let pixels = (x1 - x0) * (y1 - y0);
    let mut lut = [0u8; 256];
    if pixels == 0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    // Clip and spread the excess evenly over all bins.
    let limit = ((clip_limit * pixels as f32 / 256.0).max(1.0)) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let bonus = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += bonus + u32::from(i < remainder);
    }

    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = ((cdf as f32 * 255.0) / pixels as f32).round().min(255.0) as u8;
    }
    lut
}

/// 3×3 sharpening with kernel `[-1 -1 -1; -1 9 -1; -1 -1 -1]`; borders
/// replicate the nearest pixel.
pub fn sharpen(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc: i32 = 0;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let sx = (x as i32 + dx).clamp(0, w as i32 - 1) as u32;
                    let sy = (y as i32 + dy).clamp(0, h as i32 - 1) as u32;
                    let p = gray.get_pixel(sx, sy)[0] as i32;
                    acc += if dx == 0 && dy == 0 { 9 * p } else { -p };
                }
            }
            out.put_pixel(x, y, Luma([acc.clamp(0, 255) as u8]));
        }
    }
    out
}
