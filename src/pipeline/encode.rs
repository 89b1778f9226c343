//! Image preparation: clean up a rasterised page and wrap it for the model.
//!
//! Handwriting on scanned paper is low contrast and often tinted. Converting
//! to grayscale and stretching the contrast makes pen strokes stand out, and
//! capping the longest edge keeps the request within what vision APIs accept.
//! PNG is used because it is lossless; JPEG artefacts around thin strokes
//! confuse the model.

use crate::config::ConversionConfig;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Grayscale, contrast and size adjustments applied before encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocess {
    pub grayscale: bool,
    pub contrast_boost: f32,
    pub max_edge: u32,
}

impl From<&ConversionConfig> for Preprocess {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            grayscale: config.grayscale,
            contrast_boost: config.contrast_boost,
            max_edge: config.max_image_edge,
        }
    }
}

/// Apply the preprocessing steps to a page image.
///
/// Images already within `max_edge` are never upscaled.
pub fn preprocess(img: DynamicImage, opts: Preprocess) -> DynamicImage {
    let mut img = if opts.grayscale { img.grayscale() } else { img };

    if opts.contrast_boost > 0.0 {
        img = img.adjust_contrast(opts.contrast_boost);
    }

    let (w, h) = (img.width(), img.height());
    let longest = w.max(h);
    if opts.max_edge > 0 && longest > opts.max_edge {
        let scale = opts.max_edge as f64 / longest as f64;
        let nw = ((w as f64 * scale).round() as u32).max(1);
        let nh = ((h as f64 * scale).round() as u32).max(1);
        debug!("Downscaling page {}x{} → {}x{}", w, h, nw, nh);
        img = img.resize(nw, nh, FilterType::Lanczos3);
    }

    img
}

/// Encode a page as a base64 PNG ready for the vision API.
///
/// `detail: "high"` asks tiling providers to keep the full resolution.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
