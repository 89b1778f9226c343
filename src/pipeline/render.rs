//! PDF rasterisation: render the first pages of an upload to images.
//!
//! pdfium is a blocking C++ library, so [`rasterize`] moves the work onto
//! `tokio::task::spawn_blocking`. The [`PageRasterizer`] trait is the seam
//! that lets tests run the conversion pipeline without a pdfium binary.
//!
//! The render scale is `dpi / 72` (PDF user space is 72 points per inch).
//! A hard pixel cap keeps memory bounded for oversized pages such as posters;
//! the image is brought down to the model's size limit later, in
//! [`crate::pipeline::encode::preprocess`].

use crate::error::MonogramError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Longest edge a page may be rendered at, whatever the DPI.
const MAX_RENDER_EDGE: i32 = 8192;

/// Turns PDF bytes into page images, in page order.
pub trait PageRasterizer: Send + Sync {
    /// Render at most `max_pages` pages starting from the first.
    ///
    /// Returns an empty vector for a document with no pages.
    fn rasterize(
        &self,
        pdf: &[u8],
        dpi: u32,
        max_pages: usize,
    ) -> Result<Vec<DynamicImage>, MonogramError>;
}

/// [`PageRasterizer`] backed by pdfium, bound through `pdfium-auto`.
///
/// The library is downloaded and cached on first use unless
/// `PDFIUM_LIB_PATH` points at an existing copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        pdf: &[u8],
        dpi: u32,
        max_pages: usize,
    ) -> Result<Vec<DynamicImage>, MonogramError> {
        let pdfium = pdfium_auto::bind_pdfium_silent()
            .map_err(|e| MonogramError::PdfiumBindingFailed(e.to_string()))?;

        let document = pdfium.load_pdf_from_byte_slice(pdf, None).map_err(|e| {
            MonogramError::Validation(format!("Invalid PDF file: {e:?}"))
        })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        let count = total_pages.min(max_pages);
        info!("PDF loaded: {} pages, rendering {}", total_pages, count);

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(MAX_RENDER_EDGE)
            .set_maximum_height(MAX_RENDER_EDGE);

        let mut images = Vec::with_capacity(count);
        for idx in 0..count {
            let page = pages
                .get(idx as u16)
                .map_err(|e| MonogramError::Rasterisation {
                    page: idx + 1,
                    detail: format!("{e:?}"),
                })?;

            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| MonogramError::Rasterisation {
                    page: idx + 1,
                    detail: format!("{e:?}"),
                })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }

        Ok(images)
    }
}

/// Run a rasterizer on the blocking thread pool.
pub async fn rasterize(
    rasterizer: Arc<dyn PageRasterizer>,
    pdf: Vec<u8>,
    dpi: u32,
    max_pages: usize,
) -> Result<Vec<DynamicImage>, MonogramError> {
    tokio::task::spawn_blocking(move || rasterizer.rasterize(&pdf, dpi, max_pages))
        .await
        .map_err(|e| MonogramError::Internal(format!("Render task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    struct BlankPages(usize);

    impl PageRasterizer for BlankPages {
        fn rasterize(
            &self,
            _pdf: &[u8],
            _dpi: u32,
            max_pages: usize,
        ) -> Result<Vec<DynamicImage>, MonogramError> {
            Ok((0..self.0.min(max_pages))
                .map(|_| DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([255; 4]))))
                .collect())
        }
    }

    #[tokio::test]
    async fn rasterize_runs_off_the_async_runtime() {
        let pages = rasterize(Arc::new(BlankPages(8)), b"%PDF".to_vec(), 300, 5)
            .await
            .unwrap();
        assert_eq!(pages.len(), 5);
    }

    #[tokio::test]
    async fn rasterizer_errors_propagate() {
        struct Broken;
        impl PageRasterizer for Broken {
            fn rasterize(&self, _: &[u8], _: u32, _: usize) -> Result<Vec<DynamicImage>, MonogramError> {
                Err(MonogramError::Rasterisation {
                    page: 2,
                    detail: "bad xref".into(),
                })
            }
        }

        let err = rasterize(Arc::new(Broken), Vec::new(), 300, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, MonogramError::Rasterisation { page: 2, .. }));
    }
}
