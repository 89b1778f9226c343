//! Conversion entry points: handwritten PDF in, LaTeX document out.
//!
//! [`convert_pdf`] is the core. It takes its rasterizer and vision model as
//! trait objects so callers (and tests) decide what backs them;
//! [`convert_file`] wires up pdfium and the configured LLM provider.
//!
//! A page that fails after all retries fails the whole conversion. Partial
//! notes with a silently missing page are worse than a clear error the user
//! can retry.

use crate::config::ConversionConfig;
use crate::error::MonogramError;
use crate::output::{ConversionOutput, ConversionStats, PageResult};
use crate::pipeline::assemble::{assemble, PAGE_SEPARATOR};
use crate::pipeline::encode::{self, Preprocess};
use crate::pipeline::input::{validate_upload, Upload};
use crate::pipeline::postprocess;
use crate::pipeline::render::{self, PageRasterizer, PdfiumRasterizer};
use crate::pipeline::vision::{self, LlmVisionModel, RetryPolicy, VisionModel};
use edgequake_llm::ImageData;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert an uploaded PDF to LaTeX.
///
/// 1. Validate the upload (type, size, magic bytes)
/// 2. Rasterise the first `max_pages` pages
/// 3. Preprocess and encode each page image
/// 4. Transcribe pages with the vision model, `concurrency` at a time
/// 5. Extract each page body and assemble them in page order
///
/// # Errors
/// - validation errors from step 1
/// - "No pages found in PDF" when the document has no pages
/// - the first page failure from step 4, after retries
pub async fn convert_pdf(
    upload: &Upload,
    config: &ConversionConfig,
    rasterizer: Arc<dyn PageRasterizer>,
    model: Arc<dyn VisionModel>,
) -> Result<ConversionOutput, MonogramError> {
    let total_start = Instant::now();
    validate_upload(upload, config.max_upload_bytes)?;
    info!(
        "Starting conversion: {} ({} bytes)",
        upload.filename.as_deref().unwrap_or("<upload>"),
        upload.bytes.len()
    );

    // ── Step 1: Rasterise ────────────────────────────────────────────────
    let render_start = Instant::now();
    let images =
        render::rasterize(rasterizer, upload.bytes.clone(), config.dpi, config.max_pages).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    if images.is_empty() {
        return Err(MonogramError::Validation("No pages found in PDF".into()));
    }
    let total_pages = images.len();
    info!("Rendered {} pages in {}ms", total_pages, render_duration_ms);

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(total_pages);
    }

    // ── Step 2: Preprocess and encode ────────────────────────────────────
    let prep = Preprocess::from(config);
    let encoded = tokio::task::spawn_blocking(move || {
        images
            .into_iter()
            .enumerate()
            .map(|(idx, img)| {
                encode::encode_page(&encode::preprocess(img, prep)).map_err(|e| {
                    MonogramError::Rasterisation {
                        page: idx + 1,
                        detail: format!("Image encoding failed: {e}"),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| MonogramError::Internal(format!("Encode task panicked: {e}")))??;

    // ── Step 3: Transcribe ───────────────────────────────────────────────
    let llm_start = Instant::now();
    let result = transcribe_pages(model, encoded, config).await;
    let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

    let pages = match result {
        Ok(pages) => pages,
        Err(e) => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_conversion_complete(total_pages, 0);
            }
            return Err(e);
        }
    };

    // ── Step 4: Assemble ─────────────────────────────────────────────────
    let latex = assemble(&pages.iter().map(|p| p.body.as_str()).collect::<Vec<_>>());
    let raw_text = pages
        .iter()
        .map(|p| p.raw.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR);

    let stats = ConversionStats {
        total_pages,
        total_input_tokens: pages.iter().map(|p| p.input_tokens as u64).sum(),
        total_output_tokens: pages.iter().map(|p| p.output_tokens as u64).sum(),
        total_retries: pages.iter().map(|p| p.retries).sum(),
        render_duration_ms,
        llm_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Conversion complete: {} pages, {} bytes of LaTeX, {}ms total",
        total_pages,
        latex.len(),
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(total_pages, pages.len());
    }

    Ok(ConversionOutput {
        latex,
        raw_text,
        pages,
        stats,
    })
}

/// Convert a local PDF file using pdfium and the configured LLM provider.
pub async fn convert_file(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, MonogramError> {
    let upload = Upload::from_path(path.as_ref())?;
    let model = LlmVisionModel::from_config(config)?;
    convert_pdf(&upload, config, Arc::new(PdfiumRasterizer), Arc::new(model)).await
}

/// Convert a local PDF and write the LaTeX document to `output_path`.
///
/// Writes to a temporary sibling file first and renames it into place, so
/// a failed run never leaves a truncated `.tex` behind.
pub async fn convert_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, MonogramError> {
    let output = convert_file(input, config).await?;
    let path = output_path.as_ref();
    let write_err =
        |e: std::io::Error| MonogramError::Internal(format!("Failed to write {}: {e}", path.display()));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("tex.tmp");
    tokio::fs::write(&tmp_path, &output.latex)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(output.stats)
}

/// Send every page to the model and collect results in page order.
///
/// `buffered` keeps up to `concurrency` calls in flight while yielding
/// results in input order. The first error stops the stream.
async fn transcribe_pages(
    model: Arc<dyn VisionModel>,
    images: Vec<ImageData>,
    config: &ConversionConfig,
) -> Result<Vec<PageResult>, MonogramError> {
    let total_pages = images.len();
    let policy = RetryPolicy::from(config);

    stream::iter(images.into_iter().enumerate().map(|(idx, image)| {
        let model = Arc::clone(&model);
        let callback = config.progress_callback.clone();
        let page_num = idx + 1;
        async move {
            if let Some(ref cb) = callback {
                cb.on_page_start(page_num, total_pages);
            }

            match vision::transcribe_with_retry(model.as_ref(), page_num, image, policy).await {
                Ok(attempted) => {
                    let raw = attempted.transcription.content;
                    let body = postprocess::extract_body(&raw);
                    debug!("Page {}: {} bytes raw, {} bytes body", page_num, raw.len(), body.len());
                    if let Some(ref cb) = callback {
                        cb.on_page_complete(page_num, total_pages, body.len());
                    }
                    Ok(PageResult {
                        page_num,
                        raw,
                        body,
                        input_tokens: attempted.transcription.input_tokens,
                        output_tokens: attempted.transcription.output_tokens,
                        duration_ms: attempted.duration_ms,
                        retries: attempted.retries,
                    })
                }
                Err(e) => {
                    warn!("Page {} failed: {}", page_num, e);
                    if let Some(ref cb) = callback {
                        cb.on_page_error(page_num, total_pages, &e.to_string());
                    }
                    Err(e)
                }
            }
        }
    }))
    .buffered(config.concurrency.max(1))
    .try_collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::vision::Transcription;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgba, RgbaImage};

    struct Pages(usize);

    impl PageRasterizer for Pages {
        fn rasterize(&self, _: &[u8], _: u32, max_pages: usize) -> Result<Vec<DynamicImage>, MonogramError> {
            Ok((0..self.0.min(max_pages))
                .map(|_| DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255; 4]))))
                .collect())
        }
    }

    struct Echo;

    #[async_trait]
    impl VisionModel for Echo {
        async fn transcribe(&self, page_num: usize, _: ImageData) -> Result<Transcription, MonogramError> {
            Ok(Transcription::text(format!("```latex\nPage {page_num} notes.\n```")))
        }
    }

    fn upload() -> Upload {
        Upload::new("application/pdf", b"%PDF-1.4\n".to_vec())
    }

    #[tokio::test]
    async fn caps_pages_and_keeps_order() {
        let config = ConversionConfig::builder().max_pages(3).build().unwrap();
        let out = convert_pdf(&upload(), &config, Arc::new(Pages(7)), Arc::new(Echo))
            .await
            .unwrap();

        assert_eq!(out.pages.len(), 3);
        assert_eq!(out.stats.total_pages, 3);
        assert_eq!(postprocess::extract_body(&out.latex), "Page 1 notes.\n\nPage 2 notes.\n\nPage 3 notes.");
        assert!(out.raw_text.starts_with("```latex\nPage 1 notes."));
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let err = convert_pdf(&upload(), &ConversionConfig::default(), Arc::new(Pages(0)), Arc::new(Echo))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No pages found in PDF");
    }

    #[tokio::test]
    async fn invalid_upload_never_reaches_the_rasterizer() {
        struct Unreachable;
        impl PageRasterizer for Unreachable {
            fn rasterize(&self, _: &[u8], _: u32, _: usize) -> Result<Vec<DynamicImage>, MonogramError> {
                panic!("rasterizer called for an invalid upload");
            }
        }

        let bad = Upload::new("application/pdf", b"GIF89a".to_vec());
        let err = convert_pdf(&bad, &ConversionConfig::default(), Arc::new(Unreachable), Arc::new(Echo))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid PDF file");
    }
}
