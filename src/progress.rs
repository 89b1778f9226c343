//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to observe
//! each page as it goes through the vision model. The CLI drives its
//! progress bar from these events; a server can forward them to a socket.
//!
//! # Example
//!
//! ```rust
//! use monogram::{ConversionConfig, ConversionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl ConversionProgressCallback for PageCounter {
//!     fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _latex_len: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it processes each page.
///
/// All methods default to no-ops. With `concurrency > 1` the page events may
/// arrive from several tasks at once, so implementations must synchronise
/// their own state.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after rasterisation, with the number of pages to convert.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the vision-model request for a page (1-indexed).
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been transcribed; `latex_len` is the byte
    /// length of the extracted page body.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, latex_len: usize) {
        let _ = (page_num, total_pages, latex_len);
    }

    /// Called when a page fails after all retries.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
