//! Pipeline stages for handwritten-PDF-to-LaTeX conversion.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ vision ──▶ postprocess ──▶ assemble
//! (upload)  (pdfium)   (PNG)      (VLM)      (one body/page)  (one document)
//! ```
//!
//! 1. [`input`]: check content type, size and `%PDF` magic of an upload
//! 2. [`render`]: rasterise the leading pages; pdfium is blocking, so this
//!    runs in `spawn_blocking`
//! 3. [`encode`]: grayscale, contrast, downscale, then base64 PNG
//! 4. [`vision`]: the model call with timeout and retry; the only stage with
//!    network I/O
//! 5. [`postprocess`]: normalise model output and cut out the page body
//! 6. [`assemble`]: join the bodies under a single preamble
//!
//! Stages 5 and 6 never fail. Model output is untrusted text and they
//! recover whatever structure they can.

pub mod assemble;
pub mod encode;
pub mod input;
pub mod postprocess;
pub mod render;
pub mod vision;
