//! # monogram
//!
//! Turn photographed or scanned handwritten notes (as PDF) into compilable
//! LaTeX, then keep, inspect and export the result per user.
//!
//! ## Why this crate?
//!
//! OCR engines read handwriting poorly and know nothing about mathematics.
//! This crate rasterises each page and lets a vision-language model write
//! the LaTeX directly, then repairs what models reliably get wrong (fences,
//! escaped newlines, missing or doubled `\begin{document}`) and stitches the
//! pages into one document with a single preamble.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Input     content type, size, %PDF magic
//!  ├─ 2. Render    rasterise up to max_pages via pdfium (spawn_blocking)
//!  ├─ 3. Encode    grayscale, contrast, downscale → base64 PNG
//!  ├─ 4. Vision    one model call per page, retried on 429 / 503 / timeout
//!  ├─ 5. Extract   normalise the answer, keep only the page body
//!  └─ 6. Assemble  join bodies under one preamble
//! ```
//!
//! Around the pipeline sit the pieces a notes backend needs:
//! [`auth`] (RS256 bearer tokens against a cached key set), [`store`]
//! (owner-scoped documents), [`project`] (which files a document's project
//! would contain) and [`export`] (tex, html via pandoc, pdf via pdflatex).
//! [`service::NotesService`] ties them together, one method per route.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use monogram::{convert_file, ContextHint, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider from GEMINI_API_KEY, or EDGEQUAKE_LLM_PROVIDER + EDGEQUAKE_MODEL
//!     let config = ConversionConfig::builder()
//!         .context(ContextHint::Math)
//!         .build()?;
//!     let output = convert_file("lecture.pdf", &config).await?;
//!     println!("{}", output.latex);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `monogram` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod clock;
pub mod config;
pub mod convert;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod project;
pub mod prompts;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{AuthRequest, Identity, IdentityVerifier, JwtVerifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, ContextHint, ConversionConfig, ConversionConfigBuilder, ExportConfig};
pub use convert::{convert_file, convert_pdf, convert_to_file};
pub use error::MonogramError;
pub use export::{ExportArtifact, ExportFormat, Exporter};
pub use output::{ConversionOutput, ConversionStats, PageResult};
pub use pipeline::assemble::assemble;
pub use pipeline::input::Upload;
pub use pipeline::postprocess::{extract_body, normalize};
pub use progress::{ConversionProgressCallback, NoopProgressCallback};
pub use project::{infer_project_files, FileKind, ProjectFileEntry};
pub use service::NotesService;
pub use store::{DocumentPatch, DocumentStore, DocumentSummary, MemoryDocumentStore, TexDocument};
