//! Upload validation: accept only real PDFs within the size limit.
//!
//! Checks run cheapest first. The declared content type is checked before
//! the size so a wrong format is reported as such even for huge uploads, and
//! the `%PDF` magic bytes are checked last so a renamed file cannot reach
//! pdfium.

use crate::error::MonogramError;
use std::path::Path;
use tracing::debug;

/// MIME type accepted for uploads.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

const PDF_MAGIC: &[u8] = b"%PDF";

/// An uploaded file as received from the caller.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Declared MIME type, possibly with parameters (`application/pdf; charset=binary`).
    pub content_type: String,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            filename: None,
            bytes,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Read a local file as a PDF upload.
    pub fn from_path(path: &Path) -> Result<Self, MonogramError> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                MonogramError::Validation(format!("File not found: {}", path.display()))
            }
            std::io::ErrorKind::PermissionDenied => {
                MonogramError::Validation(format!("Permission denied: {}", path.display()))
            }
            _ => MonogramError::Internal(format!("Failed to read {}: {e}", path.display())),
        })?;

        debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
        let upload = Self::new(PDF_CONTENT_TYPE, bytes);
        Ok(match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => upload.with_filename(name),
            None => upload,
        })
    }
}

/// Validate an upload before rasterisation.
///
/// - declared type other than `application/pdf` → "Supported format: pdf"
/// - more than `max_bytes` → [`MonogramError::PayloadTooLarge`]
/// - content not starting with `%PDF` → "Invalid PDF file"
pub fn validate_upload(upload: &Upload, max_bytes: usize) -> Result<(), MonogramError> {
    let essence = upload
        .content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    if !essence.eq_ignore_ascii_case(PDF_CONTENT_TYPE) {
        return Err(MonogramError::Validation("Supported format: pdf".into()));
    }

    if upload.bytes.len() > max_bytes {
        return Err(MonogramError::PayloadTooLarge {
            size: upload.bytes.len(),
            max: max_bytes,
        });
    }

    if !upload.bytes.starts_with(PDF_MAGIC) {
        return Err(MonogramError::Validation("Invalid PDF file".into()));
    }

    Ok(())
}
