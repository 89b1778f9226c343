//! Error types for the monogram library.
//!
//! A single fatal error type, [`MonogramError`], covers every boundary that
//! can fail: upload validation, identity verification, persistence lookups,
//! the vision model and the external TeX/HTML toolchain.
//!
//! The text-processing stages (normalisation, body extraction, assembly and
//! project inference) never return errors. Model output is untrusted and
//! best-effort recovery beats a hard failure there, so those functions
//! degrade to fallback strings or skip entries instead.
//!
//! The routing layer maps errors to HTTP responses with
//! [`MonogramError::status_code`] and [`MonogramError::public_message`].

use thiserror::Error;

/// All fatal errors returned by the monogram library.
#[derive(Debug, Error)]
pub enum MonogramError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Malformed input: non-PDF upload, empty required field, bad page count.
    #[error("{0}")]
    Validation(String),

    /// Upload exceeds the configured size limit.
    #[error("File too large ({size} bytes, max {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    /// Export requested in a format other than tex, html or pdf.
    #[error("Unsupported export format '{format}' (expected tex, html or pdf)")]
    UnsupportedFormat { format: String },

    // ── Identity errors ───────────────────────────────────────────────────
    /// Missing, invalid or expired credential, or a token from the wrong issuer.
    #[error("Unauthorized: {0}")]
    Auth(String),

    /// Required deployment configuration (issuer, audience, keys) is missing.
    #[error("Authentication is misconfigured: {0}")]
    AuthConfig(String),

    /// The identity provider (key-set endpoint) could not be reached.
    #[error("Identity provider error: {0}")]
    IdentityProvider(String),

    // ── Vision model errors ───────────────────────────────────────────────
    /// Vision model API returned HTTP 429.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimited { provider: String },

    /// Vision model API reported transient unavailability (HTTP 503).
    #[error("Vision model service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Vision model API returned a non-retryable error.
    #[error("Vision model API error: {message}")]
    VisionModel { message: String },

    /// Vision model call exceeded the per-call timeout.
    #[error("Vision model call timed out after {elapsed_ms}ms on page {page}")]
    ApiTimeout { page: usize, elapsed_ms: u64 },

    /// The configured provider could not be constructed (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Toolchain errors ──────────────────────────────────────────────────
    /// The compiler or converter binary is not installed.
    #[error("'{tool}' is not available on this system (not found on PATH)")]
    ToolUnavailable { tool: String },

    /// The compiler or converter exited with a failure status.
    #[error("'{tool}' failed:\n{diagnostics}")]
    ToolFailed { tool: String, diagnostics: String },

    /// The compiler or converter did not finish within the configured timeout.
    #[error("'{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium-render returned an error while opening or rendering a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    Rasterisation { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Persistence errors ────────────────────────────────────────────────
    /// The document does not exist or belongs to another user.
    #[error("File not found")]
    NotFound,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MonogramError {
    /// HTTP status the routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            MonogramError::Validation(_)
            | MonogramError::UnsupportedFormat { .. }
            | MonogramError::Rasterisation { .. } => 422,
            MonogramError::PayloadTooLarge { .. } => 413,
            MonogramError::Auth(_) => 401,
            MonogramError::NotFound => 404,
            MonogramError::RateLimited { .. } => 429,
            MonogramError::ServiceUnavailable(_) | MonogramError::ToolUnavailable { .. } => 503,
            MonogramError::IdentityProvider(_)
            | MonogramError::VisionModel { .. }
            | MonogramError::ToolFailed { .. } => 502,
            MonogramError::ApiTimeout { .. } | MonogramError::ToolTimeout { .. } => 504,
            MonogramError::AuthConfig(_)
            | MonogramError::ProviderNotConfigured { .. }
            | MonogramError::PdfiumBindingFailed(_)
            | MonogramError::InvalidConfig(_)
            | MonogramError::Internal(_) => 500,
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Server-side misconfiguration and internal faults collapse to a
    /// generic message; everything else is user-actionable and shown as is.
    pub fn public_message(&self) -> String {
        match self.status_code() {
            500 => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MonogramError::RateLimited { .. }
                | MonogramError::ServiceUnavailable(_)
                | MonogramError::ApiTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_carries_diagnostics() {
        let e = MonogramError::ToolFailed {
            tool: "pdflatex".into(),
            diagnostics: "! Undefined control sequence.".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("pdflatex"), "got: {msg}");
        assert!(msg.contains("Undefined control sequence"), "got: {msg}");
        assert_eq!(e.status_code(), 502);
    }

    #[test]
    fn unsupported_format_is_user_error() {
        let e = MonogramError::UnsupportedFormat {
            format: "docx".into(),
        };
        assert_eq!(e.status_code(), 422);
        assert!(e.public_message().contains("docx"));
    }

    #[test]
    fn config_errors_hide_details() {
        let e = MonogramError::AuthConfig("CLERK_ISSUER is not set".into());
        assert_eq!(e.status_code(), 500);
        assert_eq!(e.public_message(), "Internal server error");

        let e = MonogramError::Internal("poisoned lock".into());
        assert!(!e.public_message().contains("poisoned"));
    }

    #[test]
    fn not_found_and_auth_statuses() {
        assert_eq!(MonogramError::NotFound.status_code(), 404);
        assert_eq!(MonogramError::Auth("Token expired".into()).status_code(), 401);
    }

    #[test]
    fn transient_classification() {
        assert!(MonogramError::RateLimited {
            provider: "gemini".into()
        }
        .is_transient());
        assert!(MonogramError::ServiceUnavailable("503".into()).is_transient());
        assert!(MonogramError::ApiTimeout {
            page: 1,
            elapsed_ms: 60_000
        }
        .is_transient());
        assert!(!MonogramError::VisionModel {
            message: "bad request".into()
        }
        .is_transient());
        assert!(!MonogramError::NotFound.is_transient());
    }
}
