//! Configuration types for conversion, export and authentication.
//!
//! Conversion behaviour is controlled through [`ConversionConfig`], built via
//! its [`ConversionConfigBuilder`]. The export toolchain and the token
//! verifier have their own small structs, [`ExportConfig`] and
//! [`AuthConfig`], since they are owned by different boundaries.

use crate::error::MonogramError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Pages converted per upload unless configured otherwise.
pub const DEFAULT_MAX_PAGES: usize = 5;

/// Upload size limit unless configured otherwise: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Configuration for a handwritten-PDF-to-LaTeX conversion.
///
/// # Example
/// ```rust
/// use monogram::{ContextHint, ConversionConfig};
///
/// let config = ConversionConfig::builder()
///     .dpi(200)
///     .max_pages(3)
///     .context(ContextHint::Math)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 3);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–600. Default: 300.
    ///
    /// Handwriting needs more pixels than printed text; 300 DPI keeps thin
    /// pen strokes legible to the vision model.
    pub dpi: u32,

    /// Maximum number of pages converted per upload. Default: 5.
    pub max_pages: usize,

    /// Maximum accepted upload size in bytes. Default: 10 MiB.
    pub max_upload_bytes: usize,

    /// Longest edge of the image sent to the model, in pixels. Default: 2048.
    pub max_image_edge: u32,

    /// Convert pages to grayscale before encoding. Default: true.
    pub grayscale: bool,

    /// Contrast boost applied before encoding, in `image::adjust_contrast`
    /// units (0 disables). Default: 18.0, roughly a 1.4× stretch.
    pub contrast_boost: f32,

    /// Number of concurrent vision-model calls. Default: 1.
    ///
    /// Results are always assembled in page order regardless of this value.
    pub concurrency: usize,

    /// Subject hint appended to the system prompt. Default: [`ContextHint::General`].
    pub context: ContextHint,

    /// LLM model identifier. If None, `GEMINI_MODEL` or `gemini-2.5-flash`.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the completion. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 8192.
    ///
    /// Dense derivations easily exceed 4 000 tokens of LaTeX per page.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient model failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_pages: DEFAULT_MAX_PAGES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_image_edge: 2048,
            grayscale: true,
            contrast_boost: 18.0,
            concurrency: 1,
            context: ContextHint::default(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("max_pages", &self.max_pages)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("max_image_edge", &self.max_image_edge)
            .field("grayscale", &self.grayscale)
            .field("contrast_boost", &self.contrast_boost)
            .field("concurrency", &self.concurrency)
            .field("context", &self.context)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn max_image_edge(mut self, px: u32) -> Self {
        self.config.max_image_edge = px.max(100);
        self
    }

    pub fn grayscale(mut self, v: bool) -> Self {
        self.config.grayscale = v;
        self
    }

    pub fn contrast_boost(mut self, c: f32) -> Self {
        self.config.contrast_boost = c.clamp(0.0, 100.0);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn context(mut self, hint: ContextHint) -> Self {
        self.config.context = hint;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, MonogramError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(MonogramError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.max_pages == 0 {
            return Err(MonogramError::InvalidConfig(
                "max_pages must be ≥ 1".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(MonogramError::InvalidConfig(
                "max_upload_bytes must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(MonogramError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Subject area of the notes, used to steer the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextHint {
    Math,
    Chemistry,
    Physics,
    /// Headings, bullet points and inline math. (default)
    #[default]
    General,
}

impl ContextHint {
    /// Lenient parse used for query parameters: unknown values fall back to
    /// [`ContextHint::General`].
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl FromStr for ContextHint {
    type Err = MonogramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "math" => Ok(ContextHint::Math),
            "chemistry" => Ok(ContextHint::Chemistry),
            "physics" => Ok(ContextHint::Physics),
            "general" => Ok(ContextHint::General),
            other => Err(MonogramError::Validation(format!(
                "Unknown context '{other}' (expected math, chemistry, physics or general)"
            ))),
        }
    }
}

// ── Export toolchain ─────────────────────────────────────────────────────

/// Settings for the external TeX compiler and HTML converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// TeX compiler program name or path. Default: `pdflatex`.
    pub pdflatex: String,

    /// Document converter program name or path. Default: `pandoc`.
    pub pandoc: String,

    /// Wall-clock limit for one tool invocation, in seconds. Default: 60.
    ///
    /// A hung compiler is killed once this elapses.
    pub tool_timeout_secs: u64,

    /// Directory under which per-request scratch directories are created.
    /// If None, the system temp directory is used.
    pub scratch_root: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            pdflatex: "pdflatex".to_string(),
            pandoc: "pandoc".to_string(),
            tool_timeout_secs: 60,
            scratch_root: None,
        }
    }
}

// ── Authentication ───────────────────────────────────────────────────────

/// Settings for session-token verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected `iss` claim. Stored without a trailing slash.
    pub issuer: String,

    /// Expected `aud` claim.
    pub audience: String,

    /// Signing key-set URL. Default: `{issuer}/.well-known/jwks.json`.
    pub jwks_url: String,

    /// How long a fetched key set is reused, in seconds. Default: 300.
    pub jwks_ttl_secs: u64,
}

impl AuthConfig {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        let issuer = normalize_issuer(&issuer.into());
        let jwks_url = format!("{issuer}/.well-known/jwks.json");
        Self {
            issuer,
            audience: audience.into(),
            jwks_url,
            jwks_ttl_secs: 300,
        }
    }

    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = url.into();
        self
    }

    pub fn with_jwks_ttl_secs(mut self, secs: u64) -> Self {
        self.jwks_ttl_secs = secs;
        self
    }

    /// Read `CLERK_ISSUER`, `CLERK_AUDIENCE` and the optional `CLERK_JWKS_URL`.
    pub fn from_env() -> Result<Self, MonogramError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AuthConfig::from_env`] with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MonogramError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| MonogramError::AuthConfig(format!("{name} is not set")))
        };
        let issuer = require("CLERK_ISSUER")?;
        let audience = require("CLERK_AUDIENCE")?;

        let mut config = Self::new(issuer, audience);
        if let Some(url) = lookup("CLERK_JWKS_URL").filter(|v| !v.trim().is_empty()) {
            config.jwks_url = url;
        }
        Ok(config)
    }
}

pub(crate) fn normalize_issuer(issuer: &str) -> String {
    issuer.trim().trim_end_matches('/').to_string()
}
