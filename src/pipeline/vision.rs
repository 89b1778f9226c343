//! Vision-model interaction: one page image in, raw LaTeX text out.
//!
//! [`VisionModel`] is the seam between the pipeline and the network. The
//! production implementation, [`LlmVisionModel`], sends the page to any
//! `edgequake_llm` provider; tests substitute scripted fakes.
//!
//! ## Retry Strategy
//!
//! Rate limits, temporary unavailability, dropped connections and timeouts
//! (ours or the provider's) are retried
//! with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`). With a
//! 500 ms base and 3 retries the waits are 500 ms, 1 s and 2 s. Any other
//! failure is returned on the first attempt.

use crate::config::{ContextHint, ConversionConfig};
use crate::error::MonogramError;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError, ProviderFactory,
};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, warn};

/// Default model when neither the config nor `GEMINI_MODEL` names one.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Raw model answer for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcription {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Transcription {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A model that transcribes a page image into LaTeX.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Transcribe one page. `page_num` is 1-indexed and used for diagnostics.
    async fn transcribe(
        &self,
        page_num: usize,
        image: ImageData,
    ) -> Result<Transcription, MonogramError>;
}

/// [`VisionModel`] backed by an `edgequake_llm` chat provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    provider_label: String,
    system_prompt: String,
    options: CompletionOptions,
}

impl LlmVisionModel {
    /// Wrap a provider, taking prompt and sampling settings from `config`.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            provider_label: config
                .provider_name
                .clone()
                .unwrap_or_else(|| "vision".to_string()),
            system_prompt: prompts::system_prompt(config.system_prompt.as_deref(), config.context),
            options: build_options(config),
        }
    }

    /// Resolve a provider from `config` and the environment, then wrap it.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, MonogramError> {
        let (provider, label) = resolve_provider(config)?;
        let mut model = Self::new(provider, config);
        model.provider_label = label;
        Ok(model)
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn transcribe(
        &self,
        page_num: usize,
        image: ImageData,
    ) -> Result<Transcription, MonogramError> {
        // The image carries the content; providers still require a user turn.
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images("", vec![image]),
        ];

        let call_start = Instant::now();
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| match e {
                LlmError::Timeout => MonogramError::ApiTimeout {
                    page: page_num,
                    elapsed_ms: call_start.elapsed().as_millis() as u64,
                },
                other => classify_llm_error(&self.provider_label, other),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            page_num, response.prompt_tokens, response.completion_tokens
        );

        Ok(Transcription {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Produces a vision model steered towards a subject.
///
/// The service resolves its provider once and asks for a model per request,
/// since the subject hint lives in the system prompt.
pub trait VisionModelFactory: Send + Sync {
    fn for_context(&self, context: ContextHint) -> Arc<dyn VisionModel>;
}

impl<F> VisionModelFactory for F
where
    F: Fn(ContextHint) -> Arc<dyn VisionModel> + Send + Sync,
{
    fn for_context(&self, context: ContextHint) -> Arc<dyn VisionModel> {
        self(context)
    }
}

/// [`VisionModelFactory`] sharing one resolved `edgequake_llm` provider.
pub struct LlmVisionModels {
    provider: Arc<dyn LLMProvider>,
    provider_label: String,
    config: ConversionConfig,
}

impl LlmVisionModels {
    pub fn from_config(config: &ConversionConfig) -> Result<Self, MonogramError> {
        let (provider, provider_label) = resolve_provider(config)?;
        Ok(Self {
            provider,
            provider_label,
            config: config.clone(),
        })
    }
}

impl VisionModelFactory for LlmVisionModels {
    fn for_context(&self, context: ContextHint) -> Arc<dyn VisionModel> {
        let mut config = self.config.clone();
        config.context = context;
        let mut model = LlmVisionModel::new(Arc::clone(&self.provider), &config);
        model.provider_label = self.provider_label.clone();
        Arc::new(model)
    }
}

/// Map a typed provider error onto the error taxonomy.
///
/// Rate limits, dropped connections and timeouts stay retryable. Generic
/// API and provider errors carry the HTTP status only in their message, so
/// those go through [`classify_error`].
pub fn classify_llm_error(provider: &str, err: LlmError) -> MonogramError {
    match err {
        LlmError::RateLimited(_) => MonogramError::RateLimited {
            provider: provider.to_string(),
        },
        LlmError::Timeout => MonogramError::ServiceUnavailable(format!("{provider}: request timed out")),
        LlmError::NetworkError(message) => MonogramError::ServiceUnavailable(message),
        LlmError::ApiError(message) | LlmError::ProviderError(message) | LlmError::Unknown(message) => {
            classify_error(provider, &message)
        }
        other => MonogramError::VisionModel {
            message: other.to_string(),
        },
    }
}

/// Map a provider error message onto the error taxonomy.
///
/// `429` means the quota is exhausted; `503` or `ServiceUnavailable` means the
/// model is temporarily down. Anything else is a hard model error.
pub fn classify_error(provider: &str, message: &str) -> MonogramError {
    let lower = message.to_ascii_lowercase();
    if message.contains("429") || lower.contains("rate limit") || lower.contains("resource_exhausted")
    {
        MonogramError::RateLimited {
            provider: provider.to_string(),
        }
    } else if message.contains("503")
        || message.contains("ServiceUnavailable")
        || lower.contains("service unavailable")
    {
        MonogramError::ServiceUnavailable(message.to_string())
    } else {
        MonogramError::VisionModel {
            message: message.to_string(),
        }
    }
}

/// Retry and timeout settings for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl From<&ConversionConfig> for RetryPolicy {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }
}

/// Outcome of [`transcribe_with_retry`]: the answer and how many retries it took.
#[derive(Debug, Clone)]
pub struct Attempted {
    pub transcription: Transcription,
    pub retries: u32,
    pub duration_ms: u64,
}

/// Call the model with a per-call timeout, retrying transient failures.
pub async fn transcribe_with_retry(
    model: &dyn VisionModel,
    page_num: usize,
    image: ImageData,
    policy: RetryPolicy,
) -> Result<Attempted, MonogramError> {
    let start = Instant::now();
    let per_call = Duration::from_secs(policy.timeout_secs);
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            let backoff = policy.backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let call_start = Instant::now();
        let result = match timeout(per_call, model.transcribe(page_num, image.clone())).await {
            Ok(r) => r,
            Err(_) => Err(MonogramError::ApiTimeout {
                page: page_num,
                elapsed_ms: call_start.elapsed().as_millis() as u64,
            }),
        };

        match result {
            Ok(transcription) => {
                return Ok(Attempted {
                    transcription,
                    retries: attempt,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, MonogramError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        MonogramError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is
/// 2. `config.provider_name` with `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 4. Gemini when `GEMINI_API_KEY` is set, with `GEMINI_MODEL` or
///    [`DEFAULT_GEMINI_MODEL`]
/// 5. `ProviderFactory::from_env` auto-detection
///
/// Returns the provider and a label used in rate-limit errors.
pub fn resolve_provider(
    config: &ConversionConfig,
) -> Result<(Arc<dyn LLMProvider>, String), MonogramError> {
    if let Some(ref provider) = config.provider {
        let label = config.provider_name.clone().unwrap_or_else(|| "custom".into());
        return Ok((Arc::clone(provider), label));
    }

    if let Some(ref name) = config.provider_name {
        let model = config
            .model
            .clone()
            .or_else(|| env_nonempty("GEMINI_MODEL").filter(|_| name == "gemini"))
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
        return Ok((create_vision_provider(name, &model)?, name.clone()));
    }

    if let (Some(prov), Some(model)) = (
        env_nonempty("EDGEQUAKE_LLM_PROVIDER"),
        env_nonempty("EDGEQUAKE_MODEL"),
    ) {
        return Ok((create_vision_provider(&prov, &model)?, prov));
    }

    if env_nonempty("GEMINI_API_KEY").is_some() {
        let model = config
            .model
            .clone()
            .or_else(|| env_nonempty("GEMINI_MODEL"))
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
        return Ok((create_vision_provider("gemini", &model)?, "gemini".into()));
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| MonogramError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be detected from the environment.\n\
                Set GEMINI_API_KEY, or EDGEQUAKE_LLM_PROVIDER and EDGEQUAKE_MODEL.\n\
                Error: {e}"
            ),
        })?;

    Ok((llm_provider, "auto".into()))
}
