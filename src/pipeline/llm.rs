//! The generative-model seam and its edgequake-llm adapter.
//!
//! Classification, generation and vision extraction all talk to a
//! [`GenerativeModel`]. Production wires in [`ProviderModel`], which wraps
//! any `edgequake_llm::LLMProvider`; tests substitute scripted fakes.
//!
//! Provider errors arrive as opaque messages, so [`ProviderModel`] sorts them
//! into [`ModelError`] by their text. Anything unrecognised is treated as
//! transient; the error policy bounds how often that is retried.

use crate::config::PipelineConfig;
use crate::error::{ExtractionReason, GenerationFailureKind, StudyError};
use crate::policy::is_prohibited_category;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// One request to the model: a system prompt, a user turn, optional images.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    pub images: Vec<ImageData>,
}

impl ModelRequest {
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageData>) -> Self {
        self.images = images;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// The provider's safety filter blocked the request or the response.
    #[error("content filtered ({}): {detail}", category.as_deref().unwrap_or("unspecified"))]
    ContentFiltered {
        category: Option<String>,
        detail: String,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Transient(String),
}

impl ModelError {
    /// Sort an opaque provider error message into a [`ModelError`].
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let msg = message.to_string();
        if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
            ModelError::RateLimited(msg)
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("api key")
            || lower.contains("authentication")
        {
            ModelError::Auth(msg)
        } else if lower.contains("content_filter")
            || lower.contains("content filter")
            || lower.contains("safety")
            || lower.contains("blocked")
        {
            ModelError::ContentFiltered {
                category: block_category(message),
                detail: msg,
            }
        } else if lower.contains("timeout") || lower.contains("timed out") {
            ModelError::Timeout(msg)
        } else {
            ModelError::Transient(msg)
        }
    }

    pub fn into_generation_kind(self) -> GenerationFailureKind {
        match self {
            ModelError::RateLimited(detail) => GenerationFailureKind::RateLimited {
                retry_after_secs: retry_after_secs(&detail),
            },
            ModelError::Auth(detail) => GenerationFailureKind::Auth { detail },
            ModelError::ContentFiltered { category, detail } => {
                GenerationFailureKind::SafetyFilter { category, detail }
            }
            ModelError::Timeout(detail) | ModelError::Transient(detail) => {
                GenerationFailureKind::Transient { detail }
            }
        }
    }

    /// Vision reading goes through the model too; its failures are extraction
    /// failures as far as the fallback tiers are concerned. Bad credentials and
    /// prohibited content end the vision tier at once; everything else is an
    /// outage worth retrying.
    pub fn into_extraction_reason(self) -> ExtractionReason {
        match self {
            ModelError::Auth(_) => ExtractionReason::ServiceMisconfigured {
                detail: self.to_string(),
            },
            ModelError::ContentFiltered { category, detail }
                if is_prohibited_category(category.as_deref()) =>
            {
                ExtractionReason::ContentBlocked { category, detail }
            }
            other => ExtractionReason::ServiceUnavailable {
                detail: other.to_string(),
            },
        }
    }
}

static RE_RETRY_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:retry[-_ ]after|try again in)["':=\s]*(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|sec|secs|seconds?)?\b"#)
        .unwrap()
});

/// The wait a rate-limit message asks for, in whole seconds (rounded up).
///
/// Understands `Retry-After: 20`, `retry_after=3` and OpenAI's
/// "Please try again in 1.5s" / "in 450ms".
fn retry_after_secs(message: &str) -> Option<u64> {
    let caps = RE_RETRY_AFTER.captures(message)?;
    let value: f64 = caps[1].parse().ok()?;
    let secs = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(unit) if unit.starts_with("ms") || unit.starts_with("milli") => value / 1000.0,
        _ => value,
    };
    Some(secs.ceil().max(0.0) as u64)
}

static RE_CATEGORY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:block(?:ed)?[_ ]?reason|category)["']?\s*[:=]\s*["']?([a-z][a-z_\- ]*[a-z])"#)
        .unwrap()
});

fn block_category(message: &str) -> Option<String> {
    RE_CATEGORY
        .captures(message)
        .map(|caps| caps[1].trim().to_ascii_lowercase())
}

/// A text-and-vision model the pipeline can call.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Label for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, ModelError>;
}

/// [`GenerativeModel`] over an edgequake-llm provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        let label = match (&config.provider_name, &config.model) {
            (Some(p), Some(m)) => format!("{p}/{m}"),
            (Some(p), None) => p.clone(),
            (None, Some(m)) => m.clone(),
            (None, None) => "auto".to_string(),
        };
        Self {
            provider,
            label,
            options: build_options(config),
        }
    }

    /// Resolve the provider from the config and environment, then wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, StudyError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl GenerativeModel for ProviderModel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        let start = Instant::now();
        let user = if request.images.is_empty() {
            ChatMessage::user(request.user)
        } else {
            ChatMessage::user_with_images(request.user, request.images)
        };
        let messages = vec![ChatMessage::system(request.system), user];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ModelError::classify(&e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.label,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, StudyError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        StudyError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` + `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is present.
/// 5. `ProviderFactory::from_env` auto-detection.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, StudyError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| StudyError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;
    Ok(llm_provider)
}
