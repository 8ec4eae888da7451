//! Configuration for study-material generation sessions.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. One struct is shared by all sessions a registry
//! runs, so two runs can be compared by diffing their configs.

use crate::error::StudyError;
use crate::model::ExtractionStrategy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the generation pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_study::{ExtractionStrategy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .concurrency(4)
///     .strategy(ExtractionStrategy::Ocr)
///     .questions_per_batch(8)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Maximum number of batches in flight at once. Default: 10.
    ///
    /// Each batch makes one or more external calls; this is the knob that
    /// keeps a session under the provider's rate limit.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for generation calls. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Retries after the first attempt of any external call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for extraction and generation. Default: 60.
    pub api_timeout_secs: u64,

    /// Extraction strategy used for every batch unless a fallback kicks in.
    /// Default: [`ExtractionStrategy::Vision`].
    pub strategy: ExtractionStrategy,

    /// Whether a fallback applies to one batch or to the rest of the session.
    pub fallback_scope: FallbackScope,

    /// Minimum non-whitespace characters per page before extracted text is
    /// considered near-empty. Default: 40.
    pub min_extracted_chars: usize,

    /// Target number of questions per batch. Default: 10.
    pub questions_per_batch: usize,

    /// Target number of mnemonics per batch. Default: 3.
    pub mnemonics_per_batch: usize,

    /// Questions copied into the compiled note. Default: 10.
    pub note_question_count: usize,

    /// Largest mock test before the bank is split. Default: 40.
    pub max_questions_per_test: usize,

    /// How long a terminal session stays in the registry. Default: 30 min.
    pub retention: Duration,

    /// OCR executable. Default: "tesseract".
    pub ocr_command: String,

    /// OCR language code passed to the engine. Default: "eng".
    pub ocr_language: String,

    /// Longest edge of a rendered page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional observer for every progress update.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            strategy: ExtractionStrategy::default(),
            fallback_scope: FallbackScope::default(),
            min_extracted_chars: 40,
            questions_per_batch: 10,
            mnemonics_per_batch: 3,
            note_question_count: 10,
            max_questions_per_test: 40,
            retention: Duration::from_secs(30 * 60),
            ocr_command: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
            max_rendered_pixels: 2000,
            password: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("strategy", &self.strategy)
            .field("fallback_scope", &self.fallback_scope)
            .field("questions_per_batch", &self.questions_per_batch)
            .field("max_questions_per_test", &self.max_questions_per_test)
            .field("ocr_command", &self.ocr_command)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn SessionProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
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

    pub fn strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn fallback_scope(mut self, scope: FallbackScope) -> Self {
        self.config.fallback_scope = scope;
        self
    }

    pub fn min_extracted_chars(mut self, n: usize) -> Self {
        self.config.min_extracted_chars = n;
        self
    }

    pub fn questions_per_batch(mut self, n: usize) -> Self {
        self.config.questions_per_batch = n;
        self
    }

    pub fn mnemonics_per_batch(mut self, n: usize) -> Self {
        self.config.mnemonics_per_batch = n;
        self
    }

    pub fn note_question_count(mut self, n: usize) -> Self {
        self.config.note_question_count = n;
        self
    }

    pub fn max_questions_per_test(mut self, n: usize) -> Self {
        self.config.max_questions_per_test = n;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn ocr_command(mut self, cmd: impl Into<String>) -> Self {
        self.config.ocr_command = cmd.into();
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, StudyError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(StudyError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(StudyError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if c.questions_per_batch == 0 {
            return Err(StudyError::InvalidConfig(
                "questions_per_batch must be ≥ 1".into(),
            ));
        }
        if c.max_questions_per_test == 0 {
            return Err(StudyError::InvalidConfig(
                "max_questions_per_test must be ≥ 1".into(),
            ));
        }
        if c.ocr_command.trim().is_empty() {
            return Err(StudyError::InvalidConfig("OCR command is empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How far an extraction fallback reaches once it has happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackScope {
    /// Only the batch that failed uses the fallback tier. (default)
    #[default]
    Batch,
    /// Every batch not yet started also switches to the fallback tier.
    Session,
}

impl std::str::FromStr for FallbackScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "batch" => Ok(FallbackScope::Batch),
            "session" => Ok(FallbackScope::Session),
            other => Err(format!("unknown fallback scope '{other}'")),
        }
    }
}
