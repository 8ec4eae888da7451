//! Error types for the edgequake-study library.
//!
//! Two families of errors reflect two distinct failure scopes:
//!
//! * [`StudyError`]: **Fatal**: the session cannot be started or queried at
//!   all (bad input file, provider not configured, unknown session id) or
//!   every batch failed. Returned as `Err(StudyError)`.
//!
//! * [`BatchError`]: **Non-fatal**: one batch failed after the error policy
//!   exhausted its retries and fallback tiers. Stored on the batch outcome so
//!   the session can still complete with partial content.
//!
//! The per-batch taxonomy mirrors the pipeline stages: [`ExtractionFailure`],
//! [`GenerationFailure`], plus [`ClassificationFailure`] and
//! [`AggregationInconsistency`], which are recorded but never block progress.

use crate::model::ExtractionStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-study library.
#[derive(Debug, Error)]
pub enum StudyError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("'{name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: [u8; 4] },

    /// The session input carries nothing to process.
    #[error("Session input is empty: {0}")]
    EmptyInput(String),

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{name}' is encrypted and requires a password.")]
    PasswordRequired { name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Session errors ────────────────────────────────────────────────────
    /// No session with this id is known to the registry or the store.
    #[error("Session '{id}' not found")]
    SessionNotFound { id: String },

    /// Results were requested before the session reached a terminal state.
    #[error("Results for session '{id}' are not ready (current step: {step})")]
    ResultsNotReady { id: String, step: String },

    /// Every batch failed; nothing could be aggregated.
    #[error("All {total} batches failed.\nLast error: {last_error}")]
    AllBatchesFailed { total: usize, last_error: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The storage collaborator rejected a create/append/read.
    #[error("Session store error: {0}")]
    Store(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Per-batch taxonomy ───────────────────────────────────────────────────

/// Machine-readable reason an extraction attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ExtractionReason {
    /// A page could not be rasterised or its text layer could not be read.
    #[error("rendering failed: {detail}")]
    Rendering { detail: String },

    /// Recognition ran but produced too little text for a non-trivial page.
    #[error("recognition produced {chars} characters (minimum {min})")]
    RecognitionEmpty { chars: usize, min: usize },

    /// The OCR engine or vision model could not be reached.
    #[error("service unavailable: {detail}")]
    ServiceUnavailable { detail: String },

    /// The vision model rejected the credentials or configuration.
    #[error("service misconfigured: {detail}")]
    ServiceMisconfigured { detail: String },

    /// The vision model's safety filter refused the pages outright.
    #[error("blocked by safety filter ({}): {detail}", category.as_deref().unwrap_or("unspecified"))]
    ContentBlocked {
        category: Option<String>,
        detail: String,
    },

    /// The batch has no pages or text at all.
    #[error("batch has no extractable content")]
    EmptyInput,

    /// A single extraction call exceeded its timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl ExtractionReason {
    /// The service refused the request itself, rather than failing to read
    /// the pages.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            ExtractionReason::ServiceMisconfigured { .. } | ExtractionReason::ContentBlocked { .. }
        )
    }
}

/// An extraction failure for one batch under one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Batch {batch}: {strategy} extraction failed: {reason}")]
pub struct ExtractionFailure {
    pub batch: usize,
    pub strategy: ExtractionStrategy,
    pub reason: ExtractionReason,
}

/// Why a generation call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GenerationFailureKind {
    /// Provider returned HTTP 429, possibly with a requested wait.
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Authentication or configuration problem; retrying will not help.
    #[error("authentication/configuration error: {detail}")]
    Auth { detail: String },

    /// The provider's content filter blocked the request or response.
    #[error("blocked by safety filter ({})", category.as_deref().unwrap_or("unspecified"))]
    SafetyFilter {
        category: Option<String>,
        detail: String,
    },

    /// The response could not be parsed into the expected schema.
    #[error("malformed structured output ({} bytes)", raw.len())]
    MalformedOutput { raw: String },

    /// Extraction returned questions, but none of their stems occur in the
    /// source text.
    #[error("none of {candidates} extracted question(s) matched the source text")]
    NoVerbatimQuestions { candidates: usize },

    /// Network blip, 5xx or other transient provider error.
    #[error("transient provider error: {detail}")]
    Transient { detail: String },

    /// A single generation call exceeded its timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// A generation failure for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Batch {batch}: generation failed after {attempts} attempt(s): {kind}")]
pub struct GenerationFailure {
    pub batch: usize,
    pub attempts: u32,
    pub kind: GenerationFailureKind,
}

/// The ambiguous-case classification call failed. Recorded, then the batch
/// proceeds as study notes.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Batch {batch}: classification failed, defaulting to study notes: {detail}")]
pub struct ClassificationFailure {
    pub batch: usize,
    pub detail: String,
}

/// A batch bundle carried an item that could not be merged. The item
/// contributes nothing; aggregation continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Batch {batch}: {detail}")]
pub struct AggregationInconsistency {
    pub batch: usize,
    pub detail: String,
}

/// A terminal, non-fatal failure of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum BatchError {
    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),

    #[error(transparent)]
    Generation(#[from] GenerationFailure),

    /// The session was cancelled before this batch started.
    #[error("Batch {batch}: cancelled before processing")]
    Cancelled { batch: usize },
}

impl BatchError {
    /// Batch sequence number the error belongs to.
    pub fn batch(&self) -> usize {
        match self {
            BatchError::Extraction(e) => e.batch,
            BatchError::Generation(e) => e.batch,
            BatchError::Cancelled { batch } => *batch,
        }
    }
}
