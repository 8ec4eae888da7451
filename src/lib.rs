//! # edgequake-study
//!
//! Turn study material (PDF documents, or just a topic) into practice
//! questions, mnemonics, a cheat sheet, a compiled note and timed mock tests.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input (PDFs | topic text)
//!  │
//!  ├─ 1. Segment    ≤ 5 pages → one batch, otherwise batches of 2–3 pages
//!  ├─ 2. Extract    text layer / tesseract OCR / vision model, with fallback
//!  ├─ 3. Classify   past-paper questions, study notes, or both
//!  ├─ 4. Generate   extract existing MCQs verbatim, or synthesise new content
//!  │                  (steps 2–4 run per batch, up to `concurrency` at once)
//!  ├─ 5. Aggregate  dedupe and merge every batch, compile the note
//!  └─ 6. Mock tests timed tests built from the question bank, no model calls
//! ```
//!
//! Sessions run in the background; callers poll [`SessionRegistry::progress`],
//! subscribe with [`progress_stream`], or inject a [`SessionProgressCallback`].
//! A batch that fails after retries and fallbacks is left out and the session
//! completes as *partial*; only a session where every batch failed ends
//! `Failed`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_study::{
//!     MemoryStore, PdfDocument, PipelineConfig, SessionInput, SessionRegistry,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::default();
//!     let registry = SessionRegistry::new(config, Arc::new(MemoryStore::new()))?;
//!
//!     let doc = PdfDocument::open("cardiology.pdf", None, 120).await?;
//!     let id = registry
//!         .start_session(
//!             "me",
//!             SessionInput::Files {
//!                 name: "Cardiology".into(),
//!                 documents: vec![Arc::new(doc)],
//!             },
//!         )
//!         .await?;
//!
//!     // … poll registry.progress(id) until terminal, then:
//!     let results = registry.results(id).await?;
//!     println!("{} questions, {} mock test(s)", results.questions.len(), results.mock_tests.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `study-gen` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-study = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FallbackScope, PipelineConfig, PipelineConfigBuilder};
pub use error::{
    AggregationInconsistency, BatchError, ClassificationFailure, ExtractionFailure,
    ExtractionReason, GenerationFailure, GenerationFailureKind, StudyError,
};
pub use model::{
    BatchContent, BatchStats, CheatSheetEntry, Classification, Difficulty, ExtractionStrategy,
    InputKind, Mnemonic, MockTest, Note, Provenance, Question, Session, SessionId, StudyResults,
};
pub use orchestrator::{Orchestrator, SessionInput};
pub use pipeline::document::{PdfDocument, SourceDocument};
pub use pipeline::extract::{OcrEngine, TesseractOcr};
pub use pipeline::llm::{GenerativeModel, ModelError, ModelReply, ModelRequest, ProviderModel};
pub use progress::{
    NoopProgressCallback, ProgressCallback, ProgressState, ProgressStep, SessionProgressCallback,
};
pub use registry::SessionRegistry;
pub use store::{MemoryStore, SessionStore};
pub use stream::{progress_stream, ProgressStream};
