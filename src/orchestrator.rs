//! Orchestrator: drives one session from `Queued` to a terminal state.
//!
//! ```text
//! segment ─▶ ┌ batch 1: extract ─▶ classify ─▶ generate ┐
//!            ├ batch 2: …                               ├─▶ barrier ─▶ aggregate ─▶ mock tests ─▶ done
//!            └ batch n: …       (≤ concurrency at once) ┘
//! ```
//!
//! The orchestrator task is the only writer of the session's progress.
//! Workers run inside its `buffer_unordered` stream and talk back over an
//! mpsc channel (stage changes, fallbacks); their outcome is the future's
//! output. Each outcome produces exactly one progress update.
//!
//! Cancellation is cooperative. Workers check the token before extraction
//! and again before generation; in-flight calls are left to finish. A
//! cancelled session still aggregates what had already completed.

use crate::config::{FallbackScope, PipelineConfig};
use crate::error::{BatchError, StudyError};
use crate::model::{
    BatchContent, BatchSpan, BatchSpec, BatchStats, ExtractionStrategy, Session, StudyResults,
    TextBatch,
};
use crate::pipeline::aggregate;
use crate::pipeline::classify;
use crate::pipeline::document::SourceDocument;
use crate::pipeline::extract::{Extractor, OcrEngine};
use crate::pipeline::generate::{Generator, TargetYield};
use crate::pipeline::llm::GenerativeModel;
use crate::pipeline::mocktest;
use crate::pipeline::segment;
use crate::policy::{self, session_outcome, RetryPolicy, SessionOutcome};
use crate::progress::{
    ProgressCallback, ProgressStep, ProgressTracker, PERCENT_AGGREGATING, PERCENT_BATCHES_START,
    PERCENT_EXTRACTING, PERCENT_SYNTHESIZING,
};
use crate::store::SessionStore;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a session is started from.
#[derive(Clone)]
pub enum SessionInput {
    /// One or more documents, processed in order.
    Files {
        name: String,
        documents: Vec<Arc<dyn SourceDocument>>,
    },
    /// A topic or pasted notes; always a single batch.
    Text { name: String, text: String },
}

impl SessionInput {
    pub fn name(&self) -> &str {
        match self {
            SessionInput::Files { name, .. } | SessionInput::Text { name, .. } => name,
        }
    }
}

impl fmt::Debug for SessionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionInput::Files { name, documents } => f
                .debug_struct("Files")
                .field("name", name)
                .field(
                    "documents",
                    &documents.iter().map(|d| d.name()).collect::<Vec<_>>(),
                )
                .finish(),
            SessionInput::Text { name, text } => f
                .debug_struct("Text")
                .field("name", name)
                .field("chars", &text.chars().count())
                .finish(),
        }
    }
}

// ── Worker messages ──────────────────────────────────────────────────────

#[derive(Debug)]
enum WorkerEvent {
    Started { batch: usize },
    Stage { batch: usize, step: ProgressStep },
    Fallback { batch: usize, to: ExtractionStrategy },
}

#[derive(Clone)]
enum JobSource {
    Document(Arc<dyn SourceDocument>),
    Text(Arc<str>),
}

#[derive(Clone)]
struct BatchJob {
    spec: BatchSpec,
    source: JobSource,
}

#[derive(Debug)]
struct BatchOutcome {
    sequence: usize,
    span: BatchSpan,
    result: Result<BatchContent, BatchError>,
    notices: Vec<String>,
    input_tokens: u64,
    output_tokens: u64,
}

impl BatchOutcome {
    fn cancelled(spec: BatchSpec) -> Self {
        Self {
            sequence: spec.sequence,
            span: spec.span,
            result: Err(BatchError::Cancelled {
                batch: spec.sequence,
            }),
            notices: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// Everything a batch worker needs; shared read-only across workers.
struct WorkerContext {
    extractor: Extractor,
    generator: Generator,
    classifier_model: Arc<dyn GenerativeModel>,
    policy: RetryPolicy,
    strategy: ExtractionStrategy,
    /// Set once, by the orchestrator, when a session-scope fallback happens.
    session_fallback: Arc<OnceLock<ExtractionStrategy>>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Runs sessions. Cheap to share; one instance serves a whole registry.
pub struct Orchestrator {
    config: PipelineConfig,
    policy: RetryPolicy,
    model: Arc<dyn GenerativeModel>,
    ocr: Arc<dyn OcrEngine>,
    store: Arc<dyn SessionStore>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        model: Arc<dyn GenerativeModel>,
        ocr: Arc<dyn OcrEngine>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config),
            config,
            model,
            ocr,
            store,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn callback(&self) -> Option<&ProgressCallback> {
        self.config.progress_callback.as_ref()
    }

    async fn persist(&self, tracker: &ProgressTracker) {
        if let Err(e) = self.store.append_progress(tracker.current()).await {
            warn!("Session {}: could not persist progress: {}", tracker.current().session_id, e);
        }
    }

    /// Run `session` to completion. Never fails: every outcome, including
    /// total failure, ends in a terminal progress state and stored results.
    pub async fn run(
        &self,
        session: Session,
        input: SessionInput,
        mut tracker: ProgressTracker,
        cancel: CancellationToken,
    ) -> StudyResults {
        let id = session.id;
        info!("Session {}: starting '{}' ({:?})", id, session.name, input);

        // ── Segment ──────────────────────────────────────────────────────
        tracker.advance(ProgressStep::Extracting, PERCENT_EXTRACTING, "Splitting input into batches");
        self.persist(&tracker).await;

        let jobs = build_jobs(&input);
        let total = jobs.len();
        tracker.set_batch_total(total);
        info!("Session {}: {} batch(es)", id, total);
        if let Some(cb) = self.callback() {
            cb.on_session_start(total);
        }
        tracker.advance(
            ProgressStep::Extracting,
            PERCENT_BATCHES_START,
            format!("Processing {total} batch(es)"),
        );
        self.persist(&tracker).await;

        // ── Fan out ──────────────────────────────────────────────────────
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session_fallback = Arc::new(OnceLock::new());
        let ctx = Arc::new(WorkerContext {
            extractor: Extractor::new(
                Arc::clone(&self.ocr),
                Arc::clone(&self.model),
                self.policy,
                self.config.min_extracted_chars,
                self.config.max_rendered_pixels,
            ),
            generator: Generator::new(
                Arc::clone(&self.model),
                self.policy,
                TargetYield {
                    questions: self.config.questions_per_batch,
                    mnemonics: self.config.mnemonics_per_batch,
                },
            ),
            classifier_model: Arc::clone(&self.model),
            policy: self.policy,
            strategy: self.config.strategy,
            session_fallback: Arc::clone(&session_fallback),
            cancel: cancel.clone(),
            events: events_tx,
        });

        let workers = stream::iter(jobs.into_iter().map(move |job| {
            let ctx = Arc::clone(&ctx);
            async move { process_batch(&ctx, job).await }
        }))
        .buffer_unordered(self.config.concurrency);
        let mut workers = std::pin::pin!(workers);

        let mut outcomes: Vec<BatchOutcome> = Vec::with_capacity(total);
        let mut last_failure: Option<BatchError> = None;

        loop {
            tokio::select! {
                biased;
                Some(event) = events_rx.recv() => {
                    self.on_event(event, &mut tracker, &session_fallback, total);
                    self.persist(&tracker).await;
                }
                next = workers.next() => {
                    let Some(outcome) = next else { break };
                    self.on_outcome(&outcome, &mut tracker, total);
                    self.persist(&tracker).await;
                    if let Err(ref e) = outcome.result {
                        if !matches!(e, BatchError::Cancelled { .. }) {
                            last_failure = Some(e.clone());
                        }
                    }
                    outcomes.push(outcome);
                }
            }
        }
        while let Ok(event) = events_rx.try_recv() {
            self.on_event(event, &mut tracker, &session_fallback, total);
        }

        // ── Barrier passed: fan in ───────────────────────────────────────
        outcomes.sort_by_key(|o| o.sequence);
        let (results, terminal) = self.finish(&session, outcomes, last_failure, &mut tracker, &cancel);
        self.persist(&tracker).await;

        // Results are stored before the terminal state is visible to pollers.
        if let Err(e) = self.store.put_results(&results).await {
            error!("Session {}: could not persist results: {}", id, e);
        }
        terminal.publish(&mut tracker);
        self.persist(&tracker).await;
        if let Some(cb) = self.callback() {
            cb.on_session_complete(total, results.stats.succeeded);
        }
        info!(
            "Session {}: {} ({}/{} batches succeeded, {} questions)",
            id,
            tracker.current().step,
            results.stats.succeeded,
            total,
            results.questions.len()
        );
        results
    }

    fn on_event(
        &self,
        event: WorkerEvent,
        tracker: &mut ProgressTracker,
        session_fallback: &OnceLock<ExtractionStrategy>,
        total: usize,
    ) {
        let percent = tracker.current().percent;
        match event {
            WorkerEvent::Started { batch } => {
                if let Some(cb) = self.callback() {
                    cb.on_batch_start(batch, total);
                }
                tracker.advance(
                    ProgressStep::Extracting,
                    percent,
                    format!("Batch {batch}/{total}: extracting text"),
                );
            }
            WorkerEvent::Stage { batch, step } => {
                tracker.advance(step, percent, format!("Batch {batch}/{total}: {step}"));
            }
            WorkerEvent::Fallback { batch, to } => {
                let scope = self.config.fallback_scope;
                if scope == FallbackScope::Session && session_fallback.set(to).is_ok() {
                    info!("Switching all remaining batches to {} extraction", to);
                }
                tracker.advance(
                    ProgressStep::Extracting,
                    percent,
                    format!("Batch {batch}/{total}: falling back to {to} extraction"),
                );
            }
        }
    }

    fn on_outcome(&self, outcome: &BatchOutcome, tracker: &mut ProgressTracker, total: usize) {
        let seq = outcome.sequence;
        match &outcome.result {
            Ok(content) => {
                if let Some(cb) = self.callback() {
                    cb.on_batch_complete(seq, total, content.questions.len());
                }
                tracker.batch_finished(format!(
                    "Batch {seq}/{total} ({}) done: {} question(s)",
                    outcome.span,
                    content.questions.len()
                ));
            }
            Err(BatchError::Cancelled { .. }) => {
                tracker.batch_finished(format!("Batch {seq}/{total} skipped (cancelled)"));
            }
            Err(e) => {
                if let Some(cb) = self.callback() {
                    cb.on_batch_error(seq, total, &e.to_string());
                }
                tracker.batch_finished(format!("Batch {seq}/{total} failed: {e}"));
            }
        }
    }

    /// Aggregate and synthesise tests; decide, but do not publish, the terminal state.
    fn finish(
        &self,
        session: &Session,
        outcomes: Vec<BatchOutcome>,
        last_failure: Option<BatchError>,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> (StudyResults, Terminal) {
        let mut results = StudyResults::empty(session.id);
        let mut contents = Vec::new();
        for outcome in outcomes {
            results.input_tokens += outcome.input_tokens;
            results.output_tokens += outcome.output_tokens;
            results.notices.extend(outcome.notices);
            match outcome.result {
                Ok(content) => contents.push(content),
                Err(e @ BatchError::Cancelled { .. }) => {
                    results.stats.cancelled += 1;
                    results.failures.push(e);
                }
                Err(e) => {
                    results.stats.failed += 1;
                    results.failures.push(e);
                }
            }
        }
        results.stats.succeeded = contents.len();
        results.stats.total = results.stats.succeeded + results.stats.failed + results.stats.cancelled;
        let BatchStats {
            total,
            succeeded,
            failed,
            cancelled,
        } = results.stats;

        let cancelled_session = cancel.is_cancelled();
        if !cancelled_session {
            if let SessionOutcome::Failed { reason } = session_outcome(succeeded, failed, last_failure.as_ref()) {
                let detail = StudyError::AllBatchesFailed {
                    total,
                    last_error: last_failure
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| reason.clone()),
                }
                .to_string();
                warn!("Session {}: failed: {}", session.id, detail);
                return (
                    results,
                    Terminal::Failed {
                        message: reason,
                        error: detail,
                    },
                );
            }
        }

        tracker.advance(
            ProgressStep::Aggregating,
            PERCENT_AGGREGATING,
            format!("Merging content from {succeeded} batch(es)"),
        );
        let merged = aggregate::aggregate(&contents, &session.name, self.config.note_question_count);
        results
            .notices
            .extend(merged.inconsistencies.iter().map(|i| i.to_string()));

        tracker.advance(
            ProgressStep::SynthesizingTest,
            PERCENT_SYNTHESIZING,
            format!("Assembling mock tests from {} question(s)", merged.questions.len()),
        );
        results.mock_tests =
            mocktest::synthesize(&merged.questions, &session.name, self.config.max_questions_per_test);
        results.questions = merged.questions;
        results.mnemonics = merged.mnemonics;
        results.cheat_sheet = merged.cheat_sheet;
        results.note = (succeeded > 0).then_some(merged.note);
        results.partial = failed + cancelled > 0;

        let terminal = if cancelled_session {
            Terminal::Cancelled {
                partial: succeeded > 0,
                message: format!("Cancelled after {succeeded} of {total} batch(es) completed"),
            }
        } else if results.partial {
            Terminal::Completed {
                partial: true,
                message: format!(
                    "Completed with partial content: {succeeded} of {total} batches succeeded, {failed} failed"
                ),
            }
        } else {
            Terminal::Completed {
                partial: false,
                message: format!("Completed: {} question(s)", results.questions.len()),
            }
        };
        (results, terminal)
    }
}

#[derive(Debug)]
enum Terminal {
    Completed { partial: bool, message: String },
    Failed { message: String, error: String },
    Cancelled { partial: bool, message: String },
}

impl Terminal {
    fn publish(self, tracker: &mut ProgressTracker) {
        match self {
            Terminal::Completed { partial, message } => tracker.complete(partial, message),
            Terminal::Failed { message, error } => tracker.fail(message, error),
            Terminal::Cancelled { partial, message } => tracker.cancel(partial, message),
        }
    }
}

fn build_jobs(input: &SessionInput) -> Vec<BatchJob> {
    match input {
        SessionInput::Text { text, .. } => {
            let text: Arc<str> = Arc::from(text.as_str());
            segment::segment_text()
                .into_iter()
                .map(|spec| BatchJob {
                    spec,
                    source: JobSource::Text(Arc::clone(&text)),
                })
                .collect()
        }
        SessionInput::Files { documents, .. } => {
            let page_counts: Vec<usize> = documents.iter().map(|d| d.page_count()).collect();
            segment::segment_documents(&page_counts)
                .into_iter()
                .map(|spec| BatchJob {
                    spec,
                    source: JobSource::Document(Arc::clone(&documents[spec.document])),
                })
                .collect()
        }
    }
}

/// Extract, classify and generate one batch.
async fn process_batch(ctx: &WorkerContext, job: BatchJob) -> BatchOutcome {
    let spec = job.spec;
    let seq = spec.sequence;
    if ctx.cancel.is_cancelled() {
        debug!("Batch {}: cancelled before start", seq);
        return BatchOutcome::cancelled(spec);
    }
    let _ = ctx.events.send(WorkerEvent::Started { batch: seq });

    let mut notices = Vec::new();
    let (mut input_tokens, mut output_tokens) = (0, 0);

    // ── Extract ──────────────────────────────────────────────────────────
    let batch = match job.source {
        JobSource::Text(text) => TextBatch {
            spec,
            text: text.trim().to_string(),
            strategy: ExtractionStrategy::Direct,
        },
        JobSource::Document(document) => {
            let strategy = ctx.session_fallback.get().copied().unwrap_or(ctx.strategy);
            let mut abandoned = Vec::new();
            let extracted = ctx
                .extractor
                .extract_with_fallback(document.as_ref(), spec, strategy, |failed, to| {
                    abandoned.push(format!(
                        "Batch {seq} ({}): {} extraction failed ({}); fell back to {}",
                        spec.span, failed.strategy, failed.reason, to
                    ));
                    let _ = ctx.events.send(WorkerEvent::Fallback { batch: seq, to });
                })
                .await;
            match extracted {
                Ok(extracted) => {
                    for failed in &extracted.failed_tiers {
                        notices.push(format!(
                            "Batch {seq} ({}): {} extraction failed ({}); used {} instead",
                            spec.span, failed.strategy, failed.reason, extracted.batch.strategy
                        ));
                    }
                    input_tokens += extracted.input_tokens;
                    output_tokens += extracted.output_tokens;
                    extracted.batch
                }
                Err(failure) => {
                    notices.extend(abandoned);
                    return BatchOutcome {
                        sequence: seq,
                        span: spec.span,
                        result: Err(failure.into()),
                        notices,
                        input_tokens,
                        output_tokens,
                    };
                }
            }
        }
    };

    // ── Classify ─────────────────────────────────────────────────────────
    let _ = ctx.events.send(WorkerEvent::Stage {
        batch: seq,
        step: ProgressStep::Classifying,
    });
    let classified = classify::classify(&batch.text, seq, ctx.classifier_model.as_ref(), &ctx.policy).await;
    input_tokens += classified.input_tokens;
    output_tokens += classified.output_tokens;
    if let Some(ref failure) = classified.failure {
        notices.push(failure.to_string());
    }

    if ctx.cancel.is_cancelled() {
        debug!("Batch {}: cancelled before generation", seq);
        let mut outcome = BatchOutcome::cancelled(spec);
        outcome.notices = notices;
        outcome.input_tokens = input_tokens;
        outcome.output_tokens = output_tokens;
        return outcome;
    }

    // ── Generate ─────────────────────────────────────────────────────────
    let _ = ctx.events.send(WorkerEvent::Stage {
        batch: seq,
        step: ProgressStep::Generating,
    });
    let generated = ctx.generator.generate(&batch, classified.classification).await;
    let result = match generated {
        Ok(generated) => {
            input_tokens += generated.input_tokens;
            output_tokens += generated.output_tokens;
            if let Some(ref half) = generated.partial_failure {
                notices.push(format!(
                    "Batch {seq}: one half of a mixed batch failed ({})",
                    policy::user_facing_reason(&BatchError::Generation(half.clone()))
                ));
            }
            Ok(generated.content)
        }
        Err(failure) => Err(failure.into()),
    };

    BatchOutcome {
        sequence: seq,
        span: spec.span,
        result,
        notices,
        input_tokens,
        output_tokens,
    }
}
