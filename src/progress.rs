//! Session progress: the polled [`ProgressState`] and the push-style callback.
//!
//! A session's progress has exactly one writer, the orchestrator task that
//! owns its [`ProgressTracker`]. Batch workers never touch it; they hand their
//! outcome back to the orchestrator, which then publishes one update.
//!
//! Readers get progress two ways:
//!
//! * **Polling**: the tracker publishes into a `tokio::sync::watch` channel;
//!   the registry keeps the receiver and answers `GetProgress` from it.
//! * **Callbacks**: inject an [`Arc<dyn SessionProgressCallback>`] via
//!   [`crate::config::PipelineConfigBuilder::progress_callback`] to observe
//!   every update, including the ones a poller would coalesce.
//!
//! # Example
//!
//! ```rust
//! use edgequake_study::{PipelineConfig, ProgressState, SessionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     updates: AtomicUsize,
//! }
//!
//! impl SessionProgressCallback for CountingCallback {
//!     fn on_progress(&self, state: &ProgressState) {
//!         self.updates.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}% {}", state.percent, state.message);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { updates: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::model::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

// ── Percent budget ───────────────────────────────────────────────────────

pub const PERCENT_QUEUED: u8 = 0;
pub const PERCENT_EXTRACTING: u8 = 5;
/// Start of the batch phase; batch completions scale into 10–90.
pub const PERCENT_BATCHES_START: u8 = 10;
pub const PERCENT_BATCHES_END: u8 = 90;
pub const PERCENT_AGGREGATING: u8 = 92;
pub const PERCENT_SYNTHESIZING: u8 = 96;
pub const PERCENT_COMPLETED: u8 = 100;

/// Percent complete after `done` of `total` batches reached a terminal state.
pub fn batch_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return PERCENT_BATCHES_END;
    }
    let span = (PERCENT_BATCHES_END - PERCENT_BATCHES_START) as usize;
    let done = done.min(total);
    PERCENT_BATCHES_START + (span * done / total) as u8
}

// ── Steps ────────────────────────────────────────────────────────────────

/// Lifecycle step of a session.
///
/// The non-terminal steps are ordered; a session only ever moves forward.
/// `Failed` and `Cancelled` are terminal side exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Queued,
    Extracting,
    Classifying,
    Generating,
    Aggregating,
    SynthesizingTest,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressStep {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProgressStep::Completed | ProgressStep::Failed | ProgressStep::Cancelled
        )
    }

    fn rank(self) -> u8 {
        match self {
            ProgressStep::Queued => 0,
            ProgressStep::Extracting => 1,
            ProgressStep::Classifying => 2,
            ProgressStep::Generating => 3,
            ProgressStep::Aggregating => 4,
            ProgressStep::SynthesizingTest => 5,
            ProgressStep::Completed | ProgressStep::Failed | ProgressStep::Cancelled => 6,
        }
    }
}

impl fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProgressStep::Queued => "queued",
            ProgressStep::Extracting => "extracting",
            ProgressStep::Classifying => "classifying",
            ProgressStep::Generating => "generating",
            ProgressStep::Aggregating => "aggregating",
            ProgressStep::SynthesizingTest => "synthesizing-test",
            ProgressStep::Completed => "completed",
            ProgressStep::Failed => "failed",
            ProgressStep::Cancelled => "cancelled",
        })
    }
}

// ── State ────────────────────────────────────────────────────────────────

/// Snapshot of a session's progress, as seen by a poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub session_id: SessionId,
    pub step: ProgressStep,
    /// Non-decreasing within a session.
    pub percent: u8,
    pub message: String,
    pub error: Option<String>,
    /// Terminal state reached with only part of the batches succeeding.
    pub partial: bool,
    pub batches_total: usize,
    pub batches_done: usize,
    pub updated_at: DateTime<Utc>,
}

impl ProgressState {
    pub fn queued(session_id: SessionId) -> Self {
        Self {
            session_id,
            step: ProgressStep::Queued,
            percent: PERCENT_QUEUED,
            message: "Queued".to_string(),
            error: None,
            partial: false,
            batches_total: 0,
            batches_done: 0,
            updated_at: Utc::now(),
        }
    }
}

// ── Callbacks ────────────────────────────────────────────────────────────

/// Called by the orchestrator as a session advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Every call happens on the session's orchestrator
/// task, one at a time.
pub trait SessionProgressCallback: Send + Sync {
    /// Called once after segmentation.
    fn on_session_start(&self, total_batches: usize) {
        let _ = total_batches;
    }

    /// Called when a batch begins extraction.
    fn on_batch_start(&self, batch: usize, total_batches: usize) {
        let _ = (batch, total_batches);
    }

    /// Called when a batch produced content.
    fn on_batch_complete(&self, batch: usize, total_batches: usize, question_count: usize) {
        let _ = (batch, total_batches, question_count);
    }

    /// Called when a batch failed after the error policy gave up on it.
    fn on_batch_error(&self, batch: usize, total_batches: usize, error: &str) {
        let _ = (batch, total_batches, error);
    }

    /// Called for every published progress update.
    fn on_progress(&self, state: &ProgressState) {
        let _ = state;
    }

    /// Called once when the session reaches a terminal state.
    fn on_session_complete(&self, total_batches: usize, succeeded: usize) {
        let _ = (total_batches, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl SessionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn SessionProgressCallback>;

// ── Tracker ──────────────────────────────────────────────────────────────

/// Single-writer owner of a session's [`ProgressState`].
pub struct ProgressTracker {
    state: ProgressState,
    tx: watch::Sender<ProgressState>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// Create a tracker in the `Queued` state and the receiver pollers read.
    pub fn new(
        session_id: SessionId,
        callback: Option<ProgressCallback>,
    ) -> (Self, watch::Receiver<ProgressState>) {
        let state = ProgressState::queued(session_id);
        let (tx, rx) = watch::channel(state.clone());
        (
            Self {
                state,
                tx,
                callback,
            },
            rx,
        )
    }

    pub fn current(&self) -> &ProgressState {
        &self.state
    }

    pub fn set_batch_total(&mut self, total: usize) {
        self.state.batches_total = total;
    }

    /// Publish a non-terminal update.
    ///
    /// The step never moves backwards and the percent never decreases: a
    /// lower value (e.g. recomputed after a retry) is replaced by the last
    /// published one before anything is sent.
    pub fn advance(&mut self, step: ProgressStep, percent: u8, message: impl Into<String>) {
        let step = if step.rank() >= self.state.step.rank() {
            step
        } else {
            self.state.step
        };
        self.publish(step, percent, message.into(), None, false);
    }

    /// Record one more batch as finished and publish the recomputed percent.
    pub fn batch_finished(&mut self, message: impl Into<String>) {
        self.state.batches_done += 1;
        let percent = batch_percent(self.state.batches_done, self.state.batches_total);
        let step = self.state.step;
        self.advance(step, percent, message);
    }

    /// Publish the `Completed` state.
    pub fn complete(&mut self, partial: bool, message: impl Into<String>) {
        self.publish(
            ProgressStep::Completed,
            PERCENT_COMPLETED,
            message.into(),
            None,
            partial,
        );
    }

    /// Publish the `Failed` state; percent stays where it was.
    pub fn fail(&mut self, message: impl Into<String>, error: impl Into<String>) {
        let percent = self.state.percent;
        self.publish(
            ProgressStep::Failed,
            percent,
            message.into(),
            Some(error.into()),
            false,
        );
    }

    /// Publish the `Cancelled` state; percent stays where it was.
    pub fn cancel(&mut self, partial: bool, message: impl Into<String>) {
        let percent = self.state.percent;
        self.publish(ProgressStep::Cancelled, percent, message.into(), None, partial);
    }

    fn publish(
        &mut self,
        step: ProgressStep,
        percent: u8,
        message: String,
        error: Option<String>,
        partial: bool,
    ) {
        if self.state.step.is_terminal() {
            warn!(
                "Session {}: ignoring update after terminal state {}",
                self.state.session_id, self.state.step
            );
            return;
        }
        let percent = if percent < self.state.percent {
            warn!(
                "Session {}: percent {} < last published {}, keeping {}",
                self.state.session_id, percent, self.state.percent, self.state.percent
            );
            self.state.percent
        } else {
            percent
        };

        self.state.step = step;
        self.state.percent = percent;
        self.state.message = message;
        self.state.error = error;
        self.state.partial = partial;
        self.state.updated_at = Utc::now();

        debug!(
            "Session {}: {} {}%: {}",
            self.state.session_id, self.state.step, self.state.percent, self.state.message
        );

        // Nobody polling is fine; the state is still kept for the callback.
        let _ = self.tx.send(self.state.clone());
        if let Some(ref cb) = self.callback {
            cb.on_progress(&self.state);
        }
    }
}
