//! Error policy: classify failures, retry with backoff, fall back, or give up.
//!
//! Every external call (extraction or generation) runs through
//! [`run_with_retry`], which drives a small per-call state machine:
//!
//! ```text
//! Attempting ──ok──────────────────────────▶ Succeeded
//!     │
//!     ├─ retryable, attempts left ─▶ RetryableFailure ──backoff──▶ Attempting
//!     ├─ retryable, bound reached ─▶ escalate (next fallback tier)
//!     └─ terminal ─────────────────▶ TerminalFailure
//! ```
//!
//! Retry bounds, backoff and the per-call timeout are plain values in
//! [`RetryPolicy`]; the fallback tiers for extraction are [`fallback_tier`].
//! A batch that exhausts everything is excluded from aggregation, and
//! [`session_outcome`] decides what that means for the whole session.

use crate::config::PipelineConfig;
use crate::error::{BatchError, ExtractionReason, GenerationFailureKind};
use crate::model::ExtractionStrategy;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Safety-block categories that indicate genuine policy violations.
/// Anything else (notably clinical terminology) is treated as a false positive.
const PROHIBITED_CATEGORIES: &[&str] = &[
    "prohibited_content",
    "blocklist",
    "spii",
    "csam",
    "child_safety",
];

// ── Classification ───────────────────────────────────────────────────────

/// What the next attempt should do differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Same request, after a backoff delay.
    Backoff,
    /// Re-ask with a stricter output-format instruction.
    StricterFormat,
    /// Re-ask with an educational framing to get past a false safety block.
    Reworded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable(RetryHint),
    Terminal,
}

/// A failure the policy knows how to classify.
pub trait PolicyError: Display {
    fn class(&self) -> FailureClass;

    /// The error to record when a call exceeds its timeout.
    fn timed_out(after: Duration) -> Self
    where
        Self: Sized;

    /// A wait the service asked for before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl PolicyError for ExtractionReason {
    fn class(&self) -> FailureClass {
        match self {
            ExtractionReason::ServiceUnavailable { .. } | ExtractionReason::Timeout { .. } => {
                FailureClass::Retryable(RetryHint::Backoff)
            }
            ExtractionReason::Rendering { .. }
            | ExtractionReason::RecognitionEmpty { .. }
            | ExtractionReason::ServiceMisconfigured { .. }
            | ExtractionReason::ContentBlocked { .. }
            | ExtractionReason::EmptyInput => FailureClass::Terminal,
        }
    }

    fn timed_out(after: Duration) -> Self {
        ExtractionReason::Timeout {
            secs: after.as_secs(),
        }
    }
}

impl PolicyError for GenerationFailureKind {
    fn class(&self) -> FailureClass {
        match self {
            GenerationFailureKind::RateLimited { .. }
            | GenerationFailureKind::Transient { .. }
            | GenerationFailureKind::Timeout { .. } => FailureClass::Retryable(RetryHint::Backoff),
            GenerationFailureKind::MalformedOutput { .. } => {
                FailureClass::Retryable(RetryHint::StricterFormat)
            }
            GenerationFailureKind::SafetyFilter { category, .. } => {
                if is_prohibited_category(category.as_deref()) {
                    FailureClass::Terminal
                } else {
                    FailureClass::Retryable(RetryHint::Reworded)
                }
            }
            GenerationFailureKind::Auth { .. } | GenerationFailureKind::NoVerbatimQuestions { .. } => {
                FailureClass::Terminal
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationFailureKind::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    fn timed_out(after: Duration) -> Self {
        GenerationFailureKind::Timeout {
            secs: after.as_secs(),
        }
    }
}

pub(crate) fn is_prohibited_category(category: Option<&str>) -> bool {
    category
        .map(|c| c.trim().to_ascii_lowercase().replace(['-', ' '], "_"))
        .is_some_and(|c| PROHIBITED_CATEGORIES.contains(&c.as_str()))
}

// ── State machine ────────────────────────────────────────────────────────

/// State of one attempted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Attempting { attempt: u32 },
    Succeeded { attempt: u32 },
    RetryableFailure { attempt: u32, hint: RetryHint },
    TerminalFailure { attempt: u32 },
    /// Retryable failures used up the bound; the caller moves to its next tier.
    Escalated { attempt: u32 },
}

impl AttemptState {
    /// Transition out of `Attempting` given the outcome of that attempt.
    pub fn after(self, outcome: Result<(), FailureClass>, max_attempts: u32) -> AttemptState {
        let attempt = match self {
            AttemptState::Attempting { attempt } => attempt,
            other => return other,
        };
        match outcome {
            Ok(()) => AttemptState::Succeeded { attempt },
            Err(FailureClass::Terminal) => AttemptState::TerminalFailure { attempt },
            Err(FailureClass::Retryable(_)) if attempt >= max_attempts => {
                AttemptState::Escalated { attempt }
            }
            Err(FailureClass::Retryable(hint)) => AttemptState::RetryableFailure { attempt, hint },
        }
    }

    /// `RetryableFailure` loops back to `Attempting`; other states are final.
    pub fn retry(self) -> Option<AttemptState> {
        match self {
            AttemptState::RetryableFailure { attempt, .. } => {
                Some(AttemptState::Attempting { attempt: attempt + 1 })
            }
            _ => None,
        }
    }
}

/// Context handed to each attempt of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Why the previous attempt failed, if there was one.
    pub hint: Option<RetryHint>,
}

/// How an operation that did not succeed ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation<E> {
    /// A terminal failure; no further attempts were made.
    Terminal { error: E, attempts: u32 },
    /// Every allowed attempt failed retryably.
    Exhausted { error: E, attempts: u32 },
}

impl<E> Escalation<E> {
    pub fn error(&self) -> &E {
        match self {
            Escalation::Terminal { error, .. } | Escalation::Exhausted { error, .. } => error,
        }
    }

    pub fn into_error(self) -> E {
        match self {
            Escalation::Terminal { error, .. } | Escalation::Exhausted { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Escalation::Terminal { attempts, .. } | Escalation::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Retry bounds, backoff and per-call timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always ≥ 1.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_retries.saturating_add(1),
            base_backoff: Duration::from_millis(config.retry_backoff_ms),
            call_timeout: config.call_timeout(),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff.saturating_mul(factor)
    }

    /// Backoff for retry number `retry`, raised to the wait `error` asks for.
    /// The requested wait is capped at [`MAX_RETRY_AFTER`].
    pub fn delay_after<E: PolicyError>(&self, retry: u32, error: &E) -> Duration {
        let requested = error.retry_after().unwrap_or_default().min(MAX_RETRY_AFTER);
        self.backoff(retry).max(requested)
    }
}

/// Longest provider-requested wait honoured between two attempts.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Run `op` under the policy until it succeeds, fails terminally, or
/// exhausts its attempts. Each attempt is bounded by `policy.call_timeout`;
/// a timeout counts as a retryable failure.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<(T, u32), Escalation<E>>
where
    E: PolicyError,
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut state = AttemptState::Attempting { attempt: 1 };
    let mut hint = None;

    loop {
        let AttemptState::Attempting { attempt } = state else {
            unreachable!("loop only runs in the Attempting state");
        };

        let outcome = match timeout(policy.call_timeout, op(Attempt { number: attempt, hint })).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.call_timeout)),
        };

        let error = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{label}: succeeded on attempt {attempt}");
                }
                return Ok((value, attempt));
            }
            Err(e) => e,
        };

        let class = error.class();
        state = state.after(Err(class), max_attempts);
        match state {
            AttemptState::TerminalFailure { attempt } => {
                warn!("{label}: terminal failure on attempt {attempt}: {error}");
                return Err(Escalation::Terminal {
                    error,
                    attempts: attempt,
                });
            }
            AttemptState::Escalated { attempt } => {
                warn!("{label}: giving up after {attempt} attempt(s): {error}");
                return Err(Escalation::Exhausted {
                    error,
                    attempts: attempt,
                });
            }
            AttemptState::RetryableFailure { attempt, hint: h } => {
                let delay = policy.delay_after(attempt, &error);
                warn!(
                    "{label}: attempt {attempt}/{max_attempts} failed: {error}; retrying in {}ms",
                    delay.as_millis()
                );
                sleep(delay).await;
                hint = Some(h);
                state = state.retry().unwrap_or(AttemptState::Attempting { attempt: attempt + 1 });
            }
            AttemptState::Attempting { .. } | AttemptState::Succeeded { .. } => {
                unreachable!("after() never returns Attempting or Succeeded for an error")
            }
        }
    }
}

// ── Fallback tiers ───────────────────────────────────────────────────────

/// The extraction strategy to try after `strategy` failed for good, if any.
///
/// vision → ocr; direct → ocr (no usable text layer, likely a scan);
/// ocr is the last tier. A batch with no content never falls back.
pub fn fallback_tier(
    strategy: ExtractionStrategy,
    reason: &ExtractionReason,
) -> Option<ExtractionStrategy> {
    if matches!(reason, ExtractionReason::EmptyInput) {
        return None;
    }
    match strategy {
        ExtractionStrategy::Vision | ExtractionStrategy::Direct => Some(ExtractionStrategy::Ocr),
        ExtractionStrategy::Ocr => None,
    }
}

// ── Session outcome ──────────────────────────────────────────────────────

/// Terminal outcome of a session that was not cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every batch succeeded.
    Complete,
    /// Some batches failed; their content is missing but the rest stands.
    Partial { succeeded: usize, failed: usize },
    /// No batch succeeded.
    Failed { reason: String },
}

/// Decide the session's terminal state from its per-batch results.
pub fn session_outcome(
    succeeded: usize,
    failed: usize,
    last_failure: Option<&BatchError>,
) -> SessionOutcome {
    if succeeded == 0 {
        let reason = last_failure
            .map(user_facing_reason)
            .unwrap_or_else(|| "The input produced no batches to process.".to_string());
        return SessionOutcome::Failed { reason };
    }
    if failed == 0 {
        SessionOutcome::Complete
    } else {
        SessionOutcome::Partial { succeeded, failed }
    }
}

/// Explain a terminal batch failure to an end user.
pub fn user_facing_reason(error: &BatchError) -> String {
    match error {
        BatchError::Extraction(e) => match &e.reason {
            ExtractionReason::EmptyInput => {
                "The document contains no readable content.".to_string()
            }
            ExtractionReason::RecognitionEmpty { .. } => {
                "No readable text could be recognised in the document.".to_string()
            }
            ExtractionReason::Rendering { .. } => {
                "The document pages could not be rendered; the file may be corrupt.".to_string()
            }
            ExtractionReason::ServiceUnavailable { .. } | ExtractionReason::Timeout { .. } => {
                "The text extraction service is unavailable. Please try again later.".to_string()
            }
            ExtractionReason::ServiceMisconfigured { .. } => {
                "The text extraction service is misconfigured (authentication failed).".to_string()
            }
            ExtractionReason::ContentBlocked { .. } => {
                "The text extraction service declined to process this material.".to_string()
            }
        },
        BatchError::Generation(g) => match &g.kind {
            GenerationFailureKind::Auth { .. } => {
                "The content generation service is misconfigured (authentication failed).".to_string()
            }
            GenerationFailureKind::RateLimited { .. } => {
                "The content generation service is busy. Please try again later.".to_string()
            }
            GenerationFailureKind::SafetyFilter { .. } => {
                "The content generation service declined to process this material.".to_string()
            }
            GenerationFailureKind::MalformedOutput { .. } => {
                "The content generation service returned unusable output.".to_string()
            }
            GenerationFailureKind::NoVerbatimQuestions { .. } => {
                "The questions found could not be matched to the source text.".to_string()
            }
            GenerationFailureKind::Transient { .. } | GenerationFailureKind::Timeout { .. } => {
                "The content generation service is unavailable. Please try again later.".to_string()
            }
        },
        BatchError::Cancelled { .. } => "The session was cancelled.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionFailure, GenerationFailure};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(60),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn from_config_counts_first_attempt() {
        let config = PipelineConfig::builder().max_retries(2).build().unwrap();
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 3);
    }

    #[test]
    fn state_machine_transitions() {
        let s = AttemptState::Attempting { attempt: 1 };
        assert_eq!(s.after(Ok(()), 3), AttemptState::Succeeded { attempt: 1 });
        assert_eq!(
            s.after(Err(FailureClass::Terminal), 3),
            AttemptState::TerminalFailure { attempt: 1 }
        );
        let r = s.after(Err(FailureClass::Retryable(RetryHint::Backoff)), 3);
        assert_eq!(
            r,
            AttemptState::RetryableFailure {
                attempt: 1,
                hint: RetryHint::Backoff
            }
        );
        assert_eq!(r.retry(), Some(AttemptState::Attempting { attempt: 2 }));

        let last = AttemptState::Attempting { attempt: 3 };
        assert_eq!(
            last.after(Err(FailureClass::Retryable(RetryHint::Backoff)), 3),
            AttemptState::Escalated { attempt: 3 }
        );
        assert_eq!(AttemptState::Succeeded { attempt: 1 }.retry(), None);
    }

    #[test]
    fn generation_failures_classify() {
        use GenerationFailureKind::*;
        assert_eq!(
            RateLimited { retry_after_secs: None }.class(),
            FailureClass::Retryable(RetryHint::Backoff)
        );
        assert_eq!(
            MalformedOutput { raw: "{".into() }.class(),
            FailureClass::Retryable(RetryHint::StricterFormat)
        );
        assert_eq!(Auth { detail: "401".into() }.class(), FailureClass::Terminal);
        assert_eq!(
            SafetyFilter {
                category: Some("medical".into()),
                detail: String::new()
            }
            .class(),
            FailureClass::Retryable(RetryHint::Reworded)
        );
        assert_eq!(
            SafetyFilter {
                category: Some("PROHIBITED-CONTENT".into()),
                detail: String::new()
            }
            .class(),
            FailureClass::Terminal
        );
    }

    #[test]
    fn extraction_failures_classify() {
        assert_eq!(
            ExtractionReason::ServiceUnavailable { detail: "503".into() }.class(),
            FailureClass::Retryable(RetryHint::Backoff)
        );
        assert_eq!(
            ExtractionReason::RecognitionEmpty { chars: 0, min: 40 }.class(),
            FailureClass::Terminal
        );
        assert_eq!(
            ExtractionReason::ServiceMisconfigured { detail: "401".into() }.class(),
            FailureClass::Terminal
        );
        assert_eq!(
            ExtractionReason::ContentBlocked {
                category: Some("csam".into()),
                detail: String::new()
            }
            .class(),
            FailureClass::Terminal
        );
    }

    #[test]
    fn refused_vision_still_falls_back_to_ocr() {
        let r = ExtractionReason::ServiceMisconfigured { detail: "401".into() };
        assert_eq!(
            fallback_tier(ExtractionStrategy::Vision, &r),
            Some(ExtractionStrategy::Ocr)
        );
    }

    #[test]
    fn requested_wait_raises_the_backoff() {
        let p = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(60),
        };
        let asked = GenerationFailureKind::RateLimited { retry_after_secs: Some(7) };
        let silent = GenerationFailureKind::RateLimited { retry_after_secs: None };
        assert_eq!(p.delay_after(1, &asked), Duration::from_secs(7));
        assert_eq!(p.delay_after(1, &silent), Duration::from_millis(500));
        // Exponential backoff wins once it exceeds the requested wait.
        assert_eq!(p.delay_after(5, &asked), Duration::from_secs(8));

        let greedy = GenerationFailureKind::RateLimited { retry_after_secs: Some(3600) };
        assert_eq!(p.delay_after(1, &greedy), MAX_RETRY_AFTER);
    }

    #[test]
    fn fallback_tiers() {
        let r = ExtractionReason::ServiceUnavailable { detail: String::new() };
        assert_eq!(
            fallback_tier(ExtractionStrategy::Vision, &r),
            Some(ExtractionStrategy::Ocr)
        );
        assert_eq!(
            fallback_tier(ExtractionStrategy::Direct, &r),
            Some(ExtractionStrategy::Ocr)
        );
        assert_eq!(fallback_tier(ExtractionStrategy::Ocr, &r), None);
        assert_eq!(
            fallback_tier(ExtractionStrategy::Vision, &ExtractionReason::EmptyInput),
            None
        );
    }

    #[test]
    fn outcome_rules() {
        assert_eq!(session_outcome(3, 0, None), SessionOutcome::Complete);
        assert_eq!(
            session_outcome(2, 1, None),
            SessionOutcome::Partial {
                succeeded: 2,
                failed: 1
            }
        );

        let last: BatchError = GenerationFailure {
            batch: 1,
            attempts: 1,
            kind: GenerationFailureKind::Auth {
                detail: "bad key".into(),
            },
        }
        .into();
        match session_outcome(0, 2, Some(&last)) {
            SessionOutcome::Failed { reason } => assert!(reason.contains("authentication")),
            other => panic!("expected Failed, got {other:?}"),
        }

        let empty: BatchError = ExtractionFailure {
            batch: 1,
            strategy: ExtractionStrategy::Direct,
            reason: ExtractionReason::EmptyInput,
        }
        .into();
        assert!(matches!(
            session_outcome(0, 1, Some(&empty)),
            SessionOutcome::Failed { .. }
        ));
    }

    #[test]
    fn misconfigured_vision_is_explained_as_such() {
        let refused: BatchError = ExtractionFailure {
            batch: 1,
            strategy: ExtractionStrategy::Vision,
            reason: ExtractionReason::ServiceMisconfigured { detail: "401".into() },
        }
        .into();
        assert!(user_facing_reason(&refused).contains("misconfigured"));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&fast_policy(4), "test", |attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                assert_eq!(attempt.number, n);
                if n < 3 {
                    Err(GenerationFailureKind::Transient { detail: "503".into() })
                } else {
                    assert_eq!(attempt.hint, Some(RetryHint::Backoff));
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result, Ok(("done", 3)));
    }

    #[tokio::test]
    async fn terminal_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = run_with_retry(&fast_policy(4), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(GenerationFailureKind::Auth {
                    detail: "401".into(),
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Escalation::Terminal { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn exhausts_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = run_with_retry(&fast_policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerationFailureKind::RateLimited { retry_after_secs: None }) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let escalation = result.unwrap_err();
        assert_eq!(escalation.attempts(), 3);
        assert!(matches!(escalation, Escalation::Exhausted { .. }));
    }

    #[tokio::test]
    async fn timeout_is_retryable() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            call_timeout: Duration::from_millis(20),
        };
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&policy, "test", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, ExtractionReason>(n)
            }
        })
        .await;
        assert_eq!(result, Ok((1, 2)));
    }
}
