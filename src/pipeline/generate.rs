//! Generation: one bundle of study artifacts per batch.
//!
//! Routing follows the batch's classification:
//!
//! * `ContainsQuestions` → one **extract** call. Stems are kept only if they
//!   occur verbatim (modulo case and whitespace) in the source text, so the
//!   model cannot slip in a paraphrase or a question of its own.
//! * `StudyNotes` → one **synthesize** call: questions, mnemonics, key
//!   points and cheat-sheet entries written from the material.
//! * `Mixed` → both calls; questions keep their provenance tag. The batch
//!   succeeds if either call does.
//!
//! Every call runs under the retry policy. The hint from the previous failed
//! attempt changes the next prompt: stricter format after unparseable
//! output, educational framing after a safety block.

use crate::error::{GenerationFailure, GenerationFailureKind};
use crate::model::{BatchContent, Classification, Provenance, Question, TextBatch};
use crate::pipeline::aggregate::normalize_key;
use crate::pipeline::llm::{GenerativeModel, ModelRequest};
use crate::pipeline::parse::{parse_content, ParseOutcome};
use crate::policy::{run_with_retry, RetryPolicy};
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

static RE_LEADING_ENUMERATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:Q|Question)\s*)?\d{1,3}\s*[.):]\s*").unwrap()
});

/// Target number of items per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetYield {
    pub questions: usize,
    pub mnemonics: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Extract,
    Synthesize,
}

impl Mode {
    fn provenance(self) -> Provenance {
        match self {
            Mode::Extract => Provenance::Extracted,
            Mode::Synthesize => Provenance::Generated,
        }
    }
}

/// A successful generation for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedBatch {
    pub content: BatchContent,
    /// Set when a `Mixed` batch lost one of its two calls.
    pub partial_failure: Option<GenerationFailure>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

pub struct Generator {
    model: Arc<dyn GenerativeModel>,
    policy: RetryPolicy,
    target: TargetYield,
}

impl Generator {
    pub fn new(model: Arc<dyn GenerativeModel>, policy: RetryPolicy, target: TargetYield) -> Self {
        Self {
            model,
            policy,
            target,
        }
    }

    pub async fn generate(
        &self,
        batch: &TextBatch,
        classification: Classification,
    ) -> Result<GeneratedBatch, GenerationFailure> {
        let seq = batch.spec.sequence;
        let tokens = TokenCount::default();

        let result = match classification {
            Classification::ContainsQuestions => self
                .run(batch, Mode::Extract, &tokens)
                .await
                .map(|content| (content, None)),
            Classification::StudyNotes => self
                .run(batch, Mode::Synthesize, &tokens)
                .await
                .map(|content| (content, None)),
            Classification::Mixed => {
                let extracted = self.run(batch, Mode::Extract, &tokens).await;
                let synthesized = self.run(batch, Mode::Synthesize, &tokens).await;
                match (extracted, synthesized) {
                    (Ok(mut e), Ok(s)) => {
                        e.questions.extend(s.questions);
                        e.mnemonics = s.mnemonics;
                        e.key_points = s.key_points;
                        e.key_concepts = s.key_concepts;
                        e.cheat_sheet = s.cheat_sheet;
                        Ok((e, None))
                    }
                    (Ok(e), Err(f)) | (Err(f), Ok(e)) => {
                        warn!("Batch {}: mixed batch kept one half: {}", seq, f);
                        Ok((e, Some(f)))
                    }
                    (Err(_), Err(last)) => Err(last),
                }
            }
        };

        let (content, partial_failure) = result?;
        info!(
            "Batch {}: {} → {} question(s), {} mnemonic(s), {} cheat-sheet entr(ies)",
            seq,
            classification,
            content.questions.len(),
            content.mnemonics.len(),
            content.cheat_sheet.len()
        );
        Ok(GeneratedBatch {
            content,
            partial_failure,
            input_tokens: tokens.input.load(Ordering::Relaxed),
            output_tokens: tokens.output.load(Ordering::Relaxed),
        })
    }

    async fn run(
        &self,
        batch: &TextBatch,
        mode: Mode,
        tokens: &TokenCount,
    ) -> Result<BatchContent, GenerationFailure> {
        let seq = batch.spec.sequence;
        let label = format!("Batch {seq} {mode:?}");
        let source_key = normalize_key(&batch.text);

        let result = run_with_retry(&self.policy, &label, |attempt| {
            let request = match mode {
                Mode::Extract => ModelRequest::text(
                    prompts::extract_system_prompt(attempt.hint),
                    prompts::extract_user_prompt(&batch.text),
                ),
                Mode::Synthesize => ModelRequest::text(
                    prompts::synthesize_system_prompt(attempt.hint),
                    prompts::synthesize_user_prompt(
                        &batch.text,
                        self.target.questions,
                        self.target.mnemonics,
                    ),
                ),
            };
            let source_key = &source_key;
            async move {
                let reply = self
                    .model
                    .generate(request)
                    .await
                    .map_err(|e| e.into_generation_kind())?;
                tokens.add(reply.input_tokens, reply.output_tokens);

                match parse_content(&reply.content, seq, mode.provenance()) {
                    ParseOutcome::Ok(content) => {
                        let candidates = content.questions.len();
                        let content = validate(content, mode, source_key);
                        if !content.is_empty() {
                            Ok(content)
                        } else if mode == Mode::Extract && candidates > 0 {
                            // A stricter prompt will not make paraphrases verbatim.
                            Err(GenerationFailureKind::NoVerbatimQuestions { candidates })
                        } else {
                            Err(GenerationFailureKind::MalformedOutput { raw: reply.content })
                        }
                    }
                    ParseOutcome::ParseError(raw) => {
                        Err(GenerationFailureKind::MalformedOutput { raw })
                    }
                }
            }
        })
        .await;

        result
            .map(|(content, _)| content)
            .map_err(|escalation| GenerationFailure {
                batch: seq,
                attempts: escalation.attempts(),
                kind: escalation.into_error(),
            })
    }
}

#[derive(Default)]
struct TokenCount {
    input: AtomicU64,
    output: AtomicU64,
}

impl TokenCount {
    fn add(&self, input: u64, output: u64) {
        self.input.fetch_add(input, Ordering::Relaxed);
        self.output.fetch_add(output, Ordering::Relaxed);
    }
}

/// Drop ill-formed questions; in extract mode also drop anything that is not
/// a verbatim question from the source.
fn validate(mut content: BatchContent, mode: Mode, source_key: &str) -> BatchContent {
    let before = content.questions.len();
    content.questions = content
        .questions
        .into_iter()
        .map(|q| match mode {
            Mode::Extract => strip_enumeration(q),
            Mode::Synthesize => q,
        })
        .filter(Question::is_well_formed)
        .filter(|q| mode == Mode::Synthesize || source_key.contains(&normalize_key(&q.stem)))
        .collect();

    if mode == Mode::Extract {
        content.mnemonics.clear();
        content.key_points.clear();
        content.key_concepts.clear();
        content.cheat_sheet.clear();
    }

    let dropped = before - content.questions.len();
    if dropped > 0 {
        debug!(
            "Batch {}: dropped {} of {} question(s) in {:?} validation",
            content.batch, dropped, before, mode
        );
    }
    content
}

fn strip_enumeration(mut q: Question) -> Question {
    q.stem = RE_LEADING_ENUMERATION.replace(&q.stem, "").trim().to_string();
    q
}
