//! Classification: is a batch an assessment, study notes, or both?
//!
//! A line-based heuristic settles the common cases for free: numbered stems
//! followed by lettered options mean questions, paragraphs without question
//! structure mean notes. Only when neither side dominates is one short model
//! call made. If that call fails the batch is treated as study notes and the
//! failure is recorded; classification never blocks the pipeline.

use crate::error::{ClassificationFailure, GenerationFailureKind};
use crate::model::Classification;
use crate::pipeline::llm::{GenerativeModel, ModelRequest};
use crate::policy::{run_with_retry, RetryPolicy};
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Question-structured share of lines at or above which a batch is an assessment.
const QUESTIONS_DOMINATE: f32 = 0.8;
/// Share at or below which a batch with no option blocks is plain notes.
const NOTES_DOMINATE: f32 = 0.1;
/// Shortest line, in words, counted as prose.
const PROSE_MIN_WORDS: usize = 6;
/// Longest classification input sent to the model, in characters.
const MODEL_SAMPLE_CHARS: usize = 6000;

static RE_STEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:Q|Question)\s*)?\d{1,3}\s*[.):]\s+\S").unwrap()
});

static RE_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\(?[A-Ea-e][.)]|\([A-Ea-e]\))\s+\S").unwrap());

/// How a classification was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyTier {
    Heuristic,
    Model,
    /// The model call failed; `StudyNotes` was assumed.
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyOutcome {
    pub classification: Classification,
    pub tier: ClassifyTier,
    pub failure: Option<ClassificationFailure>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Line counts the heuristic decides on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineSignals {
    /// Stems immediately followed by at least two option lines.
    pub option_blocks: usize,
    /// Stem, option and `?`-terminated lines.
    pub question_lines: usize,
    pub prose_lines: usize,
}

impl LineSignals {
    pub fn scan(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let mut signals = LineSignals::default();

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            let is_stem = RE_STEM.is_match(line) || line.ends_with('?');
            if is_stem {
                signals.question_lines += 1;
                let options = lines[i + 1..]
                    .iter()
                    .take_while(|l| RE_OPTION.is_match(l))
                    .count();
                if options >= 2 {
                    signals.option_blocks += 1;
                }
                signals.question_lines += options;
                i += 1 + options;
                continue;
            }
            if RE_OPTION.is_match(line) {
                signals.question_lines += 1;
            } else if line.split_whitespace().count() >= PROSE_MIN_WORDS {
                signals.prose_lines += 1;
            }
            i += 1;
        }
        signals
    }

    fn question_share(&self) -> f32 {
        let counted = self.question_lines + self.prose_lines;
        if counted == 0 {
            0.0
        } else {
            self.question_lines as f32 / counted as f32
        }
    }
}

/// The free tier. `None` means ambiguous.
pub fn heuristic(text: &str) -> Option<Classification> {
    let signals = LineSignals::scan(text);
    let share = signals.question_share();
    debug!("Classification signals: {:?}, question share {:.2}", signals, share);

    if signals.option_blocks >= 2 && share >= QUESTIONS_DOMINATE {
        Some(Classification::ContainsQuestions)
    } else if signals.option_blocks == 0 && share <= NOTES_DOMINATE {
        Some(Classification::StudyNotes)
    } else {
        None
    }
}

/// Map the model's one-word answer onto a classification.
pub fn parse_label(reply: &str) -> Option<Classification> {
    let upper = reply.to_ascii_uppercase();
    if upper.contains("MIXED") {
        Some(Classification::Mixed)
    } else if upper.contains("QUESTION") {
        Some(Classification::ContainsQuestions)
    } else if upper.contains("NOTES") {
        Some(Classification::StudyNotes)
    } else {
        None
    }
}

/// Classify a batch's text, escalating to one model call when ambiguous.
pub async fn classify(
    text: &str,
    batch: usize,
    model: &dyn GenerativeModel,
    policy: &RetryPolicy,
) -> ClassifyOutcome {
    if let Some(classification) = heuristic(text) {
        debug!("Batch {}: classified as {} by heuristic", batch, classification);
        return ClassifyOutcome {
            classification,
            tier: ClassifyTier::Heuristic,
            failure: None,
            input_tokens: 0,
            output_tokens: 0,
        };
    }

    let sample: String = text.chars().take(MODEL_SAMPLE_CHARS).collect();
    let single_call = RetryPolicy {
        max_attempts: 1,
        ..*policy
    };
    let label = format!("Batch {batch} classification");
    let result = run_with_retry(&single_call, &label, |_| {
        let request = ModelRequest::text(
            prompts::CLASSIFY_SYSTEM_PROMPT,
            prompts::classify_user_prompt(&sample),
        );
        async move {
            model
                .generate(request)
                .await
                .map_err(|e| e.into_generation_kind())
        }
    })
    .await;

    let (detail, input_tokens, output_tokens) = match result {
        Ok((reply, _)) => match parse_label(&reply.content) {
            Some(classification) => {
                debug!("Batch {}: classified as {} by model", batch, classification);
                return ClassifyOutcome {
                    classification,
                    tier: ClassifyTier::Model,
                    failure: None,
                    input_tokens: reply.input_tokens,
                    output_tokens: reply.output_tokens,
                };
            }
            None => (
                format!("unrecognised label {:?}", reply.content.trim()),
                reply.input_tokens,
                reply.output_tokens,
            ),
        },
        Err(escalation) => {
            let kind: &GenerationFailureKind = escalation.error();
            (kind.to_string(), 0, 0)
        }
    };

    let failure = ClassificationFailure { batch, detail };
    warn!("{}", failure);
    ClassifyOutcome {
        classification: Classification::StudyNotes,
        tier: ClassifyTier::Default,
        failure: Some(failure),
        input_tokens,
        output_tokens,
    }
}
