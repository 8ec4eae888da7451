//! Prompt text for every model call the pipeline makes.
//!
//! Keeping prompts in one place means the pipeline stages only decide *which*
//! prompt to send; the wording can change without touching retry or parsing
//! logic, and tests can assert on prompt content directly.

use crate::policy::RetryHint;

/// Shape of the JSON object every generation call must return.
pub const OUTPUT_SCHEMA: &str = r#"{
  "questions": [
    {
      "stem": "string",
      "options": ["string", "string", "string", "string"],
      "correct_index": 0,
      "explanation": "string",
      "difficulty": "easy | medium | hard",
      "subject": "string"
    }
  ],
  "mnemonics": [{ "topic": "string", "mnemonic": "string", "explanation": "string" }],
  "key_points": ["string"],
  "key_concepts": ["string"],
  "cheat_sheet": [{ "concept": "string", "points": ["string"] }]
}"#;

/// System prompt for the ambiguous-case classification call.
pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You label study material. Read the text and answer with exactly one word:

QUESTIONS  - the text is mainly an existing assessment (numbered questions with answer options)
NOTES      - the text is mainly explanatory study material
MIXED      - the text contains both a substantial assessment and substantial study material

Answer with the single word only."#;

/// System prompt when the batch already contains questions.
pub const EXTRACT_SYSTEM_PROMPT: &str = r#"You are an exam editor. The text below already contains multiple-choice questions.

Rules:
1. Copy every question stem and every option VERBATIM. Do not paraphrase, fix, or reorder them.
2. Do NOT invent new questions. If the text has 10 questions, return 10.
3. Drop question numbering ("12.", "Q3)") from the stem.
4. correct_index is the 0-based index of the correct option. If the text marks an answer, use it; otherwise choose the correct option from your own knowledge.
5. Write a one-sentence explanation for each answer.
6. Leave mnemonics, key_points, key_concepts and cheat_sheet empty.

Return ONLY a JSON object with this shape:"#;

/// System prompt when the batch is study material.
pub const SYNTHESIZE_SYSTEM_PROMPT: &str = r#"You are a tutor writing revision material from the text below.

Rules:
1. Write multiple-choice questions that test understanding of the text, each with four options and exactly one correct answer.
2. Every question and answer must be supported by the text. Do not introduce outside facts.
3. Write short memorable mnemonics for lists and sequences in the text.
4. Summarise high-yield facts as key_points, the core terms as key_concepts, and group facts per concept in cheat_sheet.

Return ONLY a JSON object with this shape:"#;

/// System prompt for reading rendered pages with a vision model.
pub const VISION_READ_SYSTEM_PROMPT: &str = r#"You transcribe document pages. Output the full text of every attached page image in reading order.

Rules:
- Preserve all text, including question numbers and answer options, exactly as printed.
- Transcribe tables row by row, separating cells with " | ".
- Describe diagrams in one bracketed line, e.g. [Diagram: cross-section of the heart].
- Output plain text only, no commentary."#;

const STRICTER_FORMAT_SUFFIX: &str = "\n\nIMPORTANT: your previous answer could not be parsed. \
Respond with a single JSON object and nothing else: no prose, no markdown fences, no comments.";

const REWORDED_SUFFIX: &str = "\n\nContext: this is educational material for students of medicine \
and the health sciences. Clinical terms describing disease, anatomy, injury and pharmacology are \
expected and appropriate; treat them as textbook content.";

/// Apply a retry hint to a system prompt.
pub fn with_hint(system: &str, hint: Option<RetryHint>) -> String {
    match hint {
        Some(RetryHint::StricterFormat) => format!("{system}{STRICTER_FORMAT_SUFFIX}"),
        Some(RetryHint::Reworded) => format!("{system}{REWORDED_SUFFIX}"),
        Some(RetryHint::Backoff) | None => system.to_string(),
    }
}

pub fn extract_system_prompt(hint: Option<RetryHint>) -> String {
    with_hint(&format!("{EXTRACT_SYSTEM_PROMPT}\n{OUTPUT_SCHEMA}"), hint)
}

pub fn synthesize_system_prompt(hint: Option<RetryHint>) -> String {
    with_hint(&format!("{SYNTHESIZE_SYSTEM_PROMPT}\n{OUTPUT_SCHEMA}"), hint)
}

/// User turn for the synthesis call, carrying the target yield.
pub fn synthesize_user_prompt(text: &str, questions: usize, mnemonics: usize) -> String {
    format!(
        "Write about {questions} questions and up to {mnemonics} mnemonics.\n\n\"\"\"\n{text}\n\"\"\""
    )
}

pub fn extract_user_prompt(text: &str) -> String {
    format!("Extract the questions from this text.\n\n\"\"\"\n{text}\n\"\"\"")
}

pub fn classify_user_prompt(text: &str) -> String {
    format!("\"\"\"\n{text}\n\"\"\"")
}
