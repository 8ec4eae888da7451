//! Structured-output parsing with layered recovery.
//!
//! Models asked for JSON do not always return only JSON. The parse is tried
//! in three layers, stopping at the first that yields an object:
//!
//! 1. the whole reply as strict JSON;
//! 2. the body of a fenced ```` ```json ```` block;
//! 3. the first balanced `{ … }` block found in surrounding prose.
//!
//! If none parses, the raw reply comes back as [`ParseOutcome::ParseError`]
//! so the caller can re-ask with a stricter format instruction.
//!
//! Individual items that do not match the schema (a question without options,
//! a mnemonic without a topic) are skipped without failing the whole reply.

use crate::model::{BatchContent, CheatSheetEntry, Difficulty, Mnemonic, Provenance, Question};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Result of parsing one model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Ok(BatchContent),
    /// No layer produced a JSON object; carries the raw reply.
    ParseError(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawContent {
    questions: Vec<Value>,
    mnemonics: Vec<Value>,
    key_points: Vec<Value>,
    key_concepts: Vec<Value>,
    cheat_sheet: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(alias = "question")]
    stem: String,
    #[serde(alias = "choices")]
    options: Vec<String>,
    #[serde(default, alias = "answer_index", alias = "answer")]
    correct_index: Value,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    subject: String,
}

#[derive(Debug, Deserialize)]
struct RawMnemonic {
    topic: String,
    mnemonic: String,
    #[serde(default)]
    explanation: String,
}

#[derive(Debug, Deserialize)]
struct RawCheatSheetEntry {
    concept: String,
    #[serde(default)]
    points: Vec<String>,
}

/// Parse a model reply into a [`BatchContent`], tagging every question with
/// `provenance`.
pub fn parse_content(raw: &str, batch: usize, provenance: Provenance) -> ParseOutcome {
    let Some(parsed) = locate_object(raw) else {
        debug!("Batch {}: no JSON object in {} byte reply", batch, raw.len());
        return ParseOutcome::ParseError(raw.to_string());
    };

    let mut skipped = 0usize;
    let mut keep = |ok: bool| {
        if !ok {
            skipped += 1;
        }
        ok
    };

    let questions: Vec<Question> = parsed
        .questions
        .into_iter()
        .filter_map(|v| {
            let q = serde_json::from_value::<RawQuestion>(v).ok();
            keep(q.is_some());
            q
        })
        .map(|q| Question {
            correct_index: answer_index(&q.correct_index, &q.options).unwrap_or(usize::MAX),
            stem: q.stem.trim().to_string(),
            options: q.options.into_iter().map(|o| o.trim().to_string()).collect(),
            explanation: q.explanation.trim().to_string(),
            difficulty: difficulty(q.difficulty.as_deref()),
            subject: q.subject.trim().to_string(),
            provenance,
        })
        .collect();

    let mnemonics: Vec<Mnemonic> = parsed
        .mnemonics
        .into_iter()
        .filter_map(|v| {
            let m = serde_json::from_value::<RawMnemonic>(v).ok();
            keep(m.is_some());
            m
        })
        .map(|m| Mnemonic {
            topic: m.topic.trim().to_string(),
            mnemonic: m.mnemonic.trim().to_string(),
            explanation: m.explanation.trim().to_string(),
        })
        .collect();

    let cheat_sheet: Vec<CheatSheetEntry> = parsed
        .cheat_sheet
        .into_iter()
        .filter_map(|v| {
            let c = serde_json::from_value::<RawCheatSheetEntry>(v).ok();
            keep(c.is_some());
            c
        })
        .map(|c| CheatSheetEntry {
            concept: c.concept.trim().to_string(),
            points: c.points.into_iter().map(|p| p.trim().to_string()).collect(),
        })
        .collect();

    let key_points = strings(parsed.key_points, &mut keep);
    let key_concepts = strings(parsed.key_concepts, &mut keep);

    if skipped > 0 {
        warn!("Batch {}: skipped {} item(s) not matching the schema", batch, skipped);
    }

    ParseOutcome::Ok(BatchContent {
        batch,
        questions,
        mnemonics,
        key_points,
        key_concepts,
        cheat_sheet,
    })
}

fn strings(values: Vec<Value>, keep: &mut impl FnMut(bool) -> bool) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => {
                keep(false);
                None
            }
        })
        .collect()
}

/// Accepts `2`, `"2"`, `"C"`, or the text of the correct option.
fn answer_index(value: &Value, options: &[String]) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<usize>() {
                return Some(n);
            }
            let mut chars = s.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                if c.is_ascii_alphabetic() {
                    return Some((c.to_ascii_uppercase() as u8 - b'A') as usize);
                }
            }
            options.iter().position(|o| o.trim().eq_ignore_ascii_case(s))
        }
        _ => None,
    }
}

fn difficulty(value: Option<&str>) -> Difficulty {
    match value.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("easy") => Difficulty::Easy,
        Some("hard") => Difficulty::Hard,
        _ => Difficulty::Medium,
    }
}

// ── Layers ───────────────────────────────────────────────────────────────

static RE_FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n(.*?)\n?```").unwrap());

fn locate_object(raw: &str) -> Option<RawContent> {
    let trimmed = raw.trim();
    if let Some(c) = parse_object(trimmed) {
        return Some(c);
    }
    for caps in RE_FENCED_JSON.captures_iter(trimmed) {
        if let Some(c) = parse_object(caps[1].trim()) {
            debug!("Recovered JSON from fenced block");
            return Some(c);
        }
    }
    let block = first_balanced_object(trimmed)?;
    let c = parse_object(block)?;
    debug!("Recovered JSON object embedded in prose");
    Some(c)
}

fn parse_object(text: &str) -> Option<RawContent> {
    match serde_json::from_str::<Value>(text) {
        Ok(v @ Value::Object(_)) => serde_json::from_value(v).ok(),
        _ => None,
    }
}

/// The first `{ … }` span whose braces balance, ignoring braces in strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
