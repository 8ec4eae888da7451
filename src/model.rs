//! Data model shared by every pipeline stage.
//!
//! Everything here is plain data: serialisable, comparable, and free of I/O.
//! Stages hand these values to each other by move; nothing is shared mutably.

use crate::error::BatchError;
use crate::progress::ProgressStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ── Sessions ─────────────────────────────────────────────────────────────

/// Identifier of one processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

/// What kind of input the session was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    FileSet,
    RawText,
}

/// One processing run, as recorded when the request is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub owner: String,
    /// Human-readable name; mock test names derive from it.
    pub name: String,
    pub input_kind: InputKind,
    /// Names of the source documents (empty for raw-text sessions).
    pub sources: Vec<String>,
    /// Lifecycle state. Reads through the registry reflect the latest progress.
    pub state: ProgressStep,
    pub created_at: DateTime<Utc>,
}

// ── Batches ──────────────────────────────────────────────────────────────

/// How text is pulled out of a batch's pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStrategy {
    /// Embedded text layer. Cheapest, useless for scans.
    Direct,
    /// Render pages and run optical character recognition.
    Ocr,
    /// Send page images to a vision-capable model. (default)
    #[default]
    Vision,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionStrategy::Direct => "direct",
            ExtractionStrategy::Ocr => "ocr",
            ExtractionStrategy::Vision => "vision",
        })
    }
}

impl std::str::FromStr for ExtractionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "text" => Ok(ExtractionStrategy::Direct),
            "ocr" => Ok(ExtractionStrategy::Ocr),
            "vision" | "vlm" => Ok(ExtractionStrategy::Vision),
            other => Err(format!("unknown extraction strategy '{other}'")),
        }
    }
}

/// Contiguous, inclusive, 1-indexed page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start >= 1 && start <= end);
        Self { start, end }
    }

    pub fn page_count(&self) -> usize {
        self.end + 1 - self.start
    }

    /// 0-indexed page indices covered by the range.
    pub fn indices(&self) -> std::ops::Range<usize> {
        (self.start - 1)..self.end
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "page {}", self.start)
        } else {
            write!(f, "pages {}–{}", self.start, self.end)
        }
    }
}

/// The slice of input a batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSpan {
    Pages(PageRange),
    /// Whole text input, or a document reporting zero pages.
    WholeInput,
}

impl fmt::Display for BatchSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchSpan::Pages(r) => r.fmt(f),
            BatchSpan::WholeInput => f.write_str("whole input"),
        }
    }
}

/// A unit of work as produced by the segmenter, before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSpec {
    /// Contiguous from 1 across the whole session.
    pub sequence: usize,
    /// Index of the source document within the session input.
    pub document: usize,
    pub span: BatchSpan,
}

/// A batch with its extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBatch {
    pub spec: BatchSpec,
    pub text: String,
    /// Strategy that actually produced `text` (after any fallback).
    pub strategy: ExtractionStrategy,
}

/// What kind of material a batch's text is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Already an assessment: extract, don't invent.
    ContainsQuestions,
    /// Raw study material: synthesise.
    StudyNotes,
    /// Both; extraction and synthesis run side by side.
    Mixed,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::ContainsQuestions => "contains-questions",
            Classification::StudyNotes => "study-notes",
            Classification::Mixed => "mixed",
        })
    }
}

// ── Study artifacts ──────────────────────────────────────────────────────

/// Whether a question was lifted from the source or written by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Extracted,
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// A multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub stem: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub subject: String,
    pub provenance: Provenance,
}

impl Question {
    /// Non-empty stem, at least two options, and an answer that indexes into them.
    pub fn is_well_formed(&self) -> bool {
        !self.stem.trim().is_empty()
            && self.options.len() >= 2
            && self.correct_index < self.options.len()
    }

    pub fn correct_option(&self) -> Option<&str> {
        self.options.get(self.correct_index).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mnemonic {
    pub topic: String,
    pub mnemonic: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheatSheetEntry {
    pub concept: String,
    pub points: Vec<String>,
}

/// Generator output for one batch. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchContent {
    pub batch: usize,
    pub questions: Vec<Question>,
    pub mnemonics: Vec<Mnemonic>,
    pub key_points: Vec<String>,
    pub key_concepts: Vec<String>,
    pub cheat_sheet: Vec<CheatSheetEntry>,
}

impl BatchContent {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
            && self.mnemonics.is_empty()
            && self.key_points.is_empty()
            && self.cheat_sheet.is_empty()
    }
}

/// The single compiled study note of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    pub summary: String,
    pub questions: Vec<Question>,
    pub mnemonics: Vec<Mnemonic>,
    pub cheat_sheet: Vec<CheatSheetEntry>,
}

impl Note {
    /// Render the note as Markdown: summary, questions, mnemonics, cheat sheet.
    pub fn to_markdown(&self) -> String {
        let mut md = format!("# {}\n\n{}\n", self.title, self.summary);

        if !self.questions.is_empty() {
            md.push_str("\n## Practice questions\n");
            for (i, q) in self.questions.iter().enumerate() {
                md.push_str(&format!("\n{}. {}\n", i + 1, q.stem));
                for (j, opt) in q.options.iter().enumerate() {
                    md.push_str(&format!("   {}. {}\n", option_label(j), opt));
                }
                md.push_str(&format!(
                    "\n   **Answer:** {}",
                    option_label(q.correct_index)
                ));
                if !q.explanation.is_empty() {
                    md.push_str(&format!(": {}", q.explanation));
                }
                md.push('\n');
            }
        }

        if !self.mnemonics.is_empty() {
            md.push_str("\n## Mnemonics\n\n");
            for m in &self.mnemonics {
                md.push_str(&format!("- **{}**: {}", m.topic, m.mnemonic));
                if !m.explanation.is_empty() {
                    md.push_str(&format!(" ({})", m.explanation));
                }
                md.push('\n');
            }
        }

        if !self.cheat_sheet.is_empty() {
            md.push_str("\n## Cheat sheet\n");
            for entry in &self.cheat_sheet {
                md.push_str(&format!("\n### {}\n\n", entry.concept));
                for p in &entry.points {
                    md.push_str(&format!("- {p}\n"));
                }
            }
        }

        md
    }
}

fn option_label(index: usize) -> char {
    (b'A' + (index % 26) as u8) as char
}

/// A timed assessment assembled from aggregated questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockTest {
    pub name: String,
    /// Indices into [`StudyResults::questions`].
    pub question_refs: Vec<usize>,
    pub duration_minutes: u32,
}

// ── Results ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Everything a session produced. Partial sessions return what succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyResults {
    pub session_id: SessionId,
    pub questions: Vec<Question>,
    pub mnemonics: Vec<Mnemonic>,
    pub cheat_sheet: Vec<CheatSheetEntry>,
    pub note: Option<Note>,
    pub mock_tests: Vec<MockTest>,
    /// At least one batch failed or was cancelled.
    pub partial: bool,
    pub stats: BatchStats,
    /// Informational events such as extraction fallbacks.
    pub notices: Vec<String>,
    pub failures: Vec<BatchError>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl StudyResults {
    /// The result set of a session that produced nothing.
    pub fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            questions: Vec::new(),
            mnemonics: Vec::new(),
            cheat_sheet: Vec::new(),
            note: None,
            mock_tests: Vec::new(),
            partial: false,
            stats: BatchStats::default(),
            notices: Vec::new(),
            failures: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty() && self.mnemonics.is_empty() && self.cheat_sheet.is_empty()
    }
}
