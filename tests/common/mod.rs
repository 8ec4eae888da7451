//! Scripted in-process collaborators for session tests: a generative model
//! that answers by prompt kind, a fixed-text OCR engine and a document whose
//! pages are plain strings. Nothing here touches the network or pdfium.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_study::pipeline::llm::{GenerativeModel, ModelError, ModelReply, ModelRequest};
use edgequake_study::prompts;
use edgequake_study::{
    ExtractionReason, MemoryStore, OcrEngine, PipelineConfig, PipelineConfigBuilder,
    ProgressState, SessionId, SessionRegistry, SourceDocument,
};
use edgequake_study::model::PageRange;
use image::{DynamicImage, Rgba, RgbaImage};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Model ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Vision,
    Classify,
    Extract,
    Synthesize,
}

pub fn kind_of(request: &ModelRequest) -> CallKind {
    if request.system.starts_with(prompts::VISION_READ_SYSTEM_PROMPT) {
        CallKind::Vision
    } else if request.system.starts_with(prompts::CLASSIFY_SYSTEM_PROMPT) {
        CallKind::Classify
    } else if request.system.starts_with(prompts::EXTRACT_SYSTEM_PROMPT) {
        CallKind::Extract
    } else {
        CallKind::Synthesize
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    /// 0-based index among calls of the same kind.
    pub nth: usize,
    pub system: String,
    pub user: String,
    pub images: usize,
}

type Behavior = dyn Fn(&Call) -> Result<String, ModelError> + Send + Sync;

/// Answers each call with `behavior`, recording every call it receives.
pub struct ScriptedModel {
    behavior: Box<Behavior>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedModel {
    pub fn new(behavior: impl Fn(&Call) -> Result<String, ModelError> + Send + Sync + 'static) -> Arc<Self> {
        Self::with_delay(Duration::ZERO, behavior)
    }

    pub fn with_delay(
        delay: Duration,
        behavior: impl Fn(&Call) -> Result<String, ModelError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            behavior: Box::new(behavior),
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every call answered the way a well-behaved model would.
    pub fn cooperative() -> Arc<Self> {
        Self::new(default_reply)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.kind == kind).count()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let kind = kind_of(&request);
            let call = Call {
                kind,
                nth: calls.iter().filter(|c| c.kind == kind).count(),
                system: request.system.clone(),
                user: request.user.clone(),
                images: request.images.len(),
            };
            calls.push(call.clone());
            call
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.behavior)(&call).map(|content| ModelReply {
            content,
            input_tokens: 100,
            output_tokens: 50,
        })
    }
}

/// The text a generation or classification call was asked about.
pub fn source_text(user: &str) -> &str {
    let start = user.find("\"\"\"\n").map(|i| i + 4).unwrap_or(0);
    let end = user.rfind("\n\"\"\"").filter(|&e| e >= start).unwrap_or(user.len());
    &user[start..end]
}

pub fn default_reply(call: &Call) -> Result<String, ModelError> {
    Ok(match call.kind {
        CallKind::Vision => vision_transcript(call.nth, call.images),
        CallKind::Classify => "NOTES".to_string(),
        CallKind::Extract => extract_json(source_text(&call.user)),
        CallKind::Synthesize => synthesize_json(source_text(&call.user)),
    })
}

/// A readable transcript, one paragraph per page image.
pub fn vision_transcript(nth: usize, images: usize) -> String {
    (0..images)
        .map(|i| {
            format!(
                "Vision transcript {nth} page {i}: the cardiac cycle alternates between systole and diastole phases."
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn first_sentence(paragraph: &str) -> String {
    let line = paragraph.lines().next().unwrap_or("").trim();
    line.split_inclusive('.').next().unwrap_or(line).trim().to_string()
}

/// One question, one mnemonic and one cheat-sheet point per paragraph.
pub fn synthesize_json(text: &str) -> String {
    let paragraphs: Vec<String> = text
        .split("\n\n")
        .map(first_sentence)
        .filter(|s| !s.is_empty())
        .collect();
    let questions: Vec<_> = paragraphs
        .iter()
        .map(|p| {
            json!({
                "stem": format!("Which statement is supported by the notes: \"{p}\"?"),
                "options": ["It is stated in the notes", "It contradicts the notes", "It is unrelated", "None of these"],
                "correct_index": 0,
                "explanation": p,
                "difficulty": "medium",
                "subject": "Physiology"
            })
        })
        .collect();
    let mnemonics: Vec<_> = paragraphs
        .iter()
        .map(|p| {
            let acronym: String = p
                .split_whitespace()
                .filter_map(|w| w.chars().next())
                .filter(|c| c.is_alphanumeric())
                .collect();
            json!({ "topic": p, "mnemonic": acronym, "explanation": "First letters" })
        })
        .collect();
    json!({
        "questions": questions,
        "mnemonics": mnemonics,
        "key_points": paragraphs,
        "key_concepts": ["Cardiac cycle"],
        "cheat_sheet": [{ "concept": "Notes", "points": paragraphs }]
    })
    .to_string()
}

/// Every numbered stem with its lettered options, stems copied as-is.
pub fn extract_json(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let mut questions = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let numbered = line.split_once(". ").map(|(n, _)| n.chars().all(|c| c.is_ascii_digit())).unwrap_or(false);
        if numbered {
            let options: Vec<String> = lines[i + 1..]
                .iter()
                .take_while(|l| l.len() > 3 && l.as_bytes()[1] == b')')
                .map(|l| l[3..].to_string())
                .collect();
            i += 1 + options.len();
            questions.push(json!({
                "stem": line,
                "options": options,
                "correct_index": 0,
                "explanation": "As marked in the paper.",
                "difficulty": "medium",
                "subject": "Cardiology"
            }));
            continue;
        }
        i += 1;
    }
    json!({ "questions": questions }).to_string()
}

// ── OCR ──────────────────────────────────────────────────────────────────

/// Recognises every image as the same paragraph.
pub struct FixedOcr {
    pub calls: AtomicUsize,
}

impl FixedOcr {
    pub const TEXT: &'static str =
        "Scanned notes: the tricuspid valve separates the right atrium from the right ventricle.";

    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FixedOcr {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn recognize(&self, _png: &[u8]) -> Result<String, ExtractionReason> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::TEXT.to_string())
    }
}

// ── Documents ────────────────────────────────────────────────────────────

/// A document whose text layer is `pages`; rendering yields blank images.
pub struct TextDocument {
    pub name: String,
    pub pages: Vec<String>,
}

impl TextDocument {
    pub fn new(name: &str, pages: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            pages,
        })
    }

    /// `count` pages of distinct prose.
    pub fn notes(name: &str, count: usize) -> Arc<Self> {
        Self::new(
            name,
            (1..=count)
                .map(|n| {
                    format!(
                        "Page {n}: the heart chamber described on page {n} receives blood from the previous chamber."
                    )
                })
                .collect(),
        )
    }
}

#[async_trait]
impl SourceDocument for TextDocument {
    fn name(&self) -> &str {
        &self.name
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn text_layer(&self, pages: PageRange) -> Result<Vec<String>, ExtractionReason> {
        Ok(pages.indices().map(|i| self.pages[i].clone()).collect())
    }

    async fn render(&self, pages: PageRange, _max_pixels: u32) -> Result<Vec<DynamicImage>, ExtractionReason> {
        Ok(pages
            .indices()
            .map(|_| DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]))))
            .collect())
    }
}

// ── Registry helpers ─────────────────────────────────────────────────────

/// Builder with fast retries, suitable for tests.
pub fn test_config() -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .retry_backoff_ms(1)
        .max_retries(2)
        .api_timeout_secs(5)
}

pub fn registry(config: PipelineConfig, model: Arc<ScriptedModel>, ocr: Arc<FixedOcr>) -> SessionRegistry {
    SessionRegistry::with_components(config, model, ocr, Arc::new(MemoryStore::new()))
}

/// Poll until the session reaches a terminal state.
pub async fn wait_terminal(registry: &SessionRegistry, id: SessionId) -> ProgressState {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let state = registry.progress(id).await.unwrap();
            if state.step.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session did not reach a terminal state in time")
}
