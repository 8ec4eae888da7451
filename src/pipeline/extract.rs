//! Extraction: turn a batch's pages into plain text.
//!
//! Three strategies, cheapest first:
//!
//! | strategy | how                                       | weak spot            |
//! |----------|-------------------------------------------|----------------------|
//! | direct   | embedded text layer                       | scans have none      |
//! | ocr      | render → PNG → OCR engine                 | diagrams, tables     |
//! | vision   | render → base64 PNG → one vision-model call | cost, availability |
//!
//! Each tier runs under the retry policy. When a tier fails for good the
//! next one from [`fallback_tier`] is tried; only when every tier is spent
//! does the batch fail with an [`ExtractionFailure`].

use crate::error::{ExtractionFailure, ExtractionReason};
use crate::model::{BatchSpan, BatchSpec, ExtractionStrategy, PageRange, TextBatch};
use crate::pipeline::document::SourceDocument;
use crate::pipeline::encode;
use crate::pipeline::llm::{GenerativeModel, ModelRequest};
use crate::policy::{fallback_tier, run_with_retry, RetryPolicy};
use crate::prompts;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

// ── OCR engine ───────────────────────────────────────────────────────────

/// Optical character recognition over one PNG page image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, png: &[u8]) -> Result<String, ExtractionReason>;
}

/// Runs the `tesseract` CLI: `tesseract <png> stdout -l <lang>`.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    command: String,
    language: String,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        &self.command
    }

    async fn recognize(&self, png: &[u8]) -> Result<String, ExtractionReason> {
        // Removed when `file` drops.
        let file = tempfile::Builder::new()
            .prefix("study-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| ExtractionReason::ServiceUnavailable {
                detail: format!("temp file: {e}"),
            })?
            .into_temp_path();
        tokio::fs::write(&file, png)
            .await
            .map_err(|e| ExtractionReason::ServiceUnavailable {
                detail: format!("temp file: {e}"),
            })?;

        let output = Command::new(&self.command)
            .arg(file.as_os_str())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractionReason::ServiceUnavailable {
                detail: format!("cannot run '{}': {e}", self.command),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionReason::Rendering {
                detail: format!("{} exited with {}: {}", self.command, output.status, stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// The failure to report once every tier is spent. A refusal in an earlier
/// tier (bad credentials, prohibited content) explains the batch better than
/// whatever the last tier then ran into.
fn root_cause(last: ExtractionFailure, failed_tiers: Vec<ExtractionFailure>) -> ExtractionFailure {
    if last.reason.is_refusal() {
        return last;
    }
    match failed_tiers.into_iter().find(|f| f.reason.is_refusal()) {
        Some(refusal) => {
            warn!(
                "Batch {}: {} extraction also failed ({}); reporting the earlier {} failure",
                last.batch, last.strategy, last.reason, refusal.strategy
            );
            refusal
        }
        None => last,
    }
}

// ── Text cleanup ─────────────────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Deterministic cleanup applied to every extracted text: LF line endings,
/// no invisible Unicode, no trailing whitespace, at most one blank line.
pub fn clean_text(input: &str) -> String {
    let s = input.replace("\r\n", "\n").replace('\r', "\n");
    let s = s.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    );
    let s = s.lines().map(str::trim_end).collect::<Vec<_>>().join("\n");
    RE_BLANK_LINES.replace_all(s.trim(), "\n\n").into_owned()
}

pub fn non_whitespace_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

// ── Extractor ────────────────────────────────────────────────────────────

/// A batch whose text was extracted, possibly after falling back.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBatch {
    pub batch: TextBatch,
    /// Tiers that failed before the one that produced `batch.text`.
    pub failed_tiers: Vec<ExtractionFailure>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

struct Attempted {
    text: String,
    input_tokens: u64,
    output_tokens: u64,
}

pub struct Extractor {
    ocr: Arc<dyn OcrEngine>,
    vision: Arc<dyn GenerativeModel>,
    policy: RetryPolicy,
    min_chars_per_page: usize,
    max_pixels: u32,
}

impl Extractor {
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        vision: Arc<dyn GenerativeModel>,
        policy: RetryPolicy,
        min_chars_per_page: usize,
        max_pixels: u32,
    ) -> Self {
        Self {
            ocr,
            vision,
            policy,
            min_chars_per_page,
            max_pixels,
        }
    }

    /// Extract with `strategy`, walking the fallback tiers on terminal failure.
    ///
    /// `on_fallback` is called each time a tier is abandoned, with the failure
    /// and the strategy about to be tried.
    pub async fn extract_with_fallback(
        &self,
        document: &dyn SourceDocument,
        spec: BatchSpec,
        strategy: ExtractionStrategy,
        mut on_fallback: impl FnMut(&ExtractionFailure, ExtractionStrategy),
    ) -> Result<ExtractedBatch, ExtractionFailure> {
        let mut strategy = strategy;
        let mut failed_tiers = Vec::new();

        loop {
            match self.extract(document, spec, strategy).await {
                Ok(attempted) => {
                    return Ok(ExtractedBatch {
                        batch: TextBatch {
                            spec,
                            text: attempted.text,
                            strategy,
                        },
                        failed_tiers,
                        input_tokens: attempted.input_tokens,
                        output_tokens: attempted.output_tokens,
                    });
                }
                Err(failure) => match fallback_tier(strategy, &failure.reason) {
                    Some(next) => {
                        info!(
                            "Batch {}: {} extraction failed ({}), falling back to {}",
                            spec.sequence, strategy, failure.reason, next
                        );
                        on_fallback(&failure, next);
                        failed_tiers.push(failure);
                        strategy = next;
                    }
                    None => return Err(root_cause(failure, failed_tiers)),
                },
            }
        }
    }

    /// One tier, retried per the policy.
    async fn extract(
        &self,
        document: &dyn SourceDocument,
        spec: BatchSpec,
        strategy: ExtractionStrategy,
    ) -> Result<Attempted, ExtractionFailure> {
        let failure = |reason| ExtractionFailure {
            batch: spec.sequence,
            strategy,
            reason,
        };

        let range = match spec.span {
            BatchSpan::Pages(range) if document.page_count() > 0 => range,
            _ => {
                warn!("Batch {}: '{}' has no pages", spec.sequence, document.name());
                return Err(failure(ExtractionReason::EmptyInput));
            }
        };

        let label = format!("Batch {} {} extraction", spec.sequence, strategy);
        run_with_retry(&self.policy, &label, |_| self.attempt(document, range, strategy))
            .await
            .map(|(attempted, _)| attempted)
            .map_err(|escalation| failure(escalation.into_error()))
    }

    async fn attempt(
        &self,
        document: &dyn SourceDocument,
        range: PageRange,
        strategy: ExtractionStrategy,
    ) -> Result<Attempted, ExtractionReason> {
        let (raw, input_tokens, output_tokens) = match strategy {
            ExtractionStrategy::Direct => (document.text_layer(range).await?.join("\n\n"), 0, 0),
            ExtractionStrategy::Ocr => (self.ocr_pages(document, range).await?, 0, 0),
            ExtractionStrategy::Vision => self.vision_pages(document, range).await?,
        };

        let text = clean_text(&raw);
        let chars = non_whitespace_chars(&text);
        let min = self.min_chars_per_page * range.page_count();
        if chars < min {
            return Err(ExtractionReason::RecognitionEmpty { chars, min });
        }
        debug!("{} of {}: {} characters", strategy, range, chars);
        Ok(Attempted {
            text,
            input_tokens,
            output_tokens,
        })
    }

    async fn ocr_pages(
        &self,
        document: &dyn SourceDocument,
        range: PageRange,
    ) -> Result<String, ExtractionReason> {
        let images = document.render(range, self.max_pixels).await?;
        let mut pages = Vec::with_capacity(images.len());
        for image in &images {
            let png = encode::encode_png(image).map_err(|e| ExtractionReason::Rendering {
                detail: format!("PNG encoding: {e}"),
            })?;
            pages.push(self.ocr.recognize(&png).await?);
        }
        Ok(pages.join("\n\n"))
    }

    async fn vision_pages(
        &self,
        document: &dyn SourceDocument,
        range: PageRange,
    ) -> Result<(String, u64, u64), ExtractionReason> {
        let images = document
            .render(range, self.max_pixels)
            .await?
            .iter()
            .map(encode::encode_page)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ExtractionReason::Rendering {
                detail: format!("PNG encoding: {e}"),
            })?;

        let request = ModelRequest::text(
            prompts::VISION_READ_SYSTEM_PROMPT,
            format!("Transcribe the {} attached page image(s).", images.len()),
        )
        .with_images(images);

        let reply = self
            .vision
            .generate(request)
            .await
            .map_err(|e| e.into_extraction_reason())?;
        Ok((reply.content, reply.input_tokens, reply.output_tokens))
    }
}
