//! Source documents: page count, text layer and rasterised pages.
//!
//! [`SourceDocument`] is the seam between the pipeline and whatever holds the
//! pages. [`PdfDocument`] is the pdfium-backed implementation; tests and
//! embedders can supply their own.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering.
//! Every call is moved onto Tokio's blocking pool so the async workers that
//! drive model calls never stall behind a page render.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly. `max_pixels` bounds the longest edge regardless
//! of physical size, which keeps memory flat and matches the resolution
//! vision models and tesseract both handle well.

use crate::error::{ExtractionReason, StudyError};
use crate::model::PageRange;
use crate::pipeline::input::{self, LoadedInput};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Anything the pipeline can pull pages out of.
#[async_trait]
pub trait SourceDocument: Send + Sync {
    fn name(&self) -> &str;

    fn page_count(&self) -> usize;

    /// Embedded text of each page in `pages`, in order. Pages without a text
    /// layer yield an empty string.
    async fn text_layer(&self, pages: PageRange) -> Result<Vec<String>, ExtractionReason>;

    /// Rasterise each page in `pages`, longest edge capped at `max_pixels`.
    async fn render(
        &self,
        pages: PageRange,
        max_pixels: u32,
    ) -> Result<Vec<DynamicImage>, ExtractionReason>;
}

/// A PDF held in memory and opened through pdfium on demand.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    name: String,
    bytes: Arc<Vec<u8>>,
    password: Option<String>,
    page_count: usize,
}

impl PdfDocument {
    /// Resolve a path or URL and open it.
    pub async fn open(
        input: &str,
        password: Option<String>,
        download_timeout_secs: u64,
    ) -> Result<Self, StudyError> {
        let LoadedInput { name, bytes } = input::resolve_input(input, download_timeout_secs).await?;
        Self::from_bytes(name, bytes, password).await
    }

    /// Open a PDF from raw bytes, failing fast on corrupt or locked files.
    pub async fn from_bytes(
        name: impl Into<String>,
        bytes: Vec<u8>,
        password: Option<String>,
    ) -> Result<Self, StudyError> {
        let name = name.into();
        input::check_magic(&name, &bytes)?;
        let bytes = Arc::new(bytes);

        let (n, b, p) = (name.clone(), Arc::clone(&bytes), password.clone());
        let page_count = tokio::task::spawn_blocking(move || count_pages_blocking(&n, &b, p.as_deref()))
            .await
            .map_err(|e| StudyError::Internal(format!("PDF open task panicked: {e}")))??;

        info!("PDF '{}' loaded: {} pages", name, page_count);
        Ok(Self {
            name,
            bytes,
            password,
            page_count,
        })
    }
}

#[async_trait]
impl SourceDocument for PdfDocument {
    fn name(&self) -> &str {
        &self.name
    }

    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn text_layer(&self, pages: PageRange) -> Result<Vec<String>, ExtractionReason> {
        let bytes = Arc::clone(&self.bytes);
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || text_layer_blocking(&bytes, password.as_deref(), pages))
            .await
            .map_err(|e| ExtractionReason::Rendering {
                detail: format!("text task panicked: {e}"),
            })?
    }

    async fn render(
        &self,
        pages: PageRange,
        max_pixels: u32,
    ) -> Result<Vec<DynamicImage>, ExtractionReason> {
        let bytes = Arc::clone(&self.bytes);
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || {
            render_blocking(&bytes, password.as_deref(), pages, max_pixels)
        })
        .await
        .map_err(|e| ExtractionReason::Rendering {
            detail: format!("render task panicked: {e}"),
        })?
    }
}

// ── Blocking pdfium helpers ──────────────────────────────────────────────

/// Bind to `PDFIUM_LIB_PATH` when set, otherwise to the system library.
pub fn bind_pdfium() -> Result<Pdfium, StudyError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(PathBuf::from(path)),
        _ => Pdfium::bind_to_system_library(),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| StudyError::PdfiumBindingFailed(e.to_string()))
}

fn count_pages_blocking(
    name: &str,
    bytes: &[u8],
    password: Option<&str>,
) -> Result<usize, StudyError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium.load_pdf_from_byte_slice(bytes, password).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                StudyError::WrongPassword {
                    name: name.to_string(),
                }
            } else {
                StudyError::PasswordRequired {
                    name: name.to_string(),
                }
            }
        } else {
            StudyError::CorruptPdf {
                name: name.to_string(),
                detail: err_str,
            }
        }
    })?;
    Ok(document.pages().len() as usize)
}

fn rendering(detail: impl std::fmt::Display) -> ExtractionReason {
    ExtractionReason::Rendering {
        detail: detail.to_string(),
    }
}

fn text_layer_blocking(
    bytes: &[u8],
    password: Option<&str>,
    range: PageRange,
) -> Result<Vec<String>, ExtractionReason> {
    let pdfium = bind_pdfium().map_err(rendering)?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| rendering(format!("{e:?}")))?;
    let pages = document.pages();

    range
        .indices()
        .map(|idx| -> Result<String, ExtractionReason> {
            let page = pages
                .get(idx as u16)
                .map_err(|e| rendering(format!("page {}: {e:?}", idx + 1)))?;
            // A page without a text object is an empty layer, not a failure.
            Ok(page.text().map(|t| t.all()).unwrap_or_default())
        })
        .collect()
}

fn render_blocking(
    bytes: &[u8],
    password: Option<&str>,
    range: PageRange,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, ExtractionReason> {
    let pdfium = bind_pdfium().map_err(rendering)?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| rendering(format!("{e:?}")))?;
    let pages = document.pages();

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(range.page_count());
    for idx in range.indices() {
        let page = pages
            .get(idx as u16)
            .map_err(|e| rendering(format!("page {}: {e:?}", idx + 1)))?;
        let image = page
            .render_with_config(&render_config)
            .map_err(|e| rendering(format!("page {}: {e:?}", idx + 1)))?
            .as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_bytes_rejects_non_pdf_before_binding() {
        let err = PdfDocument::from_bytes("notes.txt", b"plain text".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::NotAPdf { .. }));
    }
}
