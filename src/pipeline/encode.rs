//! Image encoding for the two consumers of rendered pages.
//!
//! The OCR engine reads PNG files; vision models take base64 PNG wrapped in
//! [`ImageData`]. PNG keeps text edges crisp, which matters more than size
//! for both recognition paths.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Lossless PNG bytes of a rendered page.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a rendered page as a base64 PNG attachment for a vision model.
///
/// `detail: "high"` asks GPT-4-class models for the full tile budget, without
/// which small print in tables and answer options is lost.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let png = encode_png(img)?;
    let b64 = STANDARD.encode(&png);
    debug!("Encoded page image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
