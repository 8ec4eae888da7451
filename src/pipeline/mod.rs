//! Pipeline stages for study-material generation.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and swapped (OCR engine, model provider, document backend) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─────────── per batch, concurrently ───────────┐
//! segment ──▶ extract ──▶ classify ──▶ generate (──▶ parse) ─┤──▶ aggregate ──▶ mocktest
//! (pages)     (text/ocr/   (heuristic,   (extract or          │    (dedup,        (no model
//!              vision)      model)        synthesize)         │     merge)         calls)
//!            └───────────────────────────────────────────────┘
//! ```
//!
//! 1. [`segment`] : page ranges of ≤ 3 pages (one batch for ≤ 5 pages)
//! 2. [`extract`] : text via the [`document`] text layer, OCR, or a vision
//!    model; [`input`] and [`encode`] serve it
//! 3. [`classify`]: assessment, study notes, or mixed
//! 4. [`generate`]: one [`llm`] call per mode, output read by [`parse`]
//! 5. [`aggregate`]: dedupe and merge every batch's bundle, compile the note
//! 6. [`mocktest`]: timed tests assembled from the merged question bank

pub mod aggregate;
pub mod classify;
pub mod document;
pub mod encode;
pub mod extract;
pub mod generate;
pub mod input;
pub mod llm;
pub mod mocktest;
pub mod parse;
pub mod segment;
