//! Segmentation: split source documents into ordered batches by page range.
//!
//! Short documents (≤ [`SINGLE_BATCH_MAX_PAGES`]) are one batch. Longer ones
//! are cut into 3-page batches, shrinking the tail to 2-page batches so no
//! page is ever left alone:
//!
//! ```text
//!  6 pages → 3 3
//!  7 pages → 3 2 2
//!  8 pages → 3 3 2
//! 10 pages → 3 3 2 2
//! ```
//!
//! Sequence numbers are contiguous from 1 across every document of a session.

use crate::model::{BatchSpan, BatchSpec, PageRange};
use tracing::debug;

/// Documents up to this many pages become a single batch.
pub const SINGLE_BATCH_MAX_PAGES: usize = 5;

/// Page count of a regular batch.
const PREFERRED_BATCH_PAGES: usize = 3;

/// Page counts of each batch for a document of `page_count` pages.
pub fn batch_sizes(page_count: usize) -> Vec<usize> {
    if page_count <= SINGLE_BATCH_MAX_PAGES {
        return vec![page_count];
    }
    let (threes, tail): (usize, &[usize]) = match page_count % PREFERRED_BATCH_PAGES {
        0 => (page_count / 3, &[]),
        2 => (page_count / 3, &[2]),
        // A lone remainder page is folded in by turning one 3 into 2 + 2.
        _ => ((page_count - 4) / 3, &[2, 2]),
    };
    let mut sizes = vec![PREFERRED_BATCH_PAGES; threes];
    sizes.extend_from_slice(tail);
    sizes
}

/// Segment one document, numbering batches from `first_sequence`.
///
/// A document with zero pages yields a single whole-input batch; extraction
/// reports it as empty.
pub fn segment_document(page_count: usize, document: usize, first_sequence: usize) -> Vec<BatchSpec> {
    if page_count == 0 {
        return vec![BatchSpec {
            sequence: first_sequence,
            document,
            span: BatchSpan::WholeInput,
        }];
    }

    let mut start = 1;
    batch_sizes(page_count)
        .into_iter()
        .enumerate()
        .map(|(i, size)| {
            let range = PageRange::new(start, start + size - 1);
            start += size;
            BatchSpec {
                sequence: first_sequence + i,
                document,
                span: BatchSpan::Pages(range),
            }
        })
        .collect()
}

/// Segment every document of a file-set session, in input order.
pub fn segment_documents(page_counts: &[usize]) -> Vec<BatchSpec> {
    let mut batches = Vec::new();
    for (document, &pages) in page_counts.iter().enumerate() {
        let next = batches.len() + 1;
        let doc_batches = segment_document(pages, document, next);
        debug!(
            "Document {}: {} page(s) → {} batch(es)",
            document,
            pages,
            doc_batches.len()
        );
        batches.extend(doc_batches);
    }
    batches
}

/// A raw-text session is always exactly one batch.
pub fn segment_text() -> Vec<BatchSpec> {
    vec![BatchSpec {
        sequence: 1,
        document: 0,
        span: BatchSpan::WholeInput,
    }]
}
