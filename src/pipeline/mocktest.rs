//! Mock tests, assembled from the aggregated question bank.
//!
//! No model is involved: every question already carries its answer,
//! explanation and difficulty, so a test is a named, timed selection of
//! question references. Banks larger than `max_per_test` are split into
//! consecutive, disjoint parts of near-equal size.

use crate::model::{MockTest, Question};
use tracing::debug;

pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 90;

/// round(count × 1.5) clamped to 15–90 minutes. Halves round up.
pub fn duration_minutes(question_count: usize) -> u32 {
    let raw = (question_count.saturating_mul(3).saturating_add(1) / 2).min(u32::MAX as usize) as u32;
    raw.clamp(MIN_DURATION_MINUTES, MAX_DURATION_MINUTES)
}

/// Part sizes for `count` questions with at most `max_per_test` per part.
pub fn partition_sizes(count: usize, max_per_test: usize) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }
    let max = max_per_test.max(1);
    let parts = count.div_ceil(max);
    let base = count / parts;
    let extra = count % parts;
    (0..parts).map(|i| base + usize::from(i < extra)).collect()
}

/// Build the mock tests for a session named `session_name`.
pub fn synthesize(questions: &[Question], session_name: &str, max_per_test: usize) -> Vec<MockTest> {
    let sizes = partition_sizes(questions.len(), max_per_test);
    let parts = sizes.len();

    let mut next = 0;
    let tests: Vec<MockTest> = sizes
        .into_iter()
        .enumerate()
        .map(|(i, size)| {
            let question_refs: Vec<usize> = (next..next + size).collect();
            next += size;
            let name = if parts == 1 {
                format!("{session_name} - Mock Test")
            } else {
                format!("{session_name} - Mock Test (Part {} of {})", i + 1, parts)
            };
            MockTest {
                name,
                duration_minutes: duration_minutes(size),
                question_refs,
            }
        })
        .collect();

    debug!(
        "Synthesised {} mock test(s) from {} question(s)",
        tests.len(),
        questions.len()
    );
    tests
}
