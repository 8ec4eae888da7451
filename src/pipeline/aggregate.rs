//! Aggregation: merge per-batch bundles into session collections and a note.
//!
//! Pure data transformation, no I/O. Bundles are ordered by batch sequence
//! first, so the output depends only on the set of bundles and never on the
//! order batches happened to finish in.
//!
//! | collection  | key (normalised)  | on duplicate                     |
//! |-------------|-------------------|----------------------------------|
//! | questions   | stem              | first wins                       |
//! | mnemonics   | topic             | first wins, text never merged    |
//! | cheat sheet | concept           | points appended, deduplicated    |
//!
//! Key points from every batch are collected into one leading "Key points"
//! cheat-sheet entry; key concepts feed the note's summary line.

use crate::error::AggregationInconsistency;
use crate::model::{BatchContent, CheatSheetEntry, Mnemonic, Note, Question};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Concept label of the entry that collects every batch's key points.
pub const KEY_POINTS_CONCEPT: &str = "Key points";

/// How many key concepts the summary line names.
const SUMMARY_CONCEPTS: usize = 8;

/// Lowercase, collapse runs of whitespace to one space, trim.
pub fn normalize_key(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Session-level collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub questions: Vec<Question>,
    pub mnemonics: Vec<Mnemonic>,
    pub cheat_sheet: Vec<CheatSheetEntry>,
    pub note: Note,
    pub inconsistencies: Vec<AggregationInconsistency>,
}

/// Merge `bundles` and compile the note titled `title` with the first
/// `note_questions` questions.
pub fn aggregate(bundles: &[BatchContent], title: &str, note_questions: usize) -> Aggregate {
    let mut ordered: Vec<&BatchContent> = bundles.iter().collect();
    ordered.sort_by_key(|b| b.batch);

    let mut inconsistencies = Vec::new();
    let mut flag = |batch: usize, detail: String| {
        warn!("Batch {}: aggregation skipped {}", batch, detail);
        inconsistencies.push(AggregationInconsistency { batch, detail });
    };

    let mut questions = Vec::new();
    let mut seen_stems = HashSet::new();
    let mut mnemonics = Vec::new();
    let mut seen_topics = HashSet::new();
    let mut cheat_sheet: Vec<CheatSheetEntry> = Vec::new();
    let mut concept_index: HashMap<String, usize> = HashMap::new();
    let mut key_points = CheatSheetEntry {
        concept: KEY_POINTS_CONCEPT.to_string(),
        points: Vec::new(),
    };
    let mut seen_points = HashSet::new();
    let mut key_concepts = Vec::new();
    let mut seen_concepts = HashSet::new();

    for bundle in &ordered {
        for q in &bundle.questions {
            if !q.is_well_formed() {
                flag(bundle.batch, format!("ill-formed question {:?}", q.stem));
                continue;
            }
            if seen_stems.insert(normalize_key(&q.stem)) {
                questions.push(q.clone());
            }
        }

        for m in &bundle.mnemonics {
            if m.topic.trim().is_empty() || m.mnemonic.trim().is_empty() {
                flag(bundle.batch, "mnemonic without topic or text".to_string());
                continue;
            }
            if seen_topics.insert(normalize_key(&m.topic)) {
                mnemonics.push(m.clone());
            }
        }

        for entry in &bundle.cheat_sheet {
            let key = normalize_key(&entry.concept);
            if key.is_empty() {
                flag(bundle.batch, "cheat-sheet entry without concept".to_string());
                continue;
            }
            let idx = *concept_index.entry(key).or_insert_with(|| {
                cheat_sheet.push(CheatSheetEntry {
                    concept: entry.concept.trim().to_string(),
                    points: Vec::new(),
                });
                cheat_sheet.len() - 1
            });
            merge_points(&mut cheat_sheet[idx].points, &entry.points);
        }

        for point in &bundle.key_points {
            if seen_points.insert(normalize_key(point)) {
                key_points.points.push(point.clone());
            }
        }

        for concept in &bundle.key_concepts {
            if seen_concepts.insert(normalize_key(concept)) {
                key_concepts.push(concept.clone());
            }
        }
    }

    if !key_points.points.is_empty() {
        match concept_index.get(&normalize_key(KEY_POINTS_CONCEPT)) {
            Some(&idx) => merge_points(&mut cheat_sheet[idx].points, &key_points.points),
            None => cheat_sheet.insert(0, key_points),
        }
    }

    debug!(
        "Aggregated {} batch(es): {} questions, {} mnemonics, {} cheat-sheet entries",
        ordered.len(),
        questions.len(),
        mnemonics.len(),
        cheat_sheet.len()
    );

    let note = Note {
        title: title.to_string(),
        summary: summary_line(&questions, &mnemonics, &cheat_sheet, &key_concepts, ordered.len()),
        questions: questions.iter().take(note_questions).cloned().collect(),
        mnemonics: mnemonics.clone(),
        cheat_sheet: cheat_sheet.clone(),
    };

    Aggregate {
        questions,
        mnemonics,
        cheat_sheet,
        note,
        inconsistencies,
    }
}

fn merge_points(into: &mut Vec<String>, points: &[String]) {
    let mut seen: HashSet<String> = into.iter().map(|p| normalize_key(p)).collect();
    for p in points {
        let p = p.trim();
        if !p.is_empty() && seen.insert(normalize_key(p)) {
            into.push(p.to_string());
        }
    }
}

fn summary_line(
    questions: &[Question],
    mnemonics: &[Mnemonic],
    cheat_sheet: &[CheatSheetEntry],
    key_concepts: &[String],
    batches: usize,
) -> String {
    let mut summary = format!(
        "{} question(s), {} mnemonic(s) and {} cheat-sheet entr{} compiled from {} section(s).",
        questions.len(),
        mnemonics.len(),
        cheat_sheet.len(),
        if cheat_sheet.len() == 1 { "y" } else { "ies" },
        batches
    );
    if !key_concepts.is_empty() {
        let named: Vec<&str> = key_concepts
            .iter()
            .take(SUMMARY_CONCEPTS)
            .map(String::as_str)
            .collect();
        summary.push_str(&format!(" Key concepts: {}.", named.join(", ")));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, Provenance};

    fn q(stem: &str) -> Question {
        Question {
            stem: stem.into(),
            options: vec!["yes".into(), "no".into()],
            correct_index: 0,
            explanation: String::new(),
            difficulty: Difficulty::Medium,
            subject: "Physiology".into(),
            provenance: Provenance::Generated,
        }
    }

    fn m(topic: &str, text: &str) -> Mnemonic {
        Mnemonic {
            topic: topic.into(),
            mnemonic: text.into(),
            explanation: String::new(),
        }
    }

    fn c(concept: &str, points: &[&str]) -> CheatSheetEntry {
        CheatSheetEntry {
            concept: concept.into(),
            points: points.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn bundles() -> Vec<BatchContent> {
        vec![
            BatchContent {
                batch: 2,
                questions: vec![q("Is the  AORTA an artery?"), q("Is blood red?")],
                mnemonics: vec![m("cranial nerves", "Oh Oh Oh To Touch")],
                cheat_sheet: vec![c("Aorta", &["Largest artery", "Leaves the LV"])],
                key_concepts: vec!["Aorta".into()],
                ..Default::default()
            },
            BatchContent {
                batch: 1,
                questions: vec![q("Is the aorta an artery?")],
                mnemonics: vec![m("Cranial  Nerves", "On Old Olympus")],
                cheat_sheet: vec![c("aorta", &["largest artery", "Has three layers"])],
                key_points: vec!["The heart has four chambers".into()],
                key_concepts: vec!["Heart".into()],
                ..Default::default()
            },
        ]
    }

    #[test]
    fn dedup_and_ordering() {
        let agg = aggregate(&bundles(), "Cardio", 10);

        let stems: Vec<&str> = agg.questions.iter().map(|q| q.stem.as_str()).collect();
        assert_eq!(stems, vec!["Is the aorta an artery?", "Is blood red?"]);

        assert_eq!(agg.mnemonics.len(), 1);
        assert_eq!(agg.mnemonics[0].mnemonic, "On Old Olympus");

        assert_eq!(agg.cheat_sheet[0].concept, KEY_POINTS_CONCEPT);
        let aorta = &agg.cheat_sheet[1];
        assert_eq!(aorta.concept, "aorta");
        assert_eq!(
            aorta.points,
            vec!["largest artery", "Has three layers", "Leaves the LV"]
        );
    }

    #[test]
    fn no_duplicate_normalized_stems() {
        let agg = aggregate(&bundles(), "Cardio", 10);
        let keys: HashSet<String> = agg.questions.iter().map(|q| normalize_key(&q.stem)).collect();
        assert_eq!(keys.len(), agg.questions.len());
    }

    #[test]
    fn note_sections() {
        let agg = aggregate(&bundles(), "Cardio", 1);
        assert_eq!(agg.note.title, "Cardio");
        assert_eq!(agg.note.questions.len(), 1);
        assert_eq!(agg.note.mnemonics, agg.mnemonics);
        assert_eq!(agg.note.cheat_sheet, agg.cheat_sheet);
        assert!(agg.note.summary.starts_with("2 question(s), 1 mnemonic(s)"));
        assert!(agg.note.summary.contains("Key concepts: Heart, Aorta."));
    }

    #[test]
    fn deterministic_regardless_of_arrival_order() {
        let forward = bundles();
        let mut reversed = bundles();
        reversed.reverse();
        let a = aggregate(&forward, "Cardio", 10);
        let b = aggregate(&reversed, "Cardio", 10);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a.note).unwrap(),
            serde_json::to_string(&aggregate(&forward, "Cardio", 10).note).unwrap()
        );
    }

    #[test]
    fn ill_formed_items_contribute_nothing() {
        let mut broken = q("Out of range?");
        broken.correct_index = 5;
        let bundle = BatchContent {
            batch: 3,
            questions: vec![broken, q("Fine?")],
            mnemonics: vec![m("", "no topic")],
            ..Default::default()
        };
        let agg = aggregate(&[bundle], "T", 10);
        assert_eq!(agg.questions.len(), 1);
        assert!(agg.mnemonics.is_empty());
        assert_eq!(agg.inconsistencies.len(), 2);
        assert!(agg.inconsistencies.iter().all(|i| i.batch == 3));
    }

    #[test]
    fn normalize() {
        assert_eq!(normalize_key("  Heart\t Valves \n"), "heart valves");
    }
}
