//! Whole-pipeline session tests driven through the registry with scripted
//! collaborators. No network, no pdfium.
//!
//! Run with:
//!   cargo test --test session

mod common;

use common::*;
use edgequake_study::pipeline::llm::ModelError;
use edgequake_study::{
    progress_stream, BatchError, ExtractionReason, ExtractionStrategy, FallbackScope,
    GenerationFailureKind, MemoryStore, OcrEngine, ProgressCallback, ProgressState, ProgressStep,
    Provenance, SessionInput, SessionProgressCallback, SessionRegistry, StudyError, StudyResults,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn files(name: &str, doc: Arc<TextDocument>) -> SessionInput {
    SessionInput::Files {
        name: name.to_string(),
        documents: vec![doc],
    }
}

async fn run_to_end(registry: &SessionRegistry, input: SessionInput) -> (ProgressState, StudyResults) {
    let id = assert_ok!(registry.start_session("student-1", input).await);
    let state = wait_terminal(registry, id).await;
    let results = assert_ok!(registry.results(id).await);
    (state, results)
}

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<ProgressState>>,
    completed: AtomicUsize,
    errored: AtomicUsize,
    sessions_done: AtomicUsize,
}

impl SessionProgressCallback for Recorder {
    fn on_batch_complete(&self, _batch: usize, _total: usize, _questions: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_batch_error(&self, _batch: usize, _total: usize, _error: &str) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }

    fn on_progress(&self, state: &ProgressState) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn on_session_complete(&self, _total: usize, _succeeded: usize) {
        self.sessions_done.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Extraction fallback ──────────────────────────────────────────────────

#[tokio::test]
async fn eight_pages_vision_failure_on_batch_two_falls_back_to_ocr() {
    // Second vision call (batch 2, pages 4–6) reads nothing.
    let model = ScriptedModel::new(|call| match (call.kind, call.nth) {
        (CallKind::Vision, 1) => Ok("   ".to_string()),
        _ => default_reply(call),
    });
    let ocr = FixedOcr::new();
    let config = test_config()
        .concurrency(1)
        .strategy(ExtractionStrategy::Vision)
        .build()
        .unwrap();
    let registry = registry(config, model.clone(), ocr.clone());

    let (state, results) = run_to_end(&registry, files("Cardiology", TextDocument::notes("cardio.pdf", 8))).await;

    assert_eq!(state.step, ProgressStep::Completed);
    assert!(!state.partial);
    assert_eq!(state.batches_total, 3);
    assert_eq!(results.stats.total, 3);
    assert_eq!(results.stats.succeeded, 3);
    assert!(!results.partial);

    assert_eq!(model.count(CallKind::Vision), 3);
    assert_eq!(ocr.count(), 3, "only batch 2's three pages go through OCR");

    // Content from every batch made it into the aggregate.
    let stems: Vec<&str> = results.questions.iter().map(|q| q.stem.as_str()).collect();
    assert!(stems.iter().any(|s| s.contains("Vision transcript 0")));
    assert!(stems.iter().any(|s| s.contains("tricuspid valve")));
    assert!(stems.iter().any(|s| s.contains("Vision transcript 2")));

    assert_eq!(results.notices.len(), 1);
    assert!(results.notices[0].contains("vision extraction failed"));
    assert!(results.notices[0].contains("used ocr instead"));
}

#[tokio::test]
async fn session_scope_fallback_switches_later_batches() {
    let blind = |call: &Call| match call.kind {
        CallKind::Vision => Ok(String::new()),
        _ => default_reply(call),
    };

    for (scope, expected_vision_calls) in [(FallbackScope::Batch, 3), (FallbackScope::Session, 1)] {
        let model = ScriptedModel::new(blind);
        let ocr = FixedOcr::new();
        let config = test_config()
            .concurrency(1)
            .strategy(ExtractionStrategy::Vision)
            .fallback_scope(scope)
            .build()
            .unwrap();
        let registry = registry(config, model.clone(), ocr.clone());

        let (state, results) = run_to_end(&registry, files("Scans", TextDocument::notes("scan.pdf", 8))).await;
        assert_eq!(state.step, ProgressStep::Completed, "{scope:?}");
        assert_eq!(results.stats.succeeded, 3, "{scope:?}");
        assert_eq!(model.count(CallKind::Vision), expected_vision_calls, "{scope:?}");
        assert_eq!(ocr.count(), 8, "{scope:?}");
    }
}

#[tokio::test]
async fn rejected_vision_credentials_fall_back_after_one_call_per_batch() {
    let model = ScriptedModel::new(|call| match call.kind {
        CallKind::Vision => Err(ModelError::Auth("401 invalid api key".into())),
        _ => default_reply(call),
    });
    let ocr = FixedOcr::new();
    let config = test_config()
        .concurrency(1)
        .max_retries(3)
        .strategy(ExtractionStrategy::Vision)
        .build()
        .unwrap();
    let registry = registry(config, model.clone(), ocr.clone());

    let (state, results) = run_to_end(&registry, files("Scans", TextDocument::notes("scan.pdf", 8))).await;

    assert_eq!(state.step, ProgressStep::Completed);
    assert_eq!(results.stats.succeeded, 3);
    assert_eq!(model.count(CallKind::Vision), 3, "one vision call per batch, no retries");
    assert_eq!(ocr.count(), 8);
    assert_eq!(results.notices.len(), 3);
    assert!(results.notices.iter().all(|n| n.contains("service misconfigured")));
}

/// Recognises nothing on any page.
struct BlankOcr;

#[async_trait::async_trait]
impl OcrEngine for BlankOcr {
    fn name(&self) -> &str {
        "blank"
    }

    async fn recognize(&self, _png: &[u8]) -> Result<String, ExtractionReason> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn rejected_vision_credentials_are_reported_when_ocr_reads_nothing() {
    let model = ScriptedModel::new(|call| match call.kind {
        CallKind::Vision => Err(ModelError::Auth("401 invalid api key".into())),
        _ => default_reply(call),
    });
    let config = test_config()
        .strategy(ExtractionStrategy::Vision)
        .build()
        .unwrap();
    let registry =
        SessionRegistry::with_components(config, model.clone(), Arc::new(BlankOcr), Arc::new(MemoryStore::new()));

    let (state, results) = run_to_end(&registry, files("Scans", TextDocument::notes("scan.pdf", 4))).await;

    assert_eq!(state.step, ProgressStep::Failed);
    assert!(state.message.contains("misconfigured"), "{}", state.message);
    assert_eq!(model.count(CallKind::Vision), 1);
    assert_eq!(results.failures.len(), 1);
    match &results.failures[0] {
        BatchError::Extraction(failure) => {
            assert_eq!(failure.strategy, ExtractionStrategy::Vision);
            assert!(matches!(failure.reason, ExtractionReason::ServiceMisconfigured { .. }));
        }
        other => panic!("expected an extraction failure, got {other:?}"),
    }
    assert!(results.notices.iter().any(|n| n.contains("fell back to ocr")));
}

// ── Existing questions ───────────────────────────────────────────────────

fn past_paper() -> Arc<TextDocument> {
    let questions = [
        "Which chamber pumps blood into the aorta?",
        "Which valve lies between the left atrium and left ventricle?",
        "What is the normal resting heart rate range in adults?",
        "Which vessel returns blood from the lungs?",
        "What does the P wave represent on an ECG?",
        "Which node is the primary pacemaker of the heart?",
        "What is the main determinant of stroke volume?",
        "Which artery supplies the anterior wall of the left ventricle?",
        "What is the first heart sound caused by?",
        "Which drug class slows AV nodal conduction?",
    ];
    let blocks: Vec<String> = questions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            format!(
                "{}. {q}\nA) First option {i}\nB) Second option {i}\nC) Third option {i}\nD) Fourth option {i}",
                i + 1
            )
        })
        .collect();
    // Four pages: 3 + 3 + 2 + 2 questions.
    let pages = vec![
        blocks[0..3].join("\n"),
        blocks[3..6].join("\n"),
        blocks[6..8].join("\n"),
        blocks[8..10].join("\n"),
    ];
    TextDocument::new("past-paper.pdf", pages)
}

#[tokio::test]
async fn numbered_mcqs_are_extracted_verbatim_without_synthesis() {
    let model = ScriptedModel::cooperative();
    let config = test_config()
        .strategy(ExtractionStrategy::Direct)
        .build()
        .unwrap();
    let registry = registry(config, model.clone(), FixedOcr::new());
    let doc = past_paper();
    let source = doc.pages.join("\n\n");

    let (state, results) = run_to_end(&registry, files("Past paper", doc)).await;

    assert_eq!(state.step, ProgressStep::Completed);
    assert_eq!(results.stats.total, 1, "≤ 5 pages is one batch");
    assert_eq!(results.questions.len(), 10);
    for q in &results.questions {
        assert_eq!(q.provenance, Provenance::Extracted);
        assert!(source.contains(&q.stem), "stem not verbatim: {:?}", q.stem);
        assert!(!q.stem.starts_with(|c: char| c.is_ascii_digit()), "numbering kept: {:?}", q.stem);
        assert_eq!(q.options.len(), 4);
    }
    assert!(results.mnemonics.is_empty());

    assert_eq!(model.count(CallKind::Classify), 0, "heuristic decides clear cases");
    assert_eq!(model.count(CallKind::Synthesize), 0);
    assert_eq!(model.count(CallKind::Extract), 1);
}

// ── Partial and failed sessions ──────────────────────────────────────────

#[tokio::test]
async fn failed_batch_yields_partial_completion() {
    let model = ScriptedModel::new(|call| {
        if call.kind == CallKind::Synthesize && call.user.contains("Page 4:") {
            Err(ModelError::Auth("401 invalid api key".into()))
        } else {
            default_reply(call)
        }
    });
    let recorder = Arc::new(Recorder::default());
    let config = test_config()
        .strategy(ExtractionStrategy::Direct)
        .progress_callback(recorder.clone() as ProgressCallback)
        .build()
        .unwrap();
    let registry = registry(config, model, FixedOcr::new());

    let (state, results) = run_to_end(&registry, files("Cardiology", TextDocument::notes("cardio.pdf", 8))).await;

    assert_eq!(state.step, ProgressStep::Completed);
    assert!(state.partial);
    assert!(state.message.contains("partial"));
    assert!(results.partial);
    assert_eq!(results.stats.succeeded, 2);
    assert_eq!(results.stats.failed, 1);
    assert!(!results.is_empty());
    assert!(results.note.is_some());

    assert_eq!(results.failures.len(), 1);
    match &results.failures[0] {
        BatchError::Generation(g) => {
            assert_eq!(g.batch, 2);
            assert_eq!(g.attempts, 1, "auth failures are not retried");
            assert!(matches!(g.kind, GenerationFailureKind::Auth { .. }));
        }
        other => panic!("unexpected failure {other:?}"),
    }

    assert_eq!(recorder.completed.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.errored.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.sessions_done.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn all_batches_failing_fails_the_session() {
    let model = ScriptedModel::new(|call| match call.kind {
        CallKind::Synthesize => Err(ModelError::Auth("401 unauthorized".into())),
        _ => default_reply(call),
    });
    let config = test_config()
        .strategy(ExtractionStrategy::Direct)
        .build()
        .unwrap();
    let registry = registry(config, model, FixedOcr::new());

    let (state, results) = run_to_end(&registry, files("Cardiology", TextDocument::notes("cardio.pdf", 8))).await;

    assert_eq!(state.step, ProgressStep::Failed);
    assert!(state.message.contains("authentication"));
    let error = state.error.expect("failed state carries the error");
    assert!(error.contains("All 3 batches failed"), "{error}");

    assert!(results.is_empty());
    assert!(results.mock_tests.is_empty());
    assert!(results.note.is_none());
    assert_eq!(results.stats.failed, 3);
}

#[tokio::test]
async fn transient_errors_are_retried_then_succeed() {
    let model = ScriptedModel::new(|call| match (call.kind, call.nth) {
        (CallKind::Synthesize, 0) => Err(ModelError::RateLimited("429 too many requests".into())),
        (CallKind::Synthesize, 1) => Ok("Sure! Here is your content, as requested.".into()),
        _ => default_reply(call),
    });
    let config = test_config()
        .strategy(ExtractionStrategy::Direct)
        .build()
        .unwrap();
    let registry = registry(config, model.clone(), FixedOcr::new());

    let (state, results) = run_to_end(&registry, files("Short", TextDocument::notes("short.pdf", 2))).await;

    assert_eq!(state.step, ProgressStep::Completed);
    assert!(!results.partial);
    assert_eq!(results.questions.len(), 2);

    let systems: Vec<String> = model
        .calls()
        .into_iter()
        .filter(|c| c.kind == CallKind::Synthesize)
        .map(|c| c.system)
        .collect();
    assert_eq!(systems.len(), 3);
    assert!(!systems[1].contains("could not be parsed"));
    assert!(systems[2].contains("could not be parsed"), "malformed output asks for stricter format");
}

#[tokio::test]
async fn clinical_safety_block_is_retried_with_educational_framing() {
    let model = ScriptedModel::new(|call| match (call.kind, call.nth) {
        (CallKind::Synthesize, 0) => Err(ModelError::ContentFiltered {
            category: Some("medical".into()),
            detail: "finish_reason=content_filter".into(),
        }),
        _ => default_reply(call),
    });
    let config = test_config()
        .strategy(ExtractionStrategy::Direct)
        .build()
        .unwrap();
    let registry = registry(config, model.clone(), FixedOcr::new());

    let (state, _) = run_to_end(&registry, files("Wounds", TextDocument::notes("wounds.pdf", 3))).await;

    assert_eq!(state.step, ProgressStep::Completed);
    let retry = model
        .calls()
        .into_iter()
        .find(|c| c.kind == CallKind::Synthesize && c.nth == 1)
        .expect("retried");
    assert!(retry.system.contains("educational material"));
}

// ── Progress ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_percent_never_decreases_and_each_batch_is_reported_once() {
    let recorder = Arc::new(Recorder::default());
    let model = ScriptedModel::new(|call| match (call.kind, call.nth) {
        // A retry in the middle of the run.
        (CallKind::Synthesize, 1) => Err(ModelError::Transient("503 upstream".into())),
        _ => default_reply(call),
    });
    let config = test_config()
        .concurrency(3)
        .strategy(ExtractionStrategy::Direct)
        .progress_callback(recorder.clone() as ProgressCallback)
        .build()
        .unwrap();
    let registry = registry(config, model, FixedOcr::new());

    let (state, _) = run_to_end(&registry, files("Cardiology", TextDocument::notes("cardio.pdf", 14))).await;
    assert_eq!(state.step, ProgressStep::Completed);
    assert_eq!(state.percent, 100);

    let states = recorder.states.lock().unwrap().clone();
    assert!(states.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert!(states.windows(2).all(|w| w[1].batches_done <= w[0].batches_done + 1));
    assert_eq!(states.last().map(|s| s.batches_done), Some(state.batches_total));
    assert_eq!(
        states.iter().filter(|s| s.step.is_terminal()).count(),
        1,
        "exactly one terminal update"
    );

    // Stored history matches what the callback saw.
    let history = registry.store().read_progress_history(state.session_id).await.unwrap();
    assert!(history.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert_eq!(history.first().map(|s| s.step), Some(ProgressStep::Queued));
    assert_eq!(history.last().map(|s| s.step), Some(ProgressStep::Completed));
}

#[tokio::test]
async fn progress_stream_ends_at_the_terminal_state() {
    let model = ScriptedModel::with_delay(Duration::from_millis(5), default_reply);
    let config = test_config()
        .strategy(ExtractionStrategy::Direct)
        .build()
        .unwrap();
    let registry = registry(config, model, FixedOcr::new());

    let id = assert_ok!(
        registry
            .start_session("student-1", files("Cardio", TextDocument::notes("cardio.pdf", 6)))
            .await
    );
    let states: Vec<ProgressState> = assert_ok!(progress_stream(&registry, id).await).collect().await;

    let last = states.last().expect("at least one state");
    assert_eq!(last.step, ProgressStep::Completed);
    assert_eq!(states.iter().filter(|s| s.step.is_terminal()).count(), 1);
    assert!(states.windows(2).all(|w| w[0].percent <= w[1].percent));
}

// ── Aggregation and mock tests ───────────────────────────────────────────

#[tokio::test]
async fn results_do_not_depend_on_completion_order() {
    async fn run(concurrency: usize, delay_ms: u64) -> StudyResults {
        let model = ScriptedModel::with_delay(Duration::from_millis(delay_ms), default_reply);
        let config = test_config()
            .concurrency(concurrency)
            .strategy(ExtractionStrategy::Direct)
            .build()
            .unwrap();
        let registry = registry(config, model, FixedOcr::new());
        run_to_end(&registry, files("Cardiology", TextDocument::notes("cardio.pdf", 11))).await.1
    }

    let sequential = run(1, 0).await;
    let concurrent = run(4, 3).await;

    assert_eq!(sequential.questions, concurrent.questions);
    assert_eq!(sequential.mnemonics, concurrent.mnemonics);
    assert_eq!(sequential.cheat_sheet, concurrent.cheat_sheet);
    assert_eq!(
        serde_json::to_string(&sequential.note).unwrap(),
        serde_json::to_string(&concurrent.note).unwrap()
    );
    assert_eq!(sequential.mock_tests, concurrent.mock_tests);
}

#[tokio::test]
async fn mock_tests_are_built_without_model_calls() {
    struct CallsAtSynthesis {
        model: Arc<ScriptedModel>,
        at_synthesis: Mutex<Option<usize>>,
    }

    impl SessionProgressCallback for CallsAtSynthesis {
        fn on_progress(&self, state: &ProgressState) {
            if state.step == ProgressStep::SynthesizingTest {
                *self.at_synthesis.lock().unwrap() = Some(self.model.total());
            }
        }
    }

    let model = ScriptedModel::cooperative();
    let watcher = Arc::new(CallsAtSynthesis {
        model: model.clone(),
        at_synthesis: Mutex::new(None),
    });
    let config = test_config()
        .strategy(ExtractionStrategy::Direct)
        .max_questions_per_test(4)
        .progress_callback(watcher.clone() as ProgressCallback)
        .build()
        .unwrap();
    let registry = registry(config, model.clone(), FixedOcr::new());

    let (state, results) = run_to_end(&registry, files("Renal", TextDocument::notes("renal.pdf", 9))).await;

    assert_eq!(state.step, ProgressStep::Completed);
    let before = watcher.at_synthesis.lock().unwrap().expect("synthesis step published");
    assert_eq!(model.total(), before, "no model call after synthesis began");

    assert_eq!(results.questions.len(), 9);
    let sizes: Vec<usize> = results.mock_tests.iter().map(|t| t.question_refs.len()).collect();
    assert_eq!(sizes, vec![3, 3, 3]);
    assert_eq!(results.mock_tests[0].name, "Renal - Mock Test (Part 1 of 3)");
    assert!(results.mock_tests.iter().all(|t| (15..=90).contains(&t.duration_minutes)));
}

#[tokio::test]
async fn topic_session_is_one_batch_without_extraction() {
    let model = ScriptedModel::cooperative();
    let ocr = FixedOcr::new();
    let registry = registry(test_config().build().unwrap(), model.clone(), ocr.clone());

    let input = SessionInput::Text {
        name: "Nephron".into(),
        text: "The loop of Henle concentrates urine by countercurrent multiplication.\n\n\
               The collecting duct responds to antidiuretic hormone by inserting aquaporins."
            .into(),
    };
    let (state, results) = run_to_end(&registry, input).await;

    assert_eq!(state.step, ProgressStep::Completed);
    assert_eq!(results.stats.total, 1);
    assert_eq!(results.questions.len(), 2);
    assert_eq!(results.mock_tests.len(), 1);
    assert_eq!(results.mock_tests[0].name, "Nephron - Mock Test");
    assert_eq!(model.count(CallKind::Vision), 0);
    assert_eq!(ocr.count(), 0);
}

// ── Registry ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_stops_scheduling_new_batches() {
    let model = ScriptedModel::with_delay(Duration::from_millis(40), default_reply);
    let config = test_config()
        .concurrency(1)
        .strategy(ExtractionStrategy::Direct)
        .build()
        .unwrap();
    let registry = registry(config, model, FixedOcr::new());

    let id = assert_ok!(
        registry
            .start_session("student-1", files("Long", TextDocument::notes("long.pdf", 20)))
            .await
    );

    tokio::time::timeout(Duration::from_secs(10), async {
        while registry.progress(id).await.unwrap().batches_done == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first batch finished");

    assert!(assert_ok!(registry.cancel(id).await));
    let state = wait_terminal(&registry, id).await;
    assert_eq!(state.step, ProgressStep::Cancelled);
    assert!(state.partial);

    let results = assert_ok!(registry.results(id).await);
    assert!(results.stats.succeeded >= 1);
    assert!(results.stats.cancelled >= 1);
    assert_eq!(results.stats.total, 7);
    assert!(!results.questions.is_empty());

    assert!(!assert_ok!(registry.cancel(id).await), "already terminal");
}

#[tokio::test]
async fn results_are_not_ready_before_a_terminal_state() {
    let model = ScriptedModel::with_delay(Duration::from_millis(200), default_reply);
    let config = test_config()
        .strategy(ExtractionStrategy::Direct)
        .build()
        .unwrap();
    let registry = registry(config, model, FixedOcr::new());

    let id = assert_ok!(
        registry
            .start_session("student-1", files("Cardio", TextDocument::notes("cardio.pdf", 3)))
            .await
    );
    let err = assert_err!(registry.results(id).await);
    assert!(matches!(err, StudyError::ResultsNotReady { .. }));

    wait_terminal(&registry, id).await;
    assert_ok!(registry.results(id).await);
}

#[tokio::test]
async fn evicted_sessions_stay_readable_through_the_store() {
    let config = test_config()
        .strategy(ExtractionStrategy::Direct)
        .retention(Duration::ZERO)
        .build()
        .unwrap();
    let registry = registry(config, ScriptedModel::cooperative(), FixedOcr::new());

    let (state, _) = run_to_end(&registry, files("Cardio", TextDocument::notes("cardio.pdf", 3))).await;
    let id = state.session_id;

    assert_eq!(registry.evict_expired().await, 1);
    assert!(registry.is_empty().await);

    let session = assert_ok!(registry.session(id).await);
    assert_eq!(session.state, ProgressStep::Completed);
    assert_eq!(session.sources, vec!["cardio.pdf".to_string()]);
    assert_eq!(assert_ok!(registry.progress(id).await).step, ProgressStep::Completed);
    assert!(!assert_ok!(registry.results(id).await).questions.is_empty());

    let replay: Vec<ProgressState> = assert_ok!(progress_stream(&registry, id).await).collect().await;
    assert_eq!(replay.last().map(|s| s.step), Some(ProgressStep::Completed));
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let registry = registry(test_config().build().unwrap(), ScriptedModel::cooperative(), FixedOcr::new());

    let empty_topic = SessionInput::Text {
        name: "Nothing".into(),
        text: "   \n".into(),
    };
    assert!(matches!(
        registry.start_session("student-1", empty_topic).await,
        Err(StudyError::EmptyInput(_))
    ));

    let no_files = SessionInput::Files {
        name: "Nothing".into(),
        documents: Vec::new(),
    };
    assert!(matches!(
        registry.start_session("student-1", no_files).await,
        Err(StudyError::EmptyInput(_))
    ));

    let unknown = edgequake_study::SessionId::new();
    assert!(matches!(
        registry.progress(unknown).await,
        Err(StudyError::SessionNotFound { .. })
    ));
    assert!(matches!(
        registry.cancel(unknown).await,
        Err(StudyError::SessionNotFound { .. })
    ));
}
