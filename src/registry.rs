//! Process-wide session registry: start, poll, fetch results, cancel.
//!
//! Each running session owns an orchestrator task spawned on the Tokio
//! runtime. The registry keeps only the handles it needs to answer queries
//! (the progress receiver and the cancellation token) and drops them once a
//! terminal session has outlived the retention window. Evicted sessions stay
//! readable through the [`SessionStore`].

use crate::config::PipelineConfig;
use crate::error::StudyError;
use crate::model::{InputKind, Session, SessionId, StudyResults};
use crate::orchestrator::{Orchestrator, SessionInput};
use crate::pipeline::extract::{OcrEngine, TesseractOcr};
use crate::pipeline::llm::{GenerativeModel, ProviderModel};
use crate::progress::{ProgressState, ProgressStep, ProgressTracker};
use crate::store::SessionStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Entry {
    session: Session,
    progress: watch::Receiver<ProgressState>,
    cancel: CancellationToken,
}

impl Entry {
    fn expired(&self, retention: Duration) -> bool {
        let state = self.progress.borrow();
        if !state.step.is_terminal() {
            return false;
        }
        (Utc::now() - state.updated_at)
            .to_std()
            .map(|age| age >= retention)
            .unwrap_or(false)
    }
}

/// Entry point for callers: one registry per process.
pub struct SessionRegistry {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn SessionStore>,
    retention: Duration,
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl SessionRegistry {
    /// Build a registry with the configured provider and the Tesseract OCR engine.
    pub fn new(config: PipelineConfig, store: Arc<dyn SessionStore>) -> Result<Self, StudyError> {
        let model: Arc<dyn GenerativeModel> = Arc::new(ProviderModel::from_config(&config)?);
        let ocr: Arc<dyn OcrEngine> = Arc::new(TesseractOcr::new(
            config.ocr_command.clone(),
            config.ocr_language.clone(),
        ));
        Ok(Self::with_components(config, model, ocr, store))
    }

    /// Build a registry around explicit model and OCR implementations.
    pub fn with_components(
        config: PipelineConfig,
        model: Arc<dyn GenerativeModel>,
        ocr: Arc<dyn OcrEngine>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let retention = config.retention;
        Self {
            orchestrator: Arc::new(Orchestrator::new(config, model, ocr, Arc::clone(&store))),
            store,
            retention,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Accept `input` and start processing it in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start_session(&self, owner: &str, input: SessionInput) -> Result<SessionId, StudyError> {
        let (input_kind, sources) = match &input {
            SessionInput::Files { documents, .. } => {
                if documents.is_empty() {
                    return Err(StudyError::EmptyInput("no documents given".to_string()));
                }
                (
                    InputKind::FileSet,
                    documents.iter().map(|d| d.name().to_string()).collect(),
                )
            }
            SessionInput::Text { text, .. } => {
                if text.trim().is_empty() {
                    return Err(StudyError::EmptyInput("topic text".to_string()));
                }
                (InputKind::RawText, Vec::new())
            }
        };

        self.evict_expired().await;

        let session = Session {
            id: SessionId::new(),
            owner: owner.to_string(),
            name: input.name().to_string(),
            input_kind,
            sources,
            state: ProgressStep::Queued,
            created_at: Utc::now(),
        };
        let id = session.id;
        self.store.create_session(&session).await?;

        let callback = self.orchestrator.config().progress_callback.clone();
        let (tracker, progress) = ProgressTracker::new(id, callback);
        self.store.append_progress(tracker.current()).await?;

        let cancel = CancellationToken::new();
        self.sessions.write().await.insert(
            id,
            Entry {
                session: session.clone(),
                progress,
                cancel: cancel.clone(),
            },
        );

        info!("Session {}: accepted for owner '{}'", id, owner);
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            orchestrator.run(session, input, tracker, cancel).await;
        });
        Ok(id)
    }

    /// Latest progress of session `id`.
    pub async fn progress(&self, id: SessionId) -> Result<ProgressState, StudyError> {
        if let Some(entry) = self.sessions.read().await.get(&id) {
            return Ok(entry.progress.borrow().clone());
        }
        self.store
            .read_progress(id)
            .await?
            .ok_or_else(|| StudyError::SessionNotFound { id: id.to_string() })
    }

    /// A receiver that observes every published progress state while the
    /// session is held by this registry.
    pub async fn subscribe(&self, id: SessionId) -> Option<watch::Receiver<ProgressState>> {
        self.sessions.read().await.get(&id).map(|e| e.progress.clone())
    }

    /// The session record, with `state` reflecting the latest progress.
    pub async fn session(&self, id: SessionId) -> Result<Session, StudyError> {
        if let Some(entry) = self.sessions.read().await.get(&id) {
            let mut session = entry.session.clone();
            session.state = entry.progress.borrow().step;
            return Ok(session);
        }
        let mut session = self
            .store
            .read_session(id)
            .await?
            .ok_or_else(|| StudyError::SessionNotFound { id: id.to_string() })?;
        if let Some(progress) = self.store.read_progress(id).await? {
            session.state = progress.step;
        }
        Ok(session)
    }

    /// Results of a session in a terminal state.
    ///
    /// Partial and cancelled sessions return what succeeded; a failed session
    /// returns an empty result set.
    pub async fn results(&self, id: SessionId) -> Result<StudyResults, StudyError> {
        let progress = self.progress(id).await?;
        if !progress.step.is_terminal() {
            return Err(StudyError::ResultsNotReady {
                id: id.to_string(),
                step: progress.step.to_string(),
            });
        }
        self.store
            .read_results(id)
            .await?
            .ok_or_else(|| StudyError::Store(format!("results for session {id} are missing")))
    }

    /// Request cancellation. Returns `false` if the session had already ended.
    pub async fn cancel(&self, id: SessionId) -> Result<bool, StudyError> {
        let sessions = self.sessions.read().await;
        let Some(entry) = sessions.get(&id) else {
            return match self.store.read_session(id).await? {
                Some(_) => Ok(false),
                None => Err(StudyError::SessionNotFound { id: id.to_string() }),
            };
        };
        if entry.progress.borrow().step.is_terminal() {
            return Ok(false);
        }
        info!("Session {}: cancellation requested", id);
        entry.cancel.cancel();
        Ok(true)
    }

    /// Drop terminal sessions older than the retention window. Returns how
    /// many were evicted.
    pub async fn evict_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.expired(self.retention));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("Evicted {} expired session(s)", evicted);
        }
        evicted
    }

    /// Number of sessions currently held in memory.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
