//! Storage collaborator for sessions, progress and results.
//!
//! The pipeline only ever creates, appends and reads: a session record is
//! created once, progress states are appended, results are written once.
//! Nothing needs a transaction across collections. [`MemoryStore`] keeps
//! everything in-process; a database-backed store implements the same trait.

use crate::error::StudyError;
use crate::model::{Session, SessionId, StudyResults};
use crate::progress::ProgressState;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Record a new session. Fails if the id already exists.
    async fn create_session(&self, session: &Session) -> Result<(), StudyError>;

    /// Append one progress state to the session's history.
    async fn append_progress(&self, state: &ProgressState) -> Result<(), StudyError>;

    /// Write the session's results. Fails if results already exist.
    async fn put_results(&self, results: &StudyResults) -> Result<(), StudyError>;

    async fn read_session(&self, id: SessionId) -> Result<Option<Session>, StudyError>;

    /// Most recently appended progress state.
    async fn read_progress(&self, id: SessionId) -> Result<Option<ProgressState>, StudyError>;

    /// Every appended progress state, oldest first.
    async fn read_progress_history(&self, id: SessionId) -> Result<Vec<ProgressState>, StudyError>;

    async fn read_results(&self, id: SessionId) -> Result<Option<StudyResults>, StudyError>;
}

/// In-process [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    progress: RwLock<HashMap<SessionId, Vec<ProgressState>>>,
    results: RwLock<HashMap<SessionId, StudyResults>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<(), StudyError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StudyError::Store(format!("session {} already exists", session.id)));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn append_progress(&self, state: &ProgressState) -> Result<(), StudyError> {
        if !self.sessions.read().await.contains_key(&state.session_id) {
            return Err(StudyError::Store(format!(
                "progress for unknown session {}",
                state.session_id
            )));
        }
        self.progress
            .write()
            .await
            .entry(state.session_id)
            .or_default()
            .push(state.clone());
        Ok(())
    }

    async fn put_results(&self, results: &StudyResults) -> Result<(), StudyError> {
        let mut all = self.results.write().await;
        if all.contains_key(&results.session_id) {
            return Err(StudyError::Store(format!(
                "results for session {} already written",
                results.session_id
            )));
        }
        all.insert(results.session_id, results.clone());
        Ok(())
    }

    async fn read_session(&self, id: SessionId) -> Result<Option<Session>, StudyError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn read_progress(&self, id: SessionId) -> Result<Option<ProgressState>, StudyError> {
        Ok(self
            .progress
            .read()
            .await
            .get(&id)
            .and_then(|history| history.last().cloned()))
    }

    async fn read_progress_history(&self, id: SessionId) -> Result<Vec<ProgressState>, StudyError> {
        Ok(self.progress.read().await.get(&id).cloned().unwrap_or_default())
    }

    async fn read_results(&self, id: SessionId) -> Result<Option<StudyResults>, StudyError> {
        Ok(self.results.read().await.get(&id).cloned())
    }
}
