//! Progress as an async stream.
//!
//! Polling [`SessionRegistry::progress`] is enough for a status endpoint,
//! but a CLI progress bar or a server-sent-events handler wants to be woken
//! on every change. [`progress_stream`] yields the current state at once,
//! then each newly published one, and ends right after the terminal state.
//!
//! Intermediate states may be coalesced when the consumer is slower than the
//! session; the terminal state is never skipped. Use a
//! [`crate::SessionProgressCallback`] to observe every single update.

use crate::error::StudyError;
use crate::model::SessionId;
use crate::progress::ProgressState;
use crate::registry::SessionRegistry;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;

/// A boxed stream of progress states.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressState> + Send>>;

/// Stream the progress of session `id` until it reaches a terminal state.
///
/// Sessions already evicted from the registry replay their stored history.
pub async fn progress_stream(
    registry: &SessionRegistry,
    id: SessionId,
) -> Result<ProgressStream, StudyError> {
    let Some(rx) = registry.subscribe(id).await else {
        let history = registry.store().read_progress_history(id).await?;
        if history.is_empty() {
            return Err(StudyError::SessionNotFound { id: id.to_string() });
        }
        return Ok(Box::pin(stream::iter(history)));
    };

    let states = WatchStream::new(rx).scan(false, |ended, state| {
        if *ended {
            return futures::future::ready(None);
        }
        *ended = state.step.is_terminal();
        futures::future::ready(Some(state))
    });
    Ok(Box::pin(states))
}
