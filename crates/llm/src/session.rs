use tracing::debug;

use crate::{GenerativeTextService, LlmError, TextSession};

/// Scoped model session: released when the guard is dropped, whether the
/// task returned normally, recorded a failure, panicked, or was cancelled.
pub struct SessionGuard {
    session: Box<dyn TextSession>,
    task: String,
}

impl SessionGuard {
    pub fn new(session: Box<dyn TextSession>, task: impl Into<String>) -> Self {
        Self {
            session,
            task: task.into(),
        }
    }

    /// Acquire a fresh session from `service` for `task`.
    pub async fn open(
        service: &dyn GenerativeTextService,
        task: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let task = task.into();
        debug!(%task, "opening model session");
        let session = service.open_session().await?;
        Ok(Self::new(session, task))
    }

    pub async fn prompt(&mut self, prompt: &str) -> Result<String, LlmError> {
        self.session.prompt(prompt).await
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.release();
        debug!(task = %self.task, "released model session");
    }
}
