//! Interfaces to the collaborators that own persistent data.

use async_trait::async_trait;
use thiserror::Error;

use crate::presence::StudentStatus;

/// Error reported by a directory or catalog backend.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Directory error: {0}")]
    Internal(String),
}

/// Session and student registry owned by the session-management side.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Whether the session exists and accepts connections.
    async fn session_exists(&self, session_id: &str) -> Result<bool, DirectoryError>;

    /// Persist a student's presence after a transition.
    ///
    /// Called best-effort; failures are logged and never abort the
    /// transition.
    async fn record_presence(
        &self,
        session_id: &str,
        student_id: &str,
        status: StudentStatus,
        last_seen: i64,
    ) -> Result<(), DirectoryError>;
}

/// Read access to task definitions.
#[async_trait]
pub trait TaskCatalog: Send + Sync {
    /// Starter code shown before a student edits anything.
    async fn starter_template(&self, task_id: &str) -> Result<Option<String>, DirectoryError>;
}

/// Catalog without any tasks.
#[derive(Debug, Default, Clone)]
pub struct EmptyCatalog;

#[async_trait]
impl TaskCatalog for EmptyCatalog {
    async fn starter_template(&self, _task_id: &str) -> Result<Option<String>, DirectoryError> {
        Ok(None)
    }
}
