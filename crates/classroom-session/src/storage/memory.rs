//! In-memory session directory and task catalog.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use classroom_core::{
    DirectoryError, SessionDirectory, SessionId, StudentId, StudentStatus, TaskCatalog,
    now_millis,
};
use serde::Serialize;
use uuid::Uuid;

/// Session known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub id: SessionId,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
}

/// Last presence persisted for a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StudentRecord {
    pub status: StudentStatus,
    pub last_seen: i64,
}

/// In-memory directory implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    students: RwLock<HashMap<(SessionId, StudentId), StudentRecord>>,
}

impl MemoryDirectory {
    /// Create a new in-memory directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with a fresh identifier.
    ///
    /// # Errors
    /// Returns error if the directory lock is poisoned.
    pub fn create_session(&self) -> Result<SessionRecord, DirectoryError> {
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            created_at: now_millis(),
        };
        self.sessions
            .write()
            .map_err(|e| DirectoryError::Internal(e.to_string()))?
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Register a session under a known identifier.
    pub fn insert_session(&self, id: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.entry(id.to_owned()).or_insert_with(|| SessionRecord {
                id: id.to_owned(),
                created_at: now_millis(),
            });
        }
    }

    /// Delete a session and its student records.
    ///
    /// # Errors
    /// Returns `NotFound` if the session does not exist.
    pub fn delete_session(&self, id: &str) -> Result<SessionRecord, DirectoryError> {
        let record = self
            .sessions
            .write()
            .map_err(|e| DirectoryError::Internal(e.to_string()))?
            .remove(id)
            .ok_or_else(|| DirectoryError::NotFound(id.to_owned()))?;

        self.students
            .write()
            .map_err(|e| DirectoryError::Internal(e.to_string()))?
            .retain(|(session_id, _), _| session_id != id);

        Ok(record)
    }

    /// Look up a session.
    #[must_use]
    pub fn session(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.read().ok()?.get(id).cloned()
    }

    /// Last persisted presence of a student.
    #[must_use]
    pub fn student(&self, session_id: &str, student_id: &str) -> Option<StudentRecord> {
        self.students
            .read()
            .ok()?
            .get(&(session_id.to_owned(), student_id.to_owned()))
            .copied()
    }
}

#[async_trait]
impl SessionDirectory for MemoryDirectory {
    async fn session_exists(&self, session_id: &str) -> Result<bool, DirectoryError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| DirectoryError::Internal(e.to_string()))?
            .contains_key(session_id))
    }

    async fn record_presence(
        &self,
        session_id: &str,
        student_id: &str,
        status: StudentStatus,
        last_seen: i64,
    ) -> Result<(), DirectoryError> {
        if !self.session_exists(session_id).await? {
            return Err(DirectoryError::NotFound(session_id.to_owned()));
        }
        self.students
            .write()
            .map_err(|e| DirectoryError::Internal(e.to_string()))?
            .insert(
                (session_id.to_owned(), student_id.to_owned()),
                StudentRecord { status, last_seen },
            );
        Ok(())
    }
}

/// In-memory catalog of starter templates keyed by task id.
#[derive(Debug, Default)]
pub struct MemoryTaskCatalog {
    templates: RwLock<HashMap<String, String>>,
}

impl MemoryTaskCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_template(&self, task_id: impl Into<String>, template: impl Into<String>) {
        if let Ok(mut templates) = self.templates.write() {
            templates.insert(task_id.into(), template.into());
        }
    }
}

#[async_trait]
impl TaskCatalog for MemoryTaskCatalog {
    async fn starter_template(&self, task_id: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self
            .templates
            .read()
            .map_err(|e| DirectoryError::Internal(e.to_string()))?
            .get(task_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_created_session_exists_until_deleted() {
        let directory = MemoryDirectory::new();
        let record = directory.create_session().unwrap();
        assert!(directory.session_exists(&record.id).await.unwrap());

        directory.delete_session(&record.id).unwrap();
        assert!(!directory.session_exists(&record.id).await.unwrap());
        assert!(matches!(
            directory.delete_session(&record.id),
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_record_presence_requires_session() {
        let directory = MemoryDirectory::new();
        directory.insert_session("S1");

        directory
            .record_presence("S1", "alice", StudentStatus::Afk, 7)
            .await
            .unwrap();
        assert_eq!(
            directory.student("S1", "alice"),
            Some(StudentRecord {
                status: StudentStatus::Afk,
                last_seen: 7,
            })
        );

        let missing = directory
            .record_presence("S2", "alice", StudentStatus::Online, 8)
            .await;
        assert!(matches!(missing, Err(DirectoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_catalog_lookup() {
        let catalog = MemoryTaskCatalog::new();
        catalog.insert_template("t1", "x = 0");
        assert_eq!(
            catalog.starter_template("t1").await.unwrap().as_deref(),
            Some("x = 0")
        );
        assert_eq!(catalog.starter_template("t9").await.unwrap(), None);
    }
}
