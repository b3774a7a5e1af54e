//! Error taxonomy of the synchronization core.

use thiserror::Error;

use crate::{SessionId, StudentId, traits::DirectoryError};

/// Synchronization error.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Student {student_id} already connected to session {session_id}")]
    DuplicateIdentity {
        session_id: SessionId,
        student_id: StudentId,
    },
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Channel is not registered")]
    NotRegistered,
    #[error("Transport failure: {0}")]
    TransportFailure(String),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedMessage(e.to_string())
    }
}
