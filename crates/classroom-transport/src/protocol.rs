//! Wire protocol for client-server communication.

use classroom_core::{RequestedStatus, StudentId, SyncError};
use serde::{Deserialize, Serialize};

/// Message from server to client.
pub use classroom_core::ServerEvent as ServerMessage;

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Full editor contents after a change (student).
    CodeUpdate { code: String },
    /// Self-reported status (student). Only `online` and `afk` parse.
    StatusUpdate { status: RequestedStatus },
    /// Student the admin is looking at (admin).
    ViewStudent {
        #[serde(default)]
        student_id: Option<StudentId>,
    },
}

impl ClientMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns `MalformedMessage` for invalid JSON, unknown `type`s and
    /// unaccepted field values.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Wire `type` of the message, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CodeUpdate { .. } => "code_update",
            Self::StatusUpdate { .. } => "status_update",
            Self::ViewStudent { .. } => "view_student",
        }
    }
}
