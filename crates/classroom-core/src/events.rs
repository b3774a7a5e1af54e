//! Events delivered from the server to connected channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{StudentId, presence::StudentStatus};

/// Presence change of one student, broadcast to admins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub student_id: StudentId,
    pub status: StudentStatus,
    pub last_seen: i64,
}

/// Latest editor contents of one student, broadcast to admins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUpdateEvent {
    pub student_id: StudentId,
    pub code: String,
}

/// Task handed to exactly one student.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAssignment {
    pub student_id: StudentId,
    /// Task definition, opaque to the sync core.
    pub task: Value,
}

impl TaskAssignment {
    /// Task identifier, when the payload carries one.
    #[must_use]
    pub fn task_id(&self) -> Option<String> {
        match self.task.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Starter template embedded in the payload.
    #[must_use]
    pub fn template(&self) -> Option<String> {
        self.task
            .get("template")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Presence of a student changed.
    StudentUpdate {
        user_id: StudentId,
        status: StudentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<i64>,
    },
    /// A student's editor contents changed.
    LiveCodeUpdate { user_id: StudentId, code: String },
    /// A task was assigned to the receiving student.
    TaskAssigned { task: Value },
}

impl ServerEvent {
    /// Wire `type` of the event, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StudentUpdate { .. } => "student_update",
            Self::LiveCodeUpdate { .. } => "live_code_update",
            Self::TaskAssigned { .. } => "task_assigned",
        }
    }
}

impl From<PresenceEvent> for ServerEvent {
    fn from(event: PresenceEvent) -> Self {
        Self::StudentUpdate {
            user_id: event.student_id,
            status: event.status,
            last_seen: Some(event.last_seen),
        }
    }
}

impl From<CodeUpdateEvent> for ServerEvent {
    fn from(event: CodeUpdateEvent) -> Self {
        Self::LiveCodeUpdate {
            user_id: event.student_id,
            code: event.code,
        }
    }
}

impl From<TaskAssignment> for ServerEvent {
    fn from(assignment: TaskAssignment) -> Self {
        Self::TaskAssigned {
            task: assignment.task,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_student_update_wire_shape() {
        let event = ServerEvent::from(PresenceEvent {
            student_id: "alice".into(),
            status: StudentStatus::Typing,
            last_seen: 42,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "student_update", "user_id": "alice", "status": "typing", "last_seen": 42})
        );
    }

    #[test]
    fn test_live_code_wire_shape() {
        let event = ServerEvent::from(CodeUpdateEvent {
            student_id: "alice".into(),
            code: "print(1)".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "live_code_update", "user_id": "alice", "code": "print(1)"})
        );
    }

    #[test]
    fn test_student_update_without_last_seen_parses() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"student_update","user_id":"bob","status":"offline"}"#)
                .unwrap();
        assert_eq!(
            event,
            ServerEvent::StudentUpdate {
                user_id: "bob".into(),
                status: StudentStatus::Offline,
                last_seen: None,
            }
        );
    }

    #[test]
    fn test_assignment_extracts_id_and_template() {
        let assignment = TaskAssignment {
            student_id: "alice".into(),
            task: json!({"id": "sum-two", "title": "Sum", "template": "def add(a, b):\n    pass"}),
        };
        assert_eq!(assignment.task_id().as_deref(), Some("sum-two"));
        assert_eq!(
            assignment.template().as_deref(),
            Some("def add(a, b):\n    pass")
        );
    }
}
