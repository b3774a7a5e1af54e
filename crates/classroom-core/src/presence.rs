//! Per-student presence state machine.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::now_millis;

/// Externally visible student status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    /// Connected and idle.
    Online,
    /// Edited code within the typing-idle window.
    Typing,
    /// Connected but inactive for a long time.
    Afk,
    /// No live channel.
    Offline,
}

impl StudentStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Typing => "typing",
            Self::Afk => "afk",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status values a client may request for itself.
///
/// `typing` and `offline` are decided by the server and never accepted
/// from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedStatus {
    Online,
    Afk,
}

/// Something that may move a student to another status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A transport for the student was registered.
    Connected,
    /// The student's transport closed.
    Disconnected,
    /// A `code_update` arrived.
    Edit,
    /// The typing-idle timer fired without further edits.
    TypingIdle,
    /// Periodic inactivity check.
    Sweep { afk_after: Duration },
    /// The client asked for a status.
    Requested(RequestedStatus),
}

/// Presence record of a single student.
#[derive(Debug, Clone)]
pub struct Presence {
    status: StudentStatus,
    last_activity: Instant,
    last_seen: i64,
}

impl Presence {
    /// A student nobody has seen connected yet.
    #[must_use]
    pub fn offline(now: Instant) -> Self {
        Self {
            status: StudentStatus::Offline,
            last_activity: now,
            last_seen: now_millis(),
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> StudentStatus {
        self.status
    }

    /// Wall-clock time of the last contact, in epoch milliseconds.
    #[must_use]
    pub const fn last_seen(&self) -> i64 {
        self.last_seen
    }

    /// Apply a trigger at `now`.
    ///
    /// Returns the new status only when the visible status changed.
    pub fn apply(&mut self, trigger: Trigger, now: Instant) -> Option<StudentStatus> {
        use StudentStatus::{Afk, Offline, Online, Typing};

        let next = match (self.status, trigger) {
            (_, Trigger::Disconnected) => {
                self.touch_seen();
                Offline
            }
            (_, Trigger::Connected) => {
                self.touch_seen();
                self.last_activity = now;
                Online
            }
            (Offline, _) => return None,
            (_, Trigger::Edit) => {
                self.touch_seen();
                self.last_activity = now;
                Typing
            }
            (Typing, Trigger::TypingIdle) => Online,
            (current, Trigger::TypingIdle) => current,
            (current @ (Online | Typing), Trigger::Sweep { afk_after }) => {
                if now.saturating_duration_since(self.last_activity) >= afk_after {
                    Afk
                } else {
                    current
                }
            }
            (current, Trigger::Sweep { .. }) => current,
            (_, Trigger::Requested(RequestedStatus::Online)) => {
                self.touch_seen();
                self.last_activity = now;
                Online
            }
            (_, Trigger::Requested(RequestedStatus::Afk)) => {
                self.touch_seen();
                Afk
            }
        };

        if next == self.status {
            None
        } else {
            self.status = next;
            Some(next)
        }
    }

    fn touch_seen(&mut self) {
        self.last_seen = now_millis();
    }
}
