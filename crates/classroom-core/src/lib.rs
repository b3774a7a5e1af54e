//! Core abstractions for classroom session synchronization.
//!
//! This crate provides the fundamental building blocks:
//! - `Presence` - Per-student status state machine
//! - `CodeMirror` - Latest editor contents per student
//! - `ServerEvent` - Typed server-to-client events
//! - `outbound` - Bounded, drop-oldest per-channel queues
//! - `SyncConfig` - Timer and queue configuration
//! - Directory and task catalog traits

pub mod config;
pub mod error;
pub mod events;
pub mod mirror;
pub mod outbound;
pub mod presence;
pub mod traits;

pub use config::{ConfigError, DuplicatePolicy, SyncConfig};
pub use error::SyncError;
pub use events::{CodeUpdateEvent, PresenceEvent, ServerEvent, TaskAssignment};
pub use mirror::CodeMirror;
pub use outbound::{OutboundReceiver, OutboundSender};
pub use presence::{Presence, RequestedStatus, StudentStatus, Trigger};
pub use traits::{DirectoryError, EmptyCatalog, SessionDirectory, TaskCatalog};

/// Opaque session token.
pub type SessionId = String;

/// Student identity, unique within a session.
pub type StudentId = String;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
