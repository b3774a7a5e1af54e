//! Session orchestration for classroom synchronization.
//!
//! Provides:
//! - `SessionHub` - Per-session rooms, presence timers and fan-out
//! - `Registry` - Live student and admin channels of one session
//! - Storage implementations of the collaborator traits (memory)

pub mod manager;
pub mod registry;
pub mod storage;

pub use manager::{PresenceSnapshot, SessionHub};
pub use registry::{ChannelHandle, ChannelRole, Registry};
