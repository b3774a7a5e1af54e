//! Dispatch of inbound client envelopes.

use std::sync::Arc;

use classroom_core::SyncError;
use classroom_session::{ChannelHandle, ChannelRole, SessionHub};

use crate::protocol::ClientMessage;

/// Routes envelopes from registered channels to the session hub.
#[derive(Clone)]
pub struct MessageRouter {
    hub: Arc<SessionHub>,
}

impl MessageRouter {
    #[must_use]
    pub const fn new(hub: Arc<SessionHub>) -> Self {
        Self { hub }
    }

    #[must_use]
    pub const fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    /// Parse and dispatch one text frame from `handle`.
    ///
    /// # Errors
    /// Returns `MalformedMessage` for unparseable envelopes or messages the
    /// sender's role may not send, and `NotRegistered` for stale handles.
    /// Callers log and drop; the channel stays open.
    pub async fn route(&self, handle: &ChannelHandle, raw: &str) -> Result<(), SyncError> {
        let msg = ClientMessage::parse(raw)?;
        tracing::trace!(
            session_id = %handle.session_id,
            channel_id = %handle.channel_id,
            kind = msg.kind(),
            "Routing client message"
        );

        match (&handle.role, msg) {
            (ChannelRole::Student(_), ClientMessage::CodeUpdate { code }) => {
                self.hub.code_update(handle, code).await
            }
            (ChannelRole::Student(_), ClientMessage::StatusUpdate { status }) => {
                self.hub.status_update(handle, status).await
            }
            (ChannelRole::Admin, ClientMessage::ViewStudent { student_id }) => {
                self.hub.view_student(handle, student_id).await
            }
            (role, msg) => Err(SyncError::MalformedMessage(format!(
                "{} is not accepted from {role}",
                msg.kind()
            ))),
        }
    }
}
