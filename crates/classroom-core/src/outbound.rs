//! Bounded per-channel outbound queues.
//!
//! Each channel gets its own queue so a stalled consumer never holds up
//! the router or other channels. When a queue is full the oldest pending
//! event is overwritten: presence and live-code events are superseded by
//! later ones anyway.

use tokio::sync::broadcast;

use crate::ServerEvent;

/// Producer side of a channel's outbound queue.
///
/// Dropping every sender closes the queue; the receiver then drains and
/// reports the end of the stream.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: broadcast::Sender<ServerEvent>,
}

/// Consumer side of a channel's outbound queue.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: broadcast::Receiver<ServerEvent>,
    dropped: u64,
}

/// Create an outbound queue holding at most `capacity` pending events.
///
/// The capacity is rounded up to the next power of two (zero becomes one);
/// [`SyncConfig::validate`](crate::SyncConfig::validate) only admits powers
/// of two, so configured queues hold exactly `outbound_capacity`.
#[must_use]
pub fn channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    (OutboundSender { tx }, OutboundReceiver { rx, dropped: 0 })
}

impl OutboundSender {
    /// Enqueue an event without waiting.
    ///
    /// Returns `false` when the receiving side is gone.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.receiver_count() == 0
    }
}

impl OutboundReceiver {
    /// Next pending event, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped = self.dropped.saturating_add(skipped);
                    tracing::debug!(skipped, "Outbound queue full, dropped oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.dropped = self.dropped.saturating_add(skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Total number of events overwritten before they were received.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}
