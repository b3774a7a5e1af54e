//! Client-side connection keeper.
//!
//! One `ReconnectManager` owns one logical connection. Its link moves
//! through `Idle -> Connecting -> Open -> Waiting -> Connecting ...` and
//! holds exactly one task handle at a time (connect attempt, reader or retry
//! timer), so two attempts can never overlap.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use classroom_core::SyncConfig;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::protocol::{ClientMessage, ServerMessage};

/// Client error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected")]
    NotConnected,
    #[error("Client has been shut down")]
    ShutDown,
    #[error("Connect failed: {0}")]
    Connect(String),
}

/// An open transport as seen by the manager.
///
/// Dropping `outgoing` asks the transport to close; `incoming` ending means
/// the transport is gone.
pub struct Transport {
    pub outgoing: mpsc::UnboundedSender<ClientMessage>,
    pub incoming: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Opens transports for the manager.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Make one connection attempt.
    async fn connect(&self) -> Result<Transport, ClientError>;
}

/// Notification delivered to the owner of the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Message(ServerMessage),
}

/// Observable link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    /// Waiting for the retry timer.
    Waiting,
    ShutDown,
}

enum Link {
    Idle,
    Connecting {
        _attempt: JoinHandle<()>,
    },
    Open {
        outgoing: mpsc::UnboundedSender<ClientMessage>,
        reader: JoinHandle<()>,
    },
    Waiting {
        timer: JoinHandle<()>,
    },
    ShutDown,
}

impl Link {
    const fn state(&self) -> LinkState {
        match self {
            Self::Idle => LinkState::Idle,
            Self::Connecting { .. } => LinkState::Connecting,
            Self::Open { .. } => LinkState::Open,
            Self::Waiting { .. } => LinkState::Waiting,
            Self::ShutDown => LinkState::ShutDown,
        }
    }
}

struct Slot {
    /// Bumped whenever a new attempt starts or the manager shuts down;
    /// callbacks carrying an older epoch are ignored.
    epoch: u64,
    link: Link,
}

struct Inner<C> {
    connector: C,
    retry_delay: Duration,
    events: mpsc::UnboundedSender<ClientEvent>,
    slot: Mutex<Slot>,
}

impl<C: Connector> Inner<C> {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_attempt(self: &Arc<Self>, slot: &mut Slot) {
        slot.epoch = slot.epoch.wrapping_add(1);
        let epoch = slot.epoch;
        let inner = Arc::clone(self);
        let attempt = tokio::spawn(async move {
            let result = inner.connector.connect().await;
            inner.attempt_finished(epoch, result);
        });
        slot.link = Link::Connecting { _attempt: attempt };
    }

    fn attempt_finished(self: &Arc<Self>, epoch: u64, result: Result<Transport, ClientError>) {
        let mut slot = self.lock();
        if slot.epoch != epoch || slot.link.state() != LinkState::Connecting {
            return;
        }
        match result {
            Ok(Transport {
                outgoing,
                mut incoming,
            }) => {
                tracing::info!("Connected");
                let _ = self.events.send(ClientEvent::Connected);
                let inner = Arc::clone(self);
                let reader = tokio::spawn(async move {
                    while let Some(msg) = incoming.recv().await {
                        let _ = inner.events.send(ClientEvent::Message(msg));
                    }
                    inner.transport_closed(epoch);
                });
                slot.link = Link::Open { outgoing, reader };
            }
            Err(e) => {
                tracing::warn!("Connection attempt failed: {e}");
                self.schedule_retry(&mut slot);
            }
        }
    }

    fn transport_closed(self: &Arc<Self>, epoch: u64) {
        let mut slot = self.lock();
        if slot.epoch != epoch || slot.link.state() != LinkState::Open {
            return;
        }
        tracing::info!("Disconnected");
        let _ = self.events.send(ClientEvent::Disconnected);
        self.schedule_retry(&mut slot);
    }

    fn schedule_retry(self: &Arc<Self>, slot: &mut Slot) {
        let epoch = slot.epoch;
        let delay = self.retry_delay;
        let inner = Arc::clone(self);
        tracing::debug!(delay_ms = delay.as_millis(), "Scheduling reconnect");
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.retry_due(epoch);
        });
        slot.link = Link::Waiting { timer };
    }

    fn retry_due(self: &Arc<Self>, epoch: u64) {
        let mut slot = self.lock();
        if slot.epoch != epoch || slot.link.state() != LinkState::Waiting {
            return;
        }
        tracing::info!("Attempting reconnect");
        self.start_attempt(&mut slot);
    }
}

/// Keeps one logical connection alive across transport loss.
///
/// Retries forever at a fixed delay until [`shutdown`](Self::shutdown) is
/// called or the manager is dropped. Must be used inside a tokio runtime.
pub struct ReconnectManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> ReconnectManager<C> {
    /// Create an idle manager and the receiver for its events.
    #[must_use]
    pub fn new(connector: C, retry_delay: Duration) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            connector,
            retry_delay,
            events,
            slot: Mutex::new(Slot {
                epoch: 0,
                link: Link::Idle,
            }),
        });
        (Self { inner }, events_rx)
    }

    /// Create an idle manager retrying after `reconnect_delay_ms`.
    #[must_use]
    pub fn from_config(
        connector: C,
        config: &SyncConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        Self::new(connector, config.reconnect_delay())
    }

    /// Start connecting.
    ///
    /// No-op while connecting, open or shut down. While waiting for a
    /// retry the timer is cancelled and the attempt starts immediately.
    pub fn connect(&self) {
        let mut slot = self.inner.lock();
        if let Link::Waiting { timer } = &slot.link {
            timer.abort();
        }
        if matches!(slot.link.state(), LinkState::Idle | LinkState::Waiting) {
            self.inner.start_attempt(&mut slot);
        }
    }

    /// Send a message over the open transport.
    ///
    /// # Errors
    /// Returns `NotConnected` unless the link is open, or `ShutDown` after
    /// teardown. Nothing is queued.
    pub fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        let slot = self.inner.lock();
        match &slot.link {
            Link::Open { outgoing, .. } => {
                outgoing.send(msg).map_err(|_| ClientError::NotConnected)
            }
            Link::ShutDown => Err(ClientError::ShutDown),
            _ => {
                tracing::warn!(kind = msg.kind(), "Cannot send message: not connected");
                Err(ClientError::NotConnected)
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.inner.lock().link.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Cancel any pending retry, close the transport and stop for good.
    ///
    /// Safe to call in any state, any number of times.
    pub fn shutdown(&self) {
        let mut slot = self.inner.lock();
        slot.epoch = slot.epoch.wrapping_add(1);
        match std::mem::replace(&mut slot.link, Link::ShutDown) {
            Link::Connecting { _attempt: attempt } => attempt.abort(),
            Link::Open { outgoing, reader } => {
                drop(outgoing);
                reader.abort();
            }
            Link::Waiting { timer } => timer.abort(),
            Link::Idle | Link::ShutDown => {}
        }
    }
}

impl<C: Connector> Drop for ReconnectManager<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
