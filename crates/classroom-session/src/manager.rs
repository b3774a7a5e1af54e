//! Session hub orchestrating rooms, presence timers and fan-out.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use classroom_core::{
    CodeUpdateEvent, DuplicatePolicy, OutboundReceiver, OutboundSender, PresenceEvent,
    RequestedStatus, ServerEvent, SessionDirectory, SessionId, StudentId, StudentStatus,
    SyncConfig, SyncError, TaskAssignment, TaskCatalog, Trigger, outbound,
};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use uuid::Uuid;

use crate::registry::{AssignedTask, ChannelHandle, ChannelRole, Registry, StudentSlot};

/// Presence of one student as reported to the admin roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    pub student_id: StudentId,
    pub status: StudentStatus,
    pub last_seen: i64,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// State guarded by the room lock.
#[derive(Debug, Default)]
struct RoomState {
    registry: Registry,
    mirror: classroom_core::CodeMirror,
}

/// One live session.
struct Room {
    id: SessionId,
    state: Mutex<RoomState>,
}

impl Room {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            state: Mutex::new(RoomState::default()),
        }
    }

    /// Typing-idle timer callback.
    async fn typing_elapsed(&self, directory: &dyn SessionDirectory, student_id: &str, generation: u64) {
        let mut state = self.state.lock().await;
        let Some(slot) = state.registry.student_mut(student_id) else {
            return;
        };
        if !slot.take_typing_timer(generation) {
            return;
        }
        let Some(event) = transition(student_id, slot, Trigger::TypingIdle, Instant::now()) else {
            return;
        };
        state.registry.broadcast_to_admins(&event.clone().into());
        persist(directory, &self.id, &event).await;
    }
}

/// Apply a trigger and describe the visible change, if any.
fn transition(
    student_id: &str,
    slot: &mut StudentSlot,
    trigger: Trigger,
    now: Instant,
) -> Option<PresenceEvent> {
    let status = slot.presence.apply(trigger, now)?;
    Some(PresenceEvent {
        student_id: student_id.to_owned(),
        status,
        last_seen: slot.presence.last_seen(),
    })
}

/// Record a transition in the directory.
///
/// Callers hold the room lock, so writes for a student reach the directory
/// in transition order.
async fn persist(directory: &dyn SessionDirectory, session_id: &str, event: &PresenceEvent) {
    if let Err(e) = directory
        .record_presence(session_id, &event.student_id, event.status, event.last_seen)
        .await
    {
        tracing::warn!(
            %session_id,
            student_id = %event.student_id,
            status = %event.status,
            "Failed to record presence: {e}"
        );
    }
}

/// Hub for every session served by this process.
///
/// Each session has its own lock; operations on different sessions never
/// contend. The session map itself is only locked for lookup and insert.
pub struct SessionHub {
    directory: Arc<dyn SessionDirectory>,
    catalog: Arc<dyn TaskCatalog>,
    config: SyncConfig,
    rooms: RwLock<HashMap<SessionId, Arc<Room>>>,
}

impl SessionHub {
    /// Create a new session hub.
    #[must_use]
    pub fn new(
        directory: Arc<dyn SessionDirectory>,
        catalog: Arc<dyn TaskCatalog>,
        config: SyncConfig,
    ) -> Self {
        Self {
            directory,
            catalog,
            config,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Create an outbound queue sized for this hub.
    #[must_use]
    pub fn outbound_channel(&self) -> (OutboundSender, OutboundReceiver) {
        outbound::channel(self.config.outbound_capacity)
    }

    /// Ask the directory whether a session accepts connections.
    ///
    /// # Errors
    /// Returns error if the directory lookup fails.
    pub async fn session_exists(&self, session_id: &str) -> Result<bool, SyncError> {
        Ok(self.directory.session_exists(session_id).await?)
    }

    async fn room(&self, session_id: &str) -> Result<Arc<Room>, SyncError> {
        if !self.directory.session_exists(session_id).await? {
            return Err(SyncError::UnknownSession(session_id.to_owned()));
        }
        if let Some(room) = self.rooms.read().await.get(session_id) {
            return Ok(Arc::clone(room));
        }
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(session_id.to_owned())
            .or_insert_with(|| Arc::new(Room::new(session_id)));
        Ok(Arc::clone(room))
    }

    async fn existing_room(&self, session_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(session_id).cloned()
    }

    /// Register a channel.
    ///
    /// Students start (or restart) in `online`; admins of the session are
    /// told about it.
    ///
    /// # Errors
    /// Returns `UnknownSession` if the directory does not know the session,
    /// or `DuplicateIdentity` if the student is already connected and the
    /// policy is [`DuplicatePolicy::Reject`].
    pub async fn register(
        &self,
        session_id: &str,
        role: ChannelRole,
        transport: OutboundSender,
    ) -> Result<ChannelHandle, SyncError> {
        let room = self.room(session_id).await?;
        let student_id = match &role {
            ChannelRole::Student(id) => Some(id.clone()),
            ChannelRole::Admin => None,
        };
        let handle = ChannelHandle {
            session_id: session_id.to_owned(),
            channel_id: Uuid::new_v4(),
            role,
        };

        let Some(student_id) = student_id else {
            let mut state = room.state.lock().await;
            state.registry.attach_admin(handle.channel_id, transport);
            tracing::info!(
                %session_id,
                channel_id = %handle.channel_id,
                admins = state.registry.admin_count(),
                "Admin connected"
            );
            return Ok(handle);
        };
        let student_id = student_id.as_str();

        {
            let mut state = room.state.lock().await;
            if self.config.duplicate_policy == DuplicatePolicy::Reject
                && state.registry.is_student_live(student_id)
            {
                tracing::warn!(session_id, student_id, "Rejected duplicate student connection");
                return Err(SyncError::DuplicateIdentity {
                    session_id: session_id.to_owned(),
                    student_id: student_id.to_owned(),
                });
            }

            let now = Instant::now();
            let (slot, replaced) =
                state
                    .registry
                    .attach_student(student_id, handle.channel_id, transport, now);
            if let Some(previous) = replaced {
                tracing::info!(
                    %session_id,
                    %student_id,
                    %previous,
                    "Replaced previous student connection"
                );
            }
            if let Some(event) = transition(student_id, slot, Trigger::Connected, now) {
                state.registry.broadcast_to_admins(&event.clone().into());
                persist(self.directory.as_ref(), session_id, &event).await;
            }
        }

        tracing::info!(session_id, student_id, channel_id = %handle.channel_id, "Student connected");
        Ok(handle)
    }

    /// Remove a channel.
    ///
    /// Idempotent: a handle that is already gone, or that was displaced by
    /// a newer connection, is ignored. Removing a live student channel moves
    /// the student to `offline`.
    pub async fn unregister(&self, handle: &ChannelHandle) {
        let Some(room) = self.existing_room(&handle.session_id).await else {
            return;
        };

        let ChannelRole::Student(student_id) = &handle.role else {
            if room.state.lock().await.registry.detach_admin(handle.channel_id) {
                tracing::info!(
                    session_id = %handle.session_id,
                    channel_id = %handle.channel_id,
                    "Admin disconnected"
                );
            }
            return;
        };

        {
            let mut state = room.state.lock().await;
            if !state.registry.detach_student(student_id, handle.channel_id) {
                return;
            }
            let event = state.registry.student_mut(student_id).and_then(|slot| {
                transition(student_id, slot, Trigger::Disconnected, Instant::now())
            });
            if let Some(event) = event {
                state.registry.broadcast_to_admins(&event.clone().into());
                persist(self.directory.as_ref(), &handle.session_id, &event).await;
            }
        }

        tracing::info!(
            session_id = %handle.session_id,
            %student_id,
            "Student disconnected"
        );
    }

    /// Deliver an event to every admin of a session.
    ///
    /// Returns how many admin queues accepted it.
    pub async fn broadcast_to_admins(&self, session_id: &str, event: ServerEvent) -> usize {
        match self.existing_room(session_id).await {
            Some(room) => room.state.lock().await.registry.broadcast_to_admins(&event),
            None => 0,
        }
    }

    /// Deliver an event to one connected student; dropped otherwise.
    pub async fn send_to_student(
        &self,
        session_id: &str,
        student_id: &str,
        event: ServerEvent,
    ) -> bool {
        match self.existing_room(session_id).await {
            Some(room) => room
                .state
                .lock()
                .await
                .registry
                .send_to_student(student_id, event),
            None => false,
        }
    }

    /// Handle a student's editor change.
    ///
    /// Stores the code, mirrors it to every admin, moves the student to
    /// `typing` and restarts the typing-idle timer.
    ///
    /// # Errors
    /// Returns `NotRegistered` if the handle is not the student's live
    /// channel, or `MalformedMessage` for admin handles.
    pub async fn code_update(&self, handle: &ChannelHandle, code: String) -> Result<(), SyncError> {
        let student_id = handle.student_id().ok_or_else(|| {
            SyncError::MalformedMessage("code_update is only accepted from students".to_string())
        })?;
        let room = self
            .existing_room(&handle.session_id)
            .await
            .ok_or(SyncError::NotRegistered)?;

        {
            let mut state = room.state.lock().await;
            let RoomState { registry, mirror } = &mut *state;
            let slot = registry
                .live_student_mut(student_id, handle.channel_id)
                .ok_or(SyncError::NotRegistered)?;

            let event = transition(student_id, slot, Trigger::Edit, Instant::now());
            let delay = self.config.typing_idle();
            let timer_room = Arc::clone(&room);
            let directory = Arc::clone(&self.directory);
            let timer_student = student_id.to_owned();
            slot.rearm_typing_timer(move |generation| {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    timer_room
                        .typing_elapsed(directory.as_ref(), &timer_student, generation)
                        .await;
                })
            });

            mirror.update(student_id, code.as_str());
            registry.broadcast_to_admins(
                &CodeUpdateEvent {
                    student_id: student_id.to_owned(),
                    code,
                }
                .into(),
            );
            if let Some(event) = event {
                registry.broadcast_to_admins(&event.clone().into());
                persist(self.directory.as_ref(), &handle.session_id, &event).await;
            }
        }

        tracing::debug!(session_id = %handle.session_id, student_id, "Code updated");
        Ok(())
    }

    /// Handle a client-requested status.
    ///
    /// # Errors
    /// Returns `NotRegistered` if the handle is not the student's live
    /// channel, or `MalformedMessage` for admin handles.
    pub async fn status_update(
        &self,
        handle: &ChannelHandle,
        requested: RequestedStatus,
    ) -> Result<(), SyncError> {
        let student_id = handle.student_id().ok_or_else(|| {
            SyncError::MalformedMessage("status_update is only accepted from students".to_string())
        })?;
        let room = self
            .existing_room(&handle.session_id)
            .await
            .ok_or(SyncError::NotRegistered)?;

        {
            let mut state = room.state.lock().await;
            let slot = state
                .registry
                .live_student_mut(student_id, handle.channel_id)
                .ok_or(SyncError::NotRegistered)?;
            let event = transition(
                student_id,
                slot,
                Trigger::Requested(requested),
                Instant::now(),
            );
            if let Some(event) = event {
                slot.cancel_typing_timer();
                state.registry.broadcast_to_admins(&event.clone().into());
                persist(self.directory.as_ref(), &handle.session_id, &event).await;
            }
        }
        Ok(())
    }

    /// Record which student an admin is viewing.
    ///
    /// Bookkeeping only: every admin keeps receiving every student's
    /// events and filters them client-side.
    ///
    /// # Errors
    /// Returns `MalformedMessage` for student handles and `NotRegistered`
    /// for unknown admin channels.
    pub async fn view_student(
        &self,
        handle: &ChannelHandle,
        student_id: Option<StudentId>,
    ) -> Result<(), SyncError> {
        if !handle.is_admin() {
            return Err(SyncError::MalformedMessage(
                "view_student is only accepted from admins".to_string(),
            ));
        }
        let room = self
            .existing_room(&handle.session_id)
            .await
            .ok_or(SyncError::NotRegistered)?;
        let mut state = room.state.lock().await;
        if !state.registry.set_focus(handle.channel_id, student_id) {
            return Err(SyncError::NotRegistered);
        }
        Ok(())
    }

    /// Student an admin channel is focused on.
    pub async fn focused_student(&self, handle: &ChannelHandle) -> Option<StudentId> {
        let room = self.existing_room(&handle.session_id).await?;
        let state = room.state.lock().await;
        state.registry.focus(handle.channel_id).map(ToOwned::to_owned)
    }

    /// Entry point for the task-assignment collaborator.
    ///
    /// Records the assignment and sends `task_assigned` to the student if
    /// connected. Returns whether it was delivered; offline students get no
    /// catch-up delivery.
    ///
    /// # Errors
    /// Returns `UnknownSession` if the directory does not know the session.
    pub async fn notify_task_assigned(
        &self,
        session_id: &str,
        student_id: &str,
        task: Value,
    ) -> Result<bool, SyncError> {
        let room = self.room(session_id).await?;
        let assignment = TaskAssignment {
            student_id: student_id.to_owned(),
            task,
        };

        let mut state = room.state.lock().await;
        let RoomState { registry, mirror } = &mut *state;
        registry.student_entry(student_id, Instant::now()).assignment = Some(AssignedTask {
            task_id: assignment.task_id(),
            template: assignment.template(),
        });
        // The student's editor restarts from the new template.
        mirror.remove(student_id);
        let delivered = registry.send_to_student(student_id, assignment.into());
        drop(state);

        tracing::info!(session_id, student_id, delivered, "Task assigned");
        Ok(delivered)
    }

    /// Latest code of a student, or the starter template of their task.
    ///
    /// # Errors
    /// Returns `UnknownSession` if the directory does not know the session,
    /// or a directory error if the catalog lookup fails.
    pub async fn live_code(&self, session_id: &str, student_id: &str) -> Result<String, SyncError> {
        let room = self.room(session_id).await?;
        let state = room.state.lock().await;
        let assignment = state
            .registry
            .student(student_id)
            .and_then(|slot| slot.assignment.as_ref());

        let mut template = assignment.and_then(|a| a.template.clone());
        if template.is_none() && state.mirror.get(student_id).is_none() {
            if let Some(task_id) = assignment.and_then(|a| a.task_id.as_deref()) {
                template = self.catalog.starter_template(task_id).await?;
            }
        }
        Ok(state.mirror.read(student_id, template.as_deref()))
    }

    /// Presence of every student the session has seen, sorted by id.
    ///
    /// # Errors
    /// Returns `UnknownSession` if the directory does not know the session.
    pub async fn roster(&self, session_id: &str) -> Result<Vec<PresenceSnapshot>, SyncError> {
        let room = self.room(session_id).await?;
        let state = room.state.lock().await;
        let mut roster: Vec<PresenceSnapshot> = state
            .registry
            .students()
            .map(|(id, slot)| PresenceSnapshot {
                student_id: id.clone(),
                status: slot.presence.status(),
                last_seen: slot.presence.last_seen(),
                connected: slot.is_connected(),
                task_id: slot.assignment.as_ref().and_then(|a| a.task_id.clone()),
            })
            .collect();
        roster.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        Ok(roster)
    }

    /// Drop a session and close every channel in it.
    ///
    /// Returns `false` if the session had no live room.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let Some(room) = self.rooms.write().await.remove(session_id) else {
            return false;
        };
        room.state.lock().await.registry.close_all();
        tracing::info!(session_id, "Session closed");
        true
    }

    /// Mark students without recent activity as `afk`.
    ///
    /// Returns the number of students that changed status.
    pub async fn sweep_idle(&self) -> usize {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let trigger = Trigger::Sweep {
            afk_after: self.config.afk_after(),
        };
        let now = Instant::now();
        let mut changed = 0;

        for room in rooms {
            let mut state = room.state.lock().await;
            let events: Vec<PresenceEvent> = state
                .registry
                .students_mut()
                .filter_map(|(id, slot)| transition(id, slot, trigger, now))
                .collect();
            for event in &events {
                state.registry.broadcast_to_admins(&event.clone().into());
                tracing::debug!(session_id = %room.id, student_id = %event.student_id, "Student is AFK");
                persist(self.directory.as_ref(), &room.id, event).await;
            }
            changed += events.len();
        }
        changed
    }

    /// Run [`sweep_idle`](Self::sweep_idle) on the configured interval.
    ///
    /// The task holds only a weak reference and stops once the hub is
    /// dropped.
    pub fn spawn_afk_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub: Weak<Self> = Arc::downgrade(self);
        let period = self.config.afk_sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                let changed = hub.sweep_idle().await;
                if changed > 0 {
                    tracing::debug!(changed, "AFK sweep");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use classroom_core::{DirectoryError, EmptyCatalog};
    use serde_json::json;
    use tokio_test::assert_ok;

    use super::*;
    use crate::storage::{MemoryDirectory, MemoryTaskCatalog};

    const SESSION: &str = "S1";

    fn hub_with(config: SyncConfig) -> (Arc<SessionHub>, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        directory.insert_session(SESSION);
        let hub = SessionHub::new(directory.clone(), Arc::new(EmptyCatalog), config);
        (Arc::new(hub), directory)
    }

    fn hub() -> Arc<SessionHub> {
        hub_with(SyncConfig::default()).0
    }

    async fn admin(hub: &SessionHub) -> (ChannelHandle, OutboundReceiver) {
        let (tx, rx) = hub.outbound_channel();
        let handle = assert_ok!(hub.register(SESSION, ChannelRole::Admin, tx).await);
        (handle, rx)
    }

    async fn student(hub: &SessionHub, id: &str) -> (ChannelHandle, OutboundReceiver) {
        let (tx, rx) = hub.outbound_channel();
        let handle = assert_ok!(
            hub.register(SESSION, ChannelRole::Student(id.into()), tx)
                .await
        );
        (handle, rx)
    }

    fn status_of(event: &ServerEvent) -> Option<(&str, StudentStatus)> {
        match event {
            ServerEvent::StudentUpdate {
                user_id, status, ..
            } => Some((user_id.as_str(), *status)),
            _ => None,
        }
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<ServerEvent> {
        std::iter::from_fn(|| rx.try_recv()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_alice_end_to_end() {
        let (hub, directory) = hub_with(SyncConfig::default());
        let (_admin, mut admin_rx) = admin(&hub).await;

        let (alice, _alice_rx) = student(&hub, "alice").await;
        let event = admin_rx.recv().await.unwrap();
        assert_eq!(status_of(&event), Some(("alice", StudentStatus::Online)));

        hub.code_update(&alice, "print(1)".into()).await.unwrap();
        assert_eq!(
            admin_rx.recv().await,
            Some(ServerEvent::LiveCodeUpdate {
                user_id: "alice".into(),
                code: "print(1)".into(),
            })
        );
        let event = admin_rx.recv().await.unwrap();
        assert_eq!(status_of(&event), Some(("alice", StudentStatus::Typing)));

        let before = Instant::now();
        let event = admin_rx.recv().await.unwrap();
        assert_eq!(status_of(&event), Some(("alice", StudentStatus::Online)));
        let idle = before.elapsed();
        assert!(idle >= Duration::from_millis(2_000));
        assert!(idle <= Duration::from_millis(2_001));

        hub.unregister(&alice).await;
        let event = admin_rx.recv().await.unwrap();
        assert_eq!(status_of(&event), Some(("alice", StudentStatus::Offline)));

        let record = directory.student(SESSION, "alice").unwrap();
        assert_eq!(record.status, StudentStatus::Offline);
    }

    /// Directory whose `online` writes take a while to land.
    struct SlowOnlineDirectory {
        inner: Arc<MemoryDirectory>,
    }

    #[async_trait::async_trait]
    impl SessionDirectory for SlowOnlineDirectory {
        async fn session_exists(&self, session_id: &str) -> Result<bool, DirectoryError> {
            self.inner.session_exists(session_id).await
        }

        async fn record_presence(
            &self,
            session_id: &str,
            student_id: &str,
            status: StudentStatus,
            last_seen: i64,
        ) -> Result<(), DirectoryError> {
            if status == StudentStatus::Online {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            self.inner
                .record_presence(session_id, student_id, status, last_seen)
                .await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_persisted_after_slow_idle_write() {
        let inner = Arc::new(MemoryDirectory::new());
        inner.insert_session(SESSION);
        let hub = Arc::new(SessionHub::new(
            Arc::new(SlowOnlineDirectory {
                inner: inner.clone(),
            }),
            Arc::new(EmptyCatalog),
            SyncConfig::default(),
        ));
        let (alice, _rx) = student(&hub, "alice").await;

        hub.code_update(&alice, "x".into()).await.unwrap();
        // The idle timer fires at 2000 ms and is still writing `online`.
        tokio::time::sleep(Duration::from_millis(2_005)).await;
        hub.unregister(&alice).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let record = inner.student(SESSION, "alice").unwrap();
        assert_eq!(record.status, StudentStatus::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_timer_resets_on_each_edit() {
        let hub = hub();
        let (_admin, mut admin_rx) = admin(&hub).await;
        let (alice, _rx) = student(&hub, "alice").await;

        hub.code_update(&alice, "a".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        hub.code_update(&alice, "ab".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let statuses: Vec<StudentStatus> = drain(&mut admin_rx)
            .iter()
            .filter_map(status_of)
            .map(|(_, s)| s)
            .collect();
        assert_eq!(statuses, vec![StudentStatus::Online, StudentStatus::Typing]);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let event = admin_rx.try_recv().unwrap();
        assert_eq!(status_of(&event), Some(("alice", StudentStatus::Online)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_updates_keep_order_for_every_admin() {
        let hub = hub();
        let (_a1, mut rx1) = admin(&hub).await;
        let (_a2, mut rx2) = admin(&hub).await;
        let (alice, _rx) = student(&hub, "alice").await;

        for n in 0..10 {
            hub.code_update(&alice, format!("v{n}")).await.unwrap();
        }

        for rx in [&mut rx1, &mut rx2] {
            let codes: Vec<String> = drain(rx)
                .into_iter()
                .filter_map(|e| match e {
                    ServerEvent::LiveCodeUpdate { code, .. } => Some(code),
                    _ => None,
                })
                .collect();
            let expected: Vec<String> = (0..10).map(|n| format!("v{n}")).collect();
            assert_eq!(codes, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_afk_then_online_emits_single_online() {
        let hub = hub();
        let (_admin, mut admin_rx) = admin(&hub).await;
        let (alice, _rx) = student(&hub, "alice").await;
        drain(&mut admin_rx);

        hub.status_update(&alice, RequestedStatus::Afk).await.unwrap();
        hub.status_update(&alice, RequestedStatus::Online)
            .await
            .unwrap();

        let statuses: Vec<StudentStatus> = drain(&mut admin_rx)
            .iter()
            .filter_map(status_of)
            .map(|(_, s)| s)
            .collect();
        assert_eq!(statuses, vec![StudentStatus::Afk, StudentStatus::Online]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_marks_idle_student_afk() {
        let hub = hub();
        let _sweeper = hub.spawn_afk_sweeper();
        let (_admin, mut admin_rx) = admin(&hub).await;
        let (_alice, _rx) = student(&hub, "alice").await;
        drain(&mut admin_rx);

        let start = Instant::now();
        let event = admin_rx.recv().await.unwrap();
        assert_eq!(status_of(&event), Some(("alice", StudentStatus::Afk)));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(300));
        assert!(waited <= Duration::from_secs(330));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session_is_refused() {
        let hub = hub();
        let (tx, _rx) = hub.outbound_channel();
        let result = hub.register("nope", ChannelRole::Admin, tx).await;
        assert!(matches!(result, Err(SyncError::UnknownSession(id)) if id == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_student_replaces_previous() {
        let hub = hub();
        let (_admin, mut admin_rx) = admin(&hub).await;
        let (first, mut first_rx) = student(&hub, "alice").await;
        let (second, _second_rx) = student(&hub, "alice").await;

        // The displaced transport sees its queue end.
        assert_eq!(first_rx.recv().await, None);

        // Its late cleanup must not take the new connection offline.
        hub.unregister(&first).await;
        assert!(matches!(
            hub.code_update(&first, "stale".into()).await,
            Err(SyncError::NotRegistered)
        ));
        assert_ok!(hub.code_update(&second, "fresh".into()).await);

        let statuses: Vec<StudentStatus> = drain(&mut admin_rx)
            .iter()
            .filter_map(status_of)
            .map(|(_, s)| s)
            .collect();
        assert_eq!(statuses, vec![StudentStatus::Online, StudentStatus::Typing]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_student_rejected_by_policy() {
        let config = SyncConfig {
            duplicate_policy: DuplicatePolicy::Reject,
            ..SyncConfig::default()
        };
        let (hub, _) = hub_with(config);
        let (_first, _rx) = student(&hub, "alice").await;

        let (tx, _rx2) = hub.outbound_channel();
        let result = hub
            .register(SESSION, ChannelRole::Student("alice".into()), tx)
            .await;
        assert!(matches!(result, Err(SyncError::DuplicateIdentity { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_is_idempotent() {
        let hub = hub();
        let (_admin, mut admin_rx) = admin(&hub).await;
        let (alice, _rx) = student(&hub, "alice").await;
        drain(&mut admin_rx);

        hub.unregister(&alice).await;
        hub.unregister(&alice).await;
        assert_eq!(drain(&mut admin_rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_typing_timer() {
        let hub = hub();
        let (_admin, mut admin_rx) = admin(&hub).await;
        let (alice, _rx) = student(&hub, "alice").await;
        hub.code_update(&alice, "x".into()).await.unwrap();
        hub.unregister(&alice).await;
        drain(&mut admin_rx);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(drain(&mut admin_rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_assignment_goes_to_named_student_only() {
        let hub = hub();
        let (_alice, mut alice_rx) = student(&hub, "alice").await;
        let (_bob, mut bob_rx) = student(&hub, "bob").await;

        let task = json!({"id": "t1", "title": "Loops", "template": "for i in range(3):"});
        let delivered = hub
            .notify_task_assigned(SESSION, "alice", task.clone())
            .await
            .unwrap();
        assert!(delivered);
        assert_eq!(alice_rx.try_recv(), Some(ServerEvent::TaskAssigned { task }));
        assert_eq!(bob_rx.try_recv(), None);

        let offline = hub
            .notify_task_assigned(SESSION, "carol", json!({"id": "t2"}))
            .await
            .unwrap();
        assert!(!offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_code_falls_back_to_templates() {
        let directory = Arc::new(MemoryDirectory::new());
        directory.insert_session(SESSION);
        let catalog = Arc::new(MemoryTaskCatalog::new());
        catalog.insert_template("t2", "def solve():");
        let hub = SessionHub::new(directory, catalog, SyncConfig::default());

        let (alice, _rx) = student(&hub, "alice").await;
        assert_eq!(hub.live_code(SESSION, "alice").await.unwrap(), "");

        hub.notify_task_assigned(SESSION, "alice", json!({"id": "t1", "template": "# start"}))
            .await
            .unwrap();
        assert_eq!(hub.live_code(SESSION, "alice").await.unwrap(), "# start");

        hub.code_update(&alice, "print(1)".into()).await.unwrap();
        assert_eq!(hub.live_code(SESSION, "alice").await.unwrap(), "print(1)");

        hub.notify_task_assigned(SESSION, "alice", json!({"id": "t2"}))
            .await
            .unwrap();
        assert_eq!(
            hub.live_code(SESSION, "alice").await.unwrap(),
            "def solve():"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_student_only_tracks_focus() {
        let hub = hub();
        let (watcher, mut watcher_rx) = admin(&hub).await;
        let (_other, mut other_rx) = admin(&hub).await;
        hub.view_student(&watcher, Some("bob".into())).await.unwrap();
        assert_eq!(hub.focused_student(&watcher).await.as_deref(), Some("bob"));

        let (alice, _rx) = student(&hub, "alice").await;
        hub.code_update(&alice, "x".into()).await.unwrap();

        // Delivery is not scoped by focus.
        assert_eq!(drain(&mut watcher_rx).len(), 3);
        assert_eq!(drain(&mut other_rx).len(), 3);

        assert!(matches!(
            hub.view_student(&alice, Some("bob".into())).await,
            Err(SyncError::MalformedMessage(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_and_close_session() {
        let hub = hub();
        let (_alice, mut alice_rx) = student(&hub, "alice").await;
        let (bob, _bob_rx) = student(&hub, "bob").await;
        hub.unregister(&bob).await;

        let roster = hub.roster(SESSION).await.unwrap();
        let summary: Vec<(&str, StudentStatus, bool)> = roster
            .iter()
            .map(|s| (s.student_id.as_str(), s.status, s.connected))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("alice", StudentStatus::Online, true),
                ("bob", StudentStatus::Offline, false),
            ]
        );

        assert!(hub.close_session(SESSION).await);
        assert!(!hub.close_session(SESSION).await);
        assert_eq!(alice_rx.recv().await, None);
    }
}
