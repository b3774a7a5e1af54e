//! Live channels of a single session.

use std::{collections::HashMap, fmt};

use classroom_core::{OutboundSender, Presence, ServerEvent, SessionId, StudentId};
use tokio::{task::JoinHandle, time::Instant};
use uuid::Uuid;

/// Channel identifier.
pub type ChannelId = Uuid;

/// Who is on the other end of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRole {
    /// A student, identified within the session.
    Student(StudentId),
    /// An instructor; many may share a session.
    Admin,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Student(id) => write!(f, "student {id}"),
            Self::Admin => f.write_str("admin"),
        }
    }
}

/// Handle returned by registration and used for every later operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub session_id: SessionId,
    pub channel_id: ChannelId,
    pub role: ChannelRole,
}

impl ChannelHandle {
    /// Student identity, for student channels.
    #[must_use]
    pub fn student_id(&self) -> Option<&str> {
        match &self.role {
            ChannelRole::Student(id) => Some(id),
            ChannelRole::Admin => None,
        }
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, ChannelRole::Admin)
    }
}

/// Assignment currently held by a student.
#[derive(Debug, Clone, Default)]
pub struct AssignedTask {
    pub task_id: Option<String>,
    pub template: Option<String>,
}

#[derive(Debug)]
struct StudentLink {
    channel_id: ChannelId,
    sender: OutboundSender,
}

/// Everything the session knows about one student.
///
/// The slot outlives the student's channel so presence, the assignment
/// and `last_seen` survive a disconnect.
#[derive(Debug)]
pub struct StudentSlot {
    link: Option<StudentLink>,
    pub presence: Presence,
    pub assignment: Option<AssignedTask>,
    typing_timer: Option<JoinHandle<()>>,
    typing_generation: u64,
}

impl StudentSlot {
    fn new(now: Instant) -> Self {
        Self {
            link: None,
            presence: Presence::offline(now),
            assignment: None,
            typing_timer: None,
            typing_generation: 0,
        }
    }

    /// Whether a channel is currently attached.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Channel currently attached, if any.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.link.as_ref().map(|l| l.channel_id)
    }

    /// Replace the pending typing-idle timer.
    ///
    /// `spawn` receives the generation the timer must present when it
    /// fires; any later reset or cancel invalidates it.
    pub fn rearm_typing_timer<F>(&mut self, spawn: F)
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        self.cancel_typing_timer();
        self.typing_timer = Some(spawn(self.typing_generation));
    }

    /// Abort the pending typing-idle timer, if any.
    pub fn cancel_typing_timer(&mut self) {
        self.typing_generation = self.typing_generation.wrapping_add(1);
        if let Some(timer) = self.typing_timer.take() {
            timer.abort();
        }
    }

    /// Consume a fired timer. Returns `false` if it was superseded.
    pub fn take_typing_timer(&mut self, generation: u64) -> bool {
        if self.typing_generation != generation {
            return false;
        }
        self.typing_timer = None;
        true
    }
}

#[derive(Debug)]
struct AdminSlot {
    sender: OutboundSender,
    focused_student: Option<StudentId>,
}

/// Live student and admin channels of one session.
#[derive(Debug, Default)]
pub struct Registry {
    students: HashMap<StudentId, StudentSlot>,
    admins: HashMap<ChannelId, AdminSlot>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the student currently has a live channel.
    #[must_use]
    pub fn is_student_live(&self, student_id: &str) -> bool {
        self.students
            .get(student_id)
            .is_some_and(StudentSlot::is_connected)
    }

    /// Attach a channel to a student, creating the slot on first contact.
    ///
    /// Returns the slot and the id of a channel that was displaced. The
    /// displaced channel's sender is dropped, which ends its transport.
    pub fn attach_student(
        &mut self,
        student_id: &str,
        channel_id: ChannelId,
        sender: OutboundSender,
        now: Instant,
    ) -> (&mut StudentSlot, Option<ChannelId>) {
        let slot = self.student_entry(student_id, now);
        slot.cancel_typing_timer();
        let replaced = slot
            .link
            .replace(StudentLink { channel_id, sender })
            .map(|old| old.channel_id);
        (slot, replaced)
    }

    /// Detach a student channel.
    ///
    /// Returns `false` (and changes nothing) when the channel is not the
    /// one currently attached.
    pub fn detach_student(&mut self, student_id: &str, channel_id: ChannelId) -> bool {
        let Some(slot) = self.students.get_mut(student_id) else {
            return false;
        };
        if slot.channel_id() != Some(channel_id) {
            return false;
        }
        slot.link = None;
        slot.cancel_typing_timer();
        true
    }

    pub fn attach_admin(&mut self, channel_id: ChannelId, sender: OutboundSender) {
        self.admins.insert(
            channel_id,
            AdminSlot {
                sender,
                focused_student: None,
            },
        );
    }

    /// Returns `false` if the admin channel was already gone.
    pub fn detach_admin(&mut self, channel_id: ChannelId) -> bool {
        self.admins.remove(&channel_id).is_some()
    }

    /// Record which student an admin is looking at.
    pub fn set_focus(&mut self, channel_id: ChannelId, student_id: Option<StudentId>) -> bool {
        self.admins.get_mut(&channel_id).is_some_and(|admin| {
            admin.focused_student = student_id;
            true
        })
    }

    #[must_use]
    pub fn focus(&self, channel_id: ChannelId) -> Option<&str> {
        self.admins
            .get(&channel_id)
            .and_then(|a| a.focused_student.as_deref())
    }

    /// Enqueue an event for every admin. Returns how many accepted it.
    pub fn broadcast_to_admins(&self, event: &ServerEvent) -> usize {
        self.admins
            .values()
            .filter(|admin| admin.sender.deliver(event.clone()))
            .count()
    }

    /// Enqueue an event for one student's live channel.
    ///
    /// Returns `false` when the student is not connected; nothing is
    /// queued for later.
    pub fn send_to_student(&self, student_id: &str, event: ServerEvent) -> bool {
        self.students
            .get(student_id)
            .and_then(|slot| slot.link.as_ref())
            .is_some_and(|link| link.sender.deliver(event))
    }

    #[must_use]
    pub fn student(&self, student_id: &str) -> Option<&StudentSlot> {
        self.students.get(student_id)
    }

    pub fn student_mut(&mut self, student_id: &str) -> Option<&mut StudentSlot> {
        self.students.get_mut(student_id)
    }

    /// Slot of a student, created offline if unknown.
    pub fn student_entry(&mut self, student_id: &str, now: Instant) -> &mut StudentSlot {
        self.students
            .entry(student_id.to_owned())
            .or_insert_with(|| StudentSlot::new(now))
    }

    /// Slot of a student whose live channel is `channel_id`.
    pub fn live_student_mut(
        &mut self,
        student_id: &str,
        channel_id: ChannelId,
    ) -> Option<&mut StudentSlot> {
        self.students
            .get_mut(student_id)
            .filter(|slot| slot.channel_id() == Some(channel_id))
    }

    pub fn students(&self) -> impl Iterator<Item = (&StudentId, &StudentSlot)> {
        self.students.iter()
    }

    pub fn students_mut(&mut self) -> impl Iterator<Item = (&StudentId, &mut StudentSlot)> {
        self.students.iter_mut()
    }

    #[must_use]
    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }

    /// Drop every channel and timer.
    pub fn close_all(&mut self) {
        for slot in self.students.values_mut() {
            slot.link = None;
            slot.cancel_typing_timer();
        }
        self.admins.clear();
    }
}

#[cfg(test)]
mod tests {
    use classroom_core::{StudentStatus, outbound};

    use super::*;

    fn offline(id: &str) -> ServerEvent {
        ServerEvent::StudentUpdate {
            user_id: id.into(),
            status: StudentStatus::Offline,
            last_seen: None,
        }
    }

    #[test]
    fn test_broadcast_reaches_every_admin() {
        let mut registry = Registry::new();
        let (tx1, mut rx1) = outbound::channel(4);
        let (tx2, mut rx2) = outbound::channel(4);
        registry.attach_admin(Uuid::new_v4(), tx1);
        registry.attach_admin(Uuid::new_v4(), tx2);

        assert_eq!(registry.broadcast_to_admins(&offline("alice")), 2);
        assert_eq!(rx1.try_recv(), Some(offline("alice")));
        assert_eq!(rx2.try_recv(), Some(offline("alice")));
    }

    #[test]
    fn test_gone_admin_does_not_block_others() {
        let mut registry = Registry::new();
        let (tx1, rx1) = outbound::channel(4);
        let (tx2, mut rx2) = outbound::channel(4);
        registry.attach_admin(Uuid::new_v4(), tx1);
        registry.attach_admin(Uuid::new_v4(), tx2);
        drop(rx1);

        assert_eq!(registry.broadcast_to_admins(&offline("alice")), 1);
        assert_eq!(rx2.try_recv(), Some(offline("alice")));
    }

    #[test]
    fn test_send_to_offline_student_is_dropped() {
        let mut registry = Registry::new();
        let now = Instant::now();
        registry.student_entry("alice", now);
        assert!(!registry.send_to_student("alice", offline("alice")));
        assert!(!registry.send_to_student("nobody", offline("nobody")));
    }

    #[test]
    fn test_replacing_student_closes_previous_channel() {
        let mut registry = Registry::new();
        let now = Instant::now();
        let (first_tx, mut first_rx) = outbound::channel(4);
        let (second_tx, mut second_rx) = outbound::channel(4);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let (_, replaced) = registry.attach_student("alice", first, first_tx, now);
        assert_eq!(replaced, None);
        let (_, replaced) = registry.attach_student("alice", second, second_tx, now);
        assert_eq!(replaced, Some(first));

        assert_eq!(first_rx.try_recv(), None);
        assert!(registry.send_to_student("alice", offline("alice")));
        assert!(second_rx.try_recv().is_some());

        // The displaced channel cannot detach its successor.
        assert!(!registry.detach_student("alice", first));
        assert!(registry.is_student_live("alice"));
        assert!(registry.detach_student("alice", second));
        assert!(!registry.detach_student("alice", second));
    }

    #[test]
    fn test_focus_is_per_admin() {
        let mut registry = Registry::new();
        let (tx, _rx) = outbound::channel(4);
        let admin = Uuid::new_v4();
        registry.attach_admin(admin, tx);

        assert!(registry.set_focus(admin, Some("alice".into())));
        assert_eq!(registry.focus(admin), Some("alice"));
        assert!(!registry.set_focus(Uuid::new_v4(), Some("bob".into())));
    }
}
