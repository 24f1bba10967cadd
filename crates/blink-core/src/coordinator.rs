//! The room/session coordinator for BlinkRoom.
//!
//! The coordinator owns the room map and the session registry and exposes
//! every room-mutating operation: join, presence, text messages with vanish
//! timers and read receipts, FlashPics, and disconnect. Operations mutate
//! state under the owning room's map entry lock and return [`Intent`]s for
//! the broadcast gateway to execute, so business rules stay testable without
//! a live transport.
//!
//! Rooms are independent; the per-entry locking of [`DashMap`] serializes
//! mutations of one room while letting distinct rooms proceed in parallel.

use crate::intent::{Intent, VanishSchedule};
use crate::registry::{RoomId, SessionId, SessionRegistry};
use crate::room::{
    format_clock_time, generate_message_id, normalize_room_id, validate_room_id, FlashPic,
    ReceiptState, Room,
};
use blink_protocol::{MessageId, MessageKind, PresenceStatus, ServerEvent, UserEntry};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, trace};

/// The vanish delays a client may request, in seconds. 0 means never.
pub const VANISH_CHOICES: [u32; 4] = [0, 10, 30, 60];

/// Clamp a requested vanish delay down to the nearest allowed value.
#[must_use]
pub fn clamp_vanish_secs(requested: u32) -> u32 {
    VANISH_CHOICES
        .iter()
        .copied()
        .filter(|v| *v <= requested)
        .max()
        .unwrap_or(0)
}

/// Generate a six-character server instance identifier.
#[must_use]
pub fn instance_id() -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mut out = String::with_capacity(6);
    for _ in 0..6 {
        out.push(ALPHABET[(seed % 36) as usize] as char);
        seed /= 36;
    }
    out
}

/// Why a join was rejected. Non-fatal; surfaced to the requester only.
#[derive(Debug, Error)]
pub enum JoinError {
    /// Missing or blank name/room.
    #[error("Invalid input")]
    InvalidInput,

    /// The display name is taken in the target room.
    #[error("Username \"{name}\" is already taken in room {room}.")]
    NameConflict { name: String, room: RoomId },

    /// Creating the room would exceed the room limit.
    #[error("Room limit reached")]
    RoomLimit,
}

/// Why a FlashPic view was rejected. Unicast to the requester as a reason.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewError {
    /// No such pending image (expired or invalid id).
    #[error("Expired or invalid.")]
    NotFound,

    /// The sender may never view their own image.
    #[error("Cannot view own.")]
    SelfView,

    /// This session already consumed its single view.
    #[error("Already viewed.")]
    AlreadyViewed,
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Server instance identifier echoed to clients at join time.
    pub instance: String,
    /// Maximum number of live rooms.
    pub max_rooms: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance: instance_id(),
            max_rooms: 10_000,
        }
    }
}

/// Coordinator statistics.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of registered sessions.
    pub session_count: usize,
}

/// The central room/session state machine.
pub struct Coordinator {
    /// Rooms indexed by normalized id.
    rooms: DashMap<RoomId, Room>,
    /// All connected sessions.
    registry: SessionRegistry,
    /// Configuration.
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Create a coordinator with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    /// Create a coordinator with custom configuration.
    #[must_use]
    pub fn with_config(config: CoordinatorConfig) -> Self {
        info!(instance = %config.instance, "Creating coordinator");
        Self {
            rooms: DashMap::new(),
            registry: SessionRegistry::new(),
            config,
        }
    }

    /// The server instance identifier.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.config.instance
    }

    /// Get coordinator statistics.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            room_count: self.rooms.len(),
            session_count: self.registry.count(),
        }
    }

    /// Join a room under a display name.
    ///
    /// Normalizes the room id, enforces per-room case-insensitive name
    /// uniqueness, creates the room lazily ("Room created" is logged exactly
    /// once per room lifetime), and returns the broadcasts plus the unicast
    /// `Joined` reply carrying the full activity log.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError`] on blank input, a name conflict, or too many
    /// rooms; the caller surfaces it to the requester as `LoginFailed`.
    pub fn join(
        &self,
        session_id: &str,
        username: &str,
        room_id: &str,
    ) -> Result<Vec<Intent>, JoinError> {
        let name = username.trim();
        let room_id = normalize_room_id(room_id);
        if name.is_empty() || validate_room_id(&room_id).is_err() {
            return Err(JoinError::InvalidInput);
        }

        if !self.rooms.contains_key(&room_id) && self.rooms.len() >= self.config.max_rooms {
            return Err(JoinError::RoomLimit);
        }

        let mut intents = Vec::new();

        let mut room = match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(occupied) => occupied.into_ref(),
            Entry::Vacant(vacant) => {
                info!(room = %room_id, "Room created");
                let mut room = Room::new(room_id.clone());
                let entry = room.append_log("Room created", None);
                intents.push(Intent::room(room_id.clone(), ServerEvent::room_log(entry)));
                vacant.insert(room)
            }
        };

        // The uniqueness scan and the registration both run under the room's
        // entry lock, so joins racing on the same room serialize here.
        let wanted = name.to_lowercase();
        let taken = room.members().iter().any(|sid| {
            self.registry
                .get(sid)
                .is_some_and(|s| s.username.to_lowercase() == wanted)
        });
        if taken || !self.registry.register(session_id, name, &room_id) {
            let fresh = room.is_empty();
            drop(room);
            if fresh {
                // A rejected join must not leave an empty room behind.
                self.rooms.remove_if(&room_id, |_, r| r.is_empty());
            }
            return Err(JoinError::NameConflict {
                name: name.to_string(),
                room: room_id,
            });
        }

        room.add_member(session_id);
        let entry = room.append_log("joined the room", Some(name.to_string()));
        intents.push(Intent::room(room_id.clone(), ServerEvent::room_log(entry)));
        let log = room.log().to_vec();
        drop(room);

        intents.push(self.user_list_intent(&room_id));
        intents.push(Intent::session(
            session_id,
            ServerEvent::Joined {
                username: name.to_string(),
                room_id: room_id.clone(),
                log,
                instance: self.config.instance.clone(),
            },
        ));

        info!(session = %session_id, user = %name, room = %room_id, "Joined room");
        Ok(intents)
    }

    /// Switch a session between online and idle.
    ///
    /// Unknown sessions are a silent no-op.
    pub fn set_status(&self, session_id: &str, status: PresenceStatus) -> Vec<Intent> {
        match self.registry.set_status(session_id, status) {
            Some(room_id) => vec![self.user_list_intent(&room_id)],
            None => Vec::new(),
        }
    }

    /// Broadcast a typing-state change to everyone but the originator.
    pub fn set_typing(&self, session_id: &str, is_typing: bool) -> Vec<Intent> {
        let Some(session) = self.registry.get(session_id) else {
            return Vec::new();
        };
        self.registry.touch(session_id);
        vec![Intent::room_except(
            session.room,
            session_id,
            ServerEvent::TypingUpdate {
                username: session.username,
                is_typing,
            },
        )]
    }

    /// Submit a text message.
    ///
    /// Empty or whitespace-only content is silently dropped. The sender is
    /// pre-marked in the receipt, so completion means every *other* member
    /// has read it. When a vanish delay is requested the returned
    /// [`VanishSchedule`] must be executed by the caller after the delay;
    /// delays outside [`VANISH_CHOICES`] are clamped down.
    pub fn submit_text(
        &self,
        session_id: &str,
        text: &str,
        vanish_secs: u32,
    ) -> (Vec<Intent>, Option<VanishSchedule>) {
        let Some(session) = self.registry.get(session_id) else {
            return (Vec::new(), None);
        };
        let content = text.trim();
        if content.is_empty() {
            return (Vec::new(), None);
        }
        let vanish_secs = clamp_vanish_secs(vanish_secs);

        let Some(mut room) = self.rooms.get_mut(&session.room) else {
            return (Vec::new(), None);
        };

        let id = generate_message_id();
        room.receipts.insert(id, ReceiptState::new(session_id));
        drop(room);

        trace!(session = %session_id, room = %session.room, id, vanish_secs, "Text message");

        let event = ServerEvent::Message {
            id,
            kind: MessageKind::Text,
            username: session.username.clone(),
            content: content.to_string(),
            time: format_clock_time(),
            sender: session_id.to_string(),
            vanish_secs,
        };

        let schedule = (vanish_secs > 0).then(|| VanishSchedule {
            room_id: session.room.clone(),
            message_id: id,
            sender_name: session.username.clone(),
            delay: Duration::from_secs(u64::from(vanish_secs)),
        });

        (vec![Intent::room(session.room, event)], schedule)
    }

    /// Run a deferred vanish action.
    ///
    /// Safe to run after the room is gone (no-op) and after the receipt was
    /// already removed by full-read completion (the removal is idempotent).
    pub fn expire_message(
        &self,
        room_id: &str,
        message_id: MessageId,
        sender_name: &str,
    ) -> Vec<Intent> {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            debug!(room = %room_id, id = message_id, "Vanish fired for a vanished room");
            return Vec::new();
        };

        room.receipts.remove(&message_id);
        let entry = room.append_log("message vanished", Some(sender_name.to_string()));
        drop(room);

        debug!(room = %room_id, id = message_id, "Message vanished");

        vec![
            Intent::room(room_id, ServerEvent::message_vanished(message_id)),
            Intent::room(room_id, ServerEvent::room_log(entry)),
        ]
    }

    /// Acknowledge that a session has read a message.
    ///
    /// A no-op when the receipt is unknown (already completed, expired, or
    /// never tracked). Completion is measured against *current* membership:
    /// members who joined after the send still count toward the threshold.
    pub fn mark_read(&self, session_id: &str, message_id: MessageId) -> Vec<Intent> {
        let Some(session) = self.registry.get(session_id) else {
            return Vec::new();
        };
        let Some(mut room) = self.rooms.get_mut(&session.room) else {
            return Vec::new();
        };

        let member_count = room.member_count();
        let Some(receipt) = room.receipts.get_mut(&message_id) else {
            return Vec::new();
        };

        receipt.viewed_by.insert(session_id.to_string());
        let complete = receipt.viewed_by.len() >= member_count;
        if !complete {
            return Vec::new();
        }

        room.receipts.remove(&message_id);
        debug!(room = %session.room, id = message_id, "Message fully read");
        vec![Intent::room(session.room, ServerEvent::message_read(message_id))]
    }

    /// Submit a FlashPic.
    ///
    /// Stores the payload and broadcasts a stub message; the payload itself
    /// is only ever unicast through [`Coordinator::view_image`].
    pub fn submit_image(&self, session_id: &str, payload: impl Into<Bytes>) -> Vec<Intent> {
        let Some(session) = self.registry.get(session_id) else {
            return Vec::new();
        };
        let Some(mut room) = self.rooms.get_mut(&session.room) else {
            return Vec::new();
        };

        let id = generate_message_id();
        room.flash_pics.insert(id, FlashPic::new(payload, session_id));
        let entry = room.append_log("sent a FlashPic", Some(session.username.clone()));
        drop(room);

        debug!(session = %session_id, room = %session.room, id, "FlashPic stored");

        let stub = ServerEvent::Message {
            id,
            kind: MessageKind::Flashpic,
            username: session.username,
            content: "[FlashPic]".to_string(),
            time: format_clock_time(),
            sender: session_id.to_string(),
            vanish_secs: 0,
        };

        vec![
            Intent::room(session.room.clone(), stub),
            Intent::room(session.room, ServerEvent::room_log(entry)),
        ]
    }

    /// View a FlashPic.
    ///
    /// On success the payload is unicast to the requester and the view is
    /// recorded; the image record itself stays until room teardown, so each
    /// further non-sender viewer still gets their one view. Failures are
    /// unicast as `FlashPicError` with the rejection reason.
    pub fn view_image(&self, session_id: &str, message_id: MessageId) -> Vec<Intent> {
        let Some(session) = self.registry.get(session_id) else {
            return Vec::new();
        };
        let Some(mut room) = self.rooms.get_mut(&session.room) else {
            return Vec::new();
        };

        match Self::take_view(&mut room, session_id, message_id) {
            Ok(payload) => vec![Intent::session(
                session_id,
                ServerEvent::FlashPicContent {
                    id: message_id,
                    payload: payload.to_vec(),
                },
            )],
            Err(err) => {
                debug!(session = %session_id, id = message_id, error = %err, "FlashPic view rejected");
                vec![Intent::session(
                    session_id,
                    ServerEvent::flash_pic_error(message_id, err.to_string()),
                )]
            }
        }
    }

    fn take_view(
        room: &mut Room,
        session_id: &str,
        message_id: MessageId,
    ) -> Result<Bytes, ViewError> {
        let pic = room
            .flash_pics
            .get_mut(&message_id)
            .ok_or(ViewError::NotFound)?;
        if pic.sender == session_id {
            return Err(ViewError::SelfView);
        }
        if pic.viewed_by.contains(session_id) {
            return Err(ViewError::AlreadyViewed);
        }
        pic.viewed_by.insert(session_id.to_string());
        Ok(pic.payload.clone())
    }

    /// Handle a disconnect.
    ///
    /// Silent no-op for sessions that never completed a join. Otherwise the
    /// session leaves its room; when the last member leaves, the room and
    /// all its pending receipts and FlashPics are discarded atomically.
    pub fn disconnect(&self, session_id: &str) -> Vec<Intent> {
        let Some(session) = self.registry.unregister(session_id) else {
            return Vec::new();
        };
        let room_id = session.room;

        let mut intents = Vec::new();
        let mut destroyed = false;

        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            room.remove_member(session_id);
            let entry = room.append_log("left the room", Some(session.username.clone()));
            intents.push(Intent::room(room_id.clone(), ServerEvent::room_log(entry)));
            destroyed = room.is_empty();
            drop(room); // Release the entry lock
        }

        if destroyed {
            // Re-checked under the map lock; a racing join keeps the room.
            if self
                .rooms
                .remove_if(&room_id, |_, room| room.is_empty())
                .is_some()
            {
                info!(room = %room_id, "Room destroyed");
                return intents;
            }
        }

        intents.push(self.user_list_intent(&room_id));
        intents
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Current member session ids of a room.
    #[must_use]
    pub fn room_members(&self, room_id: &str) -> Vec<SessionId> {
        self.rooms
            .get(room_id)
            .map(|room| room.members())
            .unwrap_or_default()
    }

    /// Snapshot of a room's activity log.
    #[must_use]
    pub fn room_log(&self, room_id: &str) -> Vec<blink_protocol::LogEntry> {
        self.rooms
            .get(room_id)
            .map(|room| room.log().to_vec())
            .unwrap_or_default()
    }

    /// Whether a read receipt is still pending for a message.
    #[must_use]
    pub fn has_pending_receipt(&self, room_id: &str, message_id: MessageId) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.receipts.contains_key(&message_id))
    }

    fn user_list(&self, room_id: &str) -> Vec<UserEntry> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.members()
            .iter()
            .filter_map(|sid| self.registry.get(sid))
            .map(|session| UserEntry {
                username: session.username,
                status: session.status,
            })
            .collect()
    }

    fn user_list_intent(&self, room_id: &str) -> Intent {
        Intent::room(
            room_id,
            ServerEvent::UpdateUserList {
                users: self.user_list(room_id),
            },
        )
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Scope;

    fn join(core: &Coordinator, sid: &str, name: &str, room: &str) {
        core.join(sid, name, room).expect("join should succeed");
    }

    fn sent_message_id(intents: &[Intent]) -> MessageId {
        intents
            .iter()
            .find_map(|i| match &i.event {
                ServerEvent::Message { id, .. } => Some(*id),
                _ => None,
            })
            .expect("expected a Message intent")
    }

    fn has_event(intents: &[Intent], pred: impl Fn(&ServerEvent) -> bool) -> bool {
        intents.iter().any(|i| pred(&i.event))
    }

    #[test]
    fn test_clamp_vanish_secs() {
        assert_eq!(clamp_vanish_secs(0), 0);
        assert_eq!(clamp_vanish_secs(5), 0);
        assert_eq!(clamp_vanish_secs(10), 10);
        assert_eq!(clamp_vanish_secs(45), 30);
        assert_eq!(clamp_vanish_secs(60), 60);
        assert_eq!(clamp_vanish_secs(1000), 60);
    }

    #[test]
    fn test_join_normalizes_and_creates_room() {
        let core = Coordinator::new();
        let intents = core.join("s1", "Alice", "  Lobby ").unwrap();

        assert!(core.room_exists("lobby"));
        let log = core.room_log("lobby");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, "Room created");
        assert_eq!(log[1].action, "joined the room");
        assert_eq!(log[1].user.as_deref(), Some("Alice"));

        // Unicast Joined reply carries the full log and instance id.
        assert!(intents.iter().any(|i| matches!(
            (&i.scope, &i.event),
            (Scope::Session(sid), ServerEvent::Joined { log, .. })
                if sid.as_str() == "s1" && log.len() == 2
        )));
    }

    #[test]
    fn test_join_rejects_blank_input() {
        let core = Coordinator::new();
        assert!(matches!(
            core.join("s1", "   ", "lobby"),
            Err(JoinError::InvalidInput)
        ));
        assert!(matches!(
            core.join("s1", "Alice", "   "),
            Err(JoinError::InvalidInput)
        ));
        // A failed join must not leave a room behind.
        assert!(!core.room_exists("lobby"));
    }

    #[test]
    fn test_name_conflict_per_room_case_insensitive() {
        let core = Coordinator::new();
        join(&core, "s1", "Bob", "lobby");

        match core.join("s2", "bob", "lobby") {
            Err(JoinError::NameConflict { name, room }) => {
                assert_eq!(name, "bob");
                assert_eq!(room, "lobby");
            }
            other => panic!("Expected NameConflict, got {other:?}"),
        }

        // Same name in a different room is fine.
        assert!(core.join("s3", "Bob", "den").is_ok());
    }

    #[test]
    fn test_racing_joins_admit_one_name_per_room() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let core = Arc::new(Coordinator::new());
        for round in 0..200 {
            let room = format!("room-{round}");
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = [("a", "Bob"), ("b", "bob")]
                .into_iter()
                .map(|(sid, name)| {
                    let core = Arc::clone(&core);
                    let barrier = Arc::clone(&barrier);
                    let room = room.clone();
                    let sid = format!("{sid}-{round}");
                    let name = name.to_string();
                    thread::spawn(move || {
                        barrier.wait();
                        core.join(&sid, &name, &room).is_ok()
                    })
                })
                .collect();

            let admitted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(admitted, 1, "round {round}: expected exactly one winner");
        }
    }

    #[test]
    fn test_empty_room_destroyed_and_recreated_fresh() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");
        core.submit_text("s1", "hi", 0);

        core.disconnect("s1");
        assert!(!core.room_exists("lobby"));

        // A new joiner gets a fresh room with an empty history.
        join(&core, "s2", "Alice", "lobby");
        let log = core.room_log("lobby");
        assert_eq!(log[0].action, "Room created");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_room_survives_while_members_remain() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");
        join(&core, "s2", "Bob", "lobby");

        let intents = core.disconnect("s1");
        assert!(core.room_exists("lobby"));
        // Remaining members get the leave log and the shrunk user list.
        assert!(has_event(&intents, |e| matches!(
            e,
            ServerEvent::UpdateUserList { users } if users.len() == 1
        )));
    }

    #[test]
    fn test_submit_text_drops_blank_content() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");

        let (intents, schedule) = core.submit_text("s1", "   ", 10);
        assert!(intents.is_empty());
        assert!(schedule.is_none());
    }

    #[test]
    fn test_vanish_zero_never_schedules() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");

        let (intents, schedule) = core.submit_text("s1", "hi", 0);
        assert!(!intents.is_empty());
        assert!(schedule.is_none());
    }

    #[test]
    fn test_vanish_schedule_delay() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");

        let (_, schedule) = core.submit_text("s1", "hi", 10);
        let schedule = schedule.unwrap();
        assert_eq!(schedule.delay, Duration::from_secs(10));
        assert_eq!(schedule.room_id, "lobby");
        assert_eq!(schedule.sender_name, "Alice");
    }

    #[test]
    fn test_expiry_idempotent_after_full_read() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");
        join(&core, "s2", "Bob", "lobby");

        let (intents, schedule) = core.submit_text("s1", "hi", 10);
        let id = sent_message_id(&intents);
        let schedule = schedule.unwrap();

        // Fully read before the timer fires; the receipt is gone.
        let read = core.mark_read("s2", id);
        assert!(has_event(&read, |e| matches!(e, ServerEvent::MessageRead { .. })));
        assert!(!core.has_pending_receipt("lobby", id));

        // Timer still fires and must clean up without erroring.
        let expired = core.expire_message(&schedule.room_id, id, &schedule.sender_name);
        assert!(has_event(&expired, |e| matches!(
            e,
            ServerEvent::MessageVanished { .. }
        )));
    }

    #[test]
    fn test_expiry_noop_when_room_gone() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");
        let (intents, schedule) = core.submit_text("s1", "hi", 10);
        let id = sent_message_id(&intents);
        let schedule = schedule.unwrap();

        core.disconnect("s1");
        assert!(core.expire_message(&schedule.room_id, id, &schedule.sender_name).is_empty());
    }

    #[test]
    fn test_mark_read_threshold() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");
        join(&core, "s2", "Bob", "lobby");
        join(&core, "s3", "Carol", "lobby");

        let (intents, _) = core.submit_text("s1", "hi", 0);
        let id = sent_message_id(&intents);

        // N-1 of N viewers: no broadcast yet (sender is pre-counted).
        assert!(core.mark_read("s2", id).is_empty());
        // The Nth viewer completes the receipt, exactly once.
        let done = core.mark_read("s3", id);
        assert!(has_event(&done, |e| matches!(e, ServerEvent::MessageRead { .. })));
        // Further acknowledgements are no-ops.
        assert!(core.mark_read("s2", id).is_empty());
        assert!(core.mark_read("s3", id).is_empty());
    }

    #[test]
    fn test_late_joiner_raises_read_threshold() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");
        join(&core, "s2", "Bob", "lobby");

        let (intents, _) = core.submit_text("s1", "hi", 0);
        let id = sent_message_id(&intents);

        // Carol joins after the send; membership is evaluated at ack time.
        join(&core, "s3", "Carol", "lobby");

        assert!(core.mark_read("s2", id).is_empty());
        let done = core.mark_read("s3", id);
        assert!(has_event(&done, |e| matches!(e, ServerEvent::MessageRead { .. })));
    }

    #[test]
    fn test_two_member_scenario_read_receipt() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");
        join(&core, "s2", "Bob", "lobby");

        let (intents, schedule) = core.submit_text("s1", "hi", 0);
        assert!(schedule.is_none());
        let id = sent_message_id(&intents);
        assert!(has_event(&intents, |e| matches!(
            e,
            ServerEvent::Message { id: mid, content, .. } if *mid == id && content == "hi"
        )));

        // Bob is the only other member, so his ack completes the receipt.
        let done = core.mark_read("s2", id);
        assert!(has_event(&done, |e| matches!(
            e,
            ServerEvent::MessageRead { id: mid } if *mid == id
        )));
    }

    #[test]
    fn test_unknown_session_ops_are_noops() {
        let core = Coordinator::new();
        assert!(core.set_status("ghost", PresenceStatus::Idle).is_empty());
        assert!(core.set_typing("ghost", true).is_empty());
        assert!(core.submit_text("ghost", "hi", 0).0.is_empty());
        assert!(core.mark_read("ghost", 1).is_empty());
        assert!(core.submit_image("ghost", vec![1u8]).is_empty());
        assert!(core.view_image("ghost", 1).is_empty());
        assert!(core.disconnect("ghost").is_empty());
    }

    #[test]
    fn test_typing_excludes_originator() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");

        let intents = core.set_typing("s1", true);
        assert_eq!(intents.len(), 1);
        assert_eq!(
            intents[0].scope,
            Scope::RoomExcept("lobby".into(), "s1".into())
        );
    }

    #[test]
    fn test_status_change_broadcasts_user_list() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");

        let intents = core.set_status("s1", PresenceStatus::Idle);
        assert!(has_event(&intents, |e| matches!(
            e,
            ServerEvent::UpdateUserList { users }
                if users.len() == 1 && users[0].status == PresenceStatus::Idle
        )));
    }

    #[test]
    fn test_flash_pic_stub_not_payload_broadcast() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");

        let intents = core.submit_image("s1", vec![0xAB; 128]);
        assert!(has_event(&intents, |e| matches!(
            e,
            ServerEvent::Message { kind: MessageKind::Flashpic, content, .. }
                if content == "[FlashPic]"
        )));
        // The payload itself is never part of the broadcast.
        assert!(!has_event(&intents, |e| matches!(
            e,
            ServerEvent::FlashPicContent { .. }
        )));
    }

    #[test]
    fn test_flash_pic_view_rules() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");
        join(&core, "s2", "Bob", "lobby");
        join(&core, "s3", "Carol", "lobby");

        let intents = core.submit_image("s1", vec![0xAB; 128]);
        let id = sent_message_id(&intents);

        // Sender may never view their own image.
        let own = core.view_image("s1", id);
        assert!(has_event(&own, |e| matches!(
            e,
            ServerEvent::FlashPicError { reason, .. } if reason == "Cannot view own."
        )));

        // Bob gets the payload, unicast.
        let view = core.view_image("s2", id);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].scope, Scope::Session("s2".into()));
        assert!(matches!(
            &view[0].event,
            ServerEvent::FlashPicContent { payload, .. } if payload.len() == 128
        ));

        // Bob's second view is rejected.
        let again = core.view_image("s2", id);
        assert!(has_event(&again, |e| matches!(
            e,
            ServerEvent::FlashPicError { reason, .. } if reason == "Already viewed."
        )));

        // Carol still gets her own single view.
        let carol = core.view_image("s3", id);
        assert!(has_event(&carol, |e| matches!(
            e,
            ServerEvent::FlashPicContent { .. }
        )));

        // Unknown ids are rejected as expired/invalid.
        let missing = core.view_image("s2", id.wrapping_add(1));
        assert!(has_event(&missing, |e| matches!(
            e,
            ServerEvent::FlashPicError { reason, .. } if reason == "Expired or invalid."
        )));
    }

    #[test]
    fn test_stats() {
        let core = Coordinator::new();
        join(&core, "s1", "Alice", "lobby");
        join(&core, "s2", "Bob", "den");

        let stats = core.stats();
        assert_eq!(stats.room_count, 2);
        assert_eq!(stats.session_count, 2);
    }
}
