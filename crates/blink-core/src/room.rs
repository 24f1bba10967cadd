//! Room state for BlinkRoom.
//!
//! A room is an ephemeral named chat space: member sessions, an ordered
//! activity log, pending read receipts, and pending FlashPics. Rooms are
//! created lazily on first join and torn down when the last member leaves.

use crate::registry::{RoomId, SessionId};
use blink_protocol::{LogEntry, MessageId};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum room id length after normalization.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Atomic counter for ensuring unique IDs even within the same millisecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Low bits of an id reserved for the counter.
const ID_COUNTER_BITS: u32 = 20;

/// Generate a globally unique message ID.
///
/// The millisecond timestamp occupies the upper bits and the counter the
/// lower bits, so callers racing within the same instant still get
/// distinct ids.
#[must_use]
pub fn generate_message_id() -> MessageId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    (timestamp << ID_COUNTER_BITS) | (counter & ((1 << ID_COUNTER_BITS) - 1))
}

/// Normalize a raw room id: trim surrounding whitespace and case-fold.
#[must_use]
pub fn normalize_room_id(raw: &str) -> RoomId {
    raw.trim().to_lowercase()
}

/// Validate a normalized room id.
///
/// # Errors
///
/// Returns an error message if the room id is invalid.
pub fn validate_room_id(room_id: &str) -> Result<(), &'static str> {
    if room_id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    Ok(())
}

/// Render the current wall-clock time as `HH:MM` (UTC).
#[must_use]
pub fn format_clock_time() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{:02}:{:02}", (secs / 3600) % 24, (secs / 60) % 60)
}

/// Read-receipt tracking for one pending message.
///
/// The sender is pre-marked as a viewer at creation, so completion means
/// every *other* current member has read the message.
#[derive(Debug)]
pub struct ReceiptState {
    /// Sessions that have viewed the message.
    pub viewed_by: HashSet<SessionId>,
    /// The session that sent the message.
    pub sender: SessionId,
}

impl ReceiptState {
    /// Create a receipt with the sender already counted as a viewer.
    #[must_use]
    pub fn new(sender: impl Into<SessionId>) -> Self {
        let sender = sender.into();
        let mut viewed_by = HashSet::new();
        viewed_by.insert(sender.clone());
        Self { viewed_by, sender }
    }
}

/// A pending view-once image.
///
/// The record persists until room teardown; each non-sender session may
/// view the payload at most once, and the sender never may.
#[derive(Debug)]
pub struct FlashPic {
    /// Self-describing encoded image blob.
    pub payload: Bytes,
    /// Sessions that have already consumed their view.
    pub viewed_by: HashSet<SessionId>,
    /// The session that sent the image.
    pub sender: SessionId,
}

impl FlashPic {
    /// Store a new image with an empty viewer set.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>, sender: impl Into<SessionId>) -> Self {
        Self {
            payload: payload.into(),
            viewed_by: HashSet::new(),
            sender: sender.into(),
        }
    }
}

/// A named chat space and everything pending inside it.
#[derive(Debug)]
pub struct Room {
    /// Normalized room id.
    id: RoomId,
    /// Member session ids (referenced, never owned).
    members: HashSet<SessionId>,
    /// Ordered activity log. Unbounded; rooms are ephemeral.
    log: Vec<LogEntry>,
    /// Pending read receipts by message id.
    pub(crate) receipts: HashMap<MessageId, ReceiptState>,
    /// Pending FlashPics by message id.
    pub(crate) flash_pics: HashMap<MessageId, FlashPic>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashSet::new(),
            log: Vec::new(),
            receipts: HashMap::new(),
            flash_pics: HashMap::new(),
        }
    }

    /// Get the room id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of current members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a session is a member.
    #[must_use]
    pub fn is_member(&self, session_id: &str) -> bool {
        self.members.contains(session_id)
    }

    /// Check if the room has no members left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Add a member session.
    pub fn add_member(&mut self, session_id: impl Into<SessionId>) {
        self.members.insert(session_id.into());
    }

    /// Remove a member session. Returns `true` if it was present.
    pub fn remove_member(&mut self, session_id: &str) -> bool {
        self.members.remove(session_id)
    }

    /// Get all member session ids.
    #[must_use]
    pub fn members(&self) -> Vec<SessionId> {
        self.members.iter().cloned().collect()
    }

    /// Append an activity entry with a rendered timestamp.
    ///
    /// Returns a clone of the entry for broadcast.
    pub fn append_log(&mut self, action: impl Into<String>, user: Option<String>) -> LogEntry {
        let entry = LogEntry {
            action: action.into(),
            user,
            time: format_clock_time(),
        };
        self.log.push(entry.clone());
        entry
    }

    /// The full activity log.
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }
}
