//! Identity and presence registry for BlinkRoom.
//!
//! The registry owns all connected sessions: who they are, which room they
//! sit in, and whether they are online or idle. It never emits events
//! itself; callers act on the returned state transitions.

use blink_protocol::PresenceStatus;
use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Opaque per-connection session identifier.
pub type SessionId = String;

/// A room identifier, normalized (trimmed, lowercased) before use.
pub type RoomId = String;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Identity and presence state for one connected client.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session ID, unique per connection.
    pub id: SessionId,
    /// Display name, unique within the room (case-insensitive).
    pub username: String,
    /// The room this session belongs to.
    pub room: RoomId,
    /// Online or idle.
    pub status: PresenceStatus,
    /// Last activity timestamp in Unix milliseconds.
    pub last_active: u64,
}

impl Session {
    fn new(id: SessionId, username: String, room: RoomId) -> Self {
        Self {
            id,
            username,
            room,
            status: PresenceStatus::Online,
            last_active: now_millis(),
        }
    }
}

/// Registry of all connected sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Get a snapshot of a session, if registered.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Check whether `username` is already taken in `room`.
    ///
    /// The comparison is case-insensitive and scoped to the room; the same
    /// name may be in use in any number of other rooms.
    #[must_use]
    pub fn name_taken(&self, room: &str, username: &str) -> bool {
        let wanted = username.to_lowercase();
        self.sessions
            .iter()
            .any(|s| s.room == room && s.username.to_lowercase() == wanted)
    }

    /// Register a session that joined `room` under `username`.
    ///
    /// Returns `false` (and leaves the registry untouched) if the name is
    /// already taken in that room. The caller is expected to have validated
    /// the inputs. The scan and the insert are separate steps, so callers
    /// racing on the same room must serialize registrations externally; the
    /// coordinator does this under the room's map-entry lock.
    pub fn register(&self, session_id: &str, username: &str, room: &str) -> bool {
        if self.name_taken(room, username) {
            return false;
        }
        self.sessions.insert(
            session_id.to_string(),
            Session::new(session_id.to_string(), username.to_string(), room.to_string()),
        );
        debug!(session = %session_id, user = %username, room = %room, "Session registered");
        true
    }

    /// Update a session's presence status and activity timestamp.
    ///
    /// Returns the session's room if it exists; unknown sessions are a
    /// silent no-op (disconnect races are expected).
    pub fn set_status(&self, session_id: &str, status: PresenceStatus) -> Option<RoomId> {
        let mut session = self.sessions.get_mut(session_id)?;
        session.status = status;
        session.last_active = now_millis();
        Some(session.room.clone())
    }

    /// Touch a session's activity timestamp.
    pub fn touch(&self, session_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_active = now_millis();
        }
    }

    /// Remove a session, returning its prior state.
    ///
    /// Returns `None` when the session never completed a join; disconnect
    /// may legitimately arrive for such sessions.
    pub fn unregister(&self, session_id: &str) -> Option<Session> {
        let (_, session) = self.sessions.remove(session_id)?;
        debug!(session = %session_id, user = %session.username, "Session unregistered");
        Some(session)
    }
}
