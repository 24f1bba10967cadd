//! Wire events for the BlinkRoom protocol.
//!
//! Events are the fundamental unit of communication: clients send
//! [`ClientEvent`]s, the server answers with [`ServerEvent`]s. Both are
//! serialized using MessagePack for efficient binary encoding.

use serde::{Deserialize, Serialize};

/// A unique message identifier, assigned server-side at submission.
pub type MessageId = u64;

/// Presence status of a connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
}

/// Kind of a room message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text, delivered inline.
    Text,
    /// FlashPic stub; the payload is fetched per-viewer on demand.
    Flashpic,
}

/// One entry in a room's activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// What happened ("joined the room", "message vanished", ...).
    pub action: String,
    /// Display name of the actor, if the action has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Rendered HH:MM wall-clock time.
    pub time: String,
}

/// One row of the room member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub status: PresenceStatus,
}

/// An event sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join a named room under a display name.
    #[serde(rename_all = "camelCase")]
    JoinRoom { username: String, room_id: String },

    /// Switch between online and idle.
    StatusChange { status: PresenceStatus },

    /// The client started typing.
    TypingStart,

    /// The client stopped typing.
    TypingStop,

    /// Submit a text message, optionally self-expiring.
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        text: String,
        /// Seconds until the message vanishes; 0 keeps it forever.
        vanish_secs: u32,
    },

    /// Acknowledge that a message has been read.
    #[serde(rename_all = "camelCase")]
    MarkRead { message_id: MessageId },

    /// Submit a view-once image.
    SendFlashPic {
        /// Self-describing encoded image blob.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Request the payload of a previously announced FlashPic.
    #[serde(rename_all = "camelCase")]
    ViewFlashPic { message_id: MessageId },
}

/// An event sent by the server to one or more clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Connection handshake: the session's identity and server instance.
    #[serde(rename_all = "camelCase")]
    Welcome {
        session_id: String,
        instance: String,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Join succeeded; carries the room's full activity log.
    #[serde(rename_all = "camelCase")]
    Joined {
        username: String,
        room_id: String,
        log: Vec<LogEntry>,
        instance: String,
    },

    /// Join rejected (name conflict or invalid input).
    LoginFailed { reason: String },

    /// Full member list of the room, sent on every presence change.
    UpdateUserList { users: Vec<UserEntry> },

    /// A member started or stopped typing.
    #[serde(rename_all = "camelCase")]
    TypingUpdate { username: String, is_typing: bool },

    /// A new room message (text, or a FlashPic stub).
    #[serde(rename_all = "camelCase")]
    Message {
        id: MessageId,
        kind: MessageKind,
        username: String,
        content: String,
        time: String,
        sender: String,
        vanish_secs: u32,
    },

    /// A vanish timer elapsed; clients must retract the message.
    MessageVanished { id: MessageId },

    /// Every current room member has read the message.
    MessageRead { id: MessageId },

    /// A new activity log entry.
    RoomLog { entry: LogEntry },

    /// FlashPic payload, unicast to the requesting viewer only.
    FlashPicContent {
        id: MessageId,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// FlashPic view rejected, unicast to the requester.
    FlashPicError { id: MessageId, reason: String },
}

impl ServerEvent {
    /// Create a `RoomLog` event.
    #[must_use]
    pub fn room_log(entry: LogEntry) -> Self {
        ServerEvent::RoomLog { entry }
    }

    /// Create a `MessageVanished` event.
    #[must_use]
    pub fn message_vanished(id: MessageId) -> Self {
        ServerEvent::MessageVanished { id }
    }

    /// Create a `MessageRead` event.
    #[must_use]
    pub fn message_read(id: MessageId) -> Self {
        ServerEvent::MessageRead { id }
    }

    /// Create a `LoginFailed` event.
    #[must_use]
    pub fn login_failed(reason: impl Into<String>) -> Self {
        ServerEvent::LoginFailed {
            reason: reason.into(),
        }
    }

    /// Create a `FlashPicError` event.
    #[must_use]
    pub fn flash_pic_error(id: MessageId, reason: impl Into<String>) -> Self {
        ServerEvent::FlashPicError {
            id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tags() {
        let join = ClientEvent::JoinRoom {
            username: "Alice".into(),
            room_id: "lobby".into(),
        };
        let encoded = rmp_serde::to_vec_named(&join).unwrap();
        // Tagged representation carries the camelCase event name.
        assert!(encoded.windows(8).any(|w| w == b"joinRoom"));

        let decoded: ClientEvent = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(join, decoded);
    }

    #[test]
    fn test_status_serialization() {
        let entry = UserEntry {
            username: "Bob".into(),
            status: PresenceStatus::Idle,
        };
        let encoded = rmp_serde::to_vec_named(&entry).unwrap();
        let decoded: UserEntry = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(decoded.status, PresenceStatus::Idle);
    }

    #[test]
    fn test_flash_pic_payload_bytes() {
        let event = ClientEvent::SendFlashPic {
            payload: vec![0xFF; 32],
        };
        let encoded = rmp_serde::to_vec_named(&event).unwrap();
        let decoded: ClientEvent = rmp_serde::from_slice(&encoded).unwrap();
        match decoded {
            ClientEvent::SendFlashPic { payload } => assert_eq!(payload.len(), 32),
            other => panic!("Expected SendFlashPic, got {other:?}"),
        }
    }
}
