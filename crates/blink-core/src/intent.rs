//! Delivery intents for BlinkRoom.
//!
//! Engine operations never talk to the transport. They return intents
//! describing *who* should receive *what*; the broadcast gateway resolves
//! scopes to session ids and a dispatcher pushes the events out. Deferred
//! work (vanish timers) is likewise returned as data for the caller to
//! schedule.

use crate::registry::{RoomId, SessionId};
use blink_protocol::{MessageId, ServerEvent};
use std::time::Duration;

/// Addressing scope for one outbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// All current members of a room.
    Room(RoomId),
    /// All current members of a room except the originator.
    RoomExcept(RoomId, SessionId),
    /// A single session.
    Session(SessionId),
}

/// An event paired with its addressing scope.
#[derive(Debug, Clone)]
pub struct Intent {
    pub scope: Scope,
    pub event: ServerEvent,
}

impl Intent {
    /// Address an event to every member of a room.
    #[must_use]
    pub fn room(room: impl Into<RoomId>, event: ServerEvent) -> Self {
        Self {
            scope: Scope::Room(room.into()),
            event,
        }
    }

    /// Address an event to every member of a room except one session.
    #[must_use]
    pub fn room_except(
        room: impl Into<RoomId>,
        except: impl Into<SessionId>,
        event: ServerEvent,
    ) -> Self {
        Self {
            scope: Scope::RoomExcept(room.into(), except.into()),
            event,
        }
    }

    /// Address an event to a single session.
    #[must_use]
    pub fn session(session: impl Into<SessionId>, event: ServerEvent) -> Self {
        Self {
            scope: Scope::Session(session.into()),
            event,
        }
    }
}

/// A deferred message-expiry action.
///
/// The caller sleeps for `delay` (monotonic clock) and then runs
/// [`Coordinator::expire_message`](crate::Coordinator::expire_message).
/// There is no cancellation: the expiry must be idempotent against the
/// room or receipt having already gone away.
#[derive(Debug, Clone)]
pub struct VanishSchedule {
    /// Room the message was sent to.
    pub room_id: RoomId,
    /// The message to retract.
    pub message_id: MessageId,
    /// Sender display name, captured at send time for the log entry.
    pub sender_name: String,
    /// How long until the message vanishes.
    pub delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_scopes() {
        let broadcast = Intent::room("lobby", ServerEvent::message_read(1));
        assert_eq!(broadcast.scope, Scope::Room("lobby".into()));

        let typed = Intent::room_except("lobby", "s1", ServerEvent::message_read(1));
        assert_eq!(typed.scope, Scope::RoomExcept("lobby".into(), "s1".into()));

        let unicast = Intent::session("s1", ServerEvent::message_read(1));
        assert_eq!(unicast.scope, Scope::Session("s1".into()));
    }
}
