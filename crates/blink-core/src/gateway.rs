//! Broadcast gateway for BlinkRoom.
//!
//! The gateway is the only component that turns an addressing scope into a
//! concrete recipient list. Engine operations hand it [`Intent`]s; it
//! resolves membership and pushes each event through an [`EventSink`]
//! (the live transport in production, a recording sink in tests).
//!
//! Delivery is fire-and-forget relative to state mutation: room state is
//! already committed by the time intents are dispatched.

use crate::coordinator::Coordinator;
use crate::intent::{Intent, Scope};
use crate::registry::SessionId;
use async_trait::async_trait;
use blink_protocol::ServerEvent;
use std::sync::Arc;
use tracing::trace;

/// Transport seam: delivers one event to one session.
///
/// Implementations must tolerate unknown sessions (a disconnect may race
/// the dispatch) by dropping the event silently.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, session_id: &str, event: ServerEvent);
}

/// Fan-out of engine intents to connected sessions.
pub struct Gateway<S> {
    core: Arc<Coordinator>,
    sink: S,
}

impl<S: EventSink> Gateway<S> {
    /// Create a gateway over a coordinator and a transport sink.
    #[must_use]
    pub fn new(core: Arc<Coordinator>, sink: S) -> Self {
        Self { core, sink }
    }

    /// Resolve a scope to the session ids that should receive the event.
    ///
    /// Membership is read at dispatch time; a `Session` scope resolves to
    /// its target unconditionally (errors must reach sessions that never
    /// completed a join).
    #[must_use]
    pub fn resolve(&self, scope: &Scope) -> Vec<SessionId> {
        match scope {
            Scope::Room(room_id) => self.core.room_members(room_id),
            Scope::RoomExcept(room_id, origin) => self
                .core
                .room_members(room_id)
                .into_iter()
                .filter(|sid| sid != origin)
                .collect(),
            Scope::Session(session_id) => vec![session_id.clone()],
        }
    }

    /// Execute a batch of delivery intents.
    pub async fn dispatch(&self, intents: Vec<Intent>) {
        for intent in intents {
            let recipients = self.resolve(&intent.scope);
            trace!(?intent.scope, count = recipients.len(), "Dispatching event");
            for session_id in recipients {
                self.sink.deliver(&session_id, intent.event.clone()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(SessionId, ServerEvent)>>,
    }

    #[async_trait]
    impl EventSink for Arc<RecordingSink> {
        async fn deliver(&self, session_id: &str, event: ServerEvent) {
            self.delivered
                .lock()
                .await
                .push((session_id.to_string(), event));
        }
    }

    fn gateway() -> (Arc<Coordinator>, Arc<RecordingSink>, Gateway<Arc<RecordingSink>>) {
        let core = Arc::new(Coordinator::new());
        let sink = Arc::new(RecordingSink::default());
        let gateway = Gateway::new(Arc::clone(&core), Arc::clone(&sink));
        (core, sink, gateway)
    }

    #[tokio::test]
    async fn test_room_scope_reaches_all_members() {
        let (core, sink, gateway) = gateway();
        core.join("s1", "Alice", "lobby").unwrap();
        core.join("s2", "Bob", "lobby").unwrap();

        gateway
            .dispatch(vec![Intent::room("lobby", ServerEvent::message_read(1))])
            .await;

        let delivered = sink.delivered.lock().await;
        let mut recipients: Vec<_> = delivered.iter().map(|(sid, _)| sid.clone()).collect();
        recipients.sort();
        assert_eq!(recipients, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_room_except_skips_originator() {
        let (core, sink, gateway) = gateway();
        core.join("s1", "Alice", "lobby").unwrap();
        core.join("s2", "Bob", "lobby").unwrap();

        let intents = core.set_typing("s1", true);
        gateway.dispatch(intents).await;

        let delivered = sink.delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "s2");
    }

    #[tokio::test]
    async fn test_session_scope_is_unicast_even_without_join() {
        let (_, sink, gateway) = gateway();

        gateway
            .dispatch(vec![Intent::session(
                "s9",
                ServerEvent::login_failed("taken"),
            )])
            .await;

        let delivered = sink.delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "s9");
    }
}
