//! # blink-protocol
//!
//! Wire protocol definitions for the BlinkRoom realtime chat server.
//!
//! This crate defines the binary protocol spoken between BlinkRoom clients
//! and servers: the inbound client actions, the outbound server events, and
//! the length-prefixed MessagePack framing.
//!
//! ## Event Flow
//!
//! - `JoinRoom` / `StatusChange` / `TypingStart` / `TypingStop` - Presence
//! - `ChatMessage` / `MarkRead` - Text messages with read receipts
//! - `SendFlashPic` / `ViewFlashPic` - View-once image delivery
//!
//! ## Example
//!
//! ```rust
//! use blink_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::ChatMessage {
//!     text: "Hello, lobby!".into(),
//!     vanish_secs: 10,
//! };
//!
//! // Encode and decode
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{
    ClientEvent, LogEntry, MessageId, MessageKind, PresenceStatus, ServerEvent, UserEntry,
};
