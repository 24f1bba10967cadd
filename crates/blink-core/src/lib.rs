//! # blink-core
//!
//! Room, session, and messaging state machine for BlinkRoom.
//!
//! This crate provides the server-side core:
//!
//! - **SessionRegistry** - Identity and presence of connected sessions
//! - **Room** - Membership, activity log, receipts, pending FlashPics
//! - **Coordinator** - Room lifecycle and messaging operations
//! - **Gateway** - Fan-out of delivery intents to sessions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Action    │────▶│ Coordinator │────▶│    Room     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                         intents
//!                            ▼
//!                     ┌─────────────┐
//!                     │   Gateway   │────▶ EventSink
//!                     └─────────────┘
//! ```
//!
//! Operations mutate room state and return delivery intents; only the
//! gateway computes who receives what, so the rules stay testable without
//! a transport.

pub mod coordinator;
pub mod gateway;
pub mod intent;
pub mod registry;
pub mod room;

pub use coordinator::{
    clamp_vanish_secs, Coordinator, CoordinatorConfig, CoordinatorStats, JoinError, ViewError,
    VANISH_CHOICES,
};
pub use gateway::{EventSink, Gateway};
pub use intent::{Intent, Scope, VanishSchedule};
pub use registry::{RoomId, Session, SessionId, SessionRegistry};
pub use room::{FlashPic, ReceiptState, Room};
