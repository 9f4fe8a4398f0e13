//! Real-time job and document events.
//!
//! - [`hub`]: the per-user connection registry and its fan-out loop
//! - [`emitter`]: typed helpers that turn domain events into hub messages

pub mod emitter;
pub mod hub;

pub use emitter::EventEmitter;
pub use hub::{open_connection, ClientConnection, ConnectionId, EventHub, HubStats, Message, Outbound};
