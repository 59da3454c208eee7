//! Room relay and notification fan-out over WebSockets.
//!
//! The relay is stateless with respect to message history: events for rooms
//! or users without an open connection are dropped here, and the REST store
//! stays the source of truth.

pub mod backend;
pub mod connection;
pub mod dispatcher;

pub use backend::{Identity, RoomBackend};
pub use dispatcher::Dispatcher;
