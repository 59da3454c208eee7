//! Shared domain and wire types for gigline.
//!
//! Everything that crosses a process boundary (REST bodies, WebSocket
//! envelopes, JWT claims) is defined here so the server crates and the client
//! crate agree on one schema.

pub mod api;
pub mod bid;
pub mod events;
pub mod models;
pub mod money;

pub use bid::{BidAction, BidStatus, BidTransitionError};
pub use money::Amount;
