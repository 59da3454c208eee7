//! Client core for gigline chat rooms and notifications.
//!
//! Sessions are actor tasks: each owns its state, its transport and its
//! timers, and publishes a read-only view through a `watch` channel. Dropping
//! or closing a session handle cancels the task and everything it owns.

pub mod api;
pub mod bids;
pub mod config;
pub mod error;
pub mod notifications;
pub mod poller;
pub mod room;
pub mod store;
pub mod transport;

pub use api::{ApiClient, ChatApi, NotificationApi};
pub use config::{ClientConfig, NotificationTimings, RoomTimings};
pub use error::ClientError;
pub use notifications::{NotificationAction, NotificationHandle, NotificationSession, NotificationState};
pub use room::{RoomHandle, RoomSession, RoomView, UnsentMessage};
pub use store::MessageStore;
pub use transport::{CloseReason, ConnectionState, Connector, Endpoint, TransportEvent, TransportHandle, WsConnector};
