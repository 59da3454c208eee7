use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::trace;
use uuid::Uuid;

use gigline_types::events::{NotificationEvent, RoomEvent};

/// A connection joined to a room.
#[derive(Debug, Clone)]
struct RoomMember {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<RoomEvent>,
}

/// Manages room membership and per-user notification channels.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// room_id -> (conn_id -> member)
    rooms: RwLock<HashMap<Uuid, HashMap<Uuid, RoomMember>>>,

    /// user_id -> (conn_id -> sender). A user may hold several sessions.
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<NotificationEvent>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room's fan-out set.
    pub async fn join_room(
        &self,
        room_id: Uuid,
        conn_id: Uuid,
        user_id: Uuid,
        tx: mpsc::UnboundedSender<RoomEvent>,
    ) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room_id)
            .or_default()
            .insert(conn_id, RoomMember { user_id, tx });
    }

    /// Remove a connection from a room. Empty rooms are dropped.
    pub async fn leave_room(&self, room_id: Uuid, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.get_mut(&room_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&room_id);
            }
        }
    }

    /// Number of connections currently joined to `room_id`.
    pub async fn room_connections(&self, room_id: Uuid) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&room_id)
            .map_or(0, HashMap::len)
    }

    /// Distinct users with at least one connection joined to `room_id`.
    pub async fn room_users(&self, room_id: Uuid) -> Vec<Uuid> {
        let rooms = self.inner.rooms.read().await;
        let mut users: Vec<Uuid> = rooms
            .get(&room_id)
            .map(|members| members.values().map(|m| m.user_id).collect())
            .unwrap_or_default();
        users.sort();
        users.dedup();
        users
    }

    /// Send an event to every connection joined to `room_id`.
    /// Returns how many connections accepted it.
    pub async fn broadcast_room(&self, room_id: Uuid, event: RoomEvent) -> usize {
        self.fan_out(room_id, None, event).await
    }

    /// Like [`broadcast_room`](Self::broadcast_room) but skips `except_conn`.
    pub async fn broadcast_room_except(
        &self,
        room_id: Uuid,
        except_conn: Uuid,
        event: RoomEvent,
    ) -> usize {
        self.fan_out(room_id, Some(except_conn), event).await
    }

    async fn fan_out(&self, room_id: Uuid, except_conn: Option<Uuid>, event: RoomEvent) -> usize {
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(&room_id) else {
            trace!("No connections in room {}, dropping {} event", room_id, event.kind());
            return 0;
        };

        members
            .iter()
            .filter(|(conn_id, _)| Some(**conn_id) != except_conn)
            .filter(|(_, member)| member.tx.send(event.clone()).is_ok())
            .count()
    }

    /// Register a notification channel for one session of `user_id`. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<NotificationEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(sessions) = channels.get_mut(&user_id) {
            sessions.remove(&conn_id);
            if sessions.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Open notification sessions of `user_id`.
    pub async fn user_sessions(&self, user_id: Uuid) -> usize {
        self.inner
            .user_channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }

    /// Push an event to every open session of `user_id`. Returns the number reached.
    pub async fn notify_user(&self, user_id: Uuid, event: NotificationEvent) -> usize {
        let channels = self.inner.user_channels.read().await;
        let Some(sessions) = channels.get(&user_id) else {
            trace!("User {} has no notification sessions", user_id);
            return 0;
        };

        sessions
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(user_id: Uuid) -> RoomEvent {
        RoomEvent::Typing {
            user_id,
            username: "someone".into(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_of_the_room() {
        let dispatcher = Dispatcher::new();
        let room = Uuid::new_v4();
        let other_room = Uuid::new_v4();

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::unbounded_channel();
            dispatcher.join_room(room, Uuid::new_v4(), Uuid::new_v4(), tx).await;
            receivers.push(rx);
        }
        let (outsider_tx, mut outsider_rx) = mpsc::unbounded_channel();
        dispatcher
            .join_room(other_room, Uuid::new_v4(), Uuid::new_v4(), outsider_tx)
            .await;

        let sender = Uuid::new_v4();
        assert_eq!(dispatcher.broadcast_room(room, typing(sender)).await, 3);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), typing(sender));
        }
        assert!(outsider_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_origin() {
        let dispatcher = Dispatcher::new();
        let room = Uuid::new_v4();
        let origin = Uuid::new_v4();
        let (origin_tx, mut origin_rx) = mpsc::unbounded_channel();
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        dispatcher.join_room(room, origin, Uuid::new_v4(), origin_tx).await;
        dispatcher.join_room(room, Uuid::new_v4(), Uuid::new_v4(), peer_tx).await;

        let delivered = dispatcher
            .broadcast_room_except(room, origin, typing(Uuid::new_v4()))
            .await;
        assert_eq!(delivered, 1);
        assert!(peer_rx.try_recv().is_ok());
        assert!(origin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_for_empty_rooms_are_dropped() {
        let dispatcher = Dispatcher::new();
        let room = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.join_room(room, conn, Uuid::new_v4(), tx).await;
        drop(rx);

        // Closed receiver: not counted as delivered.
        assert_eq!(dispatcher.broadcast_room(room, typing(conn)).await, 0);

        dispatcher.leave_room(room, conn).await;
        assert_eq!(dispatcher.room_connections(room).await, 0);
        assert_eq!(dispatcher.broadcast_room(room, typing(conn)).await, 0);
    }

    #[tokio::test]
    async fn room_users_are_deduplicated() {
        let dispatcher = Dispatcher::new();
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        for _ in 0..2 {
            let (tx, _rx) = mpsc::unbounded_channel();
            dispatcher.join_room(room, Uuid::new_v4(), user, tx).await;
        }
        assert_eq!(dispatcher.room_connections(room).await, 2);
        assert_eq!(dispatcher.room_users(room).await, vec![user]);
    }

    #[tokio::test]
    async fn notifications_reach_all_sessions_of_a_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (first, mut first_rx) = dispatcher.register_user_channel(user).await;
        let (_second, mut second_rx) = dispatcher.register_user_channel(user).await;

        let event = NotificationEvent::Notification {
            notification: serde_json::from_value(serde_json::json!({
                "id": Uuid::new_v4(),
                "notification_type": "new_message",
                "title": "New message from org",
                "created_at": "2026-01-01T00:00:00Z",
            }))
            .unwrap(),
        };

        assert_eq!(dispatcher.notify_user(user, event.clone()).await, 2);
        assert_eq!(first_rx.try_recv().unwrap(), event);
        assert_eq!(second_rx.try_recv().unwrap(), event);

        dispatcher.unregister_user_channel(user, first).await;
        assert_eq!(dispatcher.user_sessions(user).await, 1);
        assert_eq!(dispatcher.notify_user(user, event.clone()).await, 1);
        assert!(first_rx.try_recv().is_err());

        // Nobody listening.
        assert_eq!(dispatcher.notify_user(Uuid::new_v4(), event).await, 0);
    }
}
