use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use gigline_types::events::{RoomCommand, RoomEvent};

use crate::backend::{Identity, RoomBackend};
use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Close code for a missing or invalid token.
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
/// Close code for a user who is not a participant of the requested room.
pub const CLOSE_FORBIDDEN: u16 = 4403;
const CLOSE_INTERNAL: u16 = 1011;

/// Lifecycle of a room connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connected,
    Joined(Uuid),
    Closed,
}

/// Send a close frame and drop the socket.
pub async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        trace!("Close frame {} not delivered: {}", code, e);
    }
}

/// Handle an authenticated room socket. Membership of `room_id` is checked
/// before the connection joins the fan-out set.
pub async fn handle_room_connection<B: RoomBackend>(
    socket: WebSocket,
    dispatcher: Dispatcher,
    backend: Arc<B>,
    identity: Identity,
    room_id: Uuid,
) {
    match backend.is_participant(room_id, identity.user_id).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                "{} ({}) refused: not a participant of room {}",
                identity.username, identity.user_id, room_id
            );
            close_with(socket, CLOSE_FORBIDDEN, "not a participant").await;
            return;
        }
        Err(e) => {
            error!("Membership check for room {} failed: {:#}", room_id, e);
            close_with(socket, CLOSE_INTERNAL, "internal error").await;
            return;
        }
    }

    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Arc::new(RoomConnection::new(dispatcher, backend, identity, tx));
    conn.join(room_id).await;

    info!(
        "{} ({}) joined room {}",
        conn.identity.username, conn.identity.user_id, room_id
    );

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(pump_events(sender, rx, pong_received));

    let recv_conn = conn.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => recv_conn.handle_text(&text).await,
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    conn.close().await;
    info!(
        "{} ({}) disconnected from room relay",
        conn.identity.username, conn.identity.user_id
    );
}

/// Handle an authenticated notification socket. Server-push only: inbound
/// text frames are ignored.
pub async fn handle_notification_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    identity: Identity,
) {
    let (sender, mut receiver) = socket.split();
    let (conn_id, rx) = dispatcher.register_user_channel(identity.user_id).await;

    info!(
        "{} ({}) subscribed to notifications",
        identity.username, identity.user_id
    );

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(pump_events(sender, rx, pong_received));
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher
        .unregister_user_channel(identity.user_id, conn_id)
        .await;
    info!(
        "{} ({}) left notifications",
        identity.username, identity.user_id
    );
}

/// Forward queued events to the client, with heartbeat.
async fn pump_events<E: Serialize>(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<E>,
    pong_received: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Per-connection relay state, shared by the receive loop and teardown.
struct RoomConnection<B> {
    conn_id: Uuid,
    identity: Identity,
    dispatcher: Dispatcher,
    backend: Arc<B>,
    tx: mpsc::UnboundedSender<RoomEvent>,
    state: Mutex<RelayState>,
}

impl<B: RoomBackend> RoomConnection<B> {
    fn new(
        dispatcher: Dispatcher,
        backend: Arc<B>,
        identity: Identity,
        tx: mpsc::UnboundedSender<RoomEvent>,
    ) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            identity,
            dispatcher,
            backend,
            tx,
            state: Mutex::new(RelayState::Connected),
        }
    }

    fn state(&self) -> RelayState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: RelayState) -> RelayState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }

    /// Advisory for this connection only.
    fn warn(&self, detail: impl Into<String>) {
        let _ = self.tx.send(RoomEvent::Warning {
            detail: detail.into(),
        });
    }

    async fn join(&self, room_id: Uuid) {
        self.dispatcher
            .join_room(room_id, self.conn_id, self.identity.user_id, self.tx.clone())
            .await;
        self.set_state(RelayState::Joined(room_id));
    }

    async fn close(&self) {
        if let RelayState::Joined(room_id) = self.set_state(RelayState::Closed) {
            self.dispatcher.leave_room(room_id, self.conn_id).await;
        }
    }

    async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<RoomCommand>(text) {
            Ok(cmd) => self.handle_command(cmd).await,
            Err(e) => {
                warn!(
                    "{} ({}) bad command: {} -- raw: {}",
                    self.identity.username,
                    self.identity.user_id,
                    e,
                    text.chars().take(200).collect::<String>()
                );
                self.warn(format!("unrecognized command: {}", e));
            }
        }
    }

    async fn handle_command(&self, cmd: RoomCommand) {
        let RelayState::Joined(room_id) = self.state() else {
            self.warn("not joined to a room");
            return;
        };

        match cmd {
            RoomCommand::SendMessage {
                text,
                attachment_ids,
            } => {
                if let Err(e) = self
                    .backend
                    .send_message(room_id, &self.identity, text, attachment_ids)
                    .await
                {
                    debug!("Send in room {} rejected: {:#}", room_id, e);
                    self.warn(e.to_string());
                }
            }

            RoomCommand::Typing => {
                self.dispatcher
                    .broadcast_room_except(
                        room_id,
                        self.conn_id,
                        RoomEvent::Typing {
                            user_id: self.identity.user_id,
                            username: self.identity.username.clone(),
                        },
                    )
                    .await;
            }

            RoomCommand::ReadReceipt { message_id } => {
                if let Err(e) = self
                    .backend
                    .mark_read(room_id, message_id, self.identity.user_id)
                    .await
                {
                    debug!("Read receipt for {} rejected: {:#}", message_id, e);
                    self.warn(e.to_string());
                }
            }

            RoomCommand::Join { room_id: target } => self.switch_room(room_id, target).await,
        }
    }

    async fn switch_room(&self, from: Uuid, to: Uuid) {
        if from == to {
            return;
        }
        match self.backend.is_participant(to, self.identity.user_id).await {
            Ok(true) => {
                self.dispatcher.leave_room(from, self.conn_id).await;
                self.join(to).await;
                info!(
                    "{} ({}) moved from room {} to {}",
                    self.identity.username, self.identity.user_id, from, to
                );
            }
            Ok(false) => self.warn(format!("not a participant of room {}", to)),
            Err(e) => {
                error!("Membership check for room {} failed: {:#}", to, e);
                self.warn("could not join room");
            }
        }
    }
}
