use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gigline_types::api::{SendMessageRequest, UpdateBidRequest};
use gigline_types::events::{RoomCommand, RoomEvent};
use gigline_types::models::{Attachment, Bid, Message, Participant, Role, Room};
use gigline_types::{Amount, BidAction};

use crate::api::ChatApi;
use crate::bids::{BidDraft, can_act_on_bid, can_create_bid};
use crate::config::RoomTimings;
use crate::error::ClientError;
use crate::poller::FallbackPoller;
use crate::store::MessageStore;
use crate::transport::{CloseReason, ConnectionState, Connector, TransportEvent, TransportHandle};

/// A send that the server did not accept. Kept so the user can see it and retry.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsentMessage {
    pub text: String,
    pub attachment_ids: Vec<Uuid>,
    pub error: String,
}

/// Everything a chat view renders, published after every state change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomView {
    pub room: Option<Room>,
    pub messages: Vec<Message>,
    pub connection: ConnectionState,
    /// The socket is down; history is being polled.
    pub degraded: bool,
    pub typing: Vec<Participant>,
    /// Last advisory from the server.
    pub warning: Option<String>,
    pub unsent: Vec<UnsentMessage>,
    /// Page-level failure; the message list is not trustworthy while set.
    pub error: Option<String>,
}

enum Command {
    Merge(Vec<Message>),
    BidChanged(Bid),
    ReadReceipt { message_id: Uuid, read_at: DateTime<Utc> },
    Unsent(UnsentMessage),
    Typing,
    Refresh,
}

/// Spawns room sessions.
pub struct RoomSession;

impl RoomSession {
    /// Load the room, open its socket and keep both in sync until the handle
    /// is closed or dropped.
    pub fn spawn<A: ChatApi, C: Connector>(
        api: Arc<A>,
        connector: C,
        room_id: Uuid,
        user_id: Uuid,
        timings: RoomTimings,
    ) -> RoomHandle<A> {
        let (view_tx, view_rx) = watch::channel(RoomView::default());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = RoomActor {
            api: api.clone(),
            connector,
            room_id,
            user_id,
            timings,
            view: RoomView::default(),
            view_tx,
            store: MessageStore::new(),
            transport: None,
            reconnect_at: None,
            poller: FallbackPoller::new(timings.fallback_poll),
            typing: Vec::new(),
        };

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Room session {} cancelled", room_id),
                _ = actor.run(command_rx) => debug!("Room session {} ended", room_id),
            }
        });

        RoomHandle {
            api,
            room_id,
            user_id,
            commands,
            view: view_rx,
            cancel,
        }
    }
}

/// Caller side of a room session. Dropping it ends the session, its socket,
/// its timers and any request still in flight.
pub struct RoomHandle<A> {
    api: Arc<A>,
    room_id: Uuid,
    user_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<RoomView>,
    cancel: CancellationToken,
}

impl<A: ChatApi> RoomHandle<A> {
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub fn view(&self) -> watch::Receiver<RoomView> {
        self.view.clone()
    }

    /// Post a message over REST and merge the server's copy. A failure is
    /// also recorded in [`RoomView::unsent`].
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        attachment_ids: Vec<Uuid>,
    ) -> Result<Message, ClientError> {
        let body = SendMessageRequest {
            text: text.into().trim().to_string(),
            attachment_ids,
        };

        match self.cancellable(self.api.send_message(self.room_id, &body)).await {
            Ok(message) => {
                self.command(Command::Merge(vec![message.clone()]));
                Ok(message)
            }
            Err(ClientError::Closed) => Err(ClientError::Closed),
            Err(e) => {
                self.command(Command::Unsent(UnsentMessage {
                    text: body.text,
                    attachment_ids: body.attachment_ids,
                    error: e.to_string(),
                }));
                Err(e)
            }
        }
    }

    /// Upload a file; pass the returned id to [`send_message`](Self::send_message).
    pub async fn upload_attachment(
        &self,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Attachment, ClientError> {
        self.cancellable(self.api.upload_attachment(self.room_id, file_name.into(), bytes))
            .await
    }

    /// Tell the other members we are typing. Dropped while the socket is down.
    pub fn typing(&self) {
        self.command(Command::Typing);
    }

    pub async fn mark_message_read(&self, message_id: Uuid) -> Result<DateTime<Utc>, ClientError> {
        let receipt = self
            .cancellable(self.api.mark_message_read(self.room_id, message_id))
            .await?;
        self.command(Command::ReadReceipt {
            message_id: receipt.message_id,
            read_at: receipt.read_at,
        });
        Ok(receipt.read_at)
    }

    /// Submit a bid. Resubmitting the same draft returns the original bid.
    pub async fn create_bid(&self, draft: &BidDraft) -> Result<Bid, ClientError> {
        if self.room().is_some_and(|room| !can_create_bid(&room, self.user_id)) {
            return Err(ClientError::Forbidden("only the organizer can create bids".into()));
        }

        let bid = self
            .cancellable(self.api.create_bid(self.room_id, &draft.to_request()))
            .await?;
        self.command(Command::BidChanged(bid.clone()));
        Ok(bid)
    }

    pub async fn accept_bid(&self, bid_id: Uuid) -> Result<Bid, ClientError> {
        self.answer_bid(bid_id, BidAction::Accept).await
    }

    pub async fn decline_bid(&self, bid_id: Uuid) -> Result<Bid, ClientError> {
        self.answer_bid(bid_id, BidAction::Decline).await
    }

    pub async fn counter_bid(&self, bid_id: Uuid, amount: Amount) -> Result<Bid, ClientError> {
        self.answer_bid(bid_id, BidAction::Counter(amount)).await
    }

    /// Re-fetch room and history. Clears a page-level error on success.
    pub fn refresh(&self) {
        self.command(Command::Refresh);
    }

    /// End the session. Requests still in flight on this handle, from any
    /// task sharing it, resolve to [`ClientError::Closed`].
    pub fn close(&self) {
        self.cancel.cancel();
    }

    async fn answer_bid(&self, bid_id: Uuid, action: BidAction) -> Result<Bid, ClientError> {
        self.check_can_answer(bid_id)?;

        // Local state changes only after the server confirms.
        let body = UpdateBidRequest::from_action(action);
        let bid = self
            .cancellable(self.api.update_bid(self.room_id, bid_id, &body))
            .await?;
        self.command(Command::BidChanged(bid.clone()));
        Ok(bid)
    }

    /// Gate on what we already know. An unknown room or bid is left to the
    /// server to judge.
    fn check_can_answer(&self, bid_id: Uuid) -> Result<(), ClientError> {
        let view = self.view.borrow();
        let Some(room) = view.room.as_ref() else {
            return Ok(());
        };
        if room.role_of(self.user_id) != Some(Role::Vendor) {
            return Err(ClientError::Forbidden("only the vendor can answer bids".into()));
        }
        let known = view.messages.iter().filter_map(|m| m.bid.as_ref()).find(|b| b.id == bid_id);
        match known {
            Some(bid) if !can_act_on_bid(room, self.user_id, bid) => {
                Err(ClientError::Conflict(format!("bid is already {}", bid.status)))
            }
            _ => Ok(()),
        }
    }

    fn room(&self) -> Option<Room> {
        self.view.borrow().room.clone()
    }

    fn command(&self, command: Command) {
        // The session may already be gone; nothing left to update then.
        let _ = self.commands.send(command);
    }

    async fn cancellable<T>(
        &self,
        request: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ClientError::Closed),
            result = request => result,
        }
    }
}

impl<A> Drop for RoomHandle<A> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct RoomActor<A, C> {
    api: Arc<A>,
    connector: C,
    room_id: Uuid,
    user_id: Uuid,
    timings: RoomTimings,
    view: RoomView,
    view_tx: watch::Sender<RoomView>,
    store: MessageStore,
    transport: Option<TransportHandle>,
    reconnect_at: Option<Instant>,
    poller: FallbackPoller,
    /// Other members typing, with the time their indicator lapses.
    typing: Vec<(Participant, Instant)>,
}

impl<A: ChatApi, C: Connector> RoomActor<A, C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.load().await;
        self.connect().await;
        self.publish();

        loop {
            let typing_deadline = self.typing.iter().map(|(_, until)| *until).min();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = next_event(&mut self.transport) => self.handle_transport(event),
                _ = sleep_until_some(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
                _ = self.poller.tick() => {
                    debug!("Polling history of room {}", self.room_id);
                    self.fetch_history().await;
                }
                _ = sleep_until_some(typing_deadline) => {
                    let now = Instant::now();
                    self.typing.retain(|(_, until)| *until > now);
                }
            }

            self.publish();
        }
    }

    /// Fetch room and history. A failure blocks the view until a refresh succeeds.
    async fn load(&mut self) {
        let loaded = async {
            let room = self.api.get_room(self.room_id).await?;
            let messages = self.api.get_messages(self.room_id).await?;
            Ok::<_, ClientError>((room, messages))
        }
        .await;

        match loaded {
            Ok((room, messages)) => {
                self.view.room = Some(room);
                self.store.merge(messages);
                self.view.error = None;
            }
            Err(e) => {
                warn!("Failed to load room {}: {}", self.room_id, e);
                self.view.error = Some(e.to_string());
            }
        }
        self.publish();
    }

    async fn fetch_history(&mut self) {
        match self.api.get_messages(self.room_id).await {
            Ok(messages) => self.store.merge(messages),
            Err(e) => debug!("History fetch for room {} failed: {}", self.room_id, e),
        }
    }

    async fn connect(&mut self) {
        self.view.connection = ConnectionState::Connecting;
        self.publish();

        let endpoint = match self.api.room_endpoint(self.room_id) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.view.error = Some(e.to_string());
                self.view.connection = ConnectionState::Closed(CloseReason::new(None, e.to_string()));
                return;
            }
        };

        match self.connector.connect(&endpoint).await {
            Ok(transport) => {
                info!("Room {} socket open", self.room_id);
                self.transport = Some(transport);
                self.view.connection = ConnectionState::Open;
                if self.view.degraded {
                    self.view.degraded = false;
                    self.poller.deactivate();
                    // Catch up on whatever the socket missed while down.
                    self.fetch_history().await;
                }
            }
            Err(e) => self.on_closed(CloseReason::new(None, e.to_string())),
        }
    }

    fn on_closed(&mut self, reason: CloseReason) {
        self.transport = None;

        if reason.is_rejection() {
            warn!("Room {} socket rejected: {}", self.room_id, reason);
            self.poller.deactivate();
            self.view.error = Some(format!("connection refused: {}", reason.reason));
            self.view.connection = ConnectionState::Closed(reason);
            return;
        }

        info!("Room {} socket closed: {}; retrying", self.room_id, reason);
        self.view.degraded = true;
        self.poller.activate();
        self.reconnect_at = Some(Instant::now() + self.timings.reconnect_delay);
        self.view.connection = ConnectionState::Backoff;
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => match serde_json::from_str::<RoomEvent>(&text) {
                Ok(event) => self.apply_event(event),
                Err(e) => warn!("Unrecognized room event: {}", e),
            },
            TransportEvent::Closed(reason) => self.on_closed(reason),
        }
    }

    fn apply_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Message { message } => {
                self.typing.retain(|(p, _)| p.id != message.sender_id);
                self.store.merge([message]);
            }
            RoomEvent::Bid { message, bid } => {
                self.store.merge([message]);
                self.store.patch_bid(&bid);
            }
            RoomEvent::Typing { user_id, username } => {
                if user_id == self.user_id {
                    return;
                }
                let until = Instant::now() + self.timings.typing_ttl;
                match self.typing.iter_mut().find(|(p, _)| p.id == user_id) {
                    Some(entry) => entry.1 = until,
                    None => self.typing.push((Participant { id: user_id, username }, until)),
                }
            }
            RoomEvent::ReadReceipt { message_id, read_at } => {
                self.store.apply_read_receipt(message_id, read_at);
            }
            // A rejected command, not a transport fault: the socket stays trusted.
            RoomEvent::Warning { detail } => {
                warn!("Room {} warning: {}", self.room_id, detail);
                self.view.warning = Some(detail);
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Merge(messages) => self.store.merge(messages),
            Command::BidChanged(bid) => {
                // A new bid's anchor may not have reached us yet.
                if self.store.patch_bid(&bid) == 0 {
                    self.fetch_history().await;
                }
            }
            Command::ReadReceipt { message_id, read_at } => {
                self.store.apply_read_receipt(message_id, read_at);
            }
            Command::Unsent(unsent) => self.view.unsent.push(unsent),
            Command::Typing => match &self.transport {
                Some(transport) => {
                    if let Err(e) = transport.send(&RoomCommand::Typing) {
                        debug!("Typing not sent: {}", e);
                    }
                }
                None => debug!("Typing dropped; room {} socket is down", self.room_id),
            },
            Command::Refresh => self.load().await,
        }
    }

    fn publish(&mut self) {
        self.view.messages = self.store.messages().to_vec();
        self.view.typing = self.typing.iter().map(|(p, _)| p.clone()).collect();
        self.view_tx.send_if_modified(|current| {
            if *current == self.view {
                return false;
            }
            *current = self.view.clone();
            true
        });
    }
}

async fn next_event(transport: &mut Option<TransportHandle>) -> TransportEvent {
    match transport {
        Some(transport) => transport.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
