use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gigline_types::events::NotificationEvent;
use gigline_types::models::Notification;

use crate::api::NotificationApi;
use crate::config::NotificationTimings;
use crate::error::ClientError;
use crate::transport::{CloseReason, ConnectionState, Connector, TransportEvent, TransportHandle};

/// Notification list and unread count, owned by one reducer so the two can
/// never disagree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationState {
    /// Newest first.
    pub notifications: Vec<Notification>,
    /// What the badge shows: the unread entries in the list, or the server's
    /// count when that is larger (the list is capped).
    pub unread_count: usize,
    /// Server's unread count, adjusted for local changes since it was fetched.
    /// Unknown until the first count after a load.
    pub server_unread: Option<usize>,
    pub loading: bool,
    pub connection: ConnectionState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationAction {
    Loading,
    /// A full list from the server replaces ours.
    Loaded(Vec<Notification>),
    /// A real-time push. Repeats of a known id are ignored.
    Pushed(Notification),
    MarkRead(Uuid),
    MarkAllRead,
    /// The server's unread count; covers entries the capped list leaves out.
    ServerCount(usize),
    Connection(ConnectionState),
}

impl NotificationState {
    pub fn reduce(&mut self, action: NotificationAction) {
        match action {
            NotificationAction::Loading => self.loading = true,
            NotificationAction::Loaded(notifications) => {
                self.notifications = notifications;
                self.server_unread = None;
                self.loading = false;
            }
            NotificationAction::Pushed(notification) => {
                if !self.notifications.iter().any(|n| n.id == notification.id) {
                    if !notification.is_read {
                        self.server_unread = self.server_unread.map(|count| count + 1);
                    }
                    self.notifications.insert(0, notification);
                }
            }
            NotificationAction::MarkRead(id) => {
                if let Some(notification) = self.notifications.iter_mut().find(|n| n.id == id) {
                    if !notification.is_read {
                        self.server_unread = self.server_unread.map(|count| count.saturating_sub(1));
                    }
                    mark(notification);
                }
            }
            NotificationAction::MarkAllRead => {
                self.notifications.iter_mut().for_each(mark);
                self.server_unread = self.server_unread.map(|_| 0);
            }
            NotificationAction::ServerCount(count) => self.server_unread = Some(count),
            NotificationAction::Connection(state) => self.connection = state,
        }
        let listed = self.notifications.iter().filter(|n| !n.is_read).count();
        self.unread_count = listed.max(self.server_unread.unwrap_or(0));
    }
}

fn mark(notification: &mut Notification) {
    if !notification.is_read {
        notification.is_read = true;
        notification.read_at = Some(Utc::now());
    }
}

enum Command {
    Apply(NotificationAction),
    Refresh,
}

/// Spawns the per-user notification session.
pub struct NotificationSession;

impl NotificationSession {
    pub fn spawn<A: NotificationApi, C: Connector>(
        api: Arc<A>,
        connector: C,
        timings: NotificationTimings,
    ) -> NotificationHandle<A> {
        let (view_tx, view_rx) = watch::channel(NotificationState::default());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = NotificationActor {
            api: api.clone(),
            connector,
            timings,
            state: NotificationState::default(),
            view_tx,
            transport: None,
            reconnect_at: None,
        };

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Notification session cancelled"),
                _ = actor.run(command_rx) => debug!("Notification session ended"),
            }
        });

        NotificationHandle {
            api,
            commands,
            view: view_rx,
            cancel,
        }
    }
}

/// Caller side of a notification session. Dropping it ends the session.
pub struct NotificationHandle<A> {
    api: Arc<A>,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<NotificationState>,
    cancel: CancellationToken,
}

impl<A: NotificationApi> NotificationHandle<A> {
    pub fn view(&self) -> watch::Receiver<NotificationState> {
        self.view.clone()
    }

    /// Marks locally first, then tells the server. A failed request is
    /// returned but the local mark stays.
    pub async fn mark_read(&self, notification_id: Uuid) -> Result<(), ClientError> {
        self.apply(NotificationAction::MarkRead(notification_id));
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ClientError::Closed),
            result = self.api.mark_notification_read(notification_id) => result.map(|_| ()),
        }
    }

    /// Same contract as [`mark_read`](Self::mark_read), for every notification.
    pub async fn mark_all_read(&self) -> Result<u64, ClientError> {
        self.apply(NotificationAction::MarkAllRead);
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ClientError::Closed),
            result = self.api.mark_all_notifications_read() => result,
        }
    }

    pub fn refresh(&self) {
        let _ = self.commands.send(Command::Refresh);
    }

    /// End the session. Marks still in flight resolve to [`ClientError::Closed`].
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn apply(&self, action: NotificationAction) {
        let _ = self.commands.send(Command::Apply(action));
    }
}

impl<A> Drop for NotificationHandle<A> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct NotificationActor<A, C> {
    api: Arc<A>,
    connector: C,
    timings: NotificationTimings,
    state: NotificationState,
    view_tx: watch::Sender<NotificationState>,
    transport: Option<TransportHandle>,
    reconnect_at: Option<Instant>,
}

impl<A: NotificationApi, C: Connector> NotificationActor<A, C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.load().await;
        self.connect().await;
        self.publish();

        let period = self.timings.unread_backstop;
        let mut backstop = interval_at(Instant::now() + period, period);
        backstop.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Apply(action)) => self.state.reduce(action),
                    Some(Command::Refresh) => self.load().await,
                    None => break,
                },
                event = next_event(&mut self.transport) => self.handle_transport(event),
                _ = sleep_until_some(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
                _ = backstop.tick() => self.check_unread().await,
            }

            self.publish();
        }
    }

    async fn load(&mut self) {
        self.state.reduce(NotificationAction::Loading);
        self.publish();

        match self.api.list_notifications().await {
            Ok(list) => self.state.reduce(NotificationAction::Loaded(list)),
            Err(e) => {
                warn!("Failed to load notifications: {}", e);
                self.state.loading = false;
            }
        }

        match self.api.unread_count().await {
            Ok(count) => self.state.reduce(NotificationAction::ServerCount(count as usize)),
            Err(e) => debug!("Unread count fetch failed: {}", e),
        }
    }

    /// Runs regardless of socket health; a push we never saw shows up as a
    /// count mismatch.
    async fn check_unread(&mut self) {
        match self.api.unread_count().await {
            Ok(count) if count == self.state.unread_count as u64 => {}
            Ok(count) => {
                debug!("Unread count drifted ({} local, {} server); reloading", self.state.unread_count, count);
                self.load().await;
            }
            Err(e) => debug!("Unread count check failed: {}", e),
        }
    }

    async fn connect(&mut self) {
        self.state.reduce(NotificationAction::Connection(ConnectionState::Connecting));
        self.publish();

        let endpoint = match self.api.notifications_endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                let reason = CloseReason::new(None, e.to_string());
                self.state.reduce(NotificationAction::Connection(ConnectionState::Closed(reason)));
                return;
            }
        };

        match self.connector.connect(&endpoint).await {
            Ok(transport) => {
                info!("Notification socket open");
                self.transport = Some(transport);
                self.state.reduce(NotificationAction::Connection(ConnectionState::Open));
            }
            Err(e) => self.on_closed(CloseReason::new(None, e.to_string())),
        }
    }

    fn on_closed(&mut self, reason: CloseReason) {
        self.transport = None;
        if reason.is_rejection() {
            warn!("Notification socket rejected: {}", reason);
            self.state.reduce(NotificationAction::Connection(ConnectionState::Closed(reason)));
            return;
        }
        info!("Notification socket closed: {}; retrying", reason);
        self.reconnect_at = Some(Instant::now() + self.timings.reconnect_delay);
        self.state.reduce(NotificationAction::Connection(ConnectionState::Backoff));
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => match serde_json::from_str::<NotificationEvent>(&text) {
                Ok(NotificationEvent::Notification { notification }) => {
                    self.state.reduce(NotificationAction::Pushed(notification));
                }
                Err(e) => warn!("Unrecognized notification event: {}", e),
            },
            TransportEvent::Closed(reason) => self.on_closed(reason),
        }
    }

    fn publish(&self) {
        self.view_tx.send_if_modified(|current| {
            if *current == self.state {
                return false;
            }
            *current = self.state.clone();
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

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use gigline_types::models::NotificationType;
    use proptest::prelude::*;
    use url::Url;

    use super::*;
    use crate::transport::Endpoint;

    fn notification(id: u128, is_read: bool) -> Notification {
        Notification {
            id: Uuid::from_u128(id),
            notification_type: NotificationType::NewMessage,
            title: format!("New message {}", id),
            message: None,
            sender_username: Some("org".into()),
            link_type: None,
            link_id: None,
            deep_link: None,
            data: serde_json::Value::Null,
            is_read,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    fn arb_action() -> impl Strategy<Value = NotificationAction> {
        prop_oneof![
            prop::collection::vec((0u128..8, any::<bool>()), 0..6)
                .prop_map(|ns| NotificationAction::Loaded(ns.into_iter().map(|(id, r)| notification(id, r)).collect())),
            (0u128..8).prop_map(|id| NotificationAction::Pushed(notification(id, false))),
            (0u128..8).prop_map(|id| NotificationAction::MarkRead(Uuid::from_u128(id))),
            Just(NotificationAction::MarkAllRead),
            Just(NotificationAction::Loading),
        ]
    }

    fn arb_action_with_counts() -> impl Strategy<Value = NotificationAction> {
        prop_oneof![
            4 => arb_action(),
            1 => (0usize..80).prop_map(NotificationAction::ServerCount),
        ]
    }

    proptest! {
        #[test]
        fn unread_count_always_matches_the_list(actions in prop::collection::vec(arb_action(), 0..50)) {
            let mut state = NotificationState::default();
            for action in actions {
                state.reduce(action);
                let unread = state.notifications.iter().filter(|n| !n.is_read).count();
                prop_assert_eq!(state.unread_count, unread);
            }
        }

        #[test]
        fn server_count_never_hides_listed_unread(actions in prop::collection::vec(arb_action_with_counts(), 0..50)) {
            let mut state = NotificationState::default();
            for action in actions {
                let all_read = action == NotificationAction::MarkAllRead;
                state.reduce(action);
                let unread = state.notifications.iter().filter(|n| !n.is_read).count();
                prop_assert!(state.unread_count >= unread);
                if all_read {
                    prop_assert_eq!(state.unread_count, 0);
                }
            }
        }
    }

    #[test]
    fn server_count_covers_the_capped_list() {
        let mut state = NotificationState::default();
        state.reduce(NotificationAction::Loaded((0..50).map(|id| notification(id, false)).collect()));
        state.reduce(NotificationAction::ServerCount(60));
        assert_eq!(state.unread_count, 60);

        state.reduce(NotificationAction::MarkRead(Uuid::from_u128(3)));
        state.reduce(NotificationAction::MarkRead(Uuid::from_u128(3)));
        assert_eq!(state.unread_count, 59);

        state.reduce(NotificationAction::Pushed(notification(100, false)));
        assert_eq!(state.unread_count, 60);
        assert_eq!(state.notifications.len(), 51);

        state.reduce(NotificationAction::MarkAllRead);
        assert_eq!(state.unread_count, 0);
    }

    #[test]
    fn pushes_prepend_once() {
        let mut state = NotificationState::default();
        state.reduce(NotificationAction::Loaded(vec![notification(1, true)]));
        state.reduce(NotificationAction::Pushed(notification(2, false)));
        state.reduce(NotificationAction::Pushed(notification(2, false)));

        assert_eq!(state.notifications.len(), 2);
        assert_eq!(state.notifications[0].id, Uuid::from_u128(2));
        assert_eq!(state.unread_count, 1);

        state.reduce(NotificationAction::MarkAllRead);
        assert_eq!(state.unread_count, 0);
        assert!(state.notifications.iter().all(|n| n.read_at.is_some() || n.id == Uuid::from_u128(1)));
    }

    struct ServerSide {
        events: mpsc::UnboundedSender<TransportEvent>,
        _outgoing: mpsc::UnboundedReceiver<String>,
    }

    struct FakeConnector {
        servers: mpsc::UnboundedSender<ServerSide>,
    }

    impl Connector for FakeConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<TransportHandle, ClientError> {
            let (event_tx, events) = mpsc::unbounded_channel();
            let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
            let _ = self.servers.send(ServerSide {
                events: event_tx,
                _outgoing: outgoing_rx,
            });
            Ok(TransportHandle { events, outgoing })
        }
    }

    #[derive(Default)]
    struct FakeApi {
        list: Mutex<Vec<Notification>>,
        lists: AtomicUsize,
        server_unread: AtomicU64,
        fail_marks: AtomicBool,
        stall_marks: AtomicBool,
    }

    impl NotificationApi for FakeApi {
        fn notifications_endpoint(&self) -> Result<Endpoint, ClientError> {
            Endpoint::notifications(&Url::parse("ws://fake").unwrap(), "t")
        }

        async fn list_notifications(&self) -> Result<Vec<Notification>, ClientError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(self.list.lock().unwrap().clone())
        }

        async fn unread_count(&self) -> Result<u64, ClientError> {
            Ok(self.server_unread.load(Ordering::SeqCst))
        }

        async fn mark_notification_read(&self, notification_id: Uuid) -> Result<Notification, ClientError> {
            if self.stall_marks.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail_marks.load(Ordering::SeqCst) {
                return Err(ClientError::Server {
                    status: 500,
                    detail: "internal server error".into(),
                });
            }
            let mut read = notification(notification_id.as_u128(), true);
            read.read_at = Some(Utc::now());
            Ok(read)
        }

        async fn mark_all_notifications_read(&self) -> Result<u64, ClientError> {
            Ok(0)
        }
    }

    fn spawn(api: &Arc<FakeApi>) -> (NotificationHandle<FakeApi>, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers_tx, servers) = mpsc::unbounded_channel();
        let handle = NotificationSession::spawn(
            api.clone(),
            FakeConnector { servers: servers_tx },
            NotificationTimings::default(),
        );
        (handle, servers)
    }

    async fn until(
        view: &mut watch::Receiver<NotificationState>,
        f: impl FnMut(&NotificationState) -> bool,
    ) -> NotificationState {
        tokio::time::timeout(Duration::from_secs(120), view.wait_for(f))
            .await
            .expect("state never matched")
            .expect("session ended")
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_arrive_and_the_backstop_catches_drift() {
        let api = Arc::new(FakeApi::default());
        let (handle, mut servers) = spawn(&api);
        let mut view = handle.view();
        let server = servers.recv().await.unwrap();
        until(&mut view, |s| s.connection == ConnectionState::Open && !s.loading).await;

        let pushed = NotificationEvent::Notification {
            notification: notification(1, false),
        };
        server
            .events
            .send(TransportEvent::Text(serde_json::to_string(&pushed).unwrap()))
            .unwrap();
        let state = until(&mut view, |s| s.unread_count == 1).await;
        assert_eq!(state.notifications[0].id, Uuid::from_u128(1));

        // The server knows about a notification whose push never arrived.
        api.list.lock().unwrap().extend([notification(2, false), notification(1, false)]);
        api.server_unread.store(2, Ordering::SeqCst);
        let lists = api.lists.load(Ordering::SeqCst);
        let state = until(&mut view, |s| s.unread_count == 2).await;
        assert_eq!(api.lists.load(Ordering::SeqCst), lists + 1);
        assert_eq!(state.notifications.len(), 2);

        // In agreement: the backstop does not reload.
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(api.lists.load(Ordering::SeqCst), lists + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn more_unread_than_the_list_holds_is_not_drift() {
        let api = Arc::new(FakeApi::default());
        api.list.lock().unwrap().extend((0..50).map(|id| notification(id, false)));
        api.server_unread.store(60, Ordering::SeqCst);

        let (handle, mut servers) = spawn(&api);
        let mut view = handle.view();
        let _server = servers.recv().await.unwrap();
        let state = until(&mut view, |s| s.connection == ConnectionState::Open && !s.loading).await;
        assert_eq!(state.notifications.len(), 50);
        assert_eq!(state.unread_count, 60);

        tokio::time::sleep(Duration::from_secs(305)).await;
        assert_eq!(api.lists.load(Ordering::SeqCst), 1);
        assert_eq!(view.borrow().unread_count, 60);

        // A genuine change on the server still triggers one reload.
        api.server_unread.store(61, Ordering::SeqCst);
        until(&mut view, |s| s.unread_count == 61).await;
        assert_eq!(api.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_a_shared_handle_ends_marks_in_flight() {
        let api = Arc::new(FakeApi::default());
        api.list.lock().unwrap().push(notification(1, false));
        api.stall_marks.store(true, Ordering::SeqCst);

        let (handle, mut servers) = spawn(&api);
        let handle = Arc::new(handle);
        let _server = servers.recv().await.unwrap();
        until(&mut handle.view(), |s| !s.loading).await;

        let marking = tokio::spawn({
            let handle = handle.clone();
            async move { handle.mark_read(Uuid::from_u128(1)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!marking.is_finished());

        handle.close();
        let result = tokio::time::timeout(Duration::from_secs(1), marking)
            .await
            .expect("mark outlived the session")
            .unwrap();
        assert!(matches!(result, Err(ClientError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_socket_reconnects_after_the_delay() {
        let api = Arc::new(FakeApi::default());
        let (handle, mut servers) = spawn(&api);
        let mut view = handle.view();
        let server = servers.recv().await.unwrap();

        let closed_at = Instant::now();
        drop(server);
        until(&mut view, |s| s.connection == ConnectionState::Backoff).await;
        let _server = servers.recv().await.unwrap();
        assert!(closed_at.elapsed() >= Duration::from_secs(5));
        until(&mut view, |s| s.connection == ConnectionState::Open).await;
    }

    // Known gap: a failed mark is not rolled back, so the local view can
    // claim "read" for a notification the server still counts as unread
    // until the backstop reloads the list.
    #[tokio::test(start_paused = true)]
    async fn failed_mark_read_keeps_the_optimistic_update() {
        let api = Arc::new(FakeApi::default());
        api.list.lock().unwrap().push(notification(1, false));
        api.server_unread.store(1, Ordering::SeqCst);
        api.fail_marks.store(true, Ordering::SeqCst);

        let (handle, mut servers) = spawn(&api);
        let mut view = handle.view();
        let _server = servers.recv().await.unwrap();
        until(&mut view, |s| s.unread_count == 1).await;

        assert!(handle.mark_read(Uuid::from_u128(1)).await.is_err());
        let state = until(&mut view, |s| s.unread_count == 0).await;
        assert!(state.notifications[0].is_read);

        // The backstop sees the server's count and restores the truth.
        let state = until(&mut view, |s| s.unread_count == 1).await;
        assert!(!state.notifications[0].is_read);
    }
}
