use std::fmt;
use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::config::join;
use crate::error::ClientError;

/// Close code for a missing or rejected token.
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
/// Close code for a user outside the room.
pub const CLOSE_FORBIDDEN: u16 = 4403;

/// A WebSocket URL carrying its bearer token as a query parameter.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Room-scoped socket: `{ws_base}/ws/chat/rooms/{room_id}/?token=...`
    pub fn room(ws_base: &Url, room_id: Uuid, token: &str) -> Result<Self, ClientError> {
        Self::with_token(ws_base, &format!("/ws/chat/rooms/{}/", room_id), token)
    }

    /// User-scoped socket: `{ws_base}/ws/notifications/?token=...`
    pub fn notifications(ws_base: &Url, token: &str) -> Result<Self, ClientError> {
        Self::with_token(ws_base, "/ws/notifications/", token)
    }

    fn with_token(ws_base: &Url, path: &str, token: &str) -> Result<Self, ClientError> {
        let mut url = Url::parse(&join(ws_base, path))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Never prints the token.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({}://{}{})", self.url.scheme(), self.url.host_str().unwrap_or_default(), self.url.path())
    }
}

/// Why a transport ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The server refused this user; reconnecting cannot help.
    pub fn is_rejection(&self) -> bool {
        matches!(self.code, Some(CLOSE_UNAUTHORIZED | CLOSE_FORBIDDEN))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.reason, code),
            None => f.write_str(&self.reason),
        }
    }
}

/// Connection lifecycle as seen by a session.
///
/// ```text
/// Idle -> Connecting -> Open -> Closed(reason) -> Backoff -> Connecting
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed(CloseReason),
    Backoff,
}

/// What a transport reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the server.
    Text(String),
    /// The connection ended. No further events follow.
    Closed(CloseReason),
}

/// One live connection. Dropping the handle closes it.
#[derive(Debug)]
pub struct TransportHandle {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub outgoing: mpsc::UnboundedSender<String>,
}

impl TransportHandle {
    pub fn send<T: Serialize>(&self, payload: &T) -> Result<(), ClientError> {
        let text = serde_json::to_string(payload).map_err(|e| ClientError::Decode(e.to_string()))?;
        self.outgoing.send(text).map_err(|_| ClientError::Closed)
    }

    /// Next event; a vanished transport reads as closed.
    pub async fn next_event(&mut self) -> TransportEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Closed(CloseReason::new(None, "transport ended")))
    }
}

/// Opens transports. The transport never reconnects on its own: a mid-session
/// failure surfaces as [`TransportEvent::Closed`] and the owner decides.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<TransportHandle, ClientError>> + Send;
}

/// tokio-tungstenite backed connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportHandle, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint.url().as_str())
            .await
            .map_err(|e| ClientError::Transport(format!("WS connect failed: {}", e)))?;
        debug!("Connected to {:?}", endpoint);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    queued = outgoing_rx.recv() => match queued {
                        Some(text) => {
                            if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                                break CloseReason::new(None, format!("send failed: {}", e));
                            }
                        }
                        None => {
                            let _ = ws_tx.send(WsMessage::Close(None)).await;
                            break CloseReason::new(Some(1000), "closed by client");
                        }
                    },
                    incoming = ws_rx.next() => match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            if event_tx.send(TransportEvent::Text(text.as_str().to_owned())).is_err() {
                                break CloseReason::new(Some(1000), "owner gone");
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            break match frame {
                                Some(frame) => CloseReason::new(Some(u16::from(frame.code)), frame.reason.as_str()),
                                None => CloseReason::new(None, "closed by server"),
                            };
                        }
                        Some(Ok(other)) => trace!("Ignoring frame: {:?}", other),
                        Some(Err(e)) => break CloseReason::new(None, e.to_string()),
                        None => break CloseReason::new(None, "stream ended"),
                    },
                }
            };
            debug!("Transport closed: {}", reason);
            let _ = event_tx.send(TransportEvent::Closed(reason));
        });

        Ok(TransportHandle { events, outgoing })
    }
}
