use std::time::Duration;

use url::Url;

use crate::error::ClientError;

/// Where the server lives and who we are.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub http_base: Url,
    pub ws_base: Url,
    pub token: Option<String>,
}

impl ClientConfig {
    /// Build from the REST base URL; the WebSocket base uses the matching
    /// `ws`/`wss` scheme on the same host.
    pub fn new(http_base: &str) -> Result<Self, ClientError> {
        let http_base = Url::parse(http_base)?;
        let mut ws_base = http_base.clone();
        let scheme = match http_base.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        ws_base
            .set_scheme(scheme)
            .map_err(|_| ClientError::Transport(format!("cannot derive websocket url from {}", http_base)))?;

        Ok(Self {
            http_base,
            ws_base,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Join a base URL and an absolute path without doubling slashes.
pub(crate) fn join(base: &Url, path: &str) -> String {
    format!("{}{}", base.as_str().trim_end_matches('/'), path)
}

/// Timers owned by a room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomTimings {
    /// Fixed delay before reopening a closed room socket.
    pub reconnect_delay: Duration,
    /// History polling period while the socket is degraded.
    pub fallback_poll: Duration,
    /// How long a typing indicator stays visible after the last event.
    pub typing_ttl: Duration,
}

impl Default for RoomTimings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(4),
            fallback_poll: Duration::from_secs(8),
            typing_ttl: Duration::from_millis(1500),
        }
    }
}

/// Timers owned by a notification session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTimings {
    pub reconnect_delay: Duration,
    /// Unread-count backstop period, independent of socket health.
    pub unread_backstop: Duration,
}

impl Default for NotificationTimings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            unread_backstop: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_scheme_follows_http_scheme() {
        let plain = ClientConfig::new("http://127.0.0.1:3000").unwrap();
        assert_eq!(plain.ws_base.as_str(), "ws://127.0.0.1:3000/");

        let secure = ClientConfig::new("https://gigs.example.com/api/").unwrap();
        assert_eq!(secure.ws_base.scheme(), "wss");
        assert_eq!(join(&secure.http_base, "/rooms"), "https://gigs.example.com/api/rooms");
    }
}
