use reqwest::StatusCode;

/// Errors surfaced by the client. Authorization failures, stale bid state and
/// network trouble are distinct kinds so callers can react differently.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not authenticated")]
    Unauthorized,

    /// The caller's role may not perform this action.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The server state moved on (e.g. the bid was already answered).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("session closed")]
    Closed,
}

impl ClientError {
    /// Map a non-success HTTP status and its `detail` to an error kind.
    pub fn from_status(status: StatusCode, detail: String) -> Self {
        match status.as_u16() {
            401 => Self::Unauthorized,
            403 => Self::Forbidden(detail),
            404 => Self::NotFound(detail),
            409 => Self::Conflict(detail),
            code @ 400..=499 => Self::Rejected { status: code, detail },
            code => Self::Server { status: code, detail },
        }
    }

    /// Whether repeating the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_distinct_kinds() {
        let forbidden = ClientError::from_status(StatusCode::FORBIDDEN, "only the vendor".into());
        assert!(matches!(forbidden, ClientError::Forbidden(_)));
        assert!(!forbidden.is_retryable());

        let conflict = ClientError::from_status(StatusCode::CONFLICT, "already accepted".into());
        assert!(matches!(conflict, ClientError::Conflict(_)));

        let server = ClientError::from_status(StatusCode::BAD_GATEWAY, String::new());
        assert!(server.is_retryable());

        let bad = ClientError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "bad json".into());
        assert!(matches!(bad, ClientError::Rejected { status: 422, .. }));
    }
}
