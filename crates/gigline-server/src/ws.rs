use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use gigline_api::auth::{decode_token, identity_of};
use gigline_api::{ApiBackend, AppState};
use gigline_gateway::Identity;
use gigline_gateway::connection::{self, CLOSE_UNAUTHORIZED, close_with};

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token rides in
/// the query string. A bearer header is accepted too.
fn authenticate(state: &AppState, query: &TokenQuery, headers: &HeaderMap) -> Option<Identity> {
    let token = match &query.token {
        Some(token) => token.clone(),
        None => headers
            .typed_get::<Authorization<Bearer>>()?
            .token()
            .to_string(),
    };

    match decode_token(&state.jwt_secret, &token) {
        Ok(claims) => Some(identity_of(&claims)),
        Err(e) => {
            debug!("Rejected socket token: {}", e);
            None
        }
    }
}

/// GET /ws/chat/rooms/{room_id}/
///
/// Always upgrades; a bad token or a non-member is told so with a close code.
pub async fn room_socket(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = authenticate(&state, &query, &headers);
    ws.on_upgrade(move |socket| async move {
        match identity {
            Some(identity) => {
                let backend = Arc::new(ApiBackend::new(state.clone()));
                connection::handle_room_connection(
                    socket,
                    state.dispatcher.clone(),
                    backend,
                    identity,
                    room_id,
                )
                .await
            }
            None => close_with(socket, CLOSE_UNAUTHORIZED, "invalid token").await,
        }
    })
}

/// GET /ws/notifications/
pub async fn notification_socket(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = authenticate(&state, &query, &headers);
    ws.on_upgrade(move |socket| async move {
        match identity {
            Some(identity) => {
                connection::handle_notification_connection(socket, state.dispatcher.clone(), identity)
                    .await
            }
            None => close_with(socket, CLOSE_UNAUTHORIZED, "invalid token").await,
        }
    })
}
