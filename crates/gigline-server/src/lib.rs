//! Router assembly for the gigline server: REST, both WebSocket channels and
//! the public attachment directory.

pub mod config;
pub mod ws;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use gigline_api::attachments::ATTACHMENT_DIR;
use gigline_api::views::ATTACHMENT_URL_PREFIX;
use gigline_api::{AppState, AppStateInner};
use gigline_db::Database;
use gigline_gateway::Dispatcher;

use crate::config::ServerConfig;

pub fn state(config: &ServerConfig, db: Database) -> AppState {
    Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: Dispatcher::new(),
        media_dir: config.media_dir.clone(),
        token_ttl: chrono::Duration::days(config.token_ttl_days),
    })
}

pub fn app(state: AppState) -> Router {
    let attachments = ServeDir::new(state.media_dir.join(ATTACHMENT_DIR));

    // Clients address the sockets with a trailing slash; accept both forms.
    let ws_routes = Router::new()
        .route("/ws/chat/rooms/{room_id}", get(ws::room_socket))
        .route("/ws/chat/rooms/{room_id}/", get(ws::room_socket))
        .route("/ws/notifications", get(ws::notification_socket))
        .route("/ws/notifications/", get(ws::notification_socket))
        .with_state(state.clone());

    Router::new()
        .merge(gigline_api::routes(state))
        .merge(ws_routes)
        .nest_service(ATTACHMENT_URL_PREFIX, attachments)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
