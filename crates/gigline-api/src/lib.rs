//! REST surface: auth, rooms, messages, attachments, bids and notifications.

pub mod attachments;
pub mod auth;
pub mod backend;
pub mod bids;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod rooms;
pub mod views;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
};
use tracing::error;

use gigline_db::Database;

pub use auth::{AppState, AppStateInner};
pub use backend::ApiBackend;
pub use error::ApiError;

/// Run a blocking DB operation off the async runtime.
pub(crate) async fn run_blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })?
        .map_err(ApiError::from)
}

/// Like [`run_blocking`] for closures that fail with an `ApiError`.
pub(crate) async fn run_checked<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    run_blocking(state, move |db| Ok(f(db))).await?
}

/// All REST routes. Everything except `/auth/*` requires a bearer token.
pub fn routes(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected = Router::new()
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/rooms/{room_id}/messages/{message_id}/read",
            post(messages::mark_message_read),
        )
        .route(
            "/rooms/{room_id}/attachments",
            post(attachments::upload_attachment)
                .layer(DefaultBodyLimit::max(attachments::MAX_ATTACHMENT_SIZE + 64 * 1024)),
        )
        .route("/rooms/{room_id}/bids", post(bids::create_bid))
        .route("/rooms/{room_id}/bids/{bid_id}", patch(bids::update_bid))
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/unread-count",
            get(notifications::unread_count),
        )
        .route(
            "/notifications/mark-all-read",
            post(notifications::mark_all_read),
        )
        .route(
            "/notifications/{notification_id}/read",
            post(notifications::mark_read),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    public.merge(protected).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use gigline_gateway::Dispatcher;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    struct TestApp {
        router: Router,
    }

    fn app() -> TestApp {
        let state = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
            media_dir: std::env::temp_dir().join(format!("gigline-test-{}", uuid::Uuid::new_v4())),
            token_ttl: chrono::Duration::days(1),
        });
        TestApp {
            router: routes(state),
        }
    }

    impl TestApp {
        async fn call(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                req = req.header("authorization", format!("Bearer {}", token));
            }
            let req = match body {
                Some(body) => req
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string())),
                None => req.body(Body::empty()),
            }
            .unwrap();

            let resp = self.router.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        async fn register(&self, username: &str, role: &str) -> (String, String) {
            let (status, body) = self
                .call(
                    "POST",
                    "/auth/register",
                    None,
                    Some(json!({"username": username, "password": "correct horse", "role": role})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            (
                body["user_id"].as_str().unwrap().to_string(),
                body["token"].as_str().unwrap().to_string(),
            )
        }

        /// Organizer and vendor with a shared room: (room_id, organizer_token, vendor_token).
        async fn room(&self) -> (String, String, String) {
            let (org_id, org) = self.register("org", "organizer").await;
            let (vendor_id, vendor) = self.register("band", "vendor").await;
            let (status, room) = self
                .call(
                    "POST",
                    "/rooms",
                    Some(&org),
                    Some(json!({"organizer_id": org_id, "vendor_id": vendor_id})),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{}", room);
            (room["id"].as_str().unwrap().to_string(), org, vendor)
        }
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let app = app();
        let (status, body) = app.call("GET", "/rooms", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "authentication required");

        let (status, _) = app.call("GET", "/rooms", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_usernames_conflict() {
        let app = app();
        app.register("org", "organizer").await;
        let (status, _) = app
            .call(
                "POST",
                "/auth/register",
                None,
                Some(json!({"username": "org", "password": "another password", "role": "vendor"})),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rooms_are_unique_per_pair() {
        let app = app();
        let (room_id, org, vendor) = app.room().await;

        let (_, rooms) = app.call("GET", "/rooms", Some(&vendor), None).await;
        assert_eq!(rooms.as_array().unwrap().len(), 1);
        assert_eq!(rooms[0]["id"], room_id.as_str());

        let (status, room) = app
            .call("GET", &format!("/rooms/{}", room_id), Some(&org), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(room["vendor_username"], "band");

        let (_, again) = app
            .call(
                "POST",
                "/rooms",
                Some(&vendor),
                Some(json!({"organizer_id": room["organizer_id"], "vendor_id": room["vendor_id"]})),
            )
            .await;
        assert_eq!(again["id"], room_id.as_str());
    }

    #[tokio::test]
    async fn outsiders_cannot_read_a_room() {
        let app = app();
        let (room_id, _, _) = app.room().await;
        let (_, stranger) = app.register("stranger", "vendor").await;

        let (status, _) = app
            .call("GET", &format!("/rooms/{}/messages", room_id), Some(&stranger), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn messages_notify_the_counterpart() {
        let app = app();
        let (room_id, org, vendor) = app.room().await;

        let (status, message) = app
            .call(
                "POST",
                &format!("/rooms/{}/messages", room_id),
                Some(&org),
                Some(json!({"text": "Hello"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["text"], "Hello");

        let (status, _) = app
            .call(
                "POST",
                &format!("/rooms/{}/messages", room_id),
                Some(&org),
                Some(json!({"text": "   "})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, count) = app
            .call("GET", "/notifications/unread-count", Some(&vendor), None)
            .await;
        assert_eq!(count["unread_count"], 1);

        let (_, list) = app.call("GET", "/notifications", Some(&vendor), None).await;
        assert_eq!(list[0]["notification_type"], "new_message");
        assert_eq!(list[0]["message"], "Hello");
        assert_eq!(list[0]["deep_link"], format!("/dm/{}", room_id));

        let (_, marked) = app
            .call("POST", "/notifications/mark-all-read", Some(&vendor), None)
            .await;
        assert_eq!(marked["marked_read"], 1);
    }

    #[tokio::test]
    async fn read_receipts_are_set_once_by_the_recipient() {
        let app = app();
        let (room_id, org, vendor) = app.room().await;
        let (_, message) = app
            .call(
                "POST",
                &format!("/rooms/{}/messages", room_id),
                Some(&org),
                Some(json!({"text": "Hello"})),
            )
            .await;
        let read_uri = format!(
            "/rooms/{}/messages/{}/read",
            room_id,
            message["id"].as_str().unwrap()
        );

        let (status, _) = app.call("POST", &read_uri, Some(&org), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, first) = app.call("POST", &read_uri, Some(&vendor), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, second) = app.call("POST", &read_uri, Some(&vendor), None).await;
        assert_eq!(first["read_at"], second["read_at"]);
    }

    #[tokio::test]
    async fn bid_lifecycle_enforces_roles_and_state() {
        let app = app();
        let (room_id, org, vendor) = app.room().await;
        let bids_uri = format!("/rooms/{}/bids", room_id);
        let body = json!({"amount": 500, "currency": "USD", "idempotency_key": "k1"});

        let (status, _) = app
            .call("POST", &bids_uri, Some(&vendor), Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, bid) = app
            .call("POST", &bids_uri, Some(&org), Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(bid["status"], "pending");
        assert_eq!(bid["amount"], "500.00");

        let (status, replay) = app.call("POST", &bids_uri, Some(&org), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay["id"], bid["id"]);

        let bid_uri = format!("{}/{}", bids_uri, bid["id"].as_str().unwrap());
        let (status, _) = app
            .call("PATCH", &bid_uri, Some(&org), Some(json!({"accept": true})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .call("PATCH", &bid_uri, Some(&vendor), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, accepted) = app
            .call("PATCH", &bid_uri, Some(&vendor), Some(json!({"accept": true})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted["status"], "accepted");

        let (status, _) = app
            .call("PATCH", &bid_uri, Some(&vendor), Some(json!({"decline": true})))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // One anchor message, patched in place.
        let (_, history) = app
            .call("GET", &format!("/rooms/{}/messages", room_id), Some(&org), None)
            .await;
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["bid"]["status"], "accepted");

        let (_, org_notes) = app.call("GET", "/notifications", Some(&org), None).await;
        assert_eq!(org_notes[0]["notification_type"], "bid_accepted");
    }
}
