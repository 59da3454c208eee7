use std::future::Future;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use gigline_types::api::{
    CreateBidRequest, CreateRoomRequest, ErrorBody, LoginRequest, LoginResponse,
    MarkAllReadResponse, MarkMessageReadResponse, RegisterRequest, RegisterResponse,
    SendMessageRequest, UnreadCountResponse, UpdateBidRequest,
};
use gigline_types::models::{Attachment, Bid, Message, Notification, Room};

use crate::config::{ClientConfig, join};
use crate::error::ClientError;
use crate::transport::Endpoint;

/// Room-scoped REST operations a [`RoomSession`](crate::RoomSession) needs.
pub trait ChatApi: Send + Sync + 'static {
    fn room_endpoint(&self, room_id: Uuid) -> Result<Endpoint, ClientError>;

    fn get_room(&self, room_id: Uuid) -> impl Future<Output = Result<Room, ClientError>> + Send;

    fn get_messages(
        &self,
        room_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Message>, ClientError>> + Send;

    fn send_message(
        &self,
        room_id: Uuid,
        body: &SendMessageRequest,
    ) -> impl Future<Output = Result<Message, ClientError>> + Send;

    fn mark_message_read(
        &self,
        room_id: Uuid,
        message_id: Uuid,
    ) -> impl Future<Output = Result<MarkMessageReadResponse, ClientError>> + Send;

    fn upload_attachment(
        &self,
        room_id: Uuid,
        file_name: String,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<Attachment, ClientError>> + Send;

    fn create_bid(
        &self,
        room_id: Uuid,
        body: &CreateBidRequest,
    ) -> impl Future<Output = Result<Bid, ClientError>> + Send;

    fn update_bid(
        &self,
        room_id: Uuid,
        bid_id: Uuid,
        body: &UpdateBidRequest,
    ) -> impl Future<Output = Result<Bid, ClientError>> + Send;
}

/// User-scoped REST operations a [`NotificationSession`](crate::NotificationSession) needs.
pub trait NotificationApi: Send + Sync + 'static {
    fn notifications_endpoint(&self) -> Result<Endpoint, ClientError>;

    fn list_notifications(
        &self,
    ) -> impl Future<Output = Result<Vec<Notification>, ClientError>> + Send;

    fn unread_count(&self) -> impl Future<Output = Result<u64, ClientError>> + Send;

    fn mark_notification_read(
        &self,
        notification_id: Uuid,
    ) -> impl Future<Output = Result<Notification, ClientError>> + Send;

    fn mark_all_notifications_read(&self) -> impl Future<Output = Result<u64, ClientError>> + Send;
}

/// HTTP client for the gigline REST surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn token(&self) -> Result<&str, ClientError> {
        self.config.token.as_deref().ok_or(ClientError::Unauthorized)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, join(&self.config.http_base, path));
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn register(&self, body: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        decode(self.request(Method::POST, "/auth/register").json(body).send().await?).await
    }

    pub async fn login(&self, body: &LoginRequest) -> Result<LoginResponse, ClientError> {
        decode(self.request(Method::POST, "/auth/login").json(body).send().await?).await
    }

    pub async fn create_room(&self, body: &CreateRoomRequest) -> Result<Room, ClientError> {
        decode(self.request(Method::POST, "/rooms").json(body).send().await?).await
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, ClientError> {
        decode(self.request(Method::GET, "/rooms").send().await?).await
    }
}

/// Decode a success body, or turn an error status and its `detail` into a
/// [`ClientError`].
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    let bytes = resp.bytes().await?;

    if !status.is_success() {
        let detail = serde_json::from_slice::<ErrorBody>(&bytes)
            .map(|body| body.detail)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
        return Err(ClientError::from_status(status, detail));
    }

    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

impl ChatApi for ApiClient {
    fn room_endpoint(&self, room_id: Uuid) -> Result<Endpoint, ClientError> {
        Endpoint::room(&self.config.ws_base, room_id, self.token()?)
    }

    async fn get_room(&self, room_id: Uuid) -> Result<Room, ClientError> {
        let path = format!("/rooms/{}", room_id);
        decode(self.request(Method::GET, &path).send().await?).await
    }

    async fn get_messages(&self, room_id: Uuid) -> Result<Vec<Message>, ClientError> {
        let path = format!("/rooms/{}/messages", room_id);
        decode(self.request(Method::GET, &path).send().await?).await
    }

    async fn send_message(&self, room_id: Uuid, body: &SendMessageRequest) -> Result<Message, ClientError> {
        let path = format!("/rooms/{}/messages", room_id);
        decode(self.request(Method::POST, &path).json(body).send().await?).await
    }

    async fn mark_message_read(
        &self,
        room_id: Uuid,
        message_id: Uuid,
    ) -> Result<MarkMessageReadResponse, ClientError> {
        let path = format!("/rooms/{}/messages/{}/read", room_id, message_id);
        decode(self.request(Method::POST, &path).send().await?).await
    }

    async fn upload_attachment(
        &self,
        room_id: Uuid,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<Attachment, ClientError> {
        let path = format!("/rooms/{}/attachments", room_id);
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        decode(self.request(Method::POST, &path).multipart(form).send().await?).await
    }

    async fn create_bid(&self, room_id: Uuid, body: &CreateBidRequest) -> Result<Bid, ClientError> {
        let path = format!("/rooms/{}/bids", room_id);
        decode(self.request(Method::POST, &path).json(body).send().await?).await
    }

    async fn update_bid(
        &self,
        room_id: Uuid,
        bid_id: Uuid,
        body: &UpdateBidRequest,
    ) -> Result<Bid, ClientError> {
        let path = format!("/rooms/{}/bids/{}", room_id, bid_id);
        decode(self.request(Method::PATCH, &path).json(body).send().await?).await
    }
}

impl NotificationApi for ApiClient {
    fn notifications_endpoint(&self) -> Result<Endpoint, ClientError> {
        Endpoint::notifications(&self.config.ws_base, self.token()?)
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>, ClientError> {
        decode(self.request(Method::GET, "/notifications").send().await?).await
    }

    async fn unread_count(&self) -> Result<u64, ClientError> {
        let body: UnreadCountResponse =
            decode(self.request(Method::GET, "/notifications/unread-count").send().await?).await?;
        Ok(body.unread_count)
    }

    async fn mark_notification_read(&self, notification_id: Uuid) -> Result<Notification, ClientError> {
        let path = format!("/notifications/{}/read", notification_id);
        decode(self.request(Method::POST, &path).send().await?).await
    }

    async fn mark_all_notifications_read(&self) -> Result<u64, ClientError> {
        let body: MarkAllReadResponse =
            decode(self.request(Method::POST, "/notifications/mark-all-read").send().await?).await?;
        Ok(body.marked_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_endpoints_need_a_token() {
        let client = ApiClient::new(ClientConfig::new("http://127.0.0.1:3000").unwrap());
        assert!(matches!(client.room_endpoint(Uuid::new_v4()), Err(ClientError::Unauthorized)));

        let client = client.with_token("jwt");
        let endpoint = client.notifications_endpoint().unwrap();
        assert_eq!(endpoint.url().scheme(), "ws");
        assert_eq!(endpoint.url().query(), Some("token=jwt"));
    }
}
