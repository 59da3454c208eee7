use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bid::BidAction;
use crate::models::Role;
use crate::money::Amount;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket upgrade path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub token: String,
}

// -- Rooms --

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub organizer_id: Uuid,
    pub vendor_id: Uuid,
}

// -- Messages --

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachment_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkMessageReadResponse {
    pub message_id: Uuid,
    pub read_at: DateTime<Utc>,
}

// -- Bids --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBidRequest {
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub idempotency_key: String,
}

/// PATCH body: exactly one of `accept`, `decline` or `counter_amount`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBidRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_amount: Option<Amount>,
}

impl UpdateBidRequest {
    pub fn from_action(action: BidAction) -> Self {
        match action {
            BidAction::Accept => Self {
                accept: Some(true),
                ..Default::default()
            },
            BidAction::Decline => Self {
                decline: Some(true),
                ..Default::default()
            },
            BidAction::Counter(amount) => Self {
                counter_amount: Some(amount),
                ..Default::default()
            },
        }
    }

    /// The single action this body requests, if it requests exactly one.
    pub fn action(&self) -> Option<BidAction> {
        let mut actions = [
            self.accept.filter(|v| *v).map(|_| BidAction::Accept),
            self.decline.filter(|v| *v).map(|_| BidAction::Decline),
            self.counter_amount.map(BidAction::Counter),
        ]
        .into_iter()
        .flatten();

        let first = actions.next()?;
        match actions.next() {
            Some(_) => None,
            None => Some(first),
        }
    }
}

// -- Notifications --

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkAllReadResponse {
    pub marked_read: u64,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
