//! Database row types. These map directly to SQLite rows and stay distinct
//! from the gigline-types wire models so the storage layer can evolve alone.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub password: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

pub struct RoomRow {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub organizer_username: String,
    pub vendor_id: Uuid,
    pub vendor_username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct MessageRow {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub text: Option<String>,
    pub bid_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Stamped when the server stores the message.
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

pub struct AttachmentRow {
    pub id: Uuid,
    pub room_id: Uuid,
    pub uploaded_by: Uuid,
    pub stored_name: String,
    pub original_name: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
}

pub struct BidRow {
    pub id: Uuid,
    pub room_id: Uuid,
    pub organizer_id: Uuid,
    pub vendor_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub tier: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub counter_amount_cents: Option<i64>,
    pub idempotency_key: String,
    pub anchor_message_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct NotificationRow {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub sender_username: Option<String>,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub link_type: String,
    pub link_id: Option<Uuid>,
    pub data: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// -- Inserts --

pub struct NewMessage<'a> {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<&'a str>,
    pub attachment_ids: &'a [Uuid],
    pub created_at: DateTime<Utc>,
}

pub struct NewBid<'a> {
    pub id: Uuid,
    pub room_id: Uuid,
    pub organizer_id: Uuid,
    pub vendor_id: Uuid,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub tier: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub idempotency_key: &'a str,
    pub anchor_message_id: Uuid,
    pub created_at: DateTime<Utc>,
}

pub struct NewNotification<'a> {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub notification_type: &'a str,
    pub title: &'a str,
    pub message: &'a str,
    pub link_type: &'a str,
    pub link_id: Option<Uuid>,
    pub data: &'a str,
    pub created_at: DateTime<Utc>,
}
