use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bid::BidStatus;
use crate::money::Amount;

/// Which side of a booking negotiation a user sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Organizer,
    Vendor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organizer => "organizer",
            Self::Vendor => "vendor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "organizer" => Some(Self::Organizer),
            "vendor" => Some(Self::Vendor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub username: String,
}

/// A two-party conversation between an organizer and a vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub organizer_username: String,
    pub vendor_id: Uuid,
    pub vendor_username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        user_id == self.organizer_id || user_id == self.vendor_id
    }

    pub fn role_of(&self, user_id: Uuid) -> Option<Role> {
        if user_id == self.organizer_id {
            Some(Role::Organizer)
        } else if user_id == self.vendor_id {
            Some(Role::Vendor)
        } else {
            None
        }
    }

    /// The participant who is not `viewer`. `None` if `viewer` is not in the room.
    pub fn counterpart(&self, viewer: Uuid) -> Option<Participant> {
        match self.role_of(viewer)? {
            Role::Organizer => Some(Participant {
                id: self.vendor_id,
                username: self.vendor_username.clone(),
            }),
            Role::Vendor => Some(Participant {
                id: self.organizer_id,
                username: self.organizer_username.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub file_url: String,
    pub original_name: String,
    #[serde(default)]
    pub size: u64,
}

/// A booking offer embedded in its anchor message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub room_id: Uuid,
    pub organizer_id: Uuid,
    pub vendor_id: Uuid,
    pub amount: Amount,
    pub currency: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub status: BidStatus,
    #[serde(default)]
    pub counter_amount: Option<Amount>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bid {
    /// Human-readable status line for display next to the bid. Never stored.
    pub fn status_line(&self) -> String {
        match (self.status, self.counter_amount) {
            (BidStatus::Countered, Some(counter)) => {
                format!("Bid countered to {} {}", self.currency, counter)
            }
            (status, _) => format!("Bid {}", status),
        }
    }
}

/// A chat message. `id` is server-assigned and stable across every delivery
/// path (push, history fetch, send echo).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    #[serde(default)]
    pub sender_username: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub bid: Option<Bid>,
    pub created_at: DateTime<Utc>,
    /// When the server accepted and stored the message.
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewMessage,
    NewBid,
    BidAccepted,
    BidDeclined,
    BidCountered,
    BookingRequest,
    BookingConfirmed,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewMessage => "new_message",
            Self::NewBid => "new_bid",
            Self::BidAccepted => "bid_accepted",
            Self::BidDeclined => "bid_declined",
            Self::BidCountered => "bid_countered",
            Self::BookingRequest => "booking_request",
            Self::BookingConfirmed => "booking_confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "new_message" => Self::NewMessage,
            "new_bid" => Self::NewBid,
            "bid_accepted" => Self::BidAccepted,
            "bid_declined" => Self::BidDeclined,
            "bid_countered" => Self::BidCountered,
            "booking_request" => Self::BookingRequest,
            "booking_confirmed" => Self::BookingConfirmed,
            _ => return None,
        })
    }

    /// Notification kind for a bid that just reached `status`.
    pub fn for_bid_status(status: BidStatus) -> Option<Self> {
        match status {
            BidStatus::Pending => Some(Self::NewBid),
            BidStatus::Accepted => Some(Self::BidAccepted),
            BidStatus::Declined => Some(Self::BidDeclined),
            BidStatus::Countered => Some(Self::BidCountered),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Chat,
    Booking,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Booking => "booking",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(Self::Chat),
            "booking" => Some(Self::Booking),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sender_username: Option<String>,
    #[serde(default)]
    pub link_type: Option<LinkType>,
    #[serde(default)]
    pub link_id: Option<Uuid>,
    #[serde(default)]
    pub deep_link: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Navigable in-app path for a link target.
    pub fn deep_link_for(link_type: Option<LinkType>, link_id: Option<Uuid>) -> Option<String> {
        match (link_type?, link_id?) {
            (LinkType::Chat, id) => Some(format!("/dm/{}", id)),
            (LinkType::Booking, id) => Some(format!("/bookings/{}", id)),
        }
    }

    /// The explicit deep link, or one derived from `{link_type, link_id}`.
    pub fn target(&self) -> Option<String> {
        self.deep_link
            .clone()
            .or_else(|| Self::deep_link_for(self.link_type, self.link_id))
    }
}
