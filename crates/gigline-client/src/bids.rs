use uuid::Uuid;

use gigline_types::api::CreateBidRequest;
use gigline_types::models::{Bid, Role, Room};
use gigline_types::{Amount, BidStatus};

/// Whether `viewer` may answer `bid`: only the room's vendor, and only while
/// the bid is pending.
pub fn can_act_on_bid(room: &Room, viewer: Uuid, bid: &Bid) -> bool {
    room.role_of(viewer) == Some(Role::Vendor) && bid.status == BidStatus::Pending
}

/// Only the organizer proposes bids.
pub fn can_create_bid(room: &Room, viewer: Uuid) -> bool {
    room.role_of(viewer) == Some(Role::Organizer)
}

/// A bid the organizer is about to submit.
///
/// The idempotency key is fixed when the draft is made; resubmitting the same
/// draft after a timeout cannot create a second bid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidDraft {
    pub amount: Amount,
    pub currency: Option<String>,
    pub tier: Option<String>,
    pub notes: Option<String>,
    idempotency_key: String,
}

impl BidDraft {
    pub fn new(amount: Amount) -> Self {
        Self {
            amount,
            currency: None,
            tier: None,
            notes: None,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn to_request(&self) -> CreateBidRequest {
        CreateBidRequest {
            amount: self.amount,
            currency: self.currency.clone(),
            tier: self.tier.clone(),
            notes: self.notes.clone(),
            idempotency_key: self.idempotency_key.clone(),
        }
    }
}
