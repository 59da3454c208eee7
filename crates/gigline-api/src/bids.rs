use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use gigline_db::models::NewBid;
use gigline_types::api::{Claims, CreateBidRequest, UpdateBidRequest};
use gigline_types::events::RoomEvent;
use gigline_types::models::{Bid, Message, NotificationType, Role, Room};
use gigline_types::{Amount, BidAction, BidStatus, BidTransitionError};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::notifications::{self, Notice};
use crate::rooms::participant_room;
use crate::{run_checked, views};

const DEFAULT_CURRENCY: &str = "USD";
const MAX_IDEMPOTENCY_KEY_LEN: usize = 64;

/// Stored terms of a bid after a vendor action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Terms {
    status: BidStatus,
    amount: Amount,
    counter_amount: Option<Amount>,
}

impl Terms {
    /// Apply `action`. Accepting a countered bid settles on the counter amount;
    /// `counter_amount` survives only while the bid is countered.
    fn apply(self, action: BidAction) -> Result<Terms, BidTransitionError> {
        let status = self.status.apply(action)?;
        let (amount, counter_amount) = match action {
            BidAction::Accept => (self.counter_amount.unwrap_or(self.amount), None),
            BidAction::Decline => (self.amount, None),
            BidAction::Counter(counter) => (self.amount, Some(counter)),
        };
        Ok(Terms {
            status,
            amount,
            counter_amount,
        })
    }
}

fn normalize_currency(currency: Option<&str>) -> Result<String, ApiError> {
    let currency = currency.map(str::trim).filter(|c| !c.is_empty());
    match currency {
        None => Ok(DEFAULT_CURRENCY.to_string()),
        Some(c) if c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()) => {
            Ok(c.to_ascii_uppercase())
        }
        Some(c) => Err(ApiError::bad_request(format!("invalid currency '{}'", c))),
    }
}

async fn broadcast_bid(state: &AppState, message: &Message, bid: &Bid) {
    state
        .dispatcher
        .broadcast_room(
            bid.room_id,
            RoomEvent::Bid {
                message: message.clone(),
                bid: bid.clone(),
            },
        )
        .await;
}

/// POST /rooms/{room_id}/bids: organizer only, idempotent on `idempotency_key`.
/// 201 for a new bid, 200 with the original bid for a repeated key.
pub async fn create_bid(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBidRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !req.amount.is_positive() {
        return Err(ApiError::bad_request("amount must be greater than zero"));
    }
    let key = req.idempotency_key.trim().to_string();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ApiError::bad_request(format!(
            "idempotency_key must be 1 to {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    let currency = normalize_currency(req.currency.as_deref())?;

    let organizer_id = claims.sub;
    let (room, bid, message, created) = run_checked(&state, move |db| {
        let room = participant_room(db, room_id, organizer_id)?;
        if room.role_of(organizer_id) != Some(Role::Organizer) {
            return Err(ApiError::forbidden("only the organizer can create bids"));
        }

        let (row, created) = db.create_bid_idempotent(&NewBid {
            id: Uuid::new_v4(),
            room_id,
            organizer_id,
            vendor_id: room.vendor_id,
            amount_cents: req.amount.cents(),
            currency: &currency,
            tier: req.tier.as_deref(),
            notes: req.notes.as_deref(),
            idempotency_key: &key,
            anchor_message_id: Uuid::new_v4(),
            created_at: Utc::now(),
        })?;
        let message = views::load_message(db, row.anchor_message_id)?
            .ok_or_else(|| anyhow::anyhow!("anchor message of bid {} missing", row.id))?;
        Ok((room, views::bid(row), message, created))
    })
    .await?;

    if !created {
        info!("Bid {} replayed for key '{}'", bid.id, bid.idempotency_key);
        return Ok((StatusCode::OK, Json(bid)));
    }

    info!("Bid {} created in room {} for {} {}", bid.id, room_id, bid.currency, bid.amount);
    broadcast_bid(&state, &message, &bid).await;
    notifications::deliver(
        &state,
        Notice {
            recipient_id: room.vendor_id,
            sender_id: organizer_id,
            kind: NotificationType::NewBid,
            title: format!("New bid from {}", claims.username),
            message: format!("{} {}", bid.currency, bid.amount),
            room_id,
            data: serde_json::json!({ "bid_id": bid.id }),
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(bid)))
}

/// PATCH /rooms/{room_id}/bids/{bid_id}: vendor accepts, declines or counters.
pub async fn update_bid(
    State(state): State<AppState>,
    Path((room_id, bid_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateBidRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let action = req.action().ok_or_else(|| {
        ApiError::bad_request("provide exactly one of accept, decline or counter_amount")
    })?;
    if matches!(action, BidAction::Counter(amount) if !amount.is_positive()) {
        return Err(ApiError::bad_request("counter_amount must be greater than zero"));
    }

    let vendor_id = claims.sub;
    let (room, bid, message) = run_checked(&state, move |db| {
        let room = participant_room(db, room_id, vendor_id)?;
        if room.role_of(vendor_id) != Some(Role::Vendor) {
            return Err(ApiError::forbidden("only the vendor can respond to bids"));
        }

        let current = db
            .get_bid(room_id, bid_id)?
            .map(views::bid)
            .ok_or_else(|| ApiError::not_found("bid not found"))?;
        let next = Terms {
            status: current.status,
            amount: current.amount,
            counter_amount: current.counter_amount,
        }
        .apply(action)
        .map_err(|e| ApiError::conflict(e.to_string()))?;

        let row = db
            .update_bid_status(
                bid_id,
                current.status.as_str(),
                next.status.as_str(),
                next.amount.cents(),
                next.counter_amount.map(Amount::cents),
                Utc::now(),
            )?
            .ok_or_else(|| ApiError::conflict("bid was changed by another request"))?;
        let message = views::load_message(db, row.anchor_message_id)?
            .ok_or_else(|| anyhow::anyhow!("anchor message of bid {} missing", row.id))?;
        Ok((room, views::bid(row), message))
    })
    .await?;

    info!("Bid {} is now {}", bid.id, bid.status);
    broadcast_bid(&state, &message, &bid).await;
    notify_organizer(&state, &room, &bid, &claims.username).await;

    Ok(Json(bid))
}

async fn notify_organizer(state: &AppState, room: &Room, bid: &Bid, vendor_username: &str) {
    let Some(kind) = NotificationType::for_bid_status(bid.status) else {
        return;
    };
    let verb = match bid.status {
        BidStatus::Accepted => "accepted",
        BidStatus::Declined => "declined",
        BidStatus::Countered => "countered",
        BidStatus::Pending => return,
    };

    notifications::deliver(
        state,
        Notice {
            recipient_id: room.organizer_id,
            sender_id: room.vendor_id,
            kind,
            title: format!("{} {} your bid", vendor_username, verb),
            message: bid.status_line(),
            room_id: room.id,
            data: serde_json::json!({ "bid_id": bid.id, "status": bid.status }),
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(amount: i64) -> Terms {
        Terms {
            status: BidStatus::Pending,
            amount: Amount::from_units(amount),
            counter_amount: None,
        }
    }

    #[test]
    fn counter_keeps_the_original_amount() {
        let next = pending(500)
            .apply(BidAction::Counter(Amount::from_units(450)))
            .unwrap();
        assert_eq!(next.status, BidStatus::Countered);
        assert_eq!(next.amount, Amount::from_units(500));
        assert_eq!(next.counter_amount, Some(Amount::from_units(450)));
    }

    #[test]
    fn accepting_a_counter_settles_on_it() {
        let countered = pending(500)
            .apply(BidAction::Counter(Amount::from_units(450)))
            .unwrap();
        let accepted = countered.apply(BidAction::Accept).unwrap();
        assert_eq!(accepted.status, BidStatus::Accepted);
        assert_eq!(accepted.amount, Amount::from_units(450));
        assert_eq!(accepted.counter_amount, None);
    }

    #[test]
    fn declining_clears_the_counter() {
        let declined = pending(500)
            .apply(BidAction::Counter(Amount::from_units(450)))
            .and_then(|t| t.apply(BidAction::Decline))
            .unwrap();
        assert_eq!(declined.amount, Amount::from_units(500));
        assert_eq!(declined.counter_amount, None);
    }

    #[test]
    fn terminal_terms_reject_actions() {
        let accepted = pending(500).apply(BidAction::Accept).unwrap();
        assert!(accepted.apply(BidAction::Decline).is_err());
    }

    #[test]
    fn currency_defaults_and_normalizes() {
        assert_eq!(normalize_currency(None).unwrap(), "USD");
        assert_eq!(normalize_currency(Some(" eur ")).unwrap(), "EUR");
        assert!(normalize_currency(Some("dollars")).is_err());
    }
}
