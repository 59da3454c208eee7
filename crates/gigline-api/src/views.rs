//! Conversions from storage rows to wire models.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use gigline_db::Database;
use gigline_db::models::{AttachmentRow, BidRow, MessageRow, NotificationRow, RoomRow};
use gigline_types::models::{Attachment, Bid, LinkType, Message, Notification, NotificationType, Room};
use gigline_types::{Amount, BidStatus};

/// URL prefix under which attachment files are served.
pub const ATTACHMENT_URL_PREFIX: &str = "/media/chat_attachments";

pub fn room(row: RoomRow) -> Room {
    Room {
        id: row.id,
        organizer_id: row.organizer_id,
        organizer_username: row.organizer_username,
        vendor_id: row.vendor_id,
        vendor_username: row.vendor_username,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub fn attachment(row: AttachmentRow) -> Attachment {
    Attachment {
        id: row.id,
        file_url: format!("{}/{}", ATTACHMENT_URL_PREFIX, row.stored_name),
        original_name: row.original_name,
        size: row.size.max(0) as u64,
    }
}

pub fn bid(row: BidRow) -> Bid {
    let status = row.status.parse::<BidStatus>().unwrap_or_else(|e| {
        warn!("Corrupt status on bid '{}': {}", row.id, e);
        BidStatus::Pending
    });

    Bid {
        id: row.id,
        room_id: row.room_id,
        organizer_id: row.organizer_id,
        vendor_id: row.vendor_id,
        amount: Amount::from_cents(row.amount_cents),
        currency: row.currency,
        tier: row.tier,
        notes: row.notes,
        status,
        counter_amount: row.counter_amount_cents.map(Amount::from_cents),
        idempotency_key: row.idempotency_key,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub fn notification(row: NotificationRow) -> Notification {
    let notification_type = NotificationType::parse(&row.notification_type).unwrap_or_else(|| {
        warn!(
            "Corrupt notification_type '{}' on notification '{}'",
            row.notification_type, row.id
        );
        NotificationType::NewMessage
    });
    let link_type = match row.link_type.as_str() {
        "" => None,
        other => LinkType::parse(other).or_else(|| {
            warn!("Corrupt link_type '{}' on notification '{}'", other, row.id);
            None
        }),
    };
    let data = serde_json::from_str(&row.data).unwrap_or_else(|e| {
        warn!("Corrupt data on notification '{}': {}", row.id, e);
        serde_json::Value::Null
    });

    Notification {
        id: row.id,
        notification_type,
        title: row.title,
        message: Some(row.message).filter(|m| !m.is_empty()),
        sender_username: row.sender_username,
        link_type,
        link_id: row.link_id,
        deep_link: Notification::deep_link_for(link_type, row.link_id),
        data,
        is_read: row.is_read,
        read_at: row.read_at,
        created_at: row.created_at,
    }
}

/// Attach attachments and embedded bids to message rows, preserving row order.
pub fn load_messages(db: &Database, rows: Vec<MessageRow>) -> anyhow::Result<Vec<Message>> {
    let message_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let bid_ids: Vec<Uuid> = rows.iter().filter_map(|r| r.bid_id).collect();

    let mut attachments: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
    for (message_id, row) in db.get_attachments_for_messages(&message_ids)? {
        attachments.entry(message_id).or_default().push(attachment(row));
    }

    let mut bids: HashMap<Uuid, Bid> = db
        .get_bids(&bid_ids)?
        .into_iter()
        .map(|row| (row.id, bid(row)))
        .collect();

    Ok(rows
        .into_iter()
        .map(|row| Message {
            id: row.id,
            room_id: row.room_id,
            sender_id: row.sender_id,
            sender_username: row.sender_username,
            text: row.text,
            attachments: attachments.remove(&row.id).unwrap_or_default(),
            bid: row.bid_id.and_then(|id| bids.remove(&id)),
            created_at: row.created_at,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
        })
        .collect())
}

/// Load one message with its attachments and bid.
pub fn load_message(db: &Database, id: Uuid) -> anyhow::Result<Option<Message>> {
    let Some(row) = db.get_message(id)? else {
        return Ok(None);
    };
    Ok(load_messages(db, vec![row])?.pop())
}
