use crate::Database;
use crate::models::{
    AttachmentRow, BidRow, MessageRow, NewBid, NewMessage, NewNotification, NotificationRow,
    RoomRow, UserRow,
};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params, params_from_iter};
use uuid::Uuid;

const ROOM_SELECT: &str = "
    SELECT r.id, r.organizer_id, o.username, r.vendor_id, v.username, r.created_at, r.updated_at
    FROM rooms r
    JOIN users o ON o.id = r.organizer_id
    JOIN users v ON v.id = r.vendor_id";

const MESSAGE_SELECT: &str = "
    SELECT m.id, m.room_id, m.sender_id, u.username, m.text, m.bid_id, m.created_at, m.read_at, m.delivered_at
    FROM messages m
    LEFT JOIN users u ON u.id = m.sender_id";

const BID_COLUMNS: &str = "id, room_id, organizer_id, vendor_id, amount_cents, currency, tier, notes, \
     status, counter_amount_cents, idempotency_key, anchor_message_id, created_at, updated_at";

const NOTIFICATION_SELECT: &str = "
    SELECT n.id, n.recipient_id, s.username, n.notification_type, n.title, n.message,
           n.link_type, n.link_id, n.data, n.is_read, n.read_at, n.created_at
    FROM notifications n
    LEFT JOIN users s ON s.id = n.sender_id";

/// Result of marking a message read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `read_at` was set by this call.
    Marked(DateTime<Utc>),
    /// The message was already read; `read_at` is unchanged.
    AlreadyRead(DateTime<Utc>),
    /// Authors cannot mark their own messages read.
    OwnMessage,
    NotFound,
}

/// Placeholder list `?{start}, ?{start+1}, ...` for an `IN (...)` clause.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
        role: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, username, password_hash, role, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password, role, created_at FROM users WHERE username = ?1",
                [username],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password, role, created_at FROM users WHERE id = ?1",
                [id],
                user_from_row,
            )
            .optional()
        })
    }

    // -- Rooms --

    /// Return the room for this organizer/vendor pair, creating it with `id` if absent.
    pub fn get_or_create_room(
        &self,
        id: Uuid,
        organizer_id: Uuid,
        vendor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RoomRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO rooms (id, organizer_id, vendor_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, organizer_id, vendor_id, now],
            )?;

            let sql = format!("{ROOM_SELECT} WHERE r.organizer_id = ?1 AND r.vendor_id = ?2");
            conn.query_row(&sql, params![organizer_id, vendor_id], room_from_row)
                .map_err(Into::into)
        })
    }

    pub fn get_room(&self, id: Uuid) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, id))
    }

    pub fn list_rooms_for_user(&self, user_id: Uuid) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{ROOM_SELECT} WHERE r.organizer_id = ?1 OR r.vendor_id = ?1 ORDER BY r.updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], room_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Attachments --

    pub fn insert_attachment(&self, row: &AttachmentRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO attachments (id, room_id, uploaded_by, stored_name, original_name, size, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id,
                    row.room_id,
                    row.uploaded_by,
                    row.stored_name,
                    row.original_name,
                    row.size,
                    row.uploaded_at
                ],
            )?;
            Ok(())
        })
    }

    /// How many of `ids` are attachments uploaded to `room_id`.
    pub fn count_room_attachments(&self, room_id: Uuid, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM attachments WHERE room_id = ?1 AND id IN ({})",
                placeholders(2, ids.len())
            );
            let values = std::iter::once(room_id).chain(ids.iter().copied());
            let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Batch-fetch attachments for a set of messages as `(message_id, attachment)` pairs,
    /// in attachment order.
    pub fn get_attachments_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, AttachmentRow)>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT ma.message_id, a.id, a.room_id, a.uploaded_by, a.stored_name, a.original_name, a.size, a.uploaded_at
                 FROM message_attachments ma
                 JOIN attachments a ON a.id = ma.attachment_id
                 WHERE ma.message_id IN ({})
                 ORDER BY ma.message_id, ma.position",
                placeholders(1, message_ids.len())
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(message_ids.iter()), |row| {
                    Ok((
                        row.get(0)?,
                        AttachmentRow {
                            id: row.get(1)?,
                            room_id: row.get(2)?,
                            uploaded_by: row.get(3)?,
                            stored_name: row.get(4)?,
                            original_name: row.get(5)?,
                            size: row.get(6)?,
                            uploaded_at: row.get(7)?,
                        },
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message with its attachment links and bump the room's `updated_at`.
    pub fn insert_message(&self, new: &NewMessage<'_>) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            insert_message_tx(&tx, new, None)?;
            let row = query_message(&tx, new.id)?
                .ok_or_else(|| anyhow!("message {} vanished after insert", new.id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// All messages of a room, oldest first.
    pub fn get_messages(&self, room_id: Uuid) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT} WHERE m.room_id = ?1 ORDER BY m.created_at ASC, m.rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([room_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Set `read_at` once. Later calls leave the first timestamp in place.
    pub fn mark_message_read(
        &self,
        room_id: Uuid,
        message_id: Uuid,
        reader_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ReadOutcome> {
        self.with_conn(|conn| {
            let existing: Option<(Uuid, Option<DateTime<Utc>>)> = conn
                .query_row(
                    "SELECT sender_id, read_at FROM messages WHERE id = ?1 AND room_id = ?2",
                    params![message_id, room_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((sender_id, read_at)) = existing else {
                return Ok(ReadOutcome::NotFound);
            };
            if sender_id == reader_id {
                return Ok(ReadOutcome::OwnMessage);
            }
            if let Some(read_at) = read_at {
                return Ok(ReadOutcome::AlreadyRead(read_at));
            }

            conn.execute(
                "UPDATE messages SET read_at = ?2 WHERE id = ?1 AND read_at IS NULL",
                params![message_id, at],
            )?;
            Ok(ReadOutcome::Marked(at))
        })
    }

    // -- Bids --

    /// Create a bid and its anchor message, unless the room already has a bid
    /// with the same idempotency key. Returns `(bid, created)`.
    pub fn create_bid_idempotent(&self, new: &NewBid<'_>) -> Result<(BidRow, bool)> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let sql = format!("SELECT {BID_COLUMNS} FROM bids WHERE room_id = ?1 AND idempotency_key = ?2");
            let existing = tx
                .query_row(&sql, params![new.room_id, new.idempotency_key], bid_from_row)
                .optional()?;
            if let Some(existing) = existing {
                return Ok((existing, false));
            }

            tx.execute(
                &format!(
                    "INSERT INTO bids ({BID_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', NULL, ?9, ?10, ?11, ?11)"
                ),
                params![
                    new.id,
                    new.room_id,
                    new.organizer_id,
                    new.vendor_id,
                    new.amount_cents,
                    new.currency,
                    new.tier,
                    new.notes,
                    new.idempotency_key,
                    new.anchor_message_id,
                    new.created_at,
                ],
            )?;

            insert_message_tx(
                &tx,
                &NewMessage {
                    id: new.anchor_message_id,
                    room_id: new.room_id,
                    sender_id: new.organizer_id,
                    text: None,
                    attachment_ids: &[],
                    created_at: new.created_at,
                },
                Some(new.id),
            )?;

            let bid = query_bid(&tx, new.id)?
                .ok_or_else(|| anyhow!("bid {} vanished after insert", new.id))?;
            tx.commit()?;
            Ok((bid, true))
        })
    }

    pub fn get_bid(&self, room_id: Uuid, bid_id: Uuid) -> Result<Option<BidRow>> {
        self.with_conn(|conn| {
            Ok(query_bid(conn, bid_id)?.filter(|bid| bid.room_id == room_id))
        })
    }

    pub fn get_bids(&self, ids: &[Uuid]) -> Result<Vec<BidRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {BID_COLUMNS} FROM bids WHERE id IN ({})",
                placeholders(1, ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), bid_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Compare-and-set a bid's status. Returns `None` when the stored status
    /// is no longer `expected_status` (a concurrent mutation won).
    pub fn update_bid_status(
        &self,
        bid_id: Uuid,
        expected_status: &str,
        status: &str,
        amount_cents: i64,
        counter_amount_cents: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<Option<BidRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE bids SET status = ?3, amount_cents = ?4, counter_amount_cents = ?5, updated_at = ?6
                 WHERE id = ?1 AND status = ?2",
                params![bid_id, expected_status, status, amount_cents, counter_amount_cents, at],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_bid(conn, bid_id)
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, new: &NewNotification<'_>) -> Result<NotificationRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications
                    (id, recipient_id, sender_id, notification_type, title, message, link_type, link_id, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    new.id,
                    new.recipient_id,
                    new.sender_id,
                    new.notification_type,
                    new.title,
                    new.message,
                    new.link_type,
                    new.link_id,
                    new.data,
                    new.created_at,
                ],
            )?;
            query_notification(conn, new.id, new.recipient_id)?
                .ok_or_else(|| anyhow!("notification {} vanished after insert", new.id))
        })
    }

    /// Newest first.
    pub fn list_notifications(&self, recipient_id: Uuid, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{NOTIFICATION_SELECT} WHERE n.recipient_id = ?1
                 ORDER BY n.created_at DESC, n.rowid DESC
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![recipient_id, limit], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn unread_notification_count(&self, recipient_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
                [recipient_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Mark one notification read. `None` if it does not belong to `recipient_id`.
    pub fn mark_notification_read(
        &self,
        id: Uuid,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, ?3)
                 WHERE id = ?1 AND recipient_id = ?2",
                params![id, recipient_id, at],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_notification(conn, id, recipient_id)
        })
    }

    pub fn mark_all_notifications_read(&self, recipient_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE recipient_id = ?1 AND is_read = 0",
                params![recipient_id, at],
            )?;
            Ok(changed as u64)
        })
    }
}

fn insert_message_tx(conn: &Connection, new: &NewMessage<'_>, bid_id: Option<Uuid>) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, room_id, sender_id, text, bid_id, created_at, delivered_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![new.id, new.room_id, new.sender_id, new.text, bid_id, new.created_at, Utc::now()],
    )?;

    for (position, attachment_id) in new.attachment_ids.iter().enumerate() {
        conn.execute(
            "INSERT INTO message_attachments (message_id, attachment_id, position) VALUES (?1, ?2, ?3)",
            params![new.id, attachment_id, position as i64],
        )?;
    }

    conn.execute(
        "UPDATE rooms SET updated_at = ?2 WHERE id = ?1",
        params![new.room_id, new.created_at],
    )?;
    Ok(())
}

fn query_room(conn: &Connection, id: Uuid) -> Result<Option<RoomRow>> {
    let sql = format!("{ROOM_SELECT} WHERE r.id = ?1");
    conn.query_row(&sql, [id], room_from_row).optional()
}

fn query_message(conn: &Connection, id: Uuid) -> Result<Option<MessageRow>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    conn.query_row(&sql, [id], message_from_row).optional()
}

fn query_bid(conn: &Connection, id: Uuid) -> Result<Option<BidRow>> {
    let sql = format!("SELECT {BID_COLUMNS} FROM bids WHERE id = ?1");
    conn.query_row(&sql, [id], bid_from_row).optional()
}

fn query_notification(conn: &Connection, id: Uuid, recipient_id: Uuid) -> Result<Option<NotificationRow>> {
    let sql = format!("{NOTIFICATION_SELECT} WHERE n.id = ?1 AND n.recipient_id = ?2");
    conn.query_row(&sql, params![id, recipient_id], notification_from_row)
        .optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        organizer_id: row.get(1)?,
        organizer_username: row.get(2)?,
        vendor_id: row.get(3)?,
        vendor_username: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        text: row.get(4)?,
        bid_id: row.get(5)?,
        created_at: row.get(6)?,
        read_at: row.get(7)?,
        delivered_at: row.get(8)?,
    })
}

fn bid_from_row(row: &Row<'_>) -> rusqlite::Result<BidRow> {
    Ok(BidRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        organizer_id: row.get(2)?,
        vendor_id: row.get(3)?,
        amount_cents: row.get(4)?,
        currency: row.get(5)?,
        tier: row.get(6)?,
        notes: row.get(7)?,
        status: row.get(8)?,
        counter_amount_cents: row.get(9)?,
        idempotency_key: row.get(10)?,
        anchor_message_id: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        sender_username: row.get(2)?,
        notification_type: row.get(3)?,
        title: row.get(4)?,
        message: row.get(5)?,
        link_type: row.get(6)?,
        link_id: row.get(7)?,
        data: row.get(8)?,
        is_read: row.get(9)?,
        read_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
