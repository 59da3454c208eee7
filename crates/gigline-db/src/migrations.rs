use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          BLOB PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            role        TEXT NOT NULL CHECK (role IN ('organizer', 'vendor')),
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id              BLOB PRIMARY KEY,
            organizer_id    BLOB NOT NULL REFERENCES users(id),
            vendor_id       BLOB NOT NULL REFERENCES users(id),
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE(organizer_id, vendor_id),
            CHECK (organizer_id != vendor_id)
        );

        CREATE TABLE IF NOT EXISTS bids (
            id                      BLOB PRIMARY KEY,
            room_id                 BLOB NOT NULL REFERENCES rooms(id),
            organizer_id            BLOB NOT NULL REFERENCES users(id),
            vendor_id               BLOB NOT NULL REFERENCES users(id),
            amount_cents            INTEGER NOT NULL CHECK (amount_cents > 0),
            currency                TEXT NOT NULL DEFAULT 'USD',
            tier                    TEXT,
            notes                   TEXT,
            status                  TEXT NOT NULL DEFAULT 'pending',
            counter_amount_cents    INTEGER,
            idempotency_key         TEXT NOT NULL,
            anchor_message_id       BLOB NOT NULL,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL,
            UNIQUE(room_id, idempotency_key)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              BLOB PRIMARY KEY,
            room_id         BLOB NOT NULL REFERENCES rooms(id),
            sender_id       BLOB NOT NULL REFERENCES users(id),
            text            TEXT,
            bid_id          BLOB REFERENCES bids(id),
            created_at      TEXT NOT NULL,
            delivered_at    TEXT,
            read_at         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS attachments (
            id              BLOB PRIMARY KEY,
            room_id         BLOB NOT NULL REFERENCES rooms(id),
            uploaded_by     BLOB NOT NULL REFERENCES users(id),
            stored_name     TEXT NOT NULL,
            original_name   TEXT NOT NULL,
            size            INTEGER NOT NULL DEFAULT 0,
            uploaded_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_attachments (
            message_id      BLOB NOT NULL REFERENCES messages(id),
            attachment_id   BLOB NOT NULL REFERENCES attachments(id),
            position        INTEGER NOT NULL,
            PRIMARY KEY (message_id, attachment_id)
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id                  BLOB PRIMARY KEY,
            recipient_id        BLOB NOT NULL REFERENCES users(id),
            sender_id           BLOB REFERENCES users(id),
            notification_type   TEXT NOT NULL,
            title               TEXT NOT NULL,
            message             TEXT NOT NULL DEFAULT '',
            link_type           TEXT NOT NULL DEFAULT '',
            link_id             BLOB,
            data                TEXT NOT NULL DEFAULT '{}',
            is_read             INTEGER NOT NULL DEFAULT 0,
            read_at             TEXT,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_unread
            ON notifications(recipient_id, is_read);
        CREATE INDEX IF NOT EXISTS idx_notifications_recent
            ON notifications(recipient_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
