use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Bid, Message, Notification};

/// Events pushed by the server over a room socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// A message was stored in the room.
    Message { message: Message },

    /// A bid was created or changed. `message` is the bid's anchor message
    /// carrying the current bid state.
    Bid { message: Message, bid: Bid },

    /// Another member is typing.
    Typing { user_id: Uuid, username: String },

    /// The counterpart read a message.
    ReadReceipt {
        message_id: Uuid,
        read_at: DateTime<Utc>,
    },

    /// Advisory from the server about this connection (bad command, failed send).
    Warning { detail: String },
}

impl RoomEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Bid { .. } => "bid",
            Self::Typing { .. } => "typing",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::Warning { .. } => "warning",
        }
    }
}

/// Commands sent FROM client TO server over a room socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomCommand {
    /// Persist and broadcast a text message.
    SendMessage {
        #[serde(default)]
        text: String,
        #[serde(default)]
        attachment_ids: Vec<Uuid>,
    },

    /// Indicate typing in the joined room.
    Typing,

    /// Mark a message in the joined room as read.
    ReadReceipt { message_id: Uuid },

    /// Move this connection to another room.
    Join { room_id: Uuid },
}

/// Events pushed over the per-user notification socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    Notification { notification: Notification },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_receipt_wire_shape() {
        let message_id = Uuid::new_v4();
        let event = RoomEvent::ReadReceipt {
            message_id,
            read_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "read_receipt");
        assert_eq!(json["message_id"], message_id.to_string());
    }

    #[test]
    fn unit_command_parses_from_bare_tag() {
        let cmd: RoomCommand = serde_json::from_str(r#"{"type":"typing"}"#).unwrap();
        assert_eq!(cmd, RoomCommand::Typing);

        let send: RoomCommand =
            serde_json::from_str(r#"{"type":"send_message","text":"Hello"}"#).unwrap();
        assert_eq!(
            send,
            RoomCommand::SendMessage {
                text: "Hello".into(),
                attachment_ids: vec![]
            }
        );
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(serde_json::from_str::<RoomEvent>(r#"{"type":"presence"}"#).is_err());
    }
}
