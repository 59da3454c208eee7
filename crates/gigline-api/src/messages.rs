use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use gigline_db::ReadOutcome;
use gigline_db::models::NewMessage;
use gigline_gateway::Identity;
use gigline_types::api::{Claims, MarkMessageReadResponse, SendMessageRequest};
use gigline_types::events::RoomEvent;
use gigline_types::models::{Message, NotificationType};

use crate::auth::{AppState, identity_of};
use crate::error::ApiError;
use crate::notifications::{self, Notice};
use crate::rooms::participant_room;
use crate::{run_checked, views};

/// Longest notification body taken from a message's text.
const PREVIEW_CHARS: usize = 100;

/// Persist a message, broadcast it to the room and notify the counterpart.
/// Shared by the REST handler and the room socket.
pub async fn post_message(
    state: &AppState,
    room_id: Uuid,
    sender: &Identity,
    text: String,
    mut attachment_ids: Vec<Uuid>,
) -> Result<Message, ApiError> {
    let text = Some(text).filter(|t| !t.trim().is_empty());
    if text.is_none() && attachment_ids.is_empty() {
        return Err(ApiError::bad_request("message must have text or attachments"));
    }
    let mut seen = HashSet::new();
    attachment_ids.retain(|id| seen.insert(*id));

    let sender_id = sender.user_id;
    let (room, message) = run_checked(state, move |db| {
        let room = participant_room(db, room_id, sender_id)?;

        if !attachment_ids.is_empty()
            && db.count_room_attachments(room_id, &attachment_ids)? != attachment_ids.len()
        {
            return Err(ApiError::bad_request("unknown attachment for this room"));
        }

        let row = db.insert_message(&NewMessage {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            text: text.as_deref(),
            attachment_ids: &attachment_ids,
            created_at: Utc::now(),
        })?;
        let message = views::load_messages(db, vec![row])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("inserted message did not load"))?;
        Ok((room, message))
    })
    .await?;

    let delivered = state
        .dispatcher
        .broadcast_room(
            room_id,
            RoomEvent::Message {
                message: message.clone(),
            },
        )
        .await;
    debug!("Message {} delivered to {} connections", message.id, delivered);

    if let Some(counterpart) = room.counterpart(sender.user_id) {
        notifications::deliver(
            state,
            Notice {
                recipient_id: counterpart.id,
                sender_id: sender.user_id,
                kind: NotificationType::NewMessage,
                title: format!("New message from {}", sender.username),
                message: preview(&message),
                room_id,
                data: serde_json::json!({ "message_id": message.id }),
            },
        )
        .await;
    }

    Ok(message)
}

/// Notification body for a new message.
fn preview(message: &Message) -> String {
    match message.text.as_deref() {
        Some(text) => text.chars().take(PREVIEW_CHARS).collect(),
        None => "Sent an attachment".to_string(),
    }
}

/// Mark `message_id` read by `reader_id` and broadcast a receipt the first time.
/// Returns the (unchanging) `read_at`.
pub async fn mark_read(
    state: &AppState,
    room_id: Uuid,
    message_id: Uuid,
    reader_id: Uuid,
) -> Result<DateTime<Utc>, ApiError> {
    let outcome = run_checked(state, move |db| {
        participant_room(db, room_id, reader_id)?;
        Ok(db.mark_message_read(room_id, message_id, reader_id, Utc::now())?)
    })
    .await?;

    match outcome {
        ReadOutcome::Marked(read_at) => {
            state
                .dispatcher
                .broadcast_room(room_id, RoomEvent::ReadReceipt { message_id, read_at })
                .await;
            Ok(read_at)
        }
        ReadOutcome::AlreadyRead(read_at) => Ok(read_at),
        ReadOutcome::OwnMessage => Err(ApiError::bad_request(
            "cannot mark your own message as read",
        )),
        ReadOutcome::NotFound => Err(ApiError::not_found("message not found")),
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = post_message(
        &state,
        room_id,
        &identity_of(&claims),
        req.text,
        req.attachment_ids,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /rooms/{room_id}/messages: full history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = run_checked(&state, move |db| {
        participant_room(db, room_id, claims.sub)?;
        let rows = db.get_messages(room_id)?;
        Ok(views::load_messages(db, rows)?)
    })
    .await?;

    Ok(Json(messages))
}

pub async fn mark_message_read(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let read_at = mark_read(&state, room_id, message_id, claims.sub).await?;
    Ok(Json(MarkMessageReadResponse {
        message_id,
        read_at,
    }))
}
