use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use gigline_db::models::NewNotification;
use gigline_types::api::{Claims, MarkAllReadResponse, UnreadCountResponse};
use gigline_types::events::NotificationEvent;
use gigline_types::models::{LinkType, NotificationType};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{run_blocking, views};

/// Most notifications returned by the list endpoint.
pub const LIST_LIMIT: u32 = 50;

/// A notification about activity in a room, addressed to one user.
pub struct Notice {
    pub recipient_id: Uuid,
    pub sender_id: Uuid,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub room_id: Uuid,
    pub data: serde_json::Value,
}

/// Store a notification and push it to every open session of the recipient.
/// Best effort: failures are logged, never returned to the triggering request.
pub async fn deliver(state: &AppState, notice: Notice) {
    let recipient_id = notice.recipient_id;
    let stored = run_blocking(state, move |db| {
        db.insert_notification(&NewNotification {
            id: Uuid::new_v4(),
            recipient_id: notice.recipient_id,
            sender_id: Some(notice.sender_id),
            notification_type: notice.kind.as_str(),
            title: &notice.title,
            message: &notice.message,
            link_type: LinkType::Chat.as_str(),
            link_id: Some(notice.room_id),
            data: &notice.data.to_string(),
            created_at: Utc::now(),
        })
    })
    .await;

    let notification = match stored {
        Ok(row) => views::notification(row),
        Err(e) => {
            warn!("Failed to store notification for {}: {}", recipient_id, e);
            return;
        }
    };

    let reached = state
        .dispatcher
        .notify_user(recipient_id, NotificationEvent::Notification { notification })
        .await;
    debug!("Notification pushed to {} sessions of {}", reached, recipient_id);
}

/// GET /notifications: newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = run_blocking(&state, move |db| db.list_notifications(claims.sub, LIST_LIMIT)).await?;
    Ok(Json(rows.into_iter().map(views::notification).collect::<Vec<_>>()))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let unread_count = run_blocking(&state, move |db| db.unread_notification_count(claims.sub)).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let row = run_blocking(&state, move |db| {
        db.mark_notification_read(notification_id, claims.sub, Utc::now())
    })
    .await?
    .ok_or_else(|| ApiError::not_found("notification not found"))?;

    Ok(Json(views::notification(row)))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let marked_read =
        run_blocking(&state, move |db| db.mark_all_notifications_read(claims.sub, Utc::now())).await?;
    Ok(Json(MarkAllReadResponse { marked_read }))
}
