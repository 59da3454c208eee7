use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

use gigline_db::models::AttachmentRow;
use gigline_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::rooms::participant_room;
use crate::{run_blocking, run_checked, views};

/// 25 MB upload limit for attachments
pub const MAX_ATTACHMENT_SIZE: usize = 25 * 1024 * 1024;

/// Subdirectory of the media root holding attachment files.
pub const ATTACHMENT_DIR: &str = "chat_attachments";

/// Keep a recognizable, filesystem-safe version of the client's file name.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// POST /rooms/{room_id}/attachments: multipart upload, field `file`.
/// The returned id can be referenced from a message in the same room.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    run_checked(&state, move |db| participant_room(db, room_id, user_id).map(|_| ())).await?;

    let mut upload = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("upload").to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?
        {
            if bytes.len() + chunk.len() > MAX_ATTACHMENT_SIZE {
                return Err(ApiError::PayloadTooLarge(MAX_ATTACHMENT_SIZE));
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some((original_name, bytes));
        break;
    }

    let (original_name, bytes) = upload.ok_or_else(|| ApiError::bad_request("no file provided"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("file is empty"));
    }

    let id = Uuid::new_v4();
    let stored_name = format!("{}_{}", id.simple(), sanitize_file_name(&original_name));

    // Ensure attachment directory exists
    let dir = state.media_dir.join(ATTACHMENT_DIR);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        error!("Failed to create attachment directory {}: {}", dir.display(), e);
        anyhow::anyhow!("attachment storage unavailable")
    })?;

    let file_path = dir.join(&stored_name);
    let mut file = tokio::fs::File::create(&file_path).await.map_err(|e| {
        error!("Failed to create file {}: {}", file_path.display(), e);
        anyhow::anyhow!("attachment storage unavailable")
    })?;
    file.write_all(&bytes).await.map_err(|e| {
        error!("Failed to write file {}: {}", file_path.display(), e);
        anyhow::anyhow!("attachment storage unavailable")
    })?;

    let row = AttachmentRow {
        id,
        room_id,
        uploaded_by: user_id,
        stored_name,
        original_name,
        size: bytes.len() as i64,
        uploaded_at: Utc::now(),
    };
    let attachment = run_blocking(&state, move |db| {
        db.insert_attachment(&row)?;
        Ok(views::attachment(row))
    })
    .await?;

    info!(
        "Stored attachment {} ({} bytes) in room {}",
        attachment.id, attachment.size, room_id
    );
    Ok((StatusCode::CREATED, Json(attachment)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_flattened() {
        assert_eq!(sanitize_file_name("rider.pdf"), "rider.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\stage plot (v2).png"), "stage_plot__v2_.png");
        assert_eq!(sanitize_file_name(".env"), "env");
        assert_eq!(sanitize_file_name(""), "upload");
    }
}
