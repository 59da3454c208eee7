use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use gigline_db::Database;
use gigline_types::api::{Claims, CreateRoomRequest};
use gigline_types::models::{Role, Room};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{run_blocking, run_checked, views};

/// Load a room and check that `user_id` participates in it.
pub(crate) fn participant_room(db: &Database, room_id: Uuid, user_id: Uuid) -> Result<Room, ApiError> {
    let room = db
        .get_room(room_id)?
        .map(views::room)
        .ok_or_else(|| ApiError::not_found("room not found"))?;
    if !room.is_participant(user_id) {
        return Err(ApiError::forbidden("not a participant of this room"));
    }
    Ok(room)
}

/// POST /rooms: get or create the room for an organizer/vendor pair.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.organizer_id == req.vendor_id {
        return Err(ApiError::bad_request("organizer and vendor must differ"));
    }
    if claims.sub != req.organizer_id && claims.sub != req.vendor_id {
        return Err(ApiError::forbidden("you must be one of the room participants"));
    }

    let room = run_checked(&state, move |db| {
        let role_of = |id: Uuid| -> Result<Option<Role>, ApiError> {
            Ok(db.get_user_by_id(id)?.and_then(|u| Role::parse(&u.role)))
        };
        if role_of(req.organizer_id)? != Some(Role::Organizer) {
            return Err(ApiError::bad_request("organizer_id must refer to an organizer"));
        }
        if role_of(req.vendor_id)? != Some(Role::Vendor) {
            return Err(ApiError::bad_request("vendor_id must refer to a vendor"));
        }
        let row = db.get_or_create_room(
            Uuid::new_v4(),
            req.organizer_id,
            req.vendor_id,
            chrono::Utc::now(),
        )?;
        Ok(views::room(row))
    })
    .await?;

    info!(
        "Room {} ready for {} and {}",
        room.id, room.organizer_username, room.vendor_username
    );
    Ok(Json(room))
}

/// GET /rooms: the caller's rooms, most recently active first.
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let rooms = run_blocking(&state, move |db| db.list_rooms_for_user(claims.sub)).await?;
    Ok(Json(rooms.into_iter().map(views::room).collect::<Vec<_>>()))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let room = run_checked(&state, move |db| participant_room(db, room_id, claims.sub)).await?;
    Ok(Json(room))
}
