use uuid::Uuid;

use gigline_gateway::{Identity, RoomBackend};
use gigline_types::models::Message;

use crate::auth::AppState;
use crate::messages;
use crate::run_blocking;

/// Room socket operations backed by the same code paths as the REST handlers.
#[derive(Clone)]
pub struct ApiBackend {
    state: AppState,
}

impl ApiBackend {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl RoomBackend for ApiBackend {
    async fn is_participant(&self, room_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let room = run_blocking(&self.state, move |db| db.get_room(room_id)).await?;
        Ok(room.is_some_and(|r| r.organizer_id == user_id || r.vendor_id == user_id))
    }

    async fn send_message(
        &self,
        room_id: Uuid,
        sender: &Identity,
        text: String,
        attachment_ids: Vec<Uuid>,
    ) -> anyhow::Result<Message> {
        Ok(messages::post_message(&self.state, room_id, sender, text, attachment_ids).await?)
    }

    async fn mark_read(&self, room_id: Uuid, message_id: Uuid, reader_id: Uuid) -> anyhow::Result<()> {
        messages::mark_read(&self.state, room_id, message_id, reader_id).await?;
        Ok(())
    }
}
