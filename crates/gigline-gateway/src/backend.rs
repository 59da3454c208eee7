use std::future::Future;

use uuid::Uuid;

use gigline_types::models::Message;

/// The authenticated user behind a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

/// Storage operations a room connection needs. The API crate implements this
/// over the database so that socket sends and REST sends share one code path.
///
/// Implementations broadcast server-originated events (`message`,
/// `read_receipt`) themselves; the connection only relays transient ones.
pub trait RoomBackend: Send + Sync + 'static {
    fn is_participant(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Persist a message and fan it out. Errors are reported to the sender only.
    fn send_message(
        &self,
        room_id: Uuid,
        sender: &Identity,
        text: String,
        attachment_ids: Vec<Uuid>,
    ) -> impl Future<Output = anyhow::Result<Message>> + Send;

    /// Mark a message read by `reader_id`. No-op if it is already read.
    fn mark_read(
        &self,
        room_id: Uuid,
        message_id: Uuid,
        reader_id: Uuid,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}
