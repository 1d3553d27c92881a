use thiserror::Error;

/// Rejections of room-management requests, reported back as `RequestFailed`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room {0} does not exist")]
    RoomNotFound(String),
    #[error("only the host can change the rules")]
    NotHost,
    #[error("not in a room")]
    NotInRoom,
}
