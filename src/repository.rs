use async_trait::async_trait;
use ulid::Ulid;

use crate::model::Room;

/// Durable home of rooms and their embedded reservations.
///
/// Reads hand out owned snapshots. Writes are whole-document and
/// conditional: `save_room` only lands if the caller saw the latest version.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>, RepositoryError>;

    async fn find_room_by_id(&self, id: Ulid) -> Result<Option<Room>, RepositoryError>;

    /// Rooms holding an active reservation with exactly this code and name.
    async fn find_rooms_by_reservation_credential(
        &self,
        code: &str,
        name: &str,
    ) -> Result<Vec<Room>, RepositoryError>;

    /// The room where `reservation_id` with this code and name lives, or lived
    /// before a cancellation still held in the room's ledger.
    async fn find_room_by_reservation_id_and_credential(
        &self,
        reservation_id: Ulid,
        code: &str,
        name: &str,
    ) -> Result<Option<Room>, RepositoryError>;

    /// Replace the stored room if its version still equals `room.version`.
    /// Returns the stored document carrying the bumped version.
    async fn save_room(&self, room: Room) -> Result<Room, RepositoryError>;

    async fn insert_room(&self, room: Room) -> Result<(), RepositoryError>;

    /// Remove the room if its version still equals `version`.
    async fn delete_room(&self, id: Ulid, version: u64) -> Result<(), RepositoryError>;

    /// Whether any room holds `code`, active or cancelled.
    async fn is_code_taken(&self, code: &str) -> Result<bool, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    VersionConflict { id: Ulid, expected: u64, found: u64 },
    DuplicateCode(String),
    LimitExceeded(&'static str),
    Storage(String),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::NotFound(id) => write!(f, "room not found: {id}"),
            RepositoryError::AlreadyExists(id) => write!(f, "room already exists: {id}"),
            RepositoryError::VersionConflict { id, expected, found } => write!(
                f,
                "stale write to room {id}: expected version {expected}, found {found}"
            ),
            RepositoryError::DuplicateCode(code) => {
                write!(f, "reservation code already in use: {code}")
            }
            RepositoryError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            RepositoryError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for RepositoryError {}
