use ulid::Ulid;

use crate::repository::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotelError {
    /// A date failed to parse, or checkin is not before checkout.
    InvalidDateRange,
    RoomNotFound(Ulid),
    /// Required fields that were absent or blank, one entry per field.
    ValidationFailed(Vec<&'static str>),
    /// Credential absent or not matching. Deliberately says nothing more.
    Unauthorized,
    ReservationNotFound(Ulid),
    /// The requested stay overlaps an existing reservation of this room.
    RoomUnavailable(Ulid),
    RoomAlreadyExists(Ulid),
    RoomHasReservations(Ulid),
    LimitExceeded(&'static str),
    /// Lost the conditional-save race too many times in a row.
    Contended(Ulid),
    /// Storage failed. Details are logged, never returned.
    RepositoryFailure,
}

impl HotelError {
    /// PostgreSQL SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            HotelError::InvalidDateRange => "22007",
            HotelError::RoomNotFound(_) | HotelError::ReservationNotFound(_) => "P0002",
            HotelError::ValidationFailed(_) => "23502",
            HotelError::Unauthorized => "28000",
            HotelError::RoomUnavailable(_) => "23P01",
            HotelError::RoomAlreadyExists(_) => "23505",
            HotelError::RoomHasReservations(_) => "2BP01",
            HotelError::LimitExceeded(_) => "54000",
            HotelError::Contended(_) => "40001",
            HotelError::RepositoryFailure => "XX000",
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HotelError::InvalidDateRange => "invalid_date_range",
            HotelError::RoomNotFound(_) => "room_not_found",
            HotelError::ValidationFailed(_) => "validation_failed",
            HotelError::Unauthorized => "unauthorized",
            HotelError::ReservationNotFound(_) => "reservation_not_found",
            HotelError::RoomUnavailable(_) => "room_unavailable",
            HotelError::RoomAlreadyExists(_) => "room_already_exists",
            HotelError::RoomHasReservations(_) => "room_has_reservations",
            HotelError::LimitExceeded(_) => "limit_exceeded",
            HotelError::Contended(_) => "contended",
            HotelError::RepositoryFailure => "repository_failure",
        }
    }
}

impl std::fmt::Display for HotelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HotelError::InvalidDateRange => write!(f, "invalid check-in or check-out date"),
            HotelError::RoomNotFound(id) => write!(f, "a room with id {id} does not exist"),
            HotelError::ValidationFailed(fields) => {
                write!(f, "validation failed: missing field(s) {}", fields.join(", "))
            }
            HotelError::Unauthorized => write!(f, "unauthorized"),
            HotelError::ReservationNotFound(id) => {
                write!(f, "a reservation with id {id} does not exist")
            }
            HotelError::RoomUnavailable(id) => {
                write!(f, "room {id} is already reserved for part of that stay")
            }
            HotelError::RoomAlreadyExists(id) => write!(f, "room already exists: {id}"),
            HotelError::RoomHasReservations(id) => {
                write!(f, "cannot delete room {id}: it has active reservations")
            }
            HotelError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            HotelError::Contended(id) => {
                write!(f, "room {id} is busy, retry the request")
            }
            HotelError::RepositoryFailure => write!(f, "internal storage error"),
        }
    }
}

impl std::error::Error for HotelError {}

impl From<RepositoryError> for HotelError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::LimitExceeded(msg) => HotelError::LimitExceeded(msg),
            other => {
                tracing::error!("repository failure: {other}");
                HotelError::RepositoryFailure
            }
        }
    }
}
