mod availability;
mod code;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::available_rooms;
pub use code::{CODE_ALPHABET, CODE_LEN, generate_code, is_well_formed};
pub use conflict::{parse_instant, parse_stay};
pub use error::HotelError;
pub use mutations::{NewRoom, ReservationRequest};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use crate::model::Room;
use crate::repository::{RepositoryError, RoomRepository};

/// Default upper bound on a single repository call.
pub const DEFAULT_REPOSITORY_TIMEOUT: Duration = Duration::from_secs(5);

/// Reservation lifecycle and availability over a [`RoomRepository`].
///
/// Holds no room state of its own; every operation reads a fresh snapshot
/// and writes back through the repository's conditional save.
pub struct Hotel {
    repo: Arc<dyn RoomRepository>,
    repo_timeout: Duration,
}

impl Hotel {
    pub fn new(repo: Arc<dyn RoomRepository>) -> Self {
        Self {
            repo,
            repo_timeout: DEFAULT_REPOSITORY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.repo_timeout = timeout;
        self
    }

    /// Run one repository call, failing it if it outlives the timeout.
    pub(super) async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, RepositoryError>>,
    ) -> Result<T, RepositoryError> {
        match tokio::time::timeout(self.repo_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::Storage(format!(
                "{op} timed out after {:?}",
                self.repo_timeout
            ))),
        }
    }

    pub(super) async fn load_room(&self, id: Ulid) -> Result<Room, HotelError> {
        self.call("find_room_by_id", self.repo.find_room_by_id(id))
            .await?
            .ok_or(HotelError::RoomNotFound(id))
    }
}

/// Present and not blank.
pub(super) fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
