use ulid::Ulid;

use crate::model::*;

use super::availability::{available_rooms, sort_by_number};
use super::code::is_well_formed;
use super::conflict::{parse_stay, validate_query_window};
use super::{Hotel, HotelError, present};

impl Hotel {
    pub async fn list_rooms(&self) -> Result<Vec<RoomInfo>, HotelError> {
        let rooms = self.call("list_rooms", self.repo.list_rooms()).await?;
        let mut refs: Vec<&Room> = rooms.iter().collect();
        sort_by_number(&mut refs);
        Ok(refs.into_iter().map(Room::info).collect())
    }

    pub async fn get_room(&self, id: Ulid) -> Result<RoomInfo, HotelError> {
        Ok(self.load_room(id).await?.info())
    }

    /// Rooms bookable for the whole of `[checkin, checkout)`.
    pub async fn find_available(
        &self,
        checkin: &str,
        checkout: &str,
    ) -> Result<Vec<RoomInfo>, HotelError> {
        let stay = parse_stay(checkin, checkout)?;
        validate_query_window(&stay)?;
        let rooms = self.call("list_rooms", self.repo.list_rooms()).await?;
        Ok(available_rooms(&rooms, &stay)
            .into_iter()
            .map(Room::info)
            .collect())
    }

    /// Every active reservation matching code and name, earliest checkin first.
    pub async fn lookup_reservations(
        &self,
        code: Option<&str>,
        name: Option<&str>,
    ) -> Result<Vec<ReservationView>, HotelError> {
        let (Some(code), Some(name)) = (present(code), present(name)) else {
            return Err(HotelError::Unauthorized);
        };
        if !is_well_formed(code) {
            return Err(HotelError::Unauthorized);
        }

        let rooms = self
            .call(
                "find_rooms_by_reservation_credential",
                self.repo.find_rooms_by_reservation_credential(code, name),
            )
            .await?;
        let mut views: Vec<ReservationView> = rooms
            .iter()
            .flat_map(|room| room.reservations.iter())
            .filter(|r| r.matches_credential(code, name))
            .filter_map(ReservationView::from_reservation)
            .collect();
        if views.is_empty() {
            return Err(HotelError::Unauthorized);
        }
        views.sort_by(|a, b| a.checkin.cmp(&b.checkin).then_with(|| a.id.cmp(&b.id)));
        Ok(views)
    }
}
