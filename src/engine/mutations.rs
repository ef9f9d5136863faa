use chrono::Utc;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::repository::RepositoryError;

use super::code::new_code;
use super::conflict::{check_field_len, check_no_conflict, parse_stay, validate_stay};
use super::{Hotel, HotelError, present};

/// Guest input for a new reservation, as received. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
    pub checkin: Option<String>,
    pub checkout: Option<String>,
}

impl ReservationRequest {
    fn fields(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("name", self.name.as_deref()),
            ("address", self.address.as_deref()),
            ("city", self.city.as_deref()),
            ("zip", self.zip.as_deref()),
            ("country", self.country.as_deref()),
            ("checkin", self.checkin.as_deref()),
            ("checkout", self.checkout.as_deref()),
        ]
    }

    /// Required fields that are absent or blank, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.fields()
            .into_iter()
            .filter(|(_, value)| present(*value).is_none())
            .map(|(field, _)| field)
            .collect()
    }
}

/// Everything a reservation needs, checked. Only built from a complete request.
struct Booking {
    name: String,
    guest: GuestAddress,
    stay: Stay,
}

impl Booking {
    fn from_request(req: ReservationRequest) -> Result<Self, HotelError> {
        let missing = req.missing_fields();
        if !missing.is_empty() {
            return Err(HotelError::ValidationFailed(missing));
        }
        for (_, value) in req.fields() {
            check_field_len(value.unwrap_or_default(), "guest field too long")?;
        }
        let stay = parse_stay(
            req.checkin.as_deref().unwrap_or_default(),
            req.checkout.as_deref().unwrap_or_default(),
        )?;
        validate_stay(&stay)?;
        Ok(Self {
            name: req.name.unwrap_or_default(),
            guest: GuestAddress {
                address: req.address.unwrap_or_default(),
                city: req.city.unwrap_or_default(),
                zip: req.zip.unwrap_or_default(),
                country: req.country.unwrap_or_default(),
            },
            stay,
        })
    }

    fn reserve(&self, room: &Room, code: &str) -> Reservation {
        Reservation {
            id: Ulid::new(),
            code: code.to_string(),
            name: self.name.clone(),
            guest: self.guest.clone(),
            created_at: Utc::now(),
            information: vec![ReservationInformation {
                stay: self.stay,
                rooms: vec![ReservedRoom {
                    room_id: room.id,
                    number: room.number,
                }],
            }],
        }
    }
}

/// Admin input for a new room. `id` is generated when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub id: Option<Ulid>,
    pub number: u32,
    pub capacity: u32,
    pub floor: i32,
    pub image: Option<String>,
    pub price: u32,
    pub wifi: bool,
    pub parking: bool,
    pub breakfast: bool,
}

impl NewRoom {
    pub fn new(number: u32) -> Self {
        Self {
            id: None,
            number,
            capacity: 1,
            floor: 0,
            image: None,
            price: 0,
            wifi: false,
            parking: false,
            breakfast: false,
        }
    }
}

impl Hotel {
    /// Book `room_id` for the requested stay.
    ///
    /// Checks run in a fixed order: the room must exist, then every required
    /// field must be present and short enough, then the dates, then room
    /// capacity and the overlap check.
    /// The overlap check and the save are retried together whenever another
    /// writer got to the room first, so two overlapping requests can never
    /// both succeed.
    pub async fn create_reservation(
        &self,
        room_id: Ulid,
        req: ReservationRequest,
    ) -> Result<Reservation, HotelError> {
        let mut room = self.load_room(room_id).await?;
        let booking = Booking::from_request(req)?;
        let mut code = self.unique_code().await?;

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            if room.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
                return Err(HotelError::LimitExceeded("too many reservations on room"));
            }
            if let Err(e) = check_no_conflict(&room, &booking.stay) {
                metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }

            let reservation = booking.reserve(&room, &code);
            let mut next = room.clone();
            next.reservations.push(reservation.clone());

            match self.call("save_room", self.repo.save_room(next)).await {
                Ok(_) => {
                    metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
                    info!(room = %room_id, reservation = %reservation.id, "reservation created");
                    return Ok(reservation);
                }
                Err(RepositoryError::VersionConflict { expected, found, .. }) => {
                    debug!(
                        room = %room_id, attempt, expected, found,
                        "room changed underneath create, retrying"
                    );
                    metrics::counter!(observability::SAVE_RETRIES_TOTAL, "op" => "create")
                        .increment(1);
                    room = self.load_room(room_id).await?;
                }
                Err(RepositoryError::DuplicateCode(_)) => {
                    debug!(
                        room = %room_id, attempt,
                        "reservation code taken concurrently, regenerating"
                    );
                    code = self.unique_code().await?;
                }
                Err(RepositoryError::NotFound(_)) => return Err(HotelError::RoomNotFound(room_id)),
                Err(e) => return Err(e.into()),
            }
        }

        warn!(room = %room_id, "giving up on create after {MAX_SAVE_ATTEMPTS} attempts");
        Err(HotelError::Contended(room_id))
    }

    /// Cancel a reservation, proving ownership with its code and guest name.
    ///
    /// A credential that matches nothing is `Unauthorized`. A credential that
    /// matches a reservation already cancelled from a room is
    /// `ReservationNotFound`.
    pub async fn cancel_reservation(
        &self,
        reservation_id: Ulid,
        code: Option<&str>,
        name: Option<&str>,
    ) -> Result<(), HotelError> {
        let (Some(code), Some(name)) = (present(code), present(name)) else {
            return Err(HotelError::Unauthorized);
        };

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let room = self
                .call(
                    "find_room_by_reservation_id_and_credential",
                    self.repo
                        .find_room_by_reservation_id_and_credential(reservation_id, code, name),
                )
                .await?
                .ok_or(HotelError::Unauthorized)?;

            let mut next = room.clone();
            let Some(removed) = next.remove_reservation(reservation_id) else {
                return Err(HotelError::ReservationNotFound(reservation_id));
            };
            next.record_cancellation(&removed, Utc::now());

            match self.call("save_room", self.repo.save_room(next)).await {
                Ok(_) => {
                    metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
                    info!(room = %room.id, reservation = %reservation_id, "reservation cancelled");
                    return Ok(());
                }
                Err(RepositoryError::VersionConflict { expected, found, .. }) => {
                    debug!(
                        room = %room.id, attempt, expected, found,
                        "room changed underneath cancel, retrying"
                    );
                    metrics::counter!(observability::SAVE_RETRIES_TOTAL, "op" => "cancel")
                        .increment(1);
                }
                Err(RepositoryError::NotFound(_)) => {
                    return Err(HotelError::ReservationNotFound(reservation_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            reservation = %reservation_id,
            "giving up on cancel after {MAX_SAVE_ATTEMPTS} attempts"
        );
        Err(HotelError::Contended(reservation_id))
    }

    pub async fn create_room(&self, new: NewRoom) -> Result<RoomInfo, HotelError> {
        if let Some(ref image) = new.image
            && image.len() > MAX_IMAGE_LEN
        {
            return Err(HotelError::LimitExceeded("room image too long"));
        }
        let id = new.id.unwrap_or_else(Ulid::new);
        let room = Room {
            capacity: new.capacity,
            floor: new.floor,
            image: new.image,
            price: new.price,
            wifi: new.wifi,
            parking: new.parking,
            breakfast: new.breakfast,
            ..Room::new(id, new.number)
        };
        let info = room.info();

        match self.call("insert_room", self.repo.insert_room(room)).await {
            Ok(()) => {
                info!(room = %id, number = info.number, "room created");
                Ok(info)
            }
            Err(RepositoryError::AlreadyExists(id)) => Err(HotelError::RoomAlreadyExists(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a room. Refused while it still holds active reservations.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), HotelError> {
        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let room = self.load_room(id).await?;
            if !room.reservations.is_empty() {
                return Err(HotelError::RoomHasReservations(id));
            }
            match self.call("delete_room", self.repo.delete_room(id, room.version)).await {
                Ok(()) => {
                    info!(room = %id, "room deleted");
                    return Ok(());
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    debug!(room = %id, attempt, "room changed underneath delete, retrying");
                    metrics::counter!(observability::SAVE_RETRIES_TOTAL, "op" => "delete_room")
                        .increment(1);
                }
                Err(RepositoryError::NotFound(_)) => return Err(HotelError::RoomNotFound(id)),
                Err(e) => return Err(e.into()),
            }
        }
        Err(HotelError::Contended(id))
    }

    /// A code no room currently holds. The store re-checks at save time.
    async fn unique_code(&self) -> Result<String, HotelError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = new_code();
            if !self.call("is_code_taken", self.repo.is_code_taken(&code)).await? {
                return Ok(code);
            }
        }
        Err(HotelError::LimitExceeded("could not allocate a reservation code"))
    }
}
