use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_CANCELLED_LEDGER;

/// Half-open stay `[checkin, checkout)`, always in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub checkin: DateTime<Utc>,
    pub checkout: DateTime<Utc>,
}

impl Stay {
    pub fn new(checkin: DateTime<Utc>, checkout: DateTime<Utc>) -> Self {
        debug_assert!(checkin < checkout, "Stay checkin must be before checkout");
        Self { checkin, checkout }
    }

    pub fn duration(&self) -> Duration {
        self.checkout - self.checkin
    }

    /// A checkout on day X does not collide with a checkin on day X.
    pub fn overlaps(&self, other: &Stay) -> bool {
        self.checkin < other.checkout && self.checkout > other.checkin
    }
}

/// Room identity frozen at booking time, so later room edits don't rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedRoom {
    pub room_id: Ulid,
    pub number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationInformation {
    pub stay: Stay,
    pub rooms: Vec<ReservedRoom>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestAddress {
    pub address: String,
    pub city: String,
    pub zip: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub code: String,
    pub name: String,
    pub guest: GuestAddress,
    pub created_at: DateTime<Utc>,
    /// One block per stay. Bookings made today always carry exactly one.
    pub information: Vec<ReservationInformation>,
}

impl Reservation {
    pub fn matches_credential(&self, code: &str, name: &str) -> bool {
        self.code == code && self.name == name
    }

    pub fn stays(&self) -> impl Iterator<Item = &Stay> {
        self.information.iter().map(|info| &info.stay)
    }

    pub fn first_information(&self) -> Option<&ReservationInformation> {
        self.information.first()
    }
}

/// What a room remembers about a reservation after it was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledReservation {
    pub id: Ulid,
    pub code: String,
    pub name: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub number: u32,
    pub capacity: u32,
    pub floor: i32,
    pub image: Option<String>,
    pub price: u32,
    pub wifi: bool,
    pub parking: bool,
    pub breakfast: bool,
    /// Active reservations in booking order.
    pub reservations: Vec<Reservation>,
    /// Bounded ledger of recent cancellations, oldest first.
    pub cancelled: Vec<CancelledReservation>,
    /// Bumped by the store on every successful save.
    pub version: u64,
}

impl Room {
    pub fn new(id: Ulid, number: u32) -> Self {
        Self {
            id,
            number,
            capacity: 1,
            floor: 0,
            image: None,
            price: 0,
            wifi: false,
            parking: false,
            breakfast: false,
            reservations: Vec::new(),
            cancelled: Vec::new(),
            version: 0,
        }
    }

    /// Reservations with at least one stay overlapping `stay`.
    pub fn overlapping<'a>(
        &'a self,
        stay: &Stay,
    ) -> impl Iterator<Item = &'a Reservation> + use<'a> {
        let stay = *stay;
        self.reservations
            .iter()
            .filter(move |r| r.stays().any(|s| s.overlaps(&stay)))
    }

    pub fn is_free(&self, stay: &Stay) -> bool {
        self.overlapping(stay).next().is_none()
    }

    pub fn reservation_position(&self, id: Ulid) -> Option<usize> {
        self.reservations.iter().position(|r| r.id == id)
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        self.reservation_position(id)
            .map(|pos| self.reservations.remove(pos))
    }

    pub fn record_cancellation(&mut self, reservation: &Reservation, at: DateTime<Utc>) {
        if self.cancelled.len() >= MAX_CANCELLED_LEDGER {
            let excess = self.cancelled.len() + 1 - MAX_CANCELLED_LEDGER;
            self.cancelled.drain(..excess);
        }
        self.cancelled.push(CancelledReservation {
            id: reservation.id,
            code: reservation.code.clone(),
            name: reservation.name.clone(),
            cancelled_at: at,
        });
    }

    /// True if `id` with this credential is active here or was cancelled here.
    pub fn knows_reservation(&self, id: Ulid, code: &str, name: &str) -> bool {
        self.reservations
            .iter()
            .any(|r| r.id == id && r.matches_credential(code, name))
            || self
                .cancelled
                .iter()
                .any(|c| c.id == id && c.code == code && c.name == name)
    }

    /// Every code this room holds, active or in the cancellation ledger.
    pub fn codes(&self) -> impl Iterator<Item = (&str, Ulid)> {
        self.reservations
            .iter()
            .map(|r| (r.code.as_str(), r.id))
            .chain(self.cancelled.iter().map(|c| (c.code.as_str(), c.id)))
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            number: self.number,
            capacity: self.capacity,
            floor: self.floor,
            image: self.image.clone(),
            price: self.price,
            wifi: self.wifi,
            parking: self.parking,
            breakfast: self.breakfast,
            reservations: self.reservations.len(),
        }
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated { room: Room },
    /// Full document after a conditional save; replaces whatever was stored.
    RoomSaved { room: Room },
    RoomDeleted { id: Ulid },
}

// ── Query result types ───────────────────────────────────────────

/// Client-facing room projection. Carries no guest data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub number: u32,
    pub capacity: u32,
    pub floor: i32,
    pub image: Option<String>,
    pub price: u32,
    pub wifi: bool,
    pub parking: bool,
    pub breakfast: bool,
    /// Count of active reservations.
    pub reservations: usize,
}

/// Guest-facing view of one reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationView {
    pub id: Ulid,
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub checkin: DateTime<Utc>,
    pub checkout: DateTime<Utc>,
    pub rooms: Vec<ReservedRoom>,
}

impl ReservationView {
    /// Surfaces the first stay. `None` for a reservation without any stay.
    pub fn from_reservation(reservation: &Reservation) -> Option<Self> {
        let info = reservation.first_information()?;
        Some(Self {
            id: reservation.id,
            code: reservation.code.clone(),
            name: reservation.name.clone(),
            created_at: reservation.created_at,
            checkin: info.stay.checkin,
            checkout: info.stay.checkout,
            rooms: info.rooms.clone(),
        })
    }
}
