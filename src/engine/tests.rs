use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use ulid::Ulid;

use super::*;
use crate::limits::*;
use crate::model::*;
use crate::repository::{RepositoryError, RoomRepository};
use crate::store::RoomStore;

fn at(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, d, 0, 0, 0).unwrap()
}

fn day(d: u32) -> String {
    format!("2024-06-{d:02}")
}

fn booked_room(number: u32, stays: &[(u32, u32)]) -> Room {
    let mut room = Room::new(Ulid::new(), number);
    for &(from, to) in stays {
        room.reservations.push(Reservation {
            id: Ulid::new(),
            code: "AAAAAAAAAA".into(),
            name: "Ada".into(),
            guest: GuestAddress::default(),
            created_at: at(1),
            information: vec![ReservationInformation {
                stay: Stay::new(at(from), at(to)),
                rooms: vec![ReservedRoom { room_id: room.id, number }],
            }],
        });
    }
    room
}

fn request(name: &str, checkin: u32, checkout: u32) -> ReservationRequest {
    ReservationRequest {
        name: Some(name.into()),
        address: Some("1 Harbour Road".into()),
        city: Some("Lisbon".into()),
        zip: Some("1000-001".into()),
        country: Some("PT".into()),
        checkin: Some(day(checkin)),
        checkout: Some(day(checkout)),
    }
}

// ── Pure function tests ──────────────────────────────────

#[test]
fn available_excludes_overlapping_rooms() {
    let rooms = vec![
        booked_room(102, &[(3, 6)]),
        booked_room(101, &[]),
        booked_room(103, &[(10, 12)]),
    ];
    let stay = Stay::new(at(4), at(8));
    let free: Vec<u32> = available_rooms(&rooms, &stay).iter().map(|r| r.number).collect();
    assert_eq!(free, vec![101, 103]);
}

#[test]
fn back_to_back_stays_do_not_conflict() {
    let rooms = vec![booked_room(101, &[(1, 5)])];
    assert_eq!(available_rooms(&rooms, &Stay::new(at(5), at(8))).len(), 1);
    assert_eq!(available_rooms(&rooms, &Stay::new(at(1), at(2))).len(), 0);
}

#[test]
fn available_sorts_by_number_then_id() {
    let rooms = vec![booked_room(20, &[]), booked_room(3, &[]), booked_room(11, &[])];
    let free: Vec<u32> = available_rooms(&rooms, &Stay::new(at(1), at(2)))
        .iter()
        .map(|r| r.number)
        .collect();
    assert_eq!(free, vec![3, 11, 20]);
}

#[test]
fn any_stay_of_a_reservation_blocks() {
    let mut room = booked_room(7, &[(1, 2)]);
    room.reservations[0].information.push(ReservationInformation {
        stay: Stay::new(at(20), at(22)),
        rooms: vec![],
    });
    let rooms = vec![room];
    assert!(available_rooms(&rooms, &Stay::new(at(21), at(25))).is_empty());
    assert_eq!(available_rooms(&rooms, &Stay::new(at(10), at(12))).len(), 1);
}

#[test]
fn parse_instant_formats() {
    let midnight = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    assert_eq!(parse_instant("2024-06-01"), Some(midnight));
    assert_eq!(parse_instant("2024-06-01T00:00:00Z"), Some(midnight));
    assert_eq!(parse_instant("2024-06-01T02:00:00+02:00"), Some(midnight));
    assert_eq!(parse_instant("2024-06-01 00:00:00"), Some(midnight));
    assert_eq!(parse_instant("2024-06-01T00:00:00"), Some(midnight));
    assert_eq!(parse_instant(" 2024-06-01 "), Some(midnight));
    assert_eq!(
        parse_instant("2024-06-01T14:30:00.250"),
        Some(midnight + chrono::Duration::milliseconds(52_200_250))
    );
    assert_eq!(parse_instant("June 1st"), None);
    assert_eq!(parse_instant("2024-13-01"), None);
    assert_eq!(parse_instant(""), None);
}

#[test]
fn parse_stay_rejects_empty_and_reversed() {
    assert!(parse_stay("2024-06-01", "2024-06-02").is_ok());
    assert_eq!(parse_stay("2024-06-02", "2024-06-02"), Err(HotelError::InvalidDateRange));
    assert_eq!(parse_stay("2024-06-03", "2024-06-02"), Err(HotelError::InvalidDateRange));
    assert_eq!(parse_stay("nope", "2024-06-02"), Err(HotelError::InvalidDateRange));
}

#[test]
fn missing_fields_in_declaration_order() {
    let req = ReservationRequest {
        zip: Some("  ".into()),
        ..request("Ada", 1, 2)
    };
    assert_eq!(req.missing_fields(), vec!["zip"]);
    assert_eq!(
        ReservationRequest::default().missing_fields(),
        vec!["name", "address", "city", "zip", "country", "checkin", "checkout"]
    );
}

#[test]
fn error_sqlstates() {
    assert_eq!(HotelError::InvalidDateRange.sqlstate(), "22007");
    assert_eq!(HotelError::Unauthorized.sqlstate(), "28000");
    assert_eq!(HotelError::RoomUnavailable(Ulid::nil()).sqlstate(), "23P01");
    assert_eq!(HotelError::RepositoryFailure.sqlstate(), "XX000");
    assert_eq!(HotelError::RepositoryFailure.to_string(), "internal storage error");
}

proptest! {
    #[test]
    fn available_iff_no_overlap(
        bookings in prop::collection::vec(prop::collection::vec((1u32..25, 1u32..5), 0..4), 1..8),
        from in 1u32..25,
        len in 1u32..5,
    ) {
        let rooms: Vec<Room> = bookings
            .iter()
            .enumerate()
            .map(|(i, stays)| {
                let stays: Vec<(u32, u32)> = stays.iter().map(|&(s, l)| (s, s + l)).collect();
                booked_room(i as u32 + 1, &stays)
            })
            .collect();
        let stay = Stay::new(at(from), at(from + len));

        let free = available_rooms(&rooms, &stay);
        for room in &rooms {
            let clash = room
                .reservations
                .iter()
                .flat_map(|r| r.stays())
                .any(|s| s.checkin < stay.checkout && s.checkout > stay.checkin);
            prop_assert_eq!(free.iter().any(|r| r.id == room.id), !clash);
        }
        prop_assert!(free.windows(2).all(|w| w[0].number <= w[1].number));

        let again: Vec<Ulid> = available_rooms(&rooms, &stay).iter().map(|r| r.id).collect();
        prop_assert_eq!(free.iter().map(|r| r.id).collect::<Vec<_>>(), again);
    }
}

// ── Async engine tests ───────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("hotelkeep_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn hotel(name: &str) -> (Hotel, Arc<RoomStore>) {
    let store = Arc::new(RoomStore::open(&test_wal_path(name)).unwrap());
    (Hotel::new(store.clone()), store)
}

async fn room_101(hotel: &Hotel) -> Ulid {
    hotel.create_room(NewRoom::new(101)).await.unwrap().id
}

#[tokio::test]
async fn book_room_101_end_to_end() {
    let (hotel, _store) = hotel("scenario.wal");
    let id = room_101(&hotel).await;

    let free = hotel.find_available(&day(1), &day(5)).await.unwrap();
    assert_eq!(free.iter().map(|r| r.number).collect::<Vec<_>>(), vec![101]);

    let reservation = hotel.create_reservation(id, request("Ada Lovelace", 1, 5)).await.unwrap();
    assert_eq!(reservation.code.len(), CODE_LEN);
    assert_eq!(reservation.first_information().unwrap().rooms[0].number, 101);

    assert!(hotel.find_available(&day(1), &day(5)).await.unwrap().is_empty());
    assert!(hotel.find_available(&day(4), &day(6)).await.unwrap().is_empty());
    assert_eq!(hotel.find_available(&day(5), &day(8)).await.unwrap().len(), 1);

    let found = hotel
        .lookup_reservations(Some(&reservation.code), Some("Ada Lovelace"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, reservation.id);
    assert_eq!(found[0].checkin, at(1));
    assert_eq!(found[0].checkout, at(5));
    assert_eq!(hotel.get_room(id).await.unwrap().reservations, 1);
}

#[tokio::test]
async fn march_stay_blocks_only_overlapping_windows() {
    let (hotel, _store) = hotel("march.wal");
    let id = room_101(&hotel).await;
    let req = ReservationRequest {
        checkin: Some("2024-03-10".into()),
        checkout: Some("2024-03-15".into()),
        ..request("Ada", 1, 2)
    };
    hotel.create_reservation(id, req).await.unwrap();

    let before = hotel.find_available("2024-03-05", "2024-03-10").await.unwrap();
    assert_eq!(before.iter().map(|r| r.id).collect::<Vec<_>>(), vec![id]);
    assert!(hotel.find_available("2024-03-14", "2024-03-20").await.unwrap().is_empty());
    assert_eq!(hotel.find_available("2024-03-15", "2024-03-20").await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_zip_persists_nothing() {
    let (hotel, store) = hotel("missing_zip.wal");
    let id = room_101(&hotel).await;
    let req = ReservationRequest { zip: None, ..request("Ada", 1, 3) };

    assert_eq!(
        hotel.create_reservation(id, req).await,
        Err(HotelError::ValidationFailed(vec!["zip"]))
    );
    let room = store.find_room_by_id(id).await.unwrap().unwrap();
    assert!(room.reservations.is_empty());
    assert_eq!(room.version, 0);
}

#[tokio::test]
async fn unknown_room_reported_before_validation() {
    let (hotel, _store) = hotel("unknown_room.wal");
    let ghost = Ulid::new();
    assert_eq!(
        hotel.create_reservation(ghost, ReservationRequest::default()).await,
        Err(HotelError::RoomNotFound(ghost))
    );
    assert_eq!(hotel.get_room(ghost).await, Err(HotelError::RoomNotFound(ghost)));
}

#[tokio::test]
async fn bad_dates_rejected() {
    let (hotel, _store) = hotel("bad_dates.wal");
    let id = room_101(&hotel).await;
    assert_eq!(
        hotel.create_reservation(id, request("Ada", 5, 5)).await,
        Err(HotelError::InvalidDateRange)
    );
    assert_eq!(
        hotel.create_reservation(id, request("Ada", 6, 2)).await,
        Err(HotelError::InvalidDateRange)
    );
    let garbled = ReservationRequest { checkin: Some("soon".into()), ..request("Ada", 1, 2) };
    assert_eq!(hotel.create_reservation(id, garbled).await, Err(HotelError::InvalidDateRange));
    assert_eq!(hotel.find_available(&day(3), &day(3)).await, Err(HotelError::InvalidDateRange));
}

#[tokio::test]
async fn limits_enforced() {
    let (hotel, _store) = hotel("limits.wal");
    let id = room_101(&hotel).await;

    let long_stay = ReservationRequest {
        checkout: Some("2026-06-01".into()),
        ..request("Ada", 1, 2)
    };
    assert!(matches!(
        hotel.create_reservation(id, long_stay).await,
        Err(HotelError::LimitExceeded(_))
    ));

    let long_name = "x".repeat(MAX_FIELD_LEN + 1);
    assert!(matches!(
        hotel.create_reservation(id, request(&long_name, 1, 2)).await,
        Err(HotelError::LimitExceeded(_))
    ));

    assert!(matches!(
        hotel.find_available("2024-01-01", "2030-01-01").await,
        Err(HotelError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn overlapping_create_refused() {
    let (hotel, _store) = hotel("overlap.wal");
    let id = room_101(&hotel).await;
    hotel.create_reservation(id, request("Ada", 1, 5)).await.unwrap();

    assert_eq!(
        hotel.create_reservation(id, request("Grace", 4, 7)).await,
        Err(HotelError::RoomUnavailable(id))
    );
    assert_eq!(
        hotel.create_reservation(id, request("Grace", 2, 3)).await,
        Err(HotelError::RoomUnavailable(id))
    );
    hotel.create_reservation(id, request("Grace", 5, 7)).await.unwrap();
}

#[tokio::test]
async fn lookup_requires_exact_credential() {
    let (hotel, _store) = hotel("lookup.wal");
    let id = room_101(&hotel).await;
    let r = hotel.create_reservation(id, request("Ada", 1, 3)).await.unwrap();

    assert_eq!(
        hotel.lookup_reservations(Some(&r.code), Some("ada")).await,
        Err(HotelError::Unauthorized)
    );
    assert_eq!(hotel.lookup_reservations(Some(&r.code), None).await, Err(HotelError::Unauthorized));
    assert_eq!(
        hotel.lookup_reservations(Some(""), Some("Ada")).await,
        Err(HotelError::Unauthorized)
    );
    assert_eq!(
        hotel.lookup_reservations(Some("ZZZZZZZZZZ"), Some("Ada")).await,
        Err(HotelError::Unauthorized)
    );
    assert_eq!(hotel.lookup_reservations(Some(&r.code), Some("Ada")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancel_then_cancel_again() {
    let (hotel, _store) = hotel("cancel_twice.wal");
    let id = room_101(&hotel).await;
    let r = hotel.create_reservation(id, request("Ada", 1, 5)).await.unwrap();

    hotel.cancel_reservation(r.id, Some(&r.code), Some("Ada")).await.unwrap();
    assert_eq!(
        hotel.cancel_reservation(r.id, Some(&r.code), Some("Ada")).await,
        Err(HotelError::ReservationNotFound(r.id))
    );
    assert_eq!(
        hotel.lookup_reservations(Some(&r.code), Some("Ada")).await,
        Err(HotelError::Unauthorized)
    );
    assert_eq!(hotel.find_available(&day(1), &day(5)).await.unwrap().len(), 1);
    assert_eq!(hotel.get_room(id).await.unwrap().reservations, 0);
}

#[tokio::test]
async fn cancel_with_wrong_credential_is_unauthorized() {
    let (hotel, _store) = hotel("cancel_wrong.wal");
    let id = room_101(&hotel).await;
    let r = hotel.create_reservation(id, request("Ada", 1, 5)).await.unwrap();

    assert_eq!(
        hotel.cancel_reservation(r.id, Some(&r.code), Some("Grace")).await,
        Err(HotelError::Unauthorized)
    );
    assert_eq!(
        hotel.cancel_reservation(Ulid::new(), Some(&r.code), Some("Ada")).await,
        Err(HotelError::Unauthorized)
    );
    assert_eq!(
        hotel.cancel_reservation(r.id, None, Some("Ada")).await,
        Err(HotelError::Unauthorized)
    );
    assert_eq!(hotel.lookup_reservations(Some(&r.code), Some("Ada")).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_creates_admit_one() {
    let (hotel, store) = hotel("race.wal");
    let hotel = Arc::new(hotel);
    let id = room_101(&hotel).await;

    let mut handles = Vec::new();
    for i in 0..16u32 {
        let hotel = hotel.clone();
        handles.push(tokio::spawn(async move {
            let checkin = 1 + i % 3;
            hotel.create_reservation(id, request(&format!("Guest {i}"), checkin, checkin + 4)).await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(HotelError::RoomUnavailable(room)) => assert_eq!(room, id),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(store.find_room_by_id(id).await.unwrap().unwrap().reservations.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_disjoint_creates_all_land() {
    let (hotel, store) = hotel("disjoint.wal");
    let hotel = Arc::new(hotel);
    let id = room_101(&hotel).await;

    let mut handles = Vec::new();
    for i in 0..10u32 {
        let hotel = hotel.clone();
        handles.push(tokio::spawn(async move {
            hotel.create_reservation(id, request("Ada", 1 + 2 * i, 2 + 2 * i)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(store.find_room_by_id(id).await.unwrap().unwrap().reservations.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_on_one_room_all_land() {
    let (hotel, store) = hotel("concurrent_cancels.wal");
    let hotel = Arc::new(hotel);
    let id = room_101(&hotel).await;

    // Fewer cancels than save attempts: every round of conflicts has a winner.
    let mut booked = Vec::new();
    for i in 0..12u32 {
        let name = format!("Guest {i}");
        let r = hotel.create_reservation(id, request(&name, 1 + 2 * i, 2 + 2 * i)).await.unwrap();
        booked.push((r.id, r.code, name));
    }

    let mut handles = Vec::new();
    for (reservation_id, code, name) in booked {
        let hotel = hotel.clone();
        handles.push(tokio::spawn(async move {
            hotel.cancel_reservation(reservation_id, Some(&code), Some(&name)).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok(()));
    }

    let room = store.find_room_by_id(id).await.unwrap().unwrap();
    assert!(room.reservations.is_empty());
    assert_eq!(room.cancelled.len(), 12);
    assert_eq!(room.version, 24);
}

#[tokio::test]
async fn room_admin() {
    let (hotel, _store) = hotel("admin.wal");
    let id = Ulid::new();
    let info = hotel
        .create_room(NewRoom {
            id: Some(id),
            capacity: 2,
            floor: 1,
            price: 120,
            wifi: true,
            ..NewRoom::new(202)
        })
        .await
        .unwrap();
    assert_eq!(info.id, id);
    assert_eq!(info.capacity, 2);
    hotel.create_room(NewRoom::new(101)).await.unwrap();

    assert_eq!(
        hotel.create_room(NewRoom { id: Some(id), ..NewRoom::new(303) }).await,
        Err(HotelError::RoomAlreadyExists(id))
    );
    let numbers: Vec<u32> = hotel.list_rooms().await.unwrap().iter().map(|r| r.number).collect();
    assert_eq!(numbers, vec![101, 202]);

    let r = hotel.create_reservation(id, request("Ada", 1, 2)).await.unwrap();
    assert_eq!(hotel.delete_room(id).await, Err(HotelError::RoomHasReservations(id)));
    hotel.cancel_reservation(r.id, Some(&r.code), Some("Ada")).await.unwrap();
    hotel.delete_room(id).await.unwrap();
    assert_eq!(hotel.delete_room(id).await, Err(HotelError::RoomNotFound(id)));
    assert_eq!(hotel.list_rooms().await.unwrap().len(), 1);
}

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let (id, code) = {
        let store = Arc::new(RoomStore::open(&path).unwrap());
        let hotel = Hotel::new(store.clone());
        let id = room_101(&hotel).await;
        let r = hotel.create_reservation(id, request("Ada", 1, 5)).await.unwrap();
        store.close().await.unwrap();
        (id, r.code)
    };

    let hotel = Hotel::new(Arc::new(RoomStore::open(&path).unwrap()));
    assert_eq!(hotel.lookup_reservations(Some(&code), Some("Ada")).await.unwrap().len(), 1);
    assert_eq!(
        hotel.create_reservation(id, request("Grace", 2, 3)).await,
        Err(HotelError::RoomUnavailable(id))
    );
}

// ── Repository failure handling ──────────────────────────

#[derive(Clone, Copy)]
enum Mode {
    Fail,
    Hang,
    AlwaysStale,
}

struct MockRepo {
    mode: Mode,
    room: Room,
}

impl MockRepo {
    fn new(mode: Mode) -> Self {
        Self { mode, room: Room::new(Ulid::new(), 101) }
    }

    async fn answer<T>(&self, value: T) -> Result<T, RepositoryError> {
        match self.mode {
            Mode::Fail => Err(RepositoryError::Storage("disk on fire".into())),
            Mode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(value)
            }
            Mode::AlwaysStale => Ok(value),
        }
    }
}

#[async_trait]
impl RoomRepository for MockRepo {
    async fn list_rooms(&self) -> Result<Vec<Room>, RepositoryError> {
        self.answer(vec![self.room.clone()]).await
    }

    async fn find_room_by_id(&self, _id: Ulid) -> Result<Option<Room>, RepositoryError> {
        self.answer(Some(self.room.clone())).await
    }

    async fn find_rooms_by_reservation_credential(
        &self,
        _code: &str,
        _name: &str,
    ) -> Result<Vec<Room>, RepositoryError> {
        self.answer(Vec::new()).await
    }

    async fn find_room_by_reservation_id_and_credential(
        &self,
        _reservation_id: Ulid,
        _code: &str,
        _name: &str,
    ) -> Result<Option<Room>, RepositoryError> {
        self.answer(None).await
    }

    async fn save_room(&self, room: Room) -> Result<Room, RepositoryError> {
        self.answer(()).await?;
        Err(RepositoryError::VersionConflict {
            id: room.id,
            expected: room.version,
            found: room.version + 1,
        })
    }

    async fn insert_room(&self, _room: Room) -> Result<(), RepositoryError> {
        self.answer(()).await
    }

    async fn delete_room(&self, _id: Ulid, _version: u64) -> Result<(), RepositoryError> {
        self.answer(()).await
    }

    async fn is_code_taken(&self, _code: &str) -> Result<bool, RepositoryError> {
        self.answer(false).await
    }
}

#[tokio::test]
async fn storage_errors_become_repository_failure() {
    let repo = MockRepo::new(Mode::Fail);
    let id = repo.room.id;
    let hotel = Hotel::new(Arc::new(repo));

    assert_eq!(hotel.list_rooms().await, Err(HotelError::RepositoryFailure));
    assert_eq!(hotel.find_available(&day(1), &day(2)).await, Err(HotelError::RepositoryFailure));
    assert_eq!(
        hotel.create_reservation(id, request("Ada", 1, 2)).await,
        Err(HotelError::RepositoryFailure)
    );
    assert_eq!(
        hotel.lookup_reservations(Some("ABCDEFGHIJ"), Some("Ada")).await,
        Err(HotelError::RepositoryFailure)
    );
    assert_eq!(
        hotel.cancel_reservation(Ulid::new(), Some("ABCDEFGHIJ"), Some("Ada")).await,
        Err(HotelError::RepositoryFailure)
    );
}

#[tokio::test]
async fn hung_repository_times_out() {
    let repo = MockRepo::new(Mode::Hang);
    let id = repo.room.id;
    let hotel = Hotel::new(Arc::new(repo)).with_timeout(Duration::from_millis(50));

    assert_eq!(hotel.get_room(id).await, Err(HotelError::RepositoryFailure));
    assert_eq!(
        hotel.create_reservation(id, request("Ada", 1, 2)).await,
        Err(HotelError::RepositoryFailure)
    );
}

#[tokio::test]
async fn endless_conflicts_give_up() {
    let repo = MockRepo::new(Mode::AlwaysStale);
    let id = repo.room.id;
    let hotel = Hotel::new(Arc::new(repo));

    assert_eq!(
        hotel.create_reservation(id, request("Ada", 1, 2)).await,
        Err(HotelError::Contended(id))
    );
}
