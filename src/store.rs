use std::collections::{HashMap, HashSet};
use std::io;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::{Event, Room};
use crate::repository::{RepositoryError, RoomRepository};
use crate::wal::Wal;

pub type SharedRoom = Arc<RwLock<Room>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    Shutdown {
        response: oneshot::Sender<io::Result<()>>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                if handle_control(&mut wal, other).is_break() {
                    return;
                }
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred
            && handle_control(&mut wal, cmd).is_break()
        {
            return;
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    // All or nothing: a failed batch leaves the log exactly as it was, so
    // every caller in it can be told the write did not happen.
    let result = wal.append_batch(batch.iter().map(|(event, _)| event));
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) -> ControlFlow<()> {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Shutdown { response } => {
            let _ = response.send(wal.sync());
            return ControlFlow::Break(());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
    ControlFlow::Continue(())
}

// ── Store ────────────────────────────────────────────────

/// WAL-backed room repository.
///
/// Each room sits behind its own lock; a save holds the write lock from the
/// version check until the event is durable and applied, so writes to one
/// room are serialized while different rooms proceed in parallel.
pub struct RoomStore {
    rooms: DashMap<Ulid, SharedRoom>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Reservation id (active or ledgered) → room id.
    reservation_index: DashMap<Ulid, Ulid>,
    /// Reservation code → reservation id.
    code_index: DashMap<String, Ulid>,
    /// Serializes room creation, deletion and compaction.
    catalog: Mutex<()>,
}

impl RoomStore {
    /// Replay the log at `wal_path` and start the WAL writer task.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let replay = Wal::replay(wal_path)?;
        if replay.truncated {
            warn!(
                "discarded damaged tail of {} after {} events ({} intact bytes)",
                wal_path.display(),
                replay.events.len(),
                replay.valid_len
            );
            Wal::truncate_to(wal_path, replay.valid_len)?;
        }

        let mut rooms: HashMap<Ulid, Room> = HashMap::new();
        for event in replay.events {
            match event {
                Event::RoomCreated { room } => {
                    rooms.insert(room.id, room);
                }
                Event::RoomSaved { room } => {
                    if let Some(stored) = rooms.get_mut(&room.id) {
                        *stored = room;
                    }
                }
                Event::RoomDeleted { id } => {
                    rooms.remove(&id);
                }
            }
        }

        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            rooms: DashMap::new(),
            wal_tx,
            reservation_index: DashMap::new(),
            code_index: DashMap::new(),
            catalog: Mutex::new(()),
        };
        for (id, room) in rooms {
            store.index(&room);
            store.rooms.insert(id, Arc::new(RwLock::new(room)));
        }
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(store.rooms.len() as f64);
        info!("room store opened: {} rooms", store.rooms.len());
        Ok(store)
    }

    /// Flush and stop the WAL writer. Later writes fail with `Storage`.
    pub async fn close(&self) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::Shutdown { response: tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn get(&self, id: &Ulid) -> Option<SharedRoom> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Collect handles first so no map shard stays locked across an await.
    fn handles(&self) -> Vec<SharedRoom> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), RepositoryError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| RepositoryError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| RepositoryError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }

    // ── Indexes ──────────────────────────────────────────────

    fn index(&self, room: &Room) {
        for (code, reservation_id) in room.codes() {
            self.reservation_index.insert(reservation_id, room.id);
            self.code_index.insert(code.to_string(), reservation_id);
        }
    }

    fn unindex(&self, room: &Room) {
        for (code, reservation_id) in room.codes() {
            self.reservation_index.remove(&reservation_id);
            self.code_index.remove_if(code, |_, id| *id == reservation_id);
        }
    }

    /// Claim the codes `next` introduces over `prev`. All-or-nothing.
    fn claim_codes(
        &self,
        prev: Option<&Room>,
        next: &Room,
    ) -> Result<Vec<String>, RepositoryError> {
        let known: HashSet<Ulid> = prev
            .map(|r| r.codes().map(|(_, id)| id).collect())
            .unwrap_or_default();
        let mut claimed = Vec::new();
        for (code, reservation_id) in next.codes() {
            if known.contains(&reservation_id) {
                continue;
            }
            let clash = match self.code_index.entry(code.to_string()) {
                Entry::Occupied(e) => *e.get() != reservation_id,
                Entry::Vacant(v) => {
                    v.insert(reservation_id);
                    claimed.push(code.to_string());
                    false
                }
            };
            if clash {
                self.release_codes(&claimed);
                return Err(RepositoryError::DuplicateCode(code.to_string()));
            }
        }
        Ok(claimed)
    }

    fn release_codes(&self, codes: &[String]) {
        for code in codes {
            self.code_index.remove(code);
        }
    }

    /// Drop index entries for reservations that left the room entirely.
    fn reindex(&self, prev: &Room, next: &Room) {
        let kept: HashSet<Ulid> = next.codes().map(|(_, id)| id).collect();
        for (code, reservation_id) in prev.codes() {
            if !kept.contains(&reservation_id) {
                self.reservation_index.remove(&reservation_id);
                self.code_index.remove_if(code, |_, id| *id == reservation_id);
            }
        }
        for (_, reservation_id) in next.codes() {
            self.reservation_index.insert(reservation_id, next.id);
        }
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL as one `RoomCreated` per live room.
    ///
    /// Read locks on every room are held until the new log is in place, so no
    /// save can slip an event into the old log after its snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), RepositoryError> {
        let _catalog = self.catalog.lock().await;
        let mut guards = Vec::new();
        for handle in self.handles() {
            guards.push(handle.read_owned().await);
        }
        let events: Vec<Event> = guards
            .iter()
            .map(|g| Event::RoomCreated { room: (**g).clone() })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| RepositoryError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| RepositoryError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl RoomRepository for RoomStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, RepositoryError> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for handle in self.handles() {
            rooms.push(handle.read().await.clone());
        }
        Ok(rooms)
    }

    async fn find_room_by_id(&self, id: Ulid) -> Result<Option<Room>, RepositoryError> {
        match self.get(&id) {
            Some(handle) => Ok(Some(handle.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn find_rooms_by_reservation_credential(
        &self,
        code: &str,
        name: &str,
    ) -> Result<Vec<Room>, RepositoryError> {
        let Some(reservation_id) = self.code_index.get(code).map(|e| *e.value()) else {
            return Ok(Vec::new());
        };
        let Some(room_id) = self.reservation_index.get(&reservation_id).map(|e| *e.value()) else {
            return Ok(Vec::new());
        };
        let Some(handle) = self.get(&room_id) else {
            return Ok(Vec::new());
        };
        let room = handle.read().await;
        if room.reservations.iter().any(|r| r.matches_credential(code, name)) {
            Ok(vec![room.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn find_room_by_reservation_id_and_credential(
        &self,
        reservation_id: Ulid,
        code: &str,
        name: &str,
    ) -> Result<Option<Room>, RepositoryError> {
        let Some(room_id) = self.reservation_index.get(&reservation_id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(handle) = self.get(&room_id) else {
            return Ok(None);
        };
        let room = handle.read().await;
        if room.knows_reservation(reservation_id, code, name) {
            Ok(Some(room.clone()))
        } else {
            Ok(None)
        }
    }

    async fn save_room(&self, room: Room) -> Result<Room, RepositoryError> {
        if room.reservations.len() > MAX_RESERVATIONS_PER_ROOM {
            return Err(RepositoryError::LimitExceeded("too many reservations on room"));
        }
        let handle = self.get(&room.id).ok_or(RepositoryError::NotFound(room.id))?;
        let mut guard = handle.write().await;
        // Deleted while we waited for the lock.
        if !self.rooms.contains_key(&room.id) {
            return Err(RepositoryError::NotFound(room.id));
        }
        if guard.version != room.version {
            return Err(RepositoryError::VersionConflict {
                id: room.id,
                expected: room.version,
                found: guard.version,
            });
        }

        let claimed = self.claim_codes(Some(&*guard), &room)?;
        let mut next = room;
        next.version = guard.version + 1;
        let event = Event::RoomSaved { room: next.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.release_codes(&claimed);
            return Err(e);
        }
        self.reindex(&guard, &next);
        *guard = next.clone();
        Ok(next)
    }

    async fn insert_room(&self, room: Room) -> Result<(), RepositoryError> {
        let _catalog = self.catalog.lock().await;
        if self.rooms.contains_key(&room.id) {
            return Err(RepositoryError::AlreadyExists(room.id));
        }
        if self.rooms.len() >= MAX_ROOMS {
            return Err(RepositoryError::LimitExceeded("too many rooms"));
        }
        let mut room = room;
        room.version = 0;
        let claimed = self.claim_codes(None, &room)?;
        let event = Event::RoomCreated { room: room.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.release_codes(&claimed);
            return Err(e);
        }
        self.index(&room);
        self.rooms.insert(room.id, Arc::new(RwLock::new(room)));
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(self.rooms.len() as f64);
        Ok(())
    }

    async fn delete_room(&self, id: Ulid, version: u64) -> Result<(), RepositoryError> {
        let _catalog = self.catalog.lock().await;
        let handle = self.get(&id).ok_or(RepositoryError::NotFound(id))?;
        let guard = handle.write().await;
        if guard.version != version {
            return Err(RepositoryError::VersionConflict {
                id,
                expected: version,
                found: guard.version,
            });
        }
        self.wal_append(&Event::RoomDeleted { id }).await?;
        self.unindex(&guard);
        self.rooms.remove(&id);
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(self.rooms.len() as f64);
        Ok(())
    }

    async fn is_code_taken(&self, code: &str) -> Result<bool, RepositoryError> {
        Ok(self.code_index.contains_key(code))
    }
}
