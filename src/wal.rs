use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::error;

use crate::limits::MAX_WAL_ENTRY_LEN;
use crate::model::Event;

/// Bytes a frame adds around its payload: length prefix and crc.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_ENTRY_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "event too large for WAL",
        ));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Outcome of reading one framed entry.
enum Entry {
    /// An intact event and the number of bytes its frame occupies.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Torn write or bit rot; nothing after this point is trusted.
    Damaged,
}

/// Fill `buf` unless the reader runs dry first. Returns the bytes read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_entry(reader: &mut impl Read) -> io::Result<Entry> {
    let mut len_buf = [0u8; 4];
    match read_up_to(reader, &mut len_buf)? {
        0 => return Ok(Entry::End),
        4 => {}
        _ => return Ok(Entry::Damaged),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_WAL_ENTRY_LEN {
        return Ok(Entry::Damaged);
    }

    let mut payload = vec![0u8; len];
    if read_up_to(reader, &mut payload)? < len {
        return Ok(Entry::Damaged);
    }
    let mut crc_buf = [0u8; 4];
    if read_up_to(reader, &mut crc_buf)? < crc_buf.len() {
        return Ok(Entry::Damaged);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Entry::Damaged);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Entry::Event(event, len as u64 + FRAME_OVERHEAD)),
        Err(_) => Ok(Entry::Damaged),
    }
}

/// Events recovered from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// A damaged trailing entry was found and dropped.
    pub truncated: bool,
    /// Length of the intact prefix of the log, in bytes.
    pub valid_len: u64,
}

/// Append-only write-ahead log of room events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// `len` counts the payload only. A damaged tail (crash mid-write) is
/// discarded on replay and cut off with [`Wal::truncate_to`] before the log
/// is reopened for appends.
///
/// Batches are all-or-nothing: a batch that fails to write is rolled back to
/// the previous length. If even the rollback fails the log refuses further
/// appends until it is compacted.
pub struct Wal {
    file: File,
    path: PathBuf,
    appends_since_compact: u64,
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            poisoned: false,
        })
    }

    /// Cut the log at `path` down to `len` bytes and fsync it.
    pub fn truncate_to(path: &Path, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()
    }

    /// Append and fsync one event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch([event])
    }

    /// Write every event with a single fsync, or none of them.
    pub fn append_batch<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL unusable after a failed rollback"));
        }
        let mut buf = Vec::new();
        let mut count = 0;
        for event in events {
            encode_event(&mut buf, event)?;
            count += 1;
        }

        let committed = self.file.metadata()?.len();
        if let Err(e) = self.file.write_all(&buf).and_then(|()| self.file.sync_all()) {
            self.rollback(committed);
            return Err(e);
        }
        self.appends_since_compact += count;
        Ok(())
    }

    fn rollback(&mut self, len: u64) {
        if let Err(e) = self.file.set_len(len).and_then(|()| self.file.sync_all()) {
            error!("WAL rollback to {len} bytes failed, refusing further appends: {e}");
            self.poisoned = true;
        }
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.compact")
    }

    /// Write a replacement log next to the live one and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::compact_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the replacement over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event from `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        loop {
            match read_entry(&mut reader)? {
                Entry::Event(event, frame_len) => {
                    replay.events.push(event);
                    replay.valid_len += frame_len;
                }
                Entry::End => break,
                Entry::Damaged => {
                    replay.truncated = true;
                    break;
                }
            }
        }
        Ok(replay)
    }
}
