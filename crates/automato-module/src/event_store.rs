//! Persistent storage for a module's uid and its packed event stream.
//!
//! Events are appended back to back. Removing one zeroes its bytes in place,
//! so a `0x00` byte in the stream marks an empty slot.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use automato_event::{peek_serialized_length, scan_stream};
use tracing::debug;

use crate::error::{ModuleError, Result};

pub const EVENTS_FILE_NAME: &str = "events.bin";
pub const UID_FILE_NAME: &str = "uid.bin";

pub trait EventStore: Send {
    fn store_uid(&mut self, uid: u16) -> Result<()>;

    /// The stored uid, if one was ever assigned.
    fn load_uid(&mut self) -> Result<Option<u16>>;

    /// Append the event at the start of `blob`. Trailing bytes are ignored.
    fn store_event(&mut self, blob: &[u8]) -> Result<()>;

    /// Zero the first stored event byte-identical to the one in `blob`.
    ///
    /// Returns whether an event was removed.
    fn remove_event(&mut self, blob: &[u8]) -> Result<bool>;

    fn remove_all(&mut self) -> Result<()>;

    /// The packed stream, empty slots included.
    fn raw(&mut self) -> Result<Vec<u8>>;

    /// Erase everything, uid included.
    fn format(&mut self) -> Result<()>;
}

/// The event at the start of `blob`, trimmed to its encoded size.
fn storable(blob: &[u8]) -> Result<&[u8]> {
    let size = peek_serialized_length(blob);
    if size == 0 || blob.len() < size || blob[0] == 0 {
        return Err(ModuleError::InvalidEvent(blob.to_vec()));
    }
    Ok(&blob[..size])
}

/// Zero the first occurrence of `event` in `stream`.
fn zero_first(stream: &mut [u8], event: &[u8]) -> bool {
    let mut scan = scan_stream(stream);
    let mut found = None;
    while let Some(stored) = scan.next() {
        if stored == event {
            found = Some(scan.position() - stored.len());
            break;
        }
    }
    match found {
        Some(start) => {
            stream[start..start + event.len()].fill(0);
            true
        }
        None => false,
    }
}

/// In-memory store, used by tests and the simulator.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    uid: Option<u16>,
    events: Vec<u8>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uid(uid: u16) -> Self {
        Self {
            uid: Some(uid),
            events: Vec::new(),
        }
    }
}

impl EventStore for MemoryEventStore {
    fn store_uid(&mut self, uid: u16) -> Result<()> {
        self.uid = Some(uid);
        Ok(())
    }

    fn load_uid(&mut self) -> Result<Option<u16>> {
        Ok(self.uid)
    }

    fn store_event(&mut self, blob: &[u8]) -> Result<()> {
        let event = storable(blob)?;
        self.events.extend_from_slice(event);
        Ok(())
    }

    fn remove_event(&mut self, blob: &[u8]) -> Result<bool> {
        let event = storable(blob)?;
        Ok(zero_first(&mut self.events, event))
    }

    fn remove_all(&mut self) -> Result<()> {
        self.events.clear();
        Ok(())
    }

    fn raw(&mut self) -> Result<Vec<u8>> {
        Ok(self.events.clone())
    }

    fn format(&mut self) -> Result<()> {
        self.events.clear();
        self.uid = None;
        Ok(())
    }
}

/// Store backed by two files in a directory.
#[derive(Debug, Clone)]
pub struct FileEventStore {
    dir: PathBuf,
}

impl FileEventStore {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ModuleError::Storage {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE_NAME)
    }

    fn uid_path(&self) -> PathBuf {
        self.dir.join(UID_FILE_NAME)
    }

    fn write(&self, path: PathBuf, bytes: &[u8]) -> Result<()> {
        fs::write(&path, bytes).map_err(|source| ModuleError::Storage { path, source })
    }

    fn remove(&self, path: PathBuf) -> Result<()> {
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ModuleError::Storage { path, source }),
        }
    }
}

fn read_or_empty(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(ModuleError::Storage {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl EventStore for FileEventStore {
    fn store_uid(&mut self, uid: u16) -> Result<()> {
        debug!(uid, dir = %self.dir.display(), "storing uid");
        self.write(self.uid_path(), &uid.to_le_bytes())
    }

    fn load_uid(&mut self) -> Result<Option<u16>> {
        let bytes = read_or_empty(&self.uid_path())?;
        match bytes.as_slice() {
            [lo, hi] => Ok(Some(u16::from_le_bytes([*lo, *hi])).filter(|uid| *uid != 0)),
            _ => Ok(None),
        }
    }

    fn store_event(&mut self, blob: &[u8]) -> Result<()> {
        let event = storable(blob)?;
        let mut stream = read_or_empty(&self.events_path())?;
        stream.extend_from_slice(event);
        self.write(self.events_path(), &stream)
    }

    fn remove_event(&mut self, blob: &[u8]) -> Result<bool> {
        let event = storable(blob)?;
        let mut stream = read_or_empty(&self.events_path())?;
        if !zero_first(&mut stream, event) {
            return Ok(false);
        }
        self.write(self.events_path(), &stream)?;
        Ok(true)
    }

    fn remove_all(&mut self) -> Result<()> {
        self.remove(self.events_path())
    }

    fn raw(&mut self) -> Result<Vec<u8>> {
        read_or_empty(&self.events_path())
    }

    fn format(&mut self) -> Result<()> {
        self.remove(self.events_path())?;
        self.remove(self.uid_path())
    }
}
