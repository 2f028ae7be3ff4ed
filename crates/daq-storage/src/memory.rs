//! Process-wide table of in-memory recordings.
//!
//! Memory-backed recordings and snapshots never touch the filesystem, yet
//! they still own a path: the one the save path resolver handed out. The
//! table maps those paths to the recorded bytes so that
//!
//! - later resolutions treat pending and completed memory recordings as
//!   collisions, exactly like files on disk, and
//! - callers can fetch a finished recording by path after the completion
//!   notification.
//!
//! Entries are inserted by the writers (memory mode at open, memory-plus-disk
//! mode at close) and are never removed by the recorder. Callers release a
//! recording with [`MemoryRecordings::evict`] once they have consumed it.

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

static GLOBAL_TABLE: Lazy<Arc<MemoryRecordings>> =
    Lazy::new(|| Arc::new(MemoryRecordings::new()));

/// Growable byte buffer shared between a writer and its readers.
///
/// Cloning is cheap; all clones see the same bytes.
#[derive(Clone, Default)]
pub struct MemoryBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer holding `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Copy of the current contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }

    /// Replace the contents wholesale.
    pub fn replace(&self, bytes: Vec<u8>) {
        *self.bytes.lock() = bytes;
    }

    /// Seekable writer positioned at the start of the buffer.
    pub fn cursor(&self) -> MemoryCursor {
        MemoryCursor {
            buffer: self.clone(),
            position: 0,
        }
    }

    /// Whether two handles refer to the same buffer.
    pub fn same_buffer(&self, other: &MemoryBuffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for MemoryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBuffer")
            .field("len", &self.len())
            .finish()
    }
}

/// `Write + Seek` view over a [`MemoryBuffer`].
#[derive(Debug)]
pub struct MemoryCursor {
    buffer: MemoryBuffer,
    position: u64,
}

impl Write for MemoryCursor {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut bytes = self.buffer.bytes.lock();
        let start = usize::try_from(self.position)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "position overflow"))?;
        let end = start + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        self.position = end as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.buffer.len() as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(offset) => len + offset as i128,
            SeekFrom::Current(offset) => self.position as i128 + offset as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

/// Handle to one in-memory recording.
#[derive(Clone)]
pub enum MemoryRecording {
    /// Complete file image (TIFF, HDF5).
    File(MemoryBuffer),
    /// Zarr store holding the recorded arrays.
    #[cfg(feature = "storage_zarr")]
    Store(zarrs::storage::ReadableWritableListableStorage),
}

impl MemoryRecording {
    /// The file image, if this recording is file-backed.
    pub fn as_buffer(&self) -> Option<&MemoryBuffer> {
        match self {
            MemoryRecording::File(buffer) => Some(buffer),
            #[cfg(feature = "storage_zarr")]
            MemoryRecording::Store(_) => None,
        }
    }

    /// The store, if this recording is a Zarr store.
    #[cfg(feature = "storage_zarr")]
    pub fn as_store(&self) -> Option<&zarrs::storage::ReadableWritableListableStorage> {
        match self {
            MemoryRecording::Store(store) => Some(store),
            MemoryRecording::File(_) => None,
        }
    }
}

impl fmt::Debug for MemoryRecording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryRecording::File(buffer) => f.debug_tuple("File").field(buffer).finish(),
            #[cfg(feature = "storage_zarr")]
            MemoryRecording::Store(_) => f.write_str("Store(..)"),
        }
    }
}

/// Path-keyed table of in-memory recordings.
#[derive(Default)]
pub struct MemoryRecordings {
    entries: RwLock<HashMap<PathBuf, MemoryRecording>>,
}

impl MemoryRecordings {
    /// Create an empty, private table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide table.
    pub fn global() -> Arc<MemoryRecordings> {
        Arc::clone(&GLOBAL_TABLE)
    }

    /// Insert or replace the recording stored under `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, recording: MemoryRecording) -> Option<MemoryRecording> {
        self.entries.write().insert(path.into(), recording)
    }

    /// Recording stored under `path`.
    pub fn get(&self, path: &Path) -> Option<MemoryRecording> {
        self.entries.read().get(path).cloned()
    }

    /// Whether `path` is taken by a pending or completed recording.
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.read().contains_key(path)
    }

    /// Remove and return the recording stored under `path`.
    pub fn evict(&self, path: &Path) -> Option<MemoryRecording> {
        self.entries.write().remove(path)
    }

    /// Remove every recording.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Paths of all stored recordings.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of stored recordings.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for MemoryRecordings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecordings")
            .field("paths", &self.paths())
            .finish()
    }
}
