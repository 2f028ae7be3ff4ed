//! Format writer abstraction.
//!
//! A recording session picks one [`SaveFormat`] up front and talks to it only
//! through two traits:
//!
//! - [`Container`]: a file (or store) that holds one or more datasets. In
//!   combine mode every detector's dataset lives in the container opened for
//!   the first detector.
//! - [`DatasetWriter`]: one growing stack of frames for one detector.
//!
//! [`open_container`] is the factory that maps a format onto its concrete
//! writer, so the recording loop itself never branches on format.

use crate::error::{StorageError, StorageResult};
use crate::format::SaveFormat;
use crate::memory::MemoryRecording;
use crate::path_resolver::SavePathResolver;
use daq_core::Frame;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Caller supplied metadata attached to a dataset.
pub type Attributes = BTreeMap<String, Value>;

/// Attribute key holding the detector name.
pub const DETECTOR_NAME_ATTR: &str = "detector_name";

/// Attribute key holding the `[z, y, x]` pixel size in micrometers.
pub const ELEMENT_SIZE_ATTR: &str = "element_size_um";

/// Where a container keeps its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Written to the resolved path only.
    Disk,
    /// Held in the in-memory recordings table only.
    Memory,
    /// Written to disk and published to the in-memory table on close.
    DiskAndMemory,
}

impl Destination {
    /// Whether the container writes to the filesystem.
    pub fn writes_disk(self) -> bool {
        !matches!(self, Destination::Memory)
    }

    /// Whether the finished recording is published in memory.
    pub fn keeps_memory(self) -> bool {
        !matches!(self, Destination::Disk)
    }
}

/// Everything a writer needs to open a container.
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    /// Resolved, collision-free path.
    pub path: PathBuf,
    /// Path the resolution started from. Writers that roll over to new
    /// files resolve again from here.
    pub base: PathBuf,
    /// Disk, memory or both.
    pub destination: Destination,
    /// Re-open an existing container instead of creating a fresh one.
    pub append: bool,
    /// Overrides the format's size ceiling.
    pub size_limit: Option<u64>,
}

impl ContainerRequest {
    /// Request for a freshly resolved path.
    pub fn new(path: impl Into<PathBuf>, destination: Destination) -> Self {
        let path = path.into();
        Self {
            base: path.clone(),
            path,
            destination,
            append: false,
            size_limit: None,
        }
    }

    /// Set the unresolved base path.
    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = base.into();
        self
    }

    /// Open in append mode.
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Override the size ceiling.
    pub fn with_size_limit(mut self, limit: Option<u64>) -> Self {
        self.size_limit = limit;
        self
    }
}

/// Shape and metadata of a dataset to create.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    /// Dataset (or array) name inside the container.
    pub name: String,
    /// Detector the frames come from.
    pub detector: String,
    /// `[rows, cols]` of every frame.
    pub shape: [usize; 2],
    /// `[z, y, x]` pixel size in micrometers.
    pub pixel_size_um: [f64; 3],
    /// Caller supplied metadata.
    pub attributes: Attributes,
}

impl DatasetSpec {
    /// Caller metadata plus the detector name and pixel size entries.
    ///
    /// The two standard keys win over caller supplied values.
    pub fn merged_attributes(&self) -> Attributes {
        let mut merged = self.attributes.clone();
        merged.insert(
            DETECTOR_NAME_ATTR.to_string(),
            Value::String(self.detector.clone()),
        );
        merged.insert(
            ELEMENT_SIZE_ATTR.to_string(),
            Value::from(self.pixel_size_um.to_vec()),
        );
        merged
    }

    pub(crate) fn check_shape(&self) -> StorageResult<()> {
        if self.shape.contains(&0) {
            return Err(StorageError::EmptyShape(self.name.clone()));
        }
        Ok(())
    }
}

/// A finished recording produced by [`Container::close`].
#[derive(Debug, Clone)]
pub struct RecordingOutput {
    /// Resolved path of the recording.
    pub path: PathBuf,
    /// Handle to the bytes, for memory destinations.
    pub memory: Option<MemoryRecording>,
    /// Whether the recording also exists on disk.
    pub saved_to_disk: bool,
}

impl RecordingOutput {
    /// Output for a disk-only recording.
    pub fn disk(path: PathBuf) -> Self {
        Self {
            path,
            memory: None,
            saved_to_disk: true,
        }
    }
}

/// A growing stack of frames for one detector.
pub trait DatasetWriter: Send {
    /// Dataset name inside its container.
    fn name(&self) -> &str;

    /// Append frames in arrival order.
    fn append(&mut self, frames: &[Frame]) -> StorageResult<()>;

    /// Frames written so far.
    fn len(&self) -> u64;

    /// Whether no frame has been written.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bring the dataset into its final state (trim placeholders, clear
    /// in-progress markers). Safe to call more than once.
    fn finalize(&mut self) -> StorageResult<()>;
}

/// A file or store holding one or more datasets.
pub trait Container: Send {
    /// Resolved path of the container.
    fn path(&self) -> &Path;

    /// Whether a dataset called `name` already exists.
    fn has_dataset(&self, name: &str) -> bool;

    /// Create a dataset sized for `spec.shape` with the merged attributes.
    fn create_dataset(&mut self, spec: &DatasetSpec) -> StorageResult<Box<dyn DatasetWriter>>;

    /// Release the container and report what was written.
    ///
    /// Every dataset writer created from this container must be finalized
    /// and dropped first.
    fn close(self: Box<Self>) -> StorageResult<Vec<RecordingOutput>>;
}

/// Open a container of `format` for `request`.
pub fn open_container(
    format: SaveFormat,
    resolver: &SavePathResolver,
    request: ContainerRequest,
) -> StorageResult<Box<dyn Container>> {
    match format {
        #[cfg(feature = "storage_hdf5")]
        SaveFormat::Hdf5 => Ok(Box::new(crate::hdf5_writer::Hdf5Container::open(
            resolver, request,
        )?)),
        #[cfg(feature = "storage_tiff")]
        SaveFormat::Tiff => Ok(Box::new(crate::tiff_writer::TiffContainer::open(
            resolver, request,
        )?)),
        #[cfg(feature = "storage_zarr")]
        SaveFormat::Zarr => Ok(Box::new(crate::zarr_writer::ZarrContainer::open(
            resolver, request,
        )?)),
        #[allow(unreachable_patterns)]
        other => {
            let _ = (resolver, request);
            Err(StorageError::FeatureNotEnabled(other.feature()))
        }
    }
}

/// Reject frames that do not match the dataset shape.
pub(crate) fn check_frames(dataset: &str, expected: [usize; 2], frames: &[Frame]) -> StorageResult<()> {
    for frame in frames {
        if frame.shape() != expected {
            return Err(StorageError::ShapeMismatch {
                dataset: dataset.to_string(),
                expected,
                actual: frame.shape(),
            });
        }
    }
    Ok(())
}

/// Create the parent directory of `path` when missing.
pub(crate) fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
