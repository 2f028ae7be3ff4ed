//! Zarr V3 recording.
//!
//! One store per container, one `uint16` array per detector with shape
//! `[frames, rows, cols]` and chunk shape `[1, rows, cols]`, so every frame is
//! exactly one chunk. Arrays are created with a single frame row: the first
//! frame of a recording fills that row and every later frame grows the
//! leading extent by one before its chunk is stored.
//!
//! While a recording is open the array carries `"writing": true`; finalizing
//! rewrites the metadata with `"writing": false`. An array that never
//! received a frame keeps its initial row (fill value 0).
//!
//! # Layout
//!
//! ```text
//! rec.zarr/
//! ├── zarr.json          # Root group
//! ├── cam0/
//! │   ├── zarr.json      # Array metadata + attributes
//! │   └── c/0/0/0        # Frame 0
//! └── cam1/
//!     └── ...
//! ```

use crate::error::{zarr_err, StorageError, StorageResult};
use crate::memory::MemoryRecording;
use crate::path_resolver::SavePathResolver;
use crate::writer::{
    check_frames, ensure_parent_dir, Attributes, Container, ContainerRequest, DatasetSpec,
    DatasetWriter, Destination, RecordingOutput,
};
use daq_core::Frame;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::store::MemoryStore;
use zarrs::storage::{ReadableWritableListableStorage, ReadableWritableListableStorageTraits};

/// Attribute flagging an array that is still being written.
pub const WRITING_ATTR: &str = "writing";

/// Zarr store holding one array per detector.
pub struct ZarrContainer {
    path: PathBuf,
    store: ReadableWritableListableStorage,
    destination: Destination,
    resolver: SavePathResolver,
}

impl ZarrContainer {
    /// Open the store and make sure its root group exists.
    pub fn open(resolver: &SavePathResolver, request: ContainerRequest) -> StorageResult<Self> {
        let store: ReadableWritableListableStorage = match request.destination {
            Destination::Memory => {
                let reusable = if request.append {
                    resolver.memory().get(&request.path)
                } else {
                    None
                };
                match reusable {
                    Some(MemoryRecording::Store(store)) => store,
                    Some(MemoryRecording::File(_)) => {
                        return Err(StorageError::MemoryKindMismatch(request.path))
                    }
                    None => {
                        let store: ReadableWritableListableStorage = Arc::new(MemoryStore::new());
                        resolver
                            .memory()
                            .insert(&request.path, MemoryRecording::Store(store.clone()));
                        store
                    }
                }
            }
            Destination::Disk | Destination::DiskAndMemory => {
                ensure_parent_dir(&request.path)?;
                Arc::new(FilesystemStore::new(&request.path).map_err(zarr_err)?)
            }
        };

        if Group::open(store.clone(), "/").is_err() {
            GroupBuilder::new()
                .build(store.clone(), "/")
                .map_err(zarr_err)?
                .store_metadata()
                .map_err(zarr_err)?;
        }

        debug!(path = %request.path.display(), append = request.append, "Opened Zarr store");
        Ok(Self {
            path: request.path,
            store,
            destination: request.destination,
            resolver: resolver.clone(),
        })
    }
}

impl Container for ZarrContainer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_dataset(&self, name: &str) -> bool {
        Array::open(self.store.clone(), &array_path(name)).is_ok()
    }

    fn create_dataset(&mut self, spec: &DatasetSpec) -> StorageResult<Box<dyn DatasetWriter>> {
        spec.check_shape()?;
        if self.has_dataset(&spec.name) {
            return Err(StorageError::DatasetExists(spec.name.clone()));
        }

        let mut attributes = spec.merged_attributes();
        attributes.insert(WRITING_ATTR.to_string(), Value::Bool(true));

        let mut dataset = ZarrDataset {
            name: spec.name.clone(),
            path: array_path(&spec.name),
            shape: spec.shape,
            attributes,
            store: self.store.clone(),
            array: None,
            frames: 0,
            finalized: false,
        };
        dataset.store_metadata(1)?;
        Ok(Box::new(dataset))
    }

    fn close(self: Box<Self>) -> StorageResult<Vec<RecordingOutput>> {
        let ZarrContainer {
            path,
            store,
            destination,
            resolver,
        } = *self;
        let output = match destination {
            Destination::Disk => RecordingOutput::disk(path),
            Destination::Memory => RecordingOutput {
                path,
                memory: Some(MemoryRecording::Store(store)),
                saved_to_disk: false,
            },
            Destination::DiskAndMemory => {
                let recording = MemoryRecording::Store(store);
                resolver.memory().insert(&path, recording.clone());
                RecordingOutput {
                    path,
                    memory: Some(recording),
                    saved_to_disk: true,
                }
            }
        };
        Ok(vec![output])
    }
}

/// One detector's frame array.
pub struct ZarrDataset {
    name: String,
    path: String,
    shape: [usize; 2],
    attributes: Attributes,
    store: ReadableWritableListableStorage,
    array: Option<Array<dyn ReadableWritableListableStorageTraits>>,
    frames: u64,
    finalized: bool,
}

impl ZarrDataset {
    /// Rewrite the array metadata with `rows` frames along the leading axis.
    fn store_metadata(&mut self, rows: u64) -> StorageResult<()> {
        let [height, width] = self.shape;
        let mut builder = ArrayBuilder::new(
            vec![rows, height as u64, width as u64],
            vec![1, height as u64, width as u64],
            DataType::UInt16,
            FillValue::from(0u16),
        );
        builder.attributes(self.attributes.clone().into_iter().collect());
        builder.dimension_names(Some(vec![
            Some("t".to_string()),
            Some("y".to_string()),
            Some("x".to_string()),
        ]));

        let array = builder
            .build(self.store.clone(), &self.path)
            .map_err(zarr_err)?;
        array.store_metadata().map_err(zarr_err)?;
        self.array = Some(array);
        Ok(())
    }
}

impl DatasetWriter for ZarrDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&mut self, frames: &[Frame]) -> StorageResult<()> {
        if frames.is_empty() {
            return Ok(());
        }
        check_frames(&self.name, self.shape, frames)?;

        // Frame 0 lands in the row reserved at creation; the extent only
        // needs to grow once the recording is past it.
        let rows = self.frames + frames.len() as u64;
        if rows > 1 {
            self.store_metadata(rows)?;
        }

        let array = self
            .array
            .as_ref()
            .ok_or_else(|| StorageError::Zarr(format!("array '{}' is not open", self.name)))?;
        for (offset, frame) in frames.iter().enumerate() {
            let index = self.frames + offset as u64;
            array
                .store_chunk_elements::<u16>(&[index, 0, 0], frame.pixels())
                .map_err(zarr_err)?;
        }
        self.frames = rows;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.frames
    }

    fn finalize(&mut self) -> StorageResult<()> {
        if self.finalized {
            return Ok(());
        }
        self.attributes
            .insert(WRITING_ATTR.to_string(), Value::Bool(false));
        self.store_metadata(self.frames.max(1))?;
        self.finalized = true;
        info!(array = %self.name, frames = self.frames, "Finalized Zarr array");
        Ok(())
    }
}

fn array_path(name: &str) -> String {
    format!("/{}", name)
}
