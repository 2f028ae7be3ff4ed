//! Frame recording containers.
//!
//! Writers for the three supported on-disk layouts (HDF5, multipage TIFF and
//! Zarr), the save path resolver and the in-memory recordings table shared by
//! every session in the process. Formats are compiled in through the
//! `storage_hdf5`, `storage_tiff` and `storage_zarr` features.

pub mod error;
pub mod format;
pub mod memory;
pub mod path_resolver;
pub mod writer;

#[cfg(feature = "storage_hdf5")]
pub mod hdf5_writer;
#[cfg(feature = "storage_tiff")]
pub mod tiff_writer;
#[cfg(feature = "storage_zarr")]
pub mod zarr_writer;

pub use error::{StorageError, StorageResult};
pub use format::{CapabilityProfile, SaveFormat, TIFF_SIZE_CEILING};
pub use memory::{MemoryBuffer, MemoryCursor, MemoryRecording, MemoryRecordings};
pub use path_resolver::SavePathResolver;
pub use writer::{
    open_container, Attributes, Container, ContainerRequest, DatasetSpec, DatasetWriter,
    Destination, RecordingOutput, DETECTOR_NAME_ATTR, ELEMENT_SIZE_ATTR,
};

#[cfg(feature = "storage_hdf5")]
pub use hdf5_writer::{Hdf5Container, Hdf5Dataset};
#[cfg(feature = "storage_tiff")]
pub use tiff_writer::{TiffContainer, TiffStackWriter};
#[cfg(feature = "storage_zarr")]
pub use zarr_writer::{ZarrContainer, ZarrDataset};
