//! Storage error type.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for storage results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised while creating, growing or closing recordings.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem failure (disk full, permission denied, missing directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HDF5 library failure.
    #[error("HDF5 error: {0}")]
    Hdf5(String),

    /// Zarr store failure.
    #[error("Zarr error: {0}")]
    Zarr(String),

    /// TIFF encoder failure.
    #[error("TIFF error: {0}")]
    Tiff(String),

    /// A frame does not fit the dataset it was routed to.
    #[error("frame of shape {actual:?} does not match dataset '{dataset}' of shape {expected:?}")]
    ShapeMismatch {
        /// Dataset name
        dataset: String,
        /// `[rows, cols]` the dataset was created with
        expected: [usize; 2],
        /// `[rows, cols]` of the offending frame
        actual: [usize; 2],
    },

    /// Dataset name already taken inside the container.
    #[error("dataset '{0}' already exists")]
    DatasetExists(String),

    /// The container format stores a single dataset per file.
    #[error("'{0}' already holds a dataset and cannot take another")]
    SingleDataset(PathBuf),

    /// Dataset would be empty along a frame axis.
    #[error("dataset '{0}' needs non-zero rows and columns")]
    EmptyShape(String),

    /// A memory table entry has the wrong kind for the requested format.
    #[error("in-memory recording at '{0}' has a different format")]
    MemoryKindMismatch(PathBuf),

    /// Format support was not compiled in.
    #[error("Feature '{0}' is not enabled. Rebuild with --features {0}")]
    FeatureNotEnabled(&'static str),
}

#[cfg(feature = "storage_hdf5")]
impl From<hdf5::Error> for StorageError {
    fn from(err: hdf5::Error) -> Self {
        StorageError::Hdf5(err.to_string())
    }
}

#[cfg(feature = "storage_tiff")]
impl From<tiff::TiffError> for StorageError {
    fn from(err: tiff::TiffError) -> Self {
        StorageError::Tiff(err.to_string())
    }
}

#[cfg(feature = "storage_zarr")]
pub(crate) fn zarr_err(err: impl std::fmt::Display) -> StorageError {
    StorageError::Zarr(err.to_string())
}
