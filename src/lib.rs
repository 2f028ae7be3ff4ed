//! # daq-recorder
//!
//! Multi-detector frame recording. A [`RecordingManager`] pulls frames from a
//! [`daq_core::FrameSource`] on a background worker and streams them into
//! HDF5, Zarr or multipage TIFF containers on disk, in memory, or both. Single
//! frame snapshots share the same writers.
//!
//! ## Crate Structure
//!
//! - **`recording`**: session state machine, worker loop, snapshots and notifications.
//! - **`config`**: Figment-based configuration (TOML file plus `DAQ_RECORDER_` environment).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the [`RecordingError`] type returned by the public API.
//!
//! Storage writers live in `daq-storage`, the detector contract in `daq-core`.

pub mod config;
pub mod error;
pub mod logging;
pub mod recording;

pub use error::{RecordingError, RecordingResult};
pub use recording::{
    ContainerFactory, RecMode, RecordingEvent, RecordingManager, RecordingParams,
    RecordingParamsBuilder, RecordingState, SaveMode, SnapshotRequest, StorageBackends,
};
