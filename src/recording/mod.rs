//! Recording sessions and snapshots.
//!
//! - [`RecordingManager`]: start/stop state machine and snapshot entry point
//! - [`RecordingParams`]: immutable session description, built and validated once
//! - [`RecordingEvent`]: notifications published on a broadcast channel
//! - [`ContainerFactory`]: seam between the worker and the storage writers

mod backend;
mod events;
mod manager;
mod params;
mod session;
mod snapshot;
mod state;
mod worker;

pub use backend::{ContainerFactory, StorageBackends};
pub use events::{EventBus, RecordingEvent};
pub use manager::RecordingManager;
pub use params::{RecMode, RecordingParams, RecordingParamsBuilder, SaveMode, SnapshotRequest};
pub use snapshot::SNAPSHOT_DATASET;
pub use state::RecordingState;
