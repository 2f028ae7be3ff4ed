//! Recording error type.
//!
//! `RecordingError` is what the public recording API returns. It separates
//! the failures a caller can act on:
//!
//! - **`Configuration`**: the request itself is wrong (missing bound, no
//!   detectors, a save mode or format that cannot be recorded). Raised before
//!   any resource is allocated.
//! - **`AlreadyActive`**: a session is already starting, running or stopping.
//! - **`Storage`**: a container could not be opened, grown or closed.
//! - **`Detector`**: the frame source failed (acquisition start, pull, shape
//!   query).
//! - **`WorkerUnavailable`**: the worker thread could not be spawned or
//!   exited before reporting.

use daq_storage::StorageError;
use thiserror::Error;

/// Convenience alias for results using [`RecordingError`].
pub type RecordingResult<T> = std::result::Result<T, RecordingError>;

/// Errors raised by [`crate::RecordingManager`].
#[derive(Error, Debug)]
pub enum RecordingError {
    /// Invalid recording or snapshot request
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Another session is not yet back to idle
    #[error("A recording session is already active")]
    AlreadyActive,

    /// Container failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Frame source failure
    #[error("Detector error: {0}")]
    Detector(#[source] anyhow::Error),

    /// The worker thread never reported back
    #[error("Recording worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl RecordingError {
    /// Wrap a frame source failure with the detector it concerns.
    pub(crate) fn detector(detector: &str, err: anyhow::Error) -> Self {
        RecordingError::Detector(err.context(format!("detector '{}'", detector)))
    }
}

impl From<daq_core::DaqError> for RecordingError {
    fn from(err: daq_core::DaqError) -> Self {
        match err {
            daq_core::DaqError::Configuration(message) => RecordingError::Configuration(message),
            daq_core::DaqError::FeatureNotEnabled(feature) => RecordingError::Configuration(
                format!("feature '{}' is not enabled", feature),
            ),
            other => RecordingError::Detector(other.into()),
        }
    }
}
