//! Custom error types shared by the daq-recorder crates.
//!
//! `DaqError` covers the failures that cross crate boundaries: configuration
//! mistakes caught during validation, detector failures surfaced through
//! [`crate::FrameSource`], plain I/O, and functionality compiled out via
//! feature flags.

use thiserror::Error;

/// Convenience alias for results using the shared error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the core crate.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration validation failed.
    ///
    /// Values parsed correctly but are logically invalid (a frame buffer of
    /// the wrong size, an empty detector list).
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A detector reported a failure.
    #[error("Detector '{detector}' error: {message}")]
    Detector {
        /// Detector name
        detector: String,
        /// Driver supplied message
        message: String,
    },

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Functionality was not compiled in.
    ///
    /// Carries the cargo feature that enables it.
    #[error("Feature '{0}' is not enabled. Rebuild with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Build a detector error.
    pub fn detector(detector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Detector {
            detector: detector.into(),
            message: message.into(),
        }
    }
}
