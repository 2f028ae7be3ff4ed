//! Core types and traits for daq-recorder.
//!
//! - [`data::Frame`]: a single 16-bit detector frame
//! - [`capabilities::FrameSource`]: the narrow contract a detector layer exposes to the recorder
//! - [`error::DaqError`]: shared error type with the [`error::AppResult`] alias

pub mod capabilities;
pub mod data;
pub mod error;

pub use capabilities::{AcquisitionHandle, FrameSource};
pub use data::Frame;
pub use error::{AppResult, DaqError};
