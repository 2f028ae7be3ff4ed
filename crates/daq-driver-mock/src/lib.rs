//! Simulated detectors for daq-recorder.
//!
//! [`MockFrameSource`] implements [`daq_core::FrameSource`] without hardware.
//! Tests script exactly which frames each pull returns; the command line tool
//! runs it paced to produce pattern frames at a steady rate.
//!
//! ```rust,ignore
//! use daq_driver_mock::{FeedMode, MockFrameSource};
//!
//! let source = MockFrameSource::new()
//!     .with_detector("cam0", 640, 480)
//!     .with_detector("cam1", 320, 240);
//! source.script_batches("cam0", &[3, 4, 5])?;
//! source.set_mode("cam1", FeedMode::FreeRunning { frames_per_pull: 1 })?;
//! ```

mod mock_source;
mod pattern;

pub use mock_source::{FeedMode, MockFrameSource, SourceCall};
pub use pattern::generate_test_pattern;
