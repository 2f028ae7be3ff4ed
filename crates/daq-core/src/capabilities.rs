//! Detector contract consumed by the recorder.
//!
//! The recorder never drives exposure, gain or frame readout. It only needs
//! a detector layer that can report frame shapes, hand over frames that
//! accumulated since the last pull, and bracket a capture with acquisition
//! start/stop. Implementations must be thread-safe: the recording worker
//! pulls frames on its own thread while callers flush or snapshot from theirs.
//!
//! Methods use `anyhow::Result` so drivers can surface whatever failure
//! context they have.

use anyhow::Result;

pub use crate::data::Frame;

/// Token returned by [`FrameSource::start_acquisition`].
///
/// Acquisition is reference counted by the detector layer; every handle
/// must be passed back to [`FrameSource::stop_acquisition`] exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcquisitionHandle(pub u64);

/// Per-detector frame source.
pub trait FrameSource: Send + Sync {
    /// Current frame shape of `detector`, row-major.
    ///
    /// The trailing two entries are rows and columns. Higher-rank sources
    /// prepend extra dimensions.
    fn shape(&self, detector: &str) -> Result<Vec<usize>>;

    /// Physical pixel size in micrometers as `[z, y, x]`.
    fn pixel_size_um(&self, detector: &str) -> Result<[f64; 3]>;

    /// Drain every frame that accumulated since the previous pull.
    ///
    /// Non-blocking; returns an empty vector when nothing is ready. Frames are
    /// returned in arrival order.
    fn pull_frames(&self, detector: &str) -> Result<Vec<Frame>>;

    /// Most recent frame of `detector`, used for single captures.
    fn latest_frame(&self, detector: &str) -> Result<Frame>;

    /// Start acquisition on every detector taking part in acquisitions.
    fn start_acquisition(&self) -> Result<AcquisitionHandle>;

    /// Release an acquisition previously started with [`Self::start_acquisition`].
    fn stop_acquisition(&self, handle: AcquisitionHandle) -> Result<()>;

    /// Discard any frames buffered for `detector`.
    fn flush_buffers(&self, detector: &str) -> Result<()>;
}

/// Trailing `[rows, cols]` of a detector shape.
///
/// A one-dimensional shape is treated as a single row.
pub fn trailing_frame_shape(shape: &[usize]) -> [usize; 2] {
    match shape {
        [] => [0, 0],
        [cols] => [1, *cols],
        [.., rows, cols] => [*rows, *cols],
    }
}
