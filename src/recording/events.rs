//! Recording notifications.
//!
//! The worker, the snapshot path and the manager publish [`RecordingEvent`]s
//! on a broadcast channel. Any number of subscribers can listen; a
//! subscriber that falls more than the channel capacity behind loses the
//! oldest events and sees `RecvError::Lagged`.

use daq_core::Frame;
use daq_storage::MemoryRecording;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::trace;

/// Something observable happened to a recording or snapshot.
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Writers are open and the worker loop is about to run
    RecordingStarted,
    /// The session is back to idle
    RecordingEnded,
    /// Smallest frame count across detectors. `0` resets progress after the loop.
    FrameProgress(u64),
    /// Seconds since the loop began, two decimals. `0.0` resets progress.
    DurationProgress(f64),
    /// A snapshot frame is available in memory
    MemorySnapshotAvailable {
        /// `{save name}_{detector}`, no extension
        name: String,
        /// Captured frame
        frame: Frame,
        /// Key in the in-memory recordings table
        path: PathBuf,
        /// Whether the snapshot was also written to disk
        saved_to_disk: bool,
    },
    /// A recording is available in memory
    MemoryRecordingAvailable {
        /// File name of the recording
        name: String,
        /// Handle to the recorded bytes or store
        recording: MemoryRecording,
        /// Key in the in-memory recordings table
        path: PathBuf,
        /// Whether the recording was also written to disk
        saved_to_disk: bool,
    },
    /// A recording file was closed on disk
    RecordingSaved {
        /// Resolved path
        path: PathBuf,
    },
    /// A snapshot file was written to disk
    SnapshotSaved {
        /// Resolved path
        path: PathBuf,
    },
    /// The session ended early because of an error
    RecordingFailed {
        /// Error description
        error: String,
    },
}

/// Broadcast sender shared by the manager and its worker.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RecordingEvent>,
}

impl EventBus {
    /// Bus buffering `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver seeing every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.tx.subscribe()
    }

    /// Publish `event`. Having no subscribers is not an error.
    pub fn emit(&self, event: RecordingEvent) {
        if self.tx.send(event).is_err() {
            trace!("Recording event dropped, no subscribers");
        }
    }
}

/// Seconds rounded to two decimals, as reported in [`RecordingEvent::DurationProgress`].
pub(crate) fn rounded_seconds(elapsed: std::time::Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}
