//! Public recording API.

use super::backend::{ContainerFactory, StorageBackends, StorageContext};
use super::events::{EventBus, RecordingEvent};
use super::params::{validate_target, RecordingParams, SaveMode, SnapshotRequest};
use super::snapshot::Snapshotter;
use super::state::{RecordingState, SessionState};
use super::worker::{self, WorkerContext};
use crate::config::RecorderConfig;
use crate::error::{RecordingError, RecordingResult};
use daq_core::{Frame, FrameSource};
use daq_storage::{Attributes, MemoryRecordings, SaveFormat, SavePathResolver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Owns the recording session and dispatches its worker.
///
/// At most one recording runs at a time. Snapshots are synchronous and are
/// not excluded against a running recording; callers that share detectors
/// between the two must serialize them.
///
/// # Example
///
/// ```rust,ignore
/// let manager = RecordingManager::new(source, RecorderConfig::default());
/// let mut events = manager.subscribe();
/// let params = RecordingParams::builder(["cam0"], RecMode::SpecFrames, "run1")
///     .frame_bound(100)
///     .save_format(SaveFormat::Zarr)
///     .build()?;
/// manager.start_recording(params)?;
/// // ... wait for RecordingEvent::RecordingEnded
/// ```
pub struct RecordingManager {
    source: Arc<dyn FrameSource>,
    storage: StorageContext,
    events: EventBus,
    poll_interval: Duration,
    state: Arc<SessionState>,
    running: Arc<AtomicBool>,
    emit_on_end: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Held from `Idle -> Starting` until the start handshake is settled
    start_lock: Mutex<()>,
    active_detectors: Mutex<Vec<String>>,
}

impl RecordingManager {
    /// Manager over `source` using the process-wide memory recordings table.
    pub fn new(source: Arc<dyn FrameSource>, config: RecorderConfig) -> Self {
        let storage = StorageContext {
            factory: Arc::new(StorageBackends),
            resolver: SavePathResolver::new(MemoryRecordings::global()),
            output_dir: config.storage.output_dir.clone(),
            tiff_size_limit: config.storage.tiff_size_limit_bytes,
        };
        Self {
            source,
            storage,
            events: EventBus::new(config.worker.event_capacity),
            poll_interval: config.worker.poll_interval(),
            state: Arc::new(SessionState::default()),
            running: Arc::new(AtomicBool::new(false)),
            emit_on_end: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
            start_lock: Mutex::new(()),
            active_detectors: Mutex::new(Vec::new()),
        }
    }

    /// Use `table` instead of the process-wide memory recordings table.
    pub fn with_memory_table(mut self, table: Arc<MemoryRecordings>) -> Self {
        self.storage.resolver = SavePathResolver::new(table);
        self
    }

    /// Use `factory` to open containers.
    pub fn with_container_factory(mut self, factory: Arc<dyn ContainerFactory>) -> Self {
        self.storage.factory = factory;
        self
    }

    /// Receive every notification published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }

    /// The memory recordings table this manager writes to.
    pub fn memory_recordings(&self) -> Arc<MemoryRecordings> {
        Arc::clone(self.storage.resolver.memory())
    }

    /// Current session state.
    pub fn state(&self) -> RecordingState {
        self.state.get()
    }

    /// Whether a session is anywhere between start and idle.
    pub fn is_recording(&self) -> bool {
        self.state() != RecordingState::Idle
    }

    /// Start a recording.
    ///
    /// Returns once the worker has opened every writer. Configuration errors
    /// and failures to open writers are returned here, with the session left
    /// idle and no notification sent.
    pub fn start_recording(&self, params: RecordingParams) -> RecordingResult<()> {
        params.validate()?;
        let _starting = self.start_lock.lock();
        self.state.begin(|| {
            self.running.store(true, Ordering::SeqCst);
            self.emit_on_end.store(true, Ordering::SeqCst);
        })?;

        let result = self.launch(params);
        if let Err(e) = &result {
            warn!(error = %e, "Recording did not start");
            self.running.store(false, Ordering::SeqCst);
            self.state.reset();
        }
        result
    }

    fn launch(&self, params: RecordingParams) -> RecordingResult<()> {
        // A worker stopped without waiting may still be winding down
        if let Some(stale) = self.worker.lock().take() {
            if stale.join().is_err() {
                error!("Previous recording worker panicked");
            }
        }

        for detector in params.detectors() {
            self.source
                .flush_buffers(detector)
                .map_err(|e| RecordingError::detector(detector, e))?;
        }
        *self.active_detectors.lock() = params.detectors().to_vec();

        let ctx = WorkerContext {
            params,
            source: Arc::clone(&self.source),
            storage: self.storage.clone(),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            running: Arc::clone(&self.running),
            emit_on_end: Arc::clone(&self.emit_on_end),
            poll_interval: self.poll_interval,
        };
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name("recording-worker".into())
            .spawn(move || worker::run(ctx, ready_tx))
            .map_err(|e| RecordingError::WorkerUnavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let panicked = handle.join().is_err();
                Err(RecordingError::WorkerUnavailable(if panicked {
                    "recording worker panicked while starting".into()
                } else {
                    "recording worker exited before reporting".into()
                }))
            }
        }
    }

    /// Stop the current recording.
    ///
    /// A no-op when idle, so calling it twice is fine. `emit_completion`
    /// controls whether [`RecordingEvent::RecordingEnded`] is published.
    /// With `wait`, returns after the worker has finalized and closed every
    /// writer, including when the session is still starting; otherwise
    /// returns at once and the caller should wait for the notification.
    pub fn stop_recording(&self, emit_completion: bool, wait: bool) -> RecordingResult<()> {
        if self.state() == RecordingState::Idle {
            debug!("Stop requested while idle");
            if wait {
                self.join_worker();
            }
            return Ok(());
        }

        let detectors = self.active_detectors.lock().clone();
        for detector in &detectors {
            if let Err(e) = self.source.flush_buffers(detector) {
                warn!(detector = %detector, error = %e, "Failed to flush detector on stop");
            }
        }

        let stopping = self.state.request_stop(|| {
            self.emit_on_end.store(emit_completion, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        });
        if stopping {
            info!(wait, "Stopping recording");
        }

        if wait {
            // A start still in its handshake stores the worker handle first
            drop(self.start_lock.lock());
            self.join_worker();
        }
        Ok(())
    }

    fn join_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Recording worker panicked");
                self.events.emit(RecordingEvent::RecordingFailed {
                    error: "recording worker panicked".into(),
                });
            }
        }
    }

    /// Capture one frame per requested detector.
    ///
    /// Returns the frames for [`SaveMode::ReturnInPlace`] and `None` once they
    /// have been saved otherwise.
    pub fn capture_snapshot(
        &self,
        request: &SnapshotRequest,
    ) -> RecordingResult<Option<HashMap<String, Frame>>> {
        self.snapshotter().capture(request)
    }

    /// Save a frame captured earlier, for example one returned in place.
    ///
    /// Uses the snapshot naming and attribute rules without touching
    /// acquisition. Returns the resolved path.
    pub fn save_previous_snapshot(
        &self,
        detector: &str,
        save_name: &Path,
        save_mode: SaveMode,
        format: SaveFormat,
        frame: &Frame,
        attributes: Attributes,
    ) -> RecordingResult<PathBuf> {
        validate_target(save_name, format)?;
        let destination = save_mode.destination().ok_or_else(|| {
            RecordingError::Configuration("a saved snapshot needs a disk or memory save mode".into())
        })?;

        let frames = [(detector.to_string(), frame.clone())];
        let attributes = HashMap::from([(detector.to_string(), attributes)]);
        self.snapshotter()
            .write(save_name, destination, format, &frames, &attributes)?
            .into_iter()
            .next()
            .ok_or_else(|| RecordingError::Configuration("snapshot produced no file".into()))
    }

    fn snapshotter(&self) -> Snapshotter<'_> {
        Snapshotter {
            source: self.source.as_ref(),
            storage: &self.storage,
            events: &self.events,
        }
    }
}

impl Drop for RecordingManager {
    fn drop(&mut self) {
        if self.is_recording() {
            warn!("Recording manager dropped during a session, stopping it");
            self.running.store(false, Ordering::SeqCst);
        }
        self.join_worker();
    }
}
