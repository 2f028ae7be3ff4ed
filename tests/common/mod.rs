//! Shared harness for recording integration tests.
//!
//! [`RecordingWriterLog`] stands in for the storage writers: it accepts
//! any format, keeps no pixels and logs every container and dataset
//! operation so tests can assert on what the worker asked for.

#![allow(dead_code)]

use daq_core::Frame;
use daq_driver_mock::MockFrameSource;
use daq_recorder::config::RecorderConfig;
use daq_recorder::{ContainerFactory, RecordingEvent, RecordingManager};
use daq_storage::{
    Container, ContainerRequest, DatasetSpec, DatasetWriter, MemoryRecordings, RecordingOutput,
    SaveFormat, SavePathResolver, StorageResult,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Everything the writers saw, in call order.
#[derive(Debug, Default, Clone)]
pub struct WriterCallLog {
    /// `(path, append)` of every opened container
    pub opened: Vec<(PathBuf, bool)>,
    /// `(container path, dataset name)` of every created dataset
    pub datasets: Vec<(PathBuf, String)>,
    /// Batch sizes passed to `append`, per dataset name
    pub appends: HashMap<String, Vec<usize>>,
    /// Frame count at `finalize`, per dataset name
    pub finalized: HashMap<String, u64>,
    /// Closed container paths
    pub closed: Vec<PathBuf>,
}

/// Container factory that records instead of writing.
#[derive(Default)]
pub struct RecordingWriterLog {
    log: Arc<Mutex<WriterCallLog>>,
    existing: Arc<Mutex<HashMap<PathBuf, HashSet<String>>>>,
    close_delay: Duration,
}

impl RecordingWriterLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Writers whose containers take `delay` to close.
    pub fn with_close_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            close_delay: delay,
            ..Self::default()
        })
    }

    pub fn log(&self) -> WriterCallLog {
        self.log.lock().clone()
    }
}

impl ContainerFactory for RecordingWriterLog {
    fn open(
        &self,
        _format: SaveFormat,
        _resolver: &SavePathResolver,
        request: ContainerRequest,
    ) -> StorageResult<Box<dyn Container>> {
        self.log
            .lock()
            .opened
            .push((request.path.clone(), request.append));
        Ok(Box::new(LoggedContainer {
            path: request.path,
            log: Arc::clone(&self.log),
            existing: Arc::clone(&self.existing),
            close_delay: self.close_delay,
        }))
    }
}

struct LoggedContainer {
    path: PathBuf,
    log: Arc<Mutex<WriterCallLog>>,
    existing: Arc<Mutex<HashMap<PathBuf, HashSet<String>>>>,
    close_delay: Duration,
}

impl Container for LoggedContainer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_dataset(&self, name: &str) -> bool {
        self.existing
            .lock()
            .get(&self.path)
            .is_some_and(|names| names.contains(name))
    }

    fn create_dataset(&mut self, spec: &DatasetSpec) -> StorageResult<Box<dyn DatasetWriter>> {
        self.existing
            .lock()
            .entry(self.path.clone())
            .or_default()
            .insert(spec.name.clone());
        self.log
            .lock()
            .datasets
            .push((self.path.clone(), spec.name.clone()));
        Ok(Box::new(LoggedDataset {
            name: spec.name.clone(),
            frames: 0,
            log: Arc::clone(&self.log),
        }))
    }

    fn close(self: Box<Self>) -> StorageResult<Vec<RecordingOutput>> {
        std::thread::sleep(self.close_delay);
        self.log.lock().closed.push(self.path.clone());
        Ok(vec![RecordingOutput::disk(self.path)])
    }
}

struct LoggedDataset {
    name: String,
    frames: u64,
    log: Arc<Mutex<WriterCallLog>>,
}

impl DatasetWriter for LoggedDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&mut self, frames: &[Frame]) -> StorageResult<()> {
        self.frames += frames.len() as u64;
        self.log
            .lock()
            .appends
            .entry(self.name.clone())
            .or_default()
            .push(frames.len());
        Ok(())
    }

    fn len(&self) -> u64 {
        self.frames
    }

    fn finalize(&mut self) -> StorageResult<()> {
        self.log
            .lock()
            .finalized
            .insert(self.name.clone(), self.frames);
        Ok(())
    }
}

/// Config writing under `dir` with a short poll interval.
pub fn test_config(dir: &Path) -> RecorderConfig {
    let mut config = RecorderConfig::default();
    config.storage.output_dir = dir.to_path_buf();
    config.worker.poll_interval_us = 200;
    config
}

/// Manager with real writers and a private memory table.
pub fn storage_manager(source: Arc<MockFrameSource>, dir: &Path) -> RecordingManager {
    RecordingManager::new(source, test_config(dir))
        .with_memory_table(Arc::new(MemoryRecordings::new()))
}

/// Manager whose containers go to `writers`.
pub fn logged_manager(
    source: Arc<MockFrameSource>,
    writers: Arc<RecordingWriterLog>,
    dir: &Path,
) -> RecordingManager {
    storage_manager(source, dir).with_container_factory(writers)
}

/// Collect events until the session ends or fails, panicking after `timeout`.
pub fn events_until_end(
    events: &mut broadcast::Receiver<RecordingEvent>,
    timeout: Duration,
) -> Vec<RecordingEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => {
                let done = matches!(
                    event,
                    RecordingEvent::RecordingEnded | RecordingEvent::RecordingFailed { .. }
                );
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Err(TryRecvError::Empty) => {
                assert!(
                    Instant::now() < deadline,
                    "recording did not end in time, saw {:?}",
                    seen
                );
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(e) => panic!("event channel failed: {:?}", e),
        }
    }
}

/// Everything already published, without waiting.
pub fn drain(events: &mut broadcast::Receiver<RecordingEvent>) -> Vec<RecordingEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

/// Frame counts carried by `FrameProgress` events.
pub fn frame_progress(events: &[RecordingEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            RecordingEvent::FrameProgress(n) => Some(*n),
            _ => None,
        })
        .collect()
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
