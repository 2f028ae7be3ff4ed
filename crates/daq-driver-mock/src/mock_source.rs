//! Scriptable frame source.
//!
//! Each simulated detector has a fixed frame size and one of three feeds:
//!
//! - **Scripted**: every pull hands out the next queued batch, or nothing
//!   once the script is exhausted. Tests use this to control exactly how
//!   many frames each detector yields per worker pass.
//! - **Free running**: while acquisition is active, every pull produces a
//!   fixed number of freshly generated pattern frames.
//! - **Paced**: while acquisition is active, frames accrue at a fixed
//!   interval and each pull drains whatever accrued since the last one.
//!
//! Frames pushed with [`MockFrameSource::push_frames`] sit in the detector
//! buffer until pulled or flushed, which is how stale pre-recording frames
//! are simulated.

use crate::pattern::generate_test_pattern;
use anyhow::{anyhow, bail, Result};
use daq_core::{AcquisitionHandle, Frame, FrameSource};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How a simulated detector produces frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Pulls return queued batches in order.
    Scripted,
    /// Pulls generate `frames_per_pull` frames while acquiring.
    FreeRunning {
        /// Frames produced by each pull
        frames_per_pull: usize,
    },
    /// Pulls return the frames that accrued at one per `frame_interval`.
    Paced {
        /// Time between two frames
        frame_interval: Duration,
    },
}

/// Upper bound on frames a paced detector hands out per pull.
const MAX_PACED_BATCH: u64 = 64;

/// Side effects observed by the source, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    /// `start_acquisition` returned this handle
    Start(AcquisitionHandle),
    /// `stop_acquisition` released this handle
    Stop(AcquisitionHandle),
    /// `flush_buffers` on a detector
    Flush(String),
}

#[derive(Debug)]
struct MockDetector {
    width: u32,
    height: u32,
    pixel_size_um: [f64; 3],
    mode: FeedMode,
    script: VecDeque<Vec<Frame>>,
    buffered: Vec<Frame>,
    latest: Option<Frame>,
    generated: u64,
    pulls: u64,
    paced_since: Option<Instant>,
    fail_pulls: Option<String>,
}

impl MockDetector {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_size_um: [1.0, 1.0, 1.0],
            mode: FeedMode::Scripted,
            script: VecDeque::new(),
            buffered: Vec::new(),
            latest: None,
            generated: 0,
            pulls: 0,
            paced_since: None,
            fail_pulls: None,
        }
    }

    fn generate(&mut self) -> Result<Frame> {
        let pixels = generate_test_pattern(self.width, self.height, self.generated);
        self.generated += 1;
        Ok(Frame::from_u16(self.width, self.height, pixels)?)
    }
}

/// In-process [`FrameSource`] with scripted or generated frames.
#[derive(Debug, Default)]
pub struct MockFrameSource {
    detectors: Mutex<HashMap<String, MockDetector>>,
    active: Mutex<HashSet<AcquisitionHandle>>,
    calls: Mutex<Vec<SourceCall>>,
    next_handle: AtomicU64,
    fail_start: Mutex<Option<String>>,
    start_latency: Mutex<Duration>,
}

impl MockFrameSource {
    /// Source with no detectors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `width` x `height` detector in scripted mode.
    pub fn with_detector(self, name: impl Into<String>, width: u32, height: u32) -> Self {
        self.add_detector(name, width, height);
        self
    }

    /// Add (or replace) a scripted detector.
    pub fn add_detector(&self, name: impl Into<String>, width: u32, height: u32) {
        let name = name.into();
        debug!(detector = %name, width, height, "Adding mock detector");
        self.detectors
            .lock()
            .insert(name, MockDetector::new(width, height));
    }

    /// Change how `detector` produces frames.
    pub fn set_mode(&self, detector: &str, mode: FeedMode) -> Result<()> {
        self.with(detector, |d| {
            d.mode = mode;
            Ok(())
        })
    }

    /// Set the `[z, y, x]` pixel size reported for `detector`.
    pub fn set_pixel_size(&self, detector: &str, pixel_size_um: [f64; 3]) -> Result<()> {
        self.with(detector, |d| {
            d.pixel_size_um = pixel_size_um;
            Ok(())
        })
    }

    /// Queue one batch per pull, each batch holding the given number of
    /// generated frames. A zero entry makes that pull return nothing.
    pub fn script_batches(&self, detector: &str, batch_sizes: &[usize]) -> Result<()> {
        self.with(detector, |d| {
            for &size in batch_sizes {
                let batch = (0..size)
                    .map(|_| d.generate())
                    .collect::<Result<Vec<_>>>()?;
                d.script.push_back(batch);
            }
            Ok(())
        })
    }

    /// Place frames in the detector buffer as if they had already arrived.
    pub fn push_frames(&self, detector: &str, frames: Vec<Frame>) -> Result<()> {
        self.with(detector, |d| {
            d.buffered.extend(frames);
            Ok(())
        })
    }

    /// Make every subsequent pull from `detector` fail with `message`.
    pub fn fail_pulls(&self, detector: &str, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.with(detector, |d| {
            d.fail_pulls = Some(message);
            Ok(())
        })
    }

    /// Make the next `start_acquisition` fail with `message`.
    pub fn fail_next_start(&self, message: impl Into<String>) {
        *self.fail_start.lock() = Some(message.into());
    }

    /// Block every `start_acquisition` for `latency`, like a camera arming.
    pub fn set_start_latency(&self, latency: Duration) {
        *self.start_latency.lock() = latency;
    }

    /// Batches still waiting in `detector`'s script.
    pub fn remaining_batches(&self, detector: &str) -> usize {
        self.detectors
            .lock()
            .get(detector)
            .map_or(0, |d| d.script.len())
    }

    /// Number of `pull_frames` calls made against `detector`.
    pub fn pull_count(&self, detector: &str) -> u64 {
        self.detectors.lock().get(detector).map_or(0, |d| d.pulls)
    }

    /// Acquisition handles not yet stopped.
    pub fn active_acquisitions(&self) -> usize {
        self.active.lock().len()
    }

    /// Recorded start, stop and flush calls.
    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().clone()
    }

    fn with<T>(&self, detector: &str, f: impl FnOnce(&mut MockDetector) -> Result<T>) -> Result<T> {
        let mut detectors = self.detectors.lock();
        let entry = detectors
            .get_mut(detector)
            .ok_or_else(|| anyhow!("unknown detector '{}'", detector))?;
        f(entry)
    }
}

impl FrameSource for MockFrameSource {
    fn shape(&self, detector: &str) -> Result<Vec<usize>> {
        self.with(detector, |d| Ok(vec![d.height as usize, d.width as usize]))
    }

    fn pixel_size_um(&self, detector: &str) -> Result<[f64; 3]> {
        self.with(detector, |d| Ok(d.pixel_size_um))
    }

    fn pull_frames(&self, detector: &str) -> Result<Vec<Frame>> {
        let acquiring = self.active_acquisitions() > 0;
        self.with(detector, |d| {
            d.pulls += 1;
            if let Some(message) = &d.fail_pulls {
                bail!("{}", message);
            }

            let mut frames = std::mem::take(&mut d.buffered);
            match d.mode {
                FeedMode::Scripted => {
                    if let Some(batch) = d.script.pop_front() {
                        frames.extend(batch);
                    }
                }
                FeedMode::FreeRunning { frames_per_pull } if acquiring => {
                    for _ in 0..frames_per_pull {
                        let frame = d.generate()?;
                        frames.push(frame);
                    }
                }
                FeedMode::Paced { frame_interval } if acquiring => {
                    let now = Instant::now();
                    let since = *d.paced_since.get_or_insert(now);
                    let interval = frame_interval.as_nanos().max(1);
                    let due = (now.duration_since(since).as_nanos() / interval) as u64;
                    if due > 0 {
                        d.paced_since = Some(since + frame_interval * due as u32);
                        if due > MAX_PACED_BATCH {
                            warn!(detector, due, "Paced detector fell behind, dropping frames");
                            d.paced_since = Some(now);
                        }
                        for _ in 0..due.min(MAX_PACED_BATCH) {
                            let frame = d.generate()?;
                            frames.push(frame);
                        }
                    }
                }
                FeedMode::FreeRunning { .. } | FeedMode::Paced { .. } => {
                    d.paced_since = None;
                }
            }
            if let Some(last) = frames.last() {
                d.latest = Some(last.clone());
            }
            Ok(frames)
        })
    }

    fn latest_frame(&self, detector: &str) -> Result<Frame> {
        self.with(detector, |d| {
            if d.mode == FeedMode::Scripted {
                if let Some(frame) = &d.latest {
                    return Ok(frame.clone());
                }
            }
            let frame = d.generate()?;
            d.latest = Some(frame.clone());
            Ok(frame)
        })
    }

    fn start_acquisition(&self) -> Result<AcquisitionHandle> {
        if let Some(message) = self.fail_start.lock().take() {
            warn!(%message, "Mock acquisition start failing on request");
            bail!("{}", message);
        }
        let latency = *self.start_latency.lock();
        if !latency.is_zero() {
            debug!(latency_ms = latency.as_millis() as u64, "Mock acquisition arming");
            std::thread::sleep(latency);
        }
        let handle = AcquisitionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let active = {
            let mut active = self.active.lock();
            active.insert(handle);
            active.len()
        };
        self.calls.lock().push(SourceCall::Start(handle));
        info!(handle = handle.0, active, "Mock acquisition started");
        Ok(handle)
    }

    fn stop_acquisition(&self, handle: AcquisitionHandle) -> Result<()> {
        if !self.active.lock().remove(&handle) {
            bail!("acquisition handle {} is not active", handle.0);
        }
        self.calls.lock().push(SourceCall::Stop(handle));
        info!(handle = handle.0, "Mock acquisition stopped");
        Ok(())
    }

    fn flush_buffers(&self, detector: &str) -> Result<()> {
        let dropped = self.with(detector, |d| Ok(std::mem::take(&mut d.buffered).len()))?;
        self.calls.lock().push(SourceCall::Flush(detector.to_string()));
        debug!(detector, dropped, "Flushed mock detector buffer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_batches_in_order() {
        let source = MockFrameSource::new().with_detector("cam0", 4, 2);
        source.script_batches("cam0", &[3, 0, 2]).unwrap();

        assert_eq!(source.pull_frames("cam0").unwrap().len(), 3);
        assert!(source.pull_frames("cam0").unwrap().is_empty());
        let last = source.pull_frames("cam0").unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].pixels()[0], 4);
        assert!(source.pull_frames("cam0").unwrap().is_empty());
        assert_eq!(source.pull_count("cam0"), 4);
    }

    #[test]
    fn test_flush_drops_buffered_frames_only() {
        let source = MockFrameSource::new().with_detector("cam0", 4, 2);
        source
            .push_frames("cam0", vec![Frame::zeros(4, 2), Frame::zeros(4, 2)])
            .unwrap();
        source.script_batches("cam0", &[1]).unwrap();

        source.flush_buffers("cam0").unwrap();
        assert_eq!(source.pull_frames("cam0").unwrap().len(), 1);
        assert_eq!(source.calls(), vec![SourceCall::Flush("cam0".into())]);
    }

    #[test]
    fn test_free_running_needs_acquisition() {
        let source = MockFrameSource::new().with_detector("cam0", 4, 2);
        source
            .set_mode("cam0", FeedMode::FreeRunning { frames_per_pull: 2 })
            .unwrap();
        assert!(source.pull_frames("cam0").unwrap().is_empty());

        let handle = source.start_acquisition().unwrap();
        assert_eq!(source.pull_frames("cam0").unwrap().len(), 2);
        source.stop_acquisition(handle).unwrap();
        assert_eq!(source.active_acquisitions(), 0);
        assert!(source.stop_acquisition(handle).is_err());
    }

    #[test]
    fn test_paced_frames_accrue_over_time() {
        let source = MockFrameSource::new().with_detector("cam0", 4, 2);
        source
            .set_mode(
                "cam0",
                FeedMode::Paced {
                    frame_interval: Duration::from_millis(5),
                },
            )
            .unwrap();
        let handle = source.start_acquisition().unwrap();
        assert!(source.pull_frames("cam0").unwrap().is_empty());
        std::thread::sleep(Duration::from_millis(30));
        let frames = source.pull_frames("cam0").unwrap();
        assert!(frames.len() >= 5, "got {} frames", frames.len());
        source.stop_acquisition(handle).unwrap();
    }

    #[test]
    fn test_shape_and_unknown_detector() {
        let source = MockFrameSource::new().with_detector("cam0", 640, 480);
        assert_eq!(source.shape("cam0").unwrap(), vec![480, 640]);
        assert!(source.shape("cam9").is_err());
        assert!(source.pull_frames("cam9").is_err());
    }

    #[test]
    fn test_failure_injection() {
        let source = MockFrameSource::new().with_detector("cam0", 4, 2);
        source.fail_next_start("no camera");
        assert!(source.start_acquisition().is_err());
        assert!(source.start_acquisition().is_ok());

        source.fail_pulls("cam0", "link lost").unwrap();
        let err = source.pull_frames("cam0").unwrap_err();
        assert!(err.to_string().contains("link lost"));
    }

    #[test]
    fn test_latest_frame_tracks_last_pull() {
        let source = MockFrameSource::new().with_detector("cam0", 4, 2);
        source.script_batches("cam0", &[2]).unwrap();
        let pulled = source.pull_frames("cam0").unwrap();
        assert_eq!(source.latest_frame("cam0").unwrap(), pulled[1]);
    }

    #[test]
    fn test_start_latency_delays_start() {
        let source = MockFrameSource::new().with_detector("cam0", 4, 2);
        source.set_start_latency(Duration::from_millis(30));
        let began = Instant::now();
        let handle = source.start_acquisition().unwrap();
        assert!(began.elapsed() >= Duration::from_millis(30));
        source.stop_acquisition(handle).unwrap();
    }
}
