//! Recording worker thread.
//!
//! One worker runs per session on a dedicated thread named
//! `recording-worker`. It starts acquisition, opens the session's writers,
//! moves the session to running and announces it, reports back to the
//! starter over a one-shot handshake and then loops:
//!
//! - **Frame-bounded** ([`RecMode::SpecFrames`], [`RecMode::ScanOnce`],
//!   [`RecMode::ScanLapse`]): while running and any detector is below its
//!   bound, pull every unfinished detector in order and write at most the
//!   frames still missing. Progress is the smallest count across detectors.
//! - **Duration-bounded** ([`RecMode::SpecTime`]) and **until stop**
//!   ([`RecMode::UntilStop`]): pull and write every detector each pass. Once
//!   the duration elapsed or the running flag cleared, one more pass runs to
//!   pick up frames still in flight.
//!
//! A pass that found no frames sleeps for the poll interval. The running
//! flag is only checked between passes, so a stop request can take up to one
//! full pass to be observed.

use super::backend::StorageContext;
use super::events::{rounded_seconds, EventBus, RecordingEvent};
use super::params::{RecMode, RecordingParams};
use super::session::{DetectorTrack, SessionFiles};
use super::state::{RecordingState, SessionState};
use crate::error::{RecordingError, RecordingResult};
use daq_core::FrameSource;
use daq_storage::RecordingOutput;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything the worker thread owns.
pub(crate) struct WorkerContext {
    pub(crate) params: RecordingParams,
    pub(crate) source: Arc<dyn FrameSource>,
    pub(crate) storage: StorageContext,
    pub(crate) events: EventBus,
    pub(crate) state: Arc<SessionState>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) emit_on_end: Arc<AtomicBool>,
    pub(crate) poll_interval: Duration,
}

/// Puts the session back to idle even if the worker unwinds.
struct IdleOnExit(Arc<SessionState>);

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        if self.0.get() != RecordingState::Idle {
            self.0.reset();
        }
    }
}

/// Worker thread entry point.
pub(crate) fn run(ctx: WorkerContext, ready: SyncSender<RecordingResult<()>>) {
    let _idle = IdleOnExit(Arc::clone(&ctx.state));

    let handle = match ctx.source.start_acquisition() {
        Ok(handle) => handle,
        Err(e) => {
            let _ = ready.send(Err(RecordingError::Detector(
                e.context("failed to start acquisition"),
            )));
            return;
        }
    };

    let files = match SessionFiles::open(&ctx.params, ctx.source.as_ref(), &ctx.storage) {
        Ok(files) => files,
        Err(e) => {
            release_acquisition(&ctx, handle);
            let _ = ready.send(Err(e));
            return;
        }
    };

    if !ctx
        .state
        .advance(RecordingState::Starting, RecordingState::Running)
    {
        debug!("Stop requested while starting");
    }
    info!(
        mode = %ctx.params.mode(),
        format = %ctx.params.save_format(),
        detectors = ctx.params.detectors().len(),
        "Recording started"
    );
    ctx.events.emit(RecordingEvent::RecordingStarted);
    if ready.send(Ok(())).is_err() {
        warn!("Recording starter went away, stopping");
        ctx.running.store(false, Ordering::SeqCst);
    }

    let mut files = files;
    let outcome = match ctx.params.mode() {
        RecMode::SpecFrames | RecMode::ScanOnce | RecMode::ScanLapse => {
            let result = record_frame_bounded(&ctx, &mut files.tracks);
            ctx.events.emit(RecordingEvent::FrameProgress(0));
            result
        }
        RecMode::SpecTime => {
            let result = record_timed(&ctx, &mut files.tracks, ctx.params.duration_bound());
            ctx.events.emit(RecordingEvent::DurationProgress(0.0));
            result
        }
        RecMode::UntilStop => {
            let result = record_timed(&ctx, &mut files.tracks, None);
            ctx.events.emit(RecordingEvent::DurationProgress(0.0));
            result
        }
    };
    if let Err(e) = &outcome {
        error!(error = %e, "Recording loop failed, finalizing what was written");
    }

    if ctx
        .state
        .advance(RecordingState::Running, RecordingState::Stopping)
    {
        debug!("Recording loop done, finalizing");
    }
    let (outputs, finish_error) = files.finish();
    release_acquisition(&ctx, handle);
    publish_outputs(&ctx.events, outputs);

    ctx.state.reset();
    match outcome.err().or(finish_error) {
        Some(e) => ctx.events.emit(RecordingEvent::RecordingFailed {
            error: e.to_string(),
        }),
        None => {
            info!("Recording finished");
            if ctx.emit_on_end.load(Ordering::SeqCst) {
                ctx.events.emit(RecordingEvent::RecordingEnded);
            }
        }
    }
}

fn release_acquisition(ctx: &WorkerContext, handle: daq_core::AcquisitionHandle) {
    if let Err(e) = ctx.source.stop_acquisition(handle) {
        warn!(handle = handle.0, error = %e, "Failed to stop acquisition");
    }
}

fn record_frame_bounded(ctx: &WorkerContext, tracks: &mut [DetectorTrack]) -> RecordingResult<()> {
    let bound = ctx.params.frame_bound().ok_or_else(|| {
        RecordingError::Configuration("missing required bound: frame count".into())
    })?;

    while ctx.running.load(Ordering::SeqCst) && tracks.iter().any(|t| !t.complete) {
        let mut found = false;
        for i in 0..tracks.len() {
            let track = &mut tracks[i];
            if track.complete {
                continue;
            }
            let frames = ctx
                .source
                .pull_frames(&track.detector)
                .map_err(|e| RecordingError::detector(&track.detector, e))?;
            if frames.is_empty() {
                continue;
            }
            found = true;

            let missing = (bound - track.written) as usize;
            let take = missing.min(frames.len());
            if take < frames.len() {
                debug!(
                    detector = %track.detector,
                    dropped = frames.len() - take,
                    "Batch overshoots frame bound, writing prefix only"
                );
            }
            track.writer.append(&frames[..take])?;
            track.written += take as u64;
            if track.written >= bound {
                track.complete = true;
                info!(detector = %track.detector, frames = track.written, "Detector reached frame bound");
            }

            let progress = tracks.iter().map(|t| t.written).min().unwrap_or(0);
            ctx.events.emit(RecordingEvent::FrameProgress(progress));
        }
        if !found {
            thread::sleep(ctx.poll_interval);
        }
    }
    Ok(())
}

fn record_timed(
    ctx: &WorkerContext,
    tracks: &mut [DetectorTrack],
    duration: Option<Duration>,
) -> RecordingResult<()> {
    let started = Instant::now();
    let mut should_stop = false;

    loop {
        let mut found = false;
        for track in tracks.iter_mut() {
            let frames = ctx
                .source
                .pull_frames(&track.detector)
                .map_err(|e| RecordingError::detector(&track.detector, e))?;
            if frames.is_empty() {
                continue;
            }
            found = true;
            track.writer.append(&frames)?;
            track.written += frames.len() as u64;
            ctx.events
                .emit(RecordingEvent::DurationProgress(rounded_seconds(started.elapsed())));
        }

        if should_stop {
            break;
        }
        let elapsed = started.elapsed();
        if !ctx.running.load(Ordering::SeqCst) || duration.is_some_and(|d| elapsed >= d) {
            debug!(elapsed_s = elapsed.as_secs_f64(), "Recording bound reached, running final pass");
            should_stop = true;
        }
        if !found {
            thread::sleep(ctx.poll_interval);
        }
    }
    Ok(())
}

/// Announce every finished container.
fn publish_outputs(events: &EventBus, outputs: Vec<RecordingOutput>) {
    for output in outputs {
        match output.memory {
            Some(recording) => {
                let name = output
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                info!(path = %output.path.display(), saved_to_disk = output.saved_to_disk, "Recording available in memory");
                events.emit(RecordingEvent::MemoryRecordingAvailable {
                    name,
                    recording,
                    path: output.path,
                    saved_to_disk: output.saved_to_disk,
                });
            }
            None => {
                info!(path = %output.path.display(), "Recording saved");
                events.emit(RecordingEvent::RecordingSaved { path: output.path });
            }
        }
    }
}
