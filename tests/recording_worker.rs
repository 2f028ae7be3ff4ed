//! Recording session lifecycle and worker loop behavior.
//!
//! Containers go to `RecordingWriterLog`, so these tests see exactly
//! which datasets the worker created and how many frames each append got.

mod common;

use common::{
    drain, events_until_end, frame_progress, logged_manager, wait_for, RecordingWriterLog,
};
use daq_core::Frame;
use daq_driver_mock::{FeedMode, MockFrameSource, SourceCall};
use daq_recorder::{
    RecMode, RecordingError, RecordingEvent, RecordingParams, RecordingState, SaveMode,
};
use daq_storage::SaveFormat;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

fn scripted(detectors: &[&str]) -> Arc<MockFrameSource> {
    let source = MockFrameSource::new();
    for detector in detectors {
        source.add_detector(*detector, 8, 4);
    }
    Arc::new(source)
}

fn until_stop(detectors: &[&str]) -> RecordingParams {
    RecordingParams::builder(detectors.iter().copied(), RecMode::UntilStop, "run")
        .build()
        .unwrap()
}

#[test]
fn test_frame_bound_writes_prefix_of_overshooting_batch() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source.script_batches("cam0", &[3, 4, 5]).unwrap();
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source.clone(), writers.clone(), dir.path());
    let mut events = manager.subscribe();

    let params = RecordingParams::builder(["cam0"], RecMode::SpecFrames, "run1")
        .frame_bound(10)
        .build()
        .unwrap();
    manager.start_recording(params).unwrap();
    let seen = events_until_end(&mut events, TIMEOUT);

    assert!(matches!(seen.first(), Some(RecordingEvent::RecordingStarted)));
    assert!(matches!(seen.last(), Some(RecordingEvent::RecordingEnded)));
    assert_eq!(frame_progress(&seen), vec![3, 7, 10, 0]);

    let log = writers.log();
    assert_eq!(log.appends["cam0"], vec![3, 4, 3]);
    assert_eq!(log.finalized["cam0"], 10);
    let expected = dir.path().join("run1_cam0.zarr");
    assert_eq!(log.opened, vec![(expected.clone(), false)]);
    assert_eq!(log.closed, vec![expected.clone()]);
    assert!(seen.iter().any(
        |e| matches!(e, RecordingEvent::RecordingSaved { path } if *path == expected)
    ));

    assert_eq!(manager.state(), RecordingState::Idle);
    assert_eq!(source.active_acquisitions(), 0);
}

#[test]
fn test_progress_reports_slowest_detector() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0", "cam1"]);
    source.script_batches("cam0", &[5]).unwrap();
    source.script_batches("cam1", &[0, 3]).unwrap();
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source, writers.clone(), dir.path());
    let mut events = manager.subscribe();

    let params = RecordingParams::builder(["cam0", "cam1"], RecMode::SpecFrames, "run")
        .frame_bound(3)
        .combine_detectors(true)
        .build()
        .unwrap();
    manager.start_recording(params).unwrap();
    let seen = events_until_end(&mut events, TIMEOUT);

    assert_eq!(frame_progress(&seen), vec![0, 3, 0]);

    let log = writers.log();
    let store = dir.path().join("run.zarr");
    assert_eq!(log.opened, vec![(store.clone(), false)]);
    assert_eq!(
        log.datasets,
        vec![(store.clone(), "cam0".to_string()), (store, "cam1".to_string())]
    );
    assert_eq!(log.appends["cam0"], vec![3]);
    assert_eq!(log.appends["cam1"], vec![3]);
}

#[test]
fn test_tiff_opens_one_file_per_detector_even_when_combining() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0", "cam1"]);
    source.script_batches("cam0", &[1]).unwrap();
    source.script_batches("cam1", &[1]).unwrap();
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source, writers.clone(), dir.path());
    let mut events = manager.subscribe();

    let params = RecordingParams::builder(["cam0", "cam1"], RecMode::ScanOnce, "run")
        .frame_bound(1)
        .save_format(SaveFormat::Tiff)
        .combine_detectors(true)
        .build()
        .unwrap();
    manager.start_recording(params).unwrap();
    events_until_end(&mut events, TIMEOUT);

    let opened: Vec<PathBuf> = writers.log().opened.into_iter().map(|(p, _)| p).collect();
    assert_eq!(
        opened,
        vec![
            dir.path().join("run_cam0.tiff"),
            dir.path().join("run_cam1.tiff")
        ]
    );
}

#[test]
fn test_lapse_scans_append_to_one_container() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source.script_batches("cam0", &[2, 2]).unwrap();
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source, writers.clone(), dir.path());
    let mut events = manager.subscribe();

    for _ in 0..2 {
        let params = RecordingParams::builder(["cam0"], RecMode::ScanLapse, "lapse")
            .frame_bound(2)
            .combine_lapse(true)
            .build()
            .unwrap();
        manager.start_recording(params).unwrap();
        events_until_end(&mut events, TIMEOUT);
    }

    let log = writers.log();
    let store = dir.path().join("lapse_cam0.zarr");
    assert_eq!(log.opened, vec![(store.clone(), true), (store.clone(), true)]);
    assert_eq!(
        log.datasets,
        vec![
            (store.clone(), "cam0_scan0".to_string()),
            (store, "cam0_scan1".to_string())
        ]
    );
}

#[test]
fn test_stop_without_frames_finalizes_empty_dataset() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source.clone(), writers.clone(), dir.path());
    let mut events = manager.subscribe();

    manager.start_recording(until_stop(&["cam0"])).unwrap();
    assert_eq!(manager.state(), RecordingState::Running);
    manager.stop_recording(true, true).unwrap();
    assert_eq!(manager.state(), RecordingState::Idle);

    let seen = drain(&mut events);
    assert!(matches!(seen.first(), Some(RecordingEvent::RecordingStarted)));
    assert!(seen
        .iter()
        .any(|e| matches!(e, RecordingEvent::DurationProgress(p) if *p == 0.0)));
    assert!(matches!(seen.last(), Some(RecordingEvent::RecordingEnded)));

    let log = writers.log();
    assert_eq!(log.finalized["cam0"], 0);
    assert!(!log.appends.contains_key("cam0"));
    assert_eq!(source.active_acquisitions(), 0);
}

#[test]
fn test_until_stop_writes_every_frame_pulled_before_stop() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source.script_batches("cam0", &[2, 2, 2]).unwrap();
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source.clone(), writers.clone(), dir.path());

    manager.start_recording(until_stop(&["cam0"])).unwrap();
    assert!(wait_for(TIMEOUT, || source.remaining_batches("cam0") == 0));
    manager.stop_recording(true, true).unwrap();

    assert_eq!(writers.log().finalized["cam0"], 6);
}

#[test]
fn test_spec_time_runs_for_duration_then_resets_progress() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source
        .set_mode(
            "cam0",
            FeedMode::Paced {
                frame_interval: Duration::from_millis(5),
            },
        )
        .unwrap();
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source, writers.clone(), dir.path());
    let mut events = manager.subscribe();

    let params = RecordingParams::builder(["cam0"], RecMode::SpecTime, "timed")
        .duration_bound(Duration::from_millis(80))
        .build()
        .unwrap();
    let started = Instant::now();
    manager.start_recording(params).unwrap();
    let seen = events_until_end(&mut events, TIMEOUT);
    assert!(started.elapsed() >= Duration::from_millis(80));

    let durations: Vec<f64> = seen
        .iter()
        .filter_map(|e| match e {
            RecordingEvent::DurationProgress(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert!(durations.len() >= 2, "{:?}", durations);
    assert_eq!(durations.last(), Some(&0.0));
    assert!(durations[..durations.len() - 1].iter().all(|s| *s >= 0.0));
    assert!(writers.log().finalized["cam0"] > 0);
}

#[test]
fn test_stop_with_wait_blocks_through_a_slow_start() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source.set_start_latency(Duration::from_millis(300));
    let writers = RecordingWriterLog::new();
    let manager = Arc::new(logged_manager(source.clone(), writers.clone(), dir.path()));

    let starter = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.start_recording(until_stop(&["cam0"])))
    };
    assert!(wait_for(TIMEOUT, || manager.state() == RecordingState::Starting));
    manager.stop_recording(true, true).unwrap();

    assert_eq!(writers.log().closed.len(), 1);
    assert_eq!(writers.log().finalized["cam0"], 0);
    assert_eq!(manager.state(), RecordingState::Idle);
    assert_eq!(source.active_acquisitions(), 0);
    starter.join().unwrap().unwrap();
}

#[test]
fn test_session_is_running_once_start_is_announced() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source.set_start_latency(Duration::from_millis(50));
    let manager = Arc::new(logged_manager(source, RecordingWriterLog::new(), dir.path()));
    let mut events = manager.subscribe();

    let starter = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.start_recording(until_stop(&["cam0"])))
    };
    assert!(wait_for(TIMEOUT, || matches!(
        events.try_recv(),
        Ok(RecordingEvent::RecordingStarted)
    )));
    assert_eq!(manager.state(), RecordingState::Running);

    starter.join().unwrap().unwrap();
    manager.stop_recording(true, true).unwrap();
}

#[test]
fn test_bounded_session_is_stopping_while_finalizing() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source.script_batches("cam0", &[2]).unwrap();
    let writers = RecordingWriterLog::with_close_delay(Duration::from_millis(300));
    let manager = logged_manager(source, writers.clone(), dir.path());
    let mut events = manager.subscribe();

    let params = RecordingParams::builder(["cam0"], RecMode::SpecFrames, "run")
        .frame_bound(2)
        .build()
        .unwrap();
    manager.start_recording(params).unwrap();
    assert!(wait_for(TIMEOUT, || manager.state() == RecordingState::Stopping));

    let seen = events_until_end(&mut events, TIMEOUT);
    assert!(matches!(seen.last(), Some(RecordingEvent::RecordingEnded)));
    assert!(wait_for(TIMEOUT, || manager.state() == RecordingState::Idle));
    assert_eq!(writers.log().closed.len(), 1);
}

#[test]
fn test_second_start_is_rejected_while_active() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    let manager = logged_manager(source, RecordingWriterLog::new(), dir.path());

    manager.start_recording(until_stop(&["cam0"])).unwrap();
    let err = manager.start_recording(until_stop(&["cam0"])).unwrap_err();
    assert!(matches!(err, RecordingError::AlreadyActive));
    assert!(manager.is_recording());

    manager.stop_recording(true, true).unwrap();
    assert!(!manager.is_recording());
}

#[test]
fn test_stop_when_idle_is_noop() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    let manager = logged_manager(source.clone(), RecordingWriterLog::new(), dir.path());
    let mut events = manager.subscribe();

    manager.stop_recording(true, true).unwrap();
    manager.stop_recording(true, false).unwrap();
    assert!(drain(&mut events).is_empty());
    assert!(source.calls().is_empty());
}

#[test]
fn test_failed_acquisition_start_leaves_session_idle() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source.fail_next_start("no trigger");
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source.clone(), writers.clone(), dir.path());
    let mut events = manager.subscribe();

    let err = manager.start_recording(until_stop(&["cam0"])).unwrap_err();
    assert!(matches!(err, RecordingError::Detector(_)));
    assert_eq!(manager.state(), RecordingState::Idle);
    assert!(drain(&mut events).is_empty());
    assert!(writers.log().opened.is_empty());

    // the failure is not sticky
    manager.start_recording(until_stop(&["cam0"])).unwrap();
    manager.stop_recording(true, true).unwrap();
}

#[test]
fn test_unknown_detector_is_rejected_before_acquisition() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    let manager = logged_manager(source.clone(), RecordingWriterLog::new(), dir.path());

    let err = manager
        .start_recording(until_stop(&["cam0", "cam7"]))
        .unwrap_err();
    assert!(matches!(err, RecordingError::Detector(_)));
    assert!(err.to_string().contains("cam7"));
    assert_eq!(manager.state(), RecordingState::Idle);
    assert_eq!(source.active_acquisitions(), 0);
}

#[test]
fn test_invalid_params_never_reach_the_worker() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    let manager = logged_manager(source.clone(), RecordingWriterLog::new(), dir.path());

    let err = RecordingParams::builder(["cam0"], RecMode::SpecFrames, "run")
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("missing required bound"));

    let err = RecordingParams::builder(["cam0"], RecMode::UntilStop, "run")
        .save_mode(SaveMode::ReturnInPlace)
        .build()
        .unwrap_err();
    assert!(matches!(err, RecordingError::Configuration(_)));

    assert!(source.calls().is_empty());
    assert_eq!(manager.state(), RecordingState::Idle);
}

#[test]
fn test_pull_failure_ends_session_with_failure_notice() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source.fail_pulls("cam0", "link lost").unwrap();
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source.clone(), writers.clone(), dir.path());
    let mut events = manager.subscribe();

    let params = RecordingParams::builder(["cam0"], RecMode::SpecFrames, "run")
        .frame_bound(5)
        .build()
        .unwrap();
    manager.start_recording(params).unwrap();
    let seen = events_until_end(&mut events, TIMEOUT);

    match seen.last() {
        Some(RecordingEvent::RecordingFailed { error }) => assert!(error.contains("cam0")),
        other => panic!("expected a failure notice, got {:?}", other),
    }
    assert!(!seen
        .iter()
        .any(|e| matches!(e, RecordingEvent::RecordingEnded)));

    // Writers are still closed and acquisition released
    assert_eq!(writers.log().closed.len(), 1);
    assert!(wait_for(TIMEOUT, || manager.state() == RecordingState::Idle));
    assert_eq!(source.active_acquisitions(), 0);
}

#[test]
fn test_stop_can_suppress_completion_notice() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    let manager = logged_manager(source, RecordingWriterLog::new(), dir.path());
    let mut events = manager.subscribe();

    manager.start_recording(until_stop(&["cam0"])).unwrap();
    manager.stop_recording(false, true).unwrap();

    let seen = drain(&mut events);
    assert!(seen
        .iter()
        .any(|e| matches!(e, RecordingEvent::RecordingSaved { .. })));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, RecordingEvent::RecordingEnded)));
}

#[test]
fn test_restart_after_stop_without_waiting() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source, writers.clone(), dir.path());
    let mut events = manager.subscribe();

    manager.start_recording(until_stop(&["cam0"])).unwrap();
    manager.stop_recording(true, false).unwrap();
    events_until_end(&mut events, TIMEOUT);
    assert!(wait_for(TIMEOUT, || !manager.is_recording()));

    manager.start_recording(until_stop(&["cam0"])).unwrap();
    manager.stop_recording(true, true).unwrap();

    let opened: Vec<PathBuf> = writers.log().opened.into_iter().map(|(p, _)| p).collect();
    assert_eq!(opened.len(), 2);
}

#[test]
fn test_stale_frames_are_flushed_before_acquisition() {
    let dir = TempDir::new().unwrap();
    let source = scripted(&["cam0"]);
    source
        .push_frames("cam0", vec![Frame::zeros(8, 4); 5])
        .unwrap();
    source.script_batches("cam0", &[2]).unwrap();
    let writers = RecordingWriterLog::new();
    let manager = logged_manager(source.clone(), writers.clone(), dir.path());
    let mut events = manager.subscribe();

    let params = RecordingParams::builder(["cam0"], RecMode::SpecFrames, "run")
        .frame_bound(2)
        .build()
        .unwrap();
    manager.start_recording(params).unwrap();
    events_until_end(&mut events, TIMEOUT);

    assert_eq!(writers.log().appends["cam0"], vec![2]);
    let calls = source.calls();
    assert_eq!(calls[0], SourceCall::Flush("cam0".into()));
    assert!(matches!(calls[1], SourceCall::Start(_)));
    assert!(matches!(calls.last(), Some(SourceCall::Stop(_))));
}
