//! CLI entry point for daq-recorder
//!
//! Drives the recording manager against simulated detectors:
//! - `record`: a frame-bounded, time-bounded or until-stopped recording
//! - `snap`: one frame per detector
//!
//! # Usage
//!
//! ```bash
//! daq-recorder record --frames 200 --detectors cam0,cam1 --format zarr --combine
//! daq-recorder record --seconds 2.5 --format tiff --prefix scans/run7
//! daq-recorder record --until-stop-after 10 --mode memory
//! daq-recorder snap --detectors cam0 --format hdf5
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use daq_driver_mock::{FeedMode, MockFrameSource};
use daq_recorder::config::RecorderConfig;
use daq_recorder::{
    logging, RecMode, RecordingEvent, RecordingManager, RecordingParams, SaveMode,
    SnapshotRequest,
};
use daq_storage::SaveFormat;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Parser)]
#[command(name = "daq-recorder")]
#[command(about = "Record detector frames to HDF5, Zarr or TIFF", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a frame stream
    Record {
        #[command(flatten)]
        bound: BoundArgs,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Capture one frame per detector
    Snap {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct BoundArgs {
    /// Frames per detector
    #[arg(long)]
    frames: Option<u64>,

    /// Recording duration in seconds
    #[arg(long)]
    seconds: Option<f64>,

    /// Record until stopped, stopping automatically after this many seconds
    #[arg(long)]
    until_stop_after: Option<f64>,
}

#[derive(Args)]
struct TargetArgs {
    /// Container format (hdf5, tiff, zarr); defaults to the configured one
    #[arg(long, value_parser = parse_format)]
    format: Option<SaveFormat>,

    /// Where frames go
    #[arg(long, value_enum, default_value_t = CliSaveMode::Disk)]
    mode: CliSaveMode,

    /// Simulated detectors, comma separated
    #[arg(long, value_delimiter = ',', default_value = "cam0")]
    detectors: Vec<String>,

    /// File name prefix, relative to the configured output directory
    #[arg(long, default_value = "recording")]
    prefix: PathBuf,

    /// Put every detector into one container
    #[arg(long)]
    combine: bool,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulated frame rate per detector
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Simulated frame size as WIDTHxHEIGHT
    #[arg(long, default_value = "640x480", value_parser = parse_size)]
    size: (u32, u32),
}

#[derive(Clone, Copy, ValueEnum)]
enum CliSaveMode {
    Disk,
    Memory,
    Both,
    Return,
}

impl From<CliSaveMode> for SaveMode {
    fn from(mode: CliSaveMode) -> Self {
        match mode {
            CliSaveMode::Disk => SaveMode::Disk,
            CliSaveMode::Memory => SaveMode::Memory,
            CliSaveMode::Both => SaveMode::DiskAndMemory,
            CliSaveMode::Return => SaveMode::ReturnInPlace,
        }
    }
}

fn parse_format(value: &str) -> Result<SaveFormat, String> {
    value.parse()
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let w = w.parse().map_err(|e| format!("invalid width: {}", e))?;
    let h = h.parse().map_err(|e| format!("invalid height: {}", e))?;
    Ok((w, h))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Record { bound, target } => record(bound, target).await,
        Commands::Snap { target } => snap(target).await,
    }
}

/// Load and validate configuration, then set up logging.
fn prepare(target: &TargetArgs) -> Result<(RecorderConfig, SaveFormat)> {
    let config = match &target.config {
        Some(path) => RecorderConfig::load_from(path),
        None => RecorderConfig::load(),
    }
    .context("failed to load configuration")?;
    config.validate().map_err(|e| anyhow!(e))?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    let format = match target.format {
        Some(format) => format,
        None => config.storage.default_format().map_err(|e| anyhow!(e))?,
    };
    Ok((config, format))
}

fn mock_source(target: &TargetArgs) -> Result<Arc<MockFrameSource>> {
    if target.fps <= 0.0 {
        return Err(anyhow!("--fps must be positive"));
    }
    let (width, height) = target.size;
    let source = MockFrameSource::new();
    for detector in &target.detectors {
        source.add_detector(detector.as_str(), width, height);
        source.set_mode(
            detector,
            FeedMode::Paced {
                frame_interval: Duration::from_secs_f64(1.0 / target.fps),
            },
        )?;
    }
    Ok(Arc::new(source))
}

async fn record(bound: BoundArgs, target: TargetArgs) -> Result<()> {
    let (config, format) = prepare(&target)?;
    let source = mock_source(&target)?;
    let manager = Arc::new(RecordingManager::new(source, config));
    let events = manager.subscribe();

    let (mode, stop_after) = match (bound.frames, bound.seconds, bound.until_stop_after) {
        (Some(_), _, _) => (RecMode::SpecFrames, None),
        (_, Some(_), _) => (RecMode::SpecTime, None),
        (_, _, Some(after)) => (RecMode::UntilStop, Some(Duration::from_secs_f64(after))),
        _ => return Err(anyhow!("one of --frames, --seconds or --until-stop-after is required")),
    };

    let mut builder = RecordingParams::builder(target.detectors.clone(), mode, target.prefix.clone())
        .save_mode(target.mode.into())
        .save_format(format)
        .combine_detectors(target.combine);
    if let Some(frames) = bound.frames {
        builder = builder.frame_bound(frames);
    }
    if let Some(seconds) = bound.seconds {
        builder = builder.duration_bound(Duration::from_secs_f64(seconds));
    }
    let params = builder.build()?;

    println!("⏺  Recording {} detector(s) as {} ({})", target.detectors.len(), format, mode);

    let starter = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || starter.start_recording(params)).await??;

    let mut printer = tokio::spawn(print_events(events));
    tokio::select! {
        result = &mut printer => {
            result?;
            return Ok(());
        }
        _ = wait_for_stop(stop_after) => {}
    }

    println!();
    println!("⏹  Stopping recording...");
    let stopper = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || stopper.stop_recording(true, true)).await??;
    printer.await?;
    Ok(())
}

/// Resolves after `after` elapses, or on Ctrl+C.
async fn wait_for_stop(after: Option<Duration>) {
    match after {
        Some(after) => {
            tokio::select! {
                _ = tokio::time::sleep(after) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

/// Print notifications until the session ends.
async fn print_events(mut events: broadcast::Receiver<RecordingEvent>) {
    loop {
        match events.recv().await {
            Ok(RecordingEvent::RecordingStarted) => println!("▶️  Recording started"),
            Ok(RecordingEvent::FrameProgress(0)) | Ok(RecordingEvent::DurationProgress(_)) => {}
            Ok(RecordingEvent::FrameProgress(frames)) => {
                print!("\r   {} frames", frames);
                let _ = std::io::stdout().flush();
            }
            Ok(RecordingEvent::RecordingSaved { path }) => {
                println!();
                println!("💾 Saved {}", path.display());
            }
            Ok(RecordingEvent::MemoryRecordingAvailable {
                name,
                path,
                saved_to_disk,
                ..
            }) => {
                println!();
                println!(
                    "🧠 {} held in memory at {} (also on disk: {})",
                    name,
                    path.display(),
                    saved_to_disk
                );
            }
            Ok(RecordingEvent::RecordingEnded) => {
                println!("✅ Recording finished");
                return;
            }
            Ok(RecordingEvent::RecordingFailed { error }) => {
                eprintln!();
                eprintln!("❌ Recording failed: {}", error);
                return;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event printer lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn snap(target: TargetArgs) -> Result<()> {
    let (config, format) = prepare(&target)?;
    let source = mock_source(&target)?;
    let manager = Arc::new(RecordingManager::new(source, config));
    let mut events = manager.subscribe();

    let request = SnapshotRequest::new(
        target.detectors.clone(),
        target.prefix.clone(),
        target.mode.into(),
        format,
    );
    let snapper = Arc::clone(&manager);
    let frames = tokio::task::spawn_blocking(move || snapper.capture_snapshot(&request)).await??;

    if let Some(frames) = frames {
        let mut names: Vec<_> = frames.keys().cloned().collect();
        names.sort();
        for name in names {
            if let Some(frame) = frames.get(&name) {
                println!(
                    "📷 {}: {}x{} mean {:.1}",
                    name,
                    frame.width,
                    frame.height,
                    frame.mean()
                );
            }
        }
        return Ok(());
    }

    while let Ok(event) = events.try_recv() {
        match event {
            RecordingEvent::SnapshotSaved { path } => println!("💾 Saved {}", path.display()),
            RecordingEvent::MemorySnapshotAvailable { name, path, .. } => {
                println!("🧠 {} held in memory at {}", name, path.display())
            }
            _ => {}
        }
    }
    Ok(())
}
