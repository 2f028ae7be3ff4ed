//! Recording and snapshot requests.
//!
//! [`RecordingParams`] is built once, validated, and then moved into the
//! worker thread. Nothing can change it after dispatch.

use crate::error::{RecordingError, RecordingResult};
use daq_storage::{Attributes, Destination, SaveFormat};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// When a recording ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecMode {
    /// Fixed number of frames per detector.
    SpecFrames,
    /// Fixed wall-clock duration.
    SpecTime,
    /// Fixed number of frames for one scan.
    ScanOnce,
    /// Fixed number of frames per scan, repeated scans may share a file.
    ScanLapse,
    /// Until [`crate::RecordingManager::stop_recording`] is called.
    UntilStop,
}

impl RecMode {
    /// Whether the loop counts frames against a bound.
    pub fn is_frame_bounded(self) -> bool {
        matches!(self, RecMode::SpecFrames | RecMode::ScanOnce | RecMode::ScanLapse)
    }
}

impl fmt::Display for RecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecMode::SpecFrames => "spec_frames",
            RecMode::SpecTime => "spec_time",
            RecMode::ScanOnce => "scan_once",
            RecMode::ScanLapse => "scan_lapse",
            RecMode::UntilStop => "until_stop",
        };
        f.write_str(name)
    }
}

/// Where captured frames go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveMode {
    /// Files on disk.
    Disk,
    /// In-memory recordings table only.
    Memory,
    /// Disk, and a copy in the in-memory table.
    DiskAndMemory,
    /// Hand frames back to the caller without persisting. Snapshots only.
    ReturnInPlace,
}

impl SaveMode {
    /// Container destination, `None` for [`SaveMode::ReturnInPlace`].
    pub fn destination(self) -> Option<Destination> {
        match self {
            SaveMode::Disk => Some(Destination::Disk),
            SaveMode::Memory => Some(Destination::Memory),
            SaveMode::DiskAndMemory => Some(Destination::DiskAndMemory),
            SaveMode::ReturnInPlace => None,
        }
    }
}

/// Immutable description of one recording session.
#[derive(Debug, Clone)]
pub struct RecordingParams {
    detectors: Vec<String>,
    mode: RecMode,
    save_name: PathBuf,
    save_mode: SaveMode,
    save_format: SaveFormat,
    attributes: HashMap<String, Attributes>,
    combine_detectors: bool,
    combine_lapse: bool,
    frame_bound: Option<u64>,
    duration_bound: Option<Duration>,
}

impl RecordingParams {
    /// Start building parameters for `detectors`, serviced in the given order.
    pub fn builder<I, S>(detectors: I, mode: RecMode, save_name: impl Into<PathBuf>) -> RecordingParamsBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RecordingParamsBuilder {
            params: RecordingParams {
                detectors: detectors.into_iter().map(Into::into).collect(),
                mode,
                save_name: save_name.into(),
                save_mode: SaveMode::Disk,
                save_format: SaveFormat::Zarr,
                attributes: HashMap::new(),
                combine_detectors: false,
                combine_lapse: false,
                frame_bound: None,
                duration_bound: None,
            },
        }
    }

    /// Detectors in service order.
    pub fn detectors(&self) -> &[String] {
        &self.detectors
    }

    /// Termination mode.
    pub fn mode(&self) -> RecMode {
        self.mode
    }

    /// File name prefix, optionally with directories.
    pub fn save_name(&self) -> &Path {
        &self.save_name
    }

    /// Save mode.
    pub fn save_mode(&self) -> SaveMode {
        self.save_mode
    }

    /// Container format.
    pub fn save_format(&self) -> SaveFormat {
        self.save_format
    }

    /// Caller metadata for `detector`.
    pub fn attributes_for(&self, detector: &str) -> Attributes {
        self.attributes.get(detector).cloned().unwrap_or_default()
    }

    /// Whether all detectors share one container.
    pub fn combine_detectors(&self) -> bool {
        self.combine_detectors
    }

    /// Whether repeated lapse scans append to the same container.
    pub fn combine_lapse(&self) -> bool {
        self.combine_lapse && self.mode == RecMode::ScanLapse
    }

    /// Frames per detector for frame-bounded modes.
    pub fn frame_bound(&self) -> Option<u64> {
        self.frame_bound
    }

    /// Duration of a [`RecMode::SpecTime`] recording.
    pub fn duration_bound(&self) -> Option<Duration> {
        self.duration_bound
    }

    /// Reject requests that cannot be recorded.
    pub fn validate(&self) -> RecordingResult<()> {
        if self.detectors.is_empty() {
            return Err(RecordingError::Configuration(
                "no detectors selected for recording".into(),
            ));
        }
        let mut seen = HashSet::new();
        for detector in &self.detectors {
            if !seen.insert(detector.as_str()) {
                return Err(RecordingError::Configuration(format!(
                    "detector '{}' listed more than once",
                    detector
                )));
            }
        }

        if self.mode.is_frame_bounded() {
            match self.frame_bound {
                None => {
                    return Err(RecordingError::Configuration(format!(
                        "missing required bound: mode {} needs a frame count",
                        self.mode
                    )))
                }
                Some(0) => {
                    return Err(RecordingError::Configuration(
                        "frame bound must be at least 1".into(),
                    ))
                }
                Some(_) => {}
            }
        }
        if self.mode == RecMode::SpecTime {
            match self.duration_bound {
                None => {
                    return Err(RecordingError::Configuration(
                        "missing required bound: mode spec_time needs a duration".into(),
                    ))
                }
                Some(d) if d.is_zero() => {
                    return Err(RecordingError::Configuration(
                        "duration bound must be positive".into(),
                    ))
                }
                Some(_) => {}
            }
        }

        validate_target(&self.save_name, self.save_format)?;
        if self.save_mode == SaveMode::ReturnInPlace {
            return Err(RecordingError::Configuration(
                "recordings cannot be returned in place, choose disk or memory".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`RecordingParams`].
#[derive(Debug, Clone)]
pub struct RecordingParamsBuilder {
    params: RecordingParams,
}

impl RecordingParamsBuilder {
    /// Set the save mode.
    pub fn save_mode(mut self, save_mode: SaveMode) -> Self {
        self.params.save_mode = save_mode;
        self
    }

    /// Set the container format.
    pub fn save_format(mut self, save_format: SaveFormat) -> Self {
        self.params.save_format = save_format;
        self
    }

    /// Attach caller metadata to `detector`'s dataset.
    pub fn attributes(mut self, detector: impl Into<String>, attributes: Attributes) -> Self {
        self.params.attributes.insert(detector.into(), attributes);
        self
    }

    /// Write every detector into one container.
    pub fn combine_detectors(mut self, combine: bool) -> Self {
        self.params.combine_detectors = combine;
        self
    }

    /// Append repeated lapse scans to the same container.
    pub fn combine_lapse(mut self, combine: bool) -> Self {
        self.params.combine_lapse = combine;
        self
    }

    /// Frames per detector.
    pub fn frame_bound(mut self, frames: u64) -> Self {
        self.params.frame_bound = Some(frames);
        self
    }

    /// Recording duration.
    pub fn duration_bound(mut self, duration: Duration) -> Self {
        self.params.duration_bound = Some(duration);
        self
    }

    /// Validate and freeze the parameters.
    pub fn build(self) -> RecordingResult<RecordingParams> {
        self.params.validate()?;
        Ok(self.params)
    }
}

/// A single-frame capture request.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    /// Detectors to capture from
    pub detectors: Vec<String>,
    /// File name prefix, optionally with directories
    pub save_name: PathBuf,
    /// Save mode, [`SaveMode::ReturnInPlace`] returns frames to the caller
    pub save_mode: SaveMode,
    /// Container format
    pub save_format: SaveFormat,
    /// Caller metadata per detector
    pub attributes: HashMap<String, Attributes>,
}

impl SnapshotRequest {
    /// Request for `detectors` saved under `save_name` with the given mode and format.
    pub fn new<I, S>(
        detectors: I,
        save_name: impl Into<PathBuf>,
        save_mode: SaveMode,
        save_format: SaveFormat,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            detectors: detectors.into_iter().map(Into::into).collect(),
            save_name: save_name.into(),
            save_mode,
            save_format,
            attributes: HashMap::new(),
        }
    }

    /// Attach caller metadata to `detector`'s dataset.
    pub fn with_attributes(mut self, detector: impl Into<String>, attributes: Attributes) -> Self {
        self.attributes.insert(detector.into(), attributes);
        self
    }

    pub(crate) fn validate(&self) -> RecordingResult<()> {
        if self.detectors.is_empty() {
            return Err(RecordingError::Configuration(
                "no detectors selected for snapshot".into(),
            ));
        }
        if self.save_mode == SaveMode::ReturnInPlace {
            return Ok(());
        }
        validate_target(&self.save_name, self.save_format)
    }
}

/// Checks shared by recordings and snapshots that persist frames.
pub(crate) fn validate_target(save_name: &Path, format: SaveFormat) -> RecordingResult<()> {
    if save_name.file_name().is_none() {
        return Err(RecordingError::Configuration(format!(
            "save name '{}' has no file name",
            save_name.display()
        )));
    }
    if !format.is_enabled() {
        return Err(RecordingError::Configuration(format!(
            "save format {} is not available, rebuild with --features {}",
            format,
            format.feature()
        )));
    }
    Ok(())
}
