//! Single-frame captures.
//!
//! Snapshots run on the caller's thread and write through the same
//! container and dataset writers as recordings. HDF5 and TIFF snapshots get
//! one `{prefix}_{detector}` file per detector (the HDF5 dataset is named
//! `data`); Zarr snapshots share one `{prefix}.zarr` store with an array per
//! detector.

use super::backend::{combined_path, detector_path, StorageContext};
use super::events::{EventBus, RecordingEvent};
use super::params::SnapshotRequest;
use crate::error::{RecordingError, RecordingResult};
use daq_core::{Frame, FrameSource};
use daq_storage::{Attributes, Container, DatasetSpec, Destination, SaveFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Dataset name used for single-detector snapshot files.
pub const SNAPSHOT_DATASET: &str = "data";

/// Shared collaborators of a snapshot.
pub(crate) struct Snapshotter<'a> {
    pub(crate) source: &'a dyn FrameSource,
    pub(crate) storage: &'a StorageContext,
    pub(crate) events: &'a EventBus,
}

impl Snapshotter<'_> {
    /// Start acquisition, grab the latest frame of each detector, then either
    /// return the frames or save them. Acquisition is stopped on every path.
    pub(crate) fn capture(
        &self,
        request: &SnapshotRequest,
    ) -> RecordingResult<Option<HashMap<String, Frame>>> {
        request.validate()?;

        let handle = self
            .source
            .start_acquisition()
            .map_err(|e| RecordingError::Detector(e.context("failed to start acquisition")))?;
        let result = self.capture_started(request);
        if let Err(e) = self.source.stop_acquisition(handle) {
            warn!(handle = handle.0, error = %e, "Failed to stop acquisition after snapshot");
        }
        result
    }

    fn capture_started(
        &self,
        request: &SnapshotRequest,
    ) -> RecordingResult<Option<HashMap<String, Frame>>> {
        let mut frames = Vec::with_capacity(request.detectors.len());
        for detector in &request.detectors {
            let frame = self
                .source
                .latest_frame(detector)
                .map_err(|e| RecordingError::detector(detector, e))?;
            frames.push((detector.clone(), frame));
        }

        let Some(destination) = request.save_mode.destination() else {
            debug!(detectors = frames.len(), "Returning snapshot in place");
            return Ok(Some(frames.into_iter().collect()));
        };
        self.write(
            &request.save_name,
            destination,
            request.save_format,
            &frames,
            &request.attributes,
        )?;
        Ok(None)
    }

    /// Persist `frames` as one-frame datasets and announce the results.
    ///
    /// Returns the resolved path of every container written.
    pub(crate) fn write(
        &self,
        save_name: &Path,
        destination: Destination,
        format: SaveFormat,
        frames: &[(String, Frame)],
        attributes: &HashMap<String, Attributes>,
    ) -> RecordingResult<Vec<PathBuf>> {
        let prefix = self.storage.prefix(save_name);
        let shared = format == SaveFormat::Zarr;
        let stem = prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut containers: Vec<(Box<dyn Container>, Vec<usize>)> = Vec::new();
        for (index, (detector, frame)) in frames.iter().enumerate() {
            if !shared || containers.is_empty() {
                let base = if shared {
                    combined_path(&prefix, format)
                } else {
                    detector_path(&prefix, detector, format)
                };
                let container = self.storage.open(format, &base, destination, false)?;
                containers.push((container, Vec::new()));
            }
            let Some((container, members)) = containers.last_mut() else {
                continue;
            };

            let spec = DatasetSpec {
                name: if shared {
                    detector.clone()
                } else {
                    SNAPSHOT_DATASET.to_string()
                },
                detector: detector.clone(),
                shape: frame.shape(),
                pixel_size_um: self
                    .source
                    .pixel_size_um(detector)
                    .map_err(|e| RecordingError::detector(detector, e))?,
                attributes: attributes.get(detector).cloned().unwrap_or_default(),
            };
            let mut writer = container.create_dataset(&spec)?;
            writer.append(std::slice::from_ref(frame))?;
            writer.finalize()?;
            members.push(index);
        }

        let mut paths = Vec::new();
        for (container, members) in containers {
            for output in container.close()? {
                match &output.memory {
                    Some(_) => {
                        for &index in &members {
                            let (detector, frame) = &frames[index];
                            self.events.emit(RecordingEvent::MemorySnapshotAvailable {
                                name: format!("{}_{}", stem, detector),
                                frame: frame.clone(),
                                path: output.path.clone(),
                                saved_to_disk: output.saved_to_disk,
                            });
                        }
                    }
                    None => self.events.emit(RecordingEvent::SnapshotSaved {
                        path: output.path.clone(),
                    }),
                }
                info!(path = %output.path.display(), saved_to_disk = output.saved_to_disk, "Snapshot written");
                paths.push(output.path);
            }
        }
        Ok(paths)
    }
}
