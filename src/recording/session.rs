//! Containers and per-detector writers of one recording session.

use super::backend::{combined_path, detector_path, StorageContext};
use super::params::RecordingParams;
use crate::error::{RecordingError, RecordingResult};
use daq_core::capabilities::trailing_frame_shape;
use daq_core::FrameSource;
use daq_storage::{Container, DatasetSpec, DatasetWriter, RecordingOutput};
use tracing::{debug, error, info};

/// Write state of one detector, owned by the worker.
pub(crate) struct DetectorTrack {
    pub(crate) detector: String,
    pub(crate) writer: Box<dyn DatasetWriter>,
    pub(crate) written: u64,
    pub(crate) complete: bool,
}

/// Every container and dataset writer a session opened.
#[derive(Default)]
pub(crate) struct SessionFiles {
    pub(crate) containers: Vec<Box<dyn Container>>,
    pub(crate) tracks: Vec<DetectorTrack>,
}

impl SessionFiles {
    /// Open containers and create one dataset per detector, in detector order.
    ///
    /// In combine mode the first detector opens the container and the others
    /// add their datasets to it. Anything opened before a failure is closed
    /// again.
    pub(crate) fn open(
        params: &RecordingParams,
        source: &dyn FrameSource,
        storage: &StorageContext,
    ) -> RecordingResult<Self> {
        let mut files = SessionFiles::default();
        match files.populate(params, source, storage) {
            Ok(()) => Ok(files),
            Err(e) => {
                let (_, close_error) = files.finish();
                if let Some(close_error) = close_error {
                    debug!(error = %close_error, "Cleanup after failed open also failed");
                }
                Err(e)
            }
        }
    }

    fn populate(
        &mut self,
        params: &RecordingParams,
        source: &dyn FrameSource,
        storage: &StorageContext,
    ) -> RecordingResult<()> {
        let format = params.save_format();
        let destination = params.save_mode().destination().ok_or_else(|| {
            RecordingError::Configuration("recordings need a disk or memory save mode".into())
        })?;

        let shared = format.supports_shared_container();
        let combine = params.combine_detectors() && shared;
        let lapse = params.combine_lapse() && shared;
        if !shared && (params.combine_detectors() || params.combine_lapse()) {
            debug!(format = %format, "Format stores one detector per file, ignoring combine options");
        }

        let prefix = storage.prefix(params.save_name());
        for detector in params.detectors() {
            let shape = source
                .shape(detector)
                .map_err(|e| RecordingError::detector(detector, e))?;
            let pixel_size_um = source
                .pixel_size_um(detector)
                .map_err(|e| RecordingError::detector(detector, e))?;

            if !combine || self.containers.is_empty() {
                let base = if combine {
                    combined_path(&prefix, format)
                } else {
                    detector_path(&prefix, detector, format)
                };
                let container = storage.open(format, &base, destination, lapse)?;
                self.containers.push(container);
            }
            let container = match self.containers.last_mut() {
                Some(container) => container,
                None => {
                    return Err(RecordingError::WorkerUnavailable(
                        "no container available for dataset".into(),
                    ))
                }
            };

            let name = if lapse {
                next_scan_name(container.as_ref(), detector)
            } else {
                detector.clone()
            };
            let spec = DatasetSpec {
                name,
                detector: detector.clone(),
                shape: trailing_frame_shape(&shape),
                pixel_size_um,
                attributes: params.attributes_for(detector),
            };
            let writer = container.create_dataset(&spec)?;
            info!(
                detector = %detector,
                dataset = %spec.name,
                path = %container.path().display(),
                rows = spec.shape[0],
                cols = spec.shape[1],
                "Dataset created"
            );
            self.tracks.push(DetectorTrack {
                detector: detector.clone(),
                writer,
                written: 0,
                complete: false,
            });
        }
        Ok(())
    }

    /// Finalize every dataset, then close every container.
    ///
    /// Runs to the end even when a step fails; the first failure is returned
    /// next to the outputs of the containers that did close.
    pub(crate) fn finish(self) -> (Vec<RecordingOutput>, Option<RecordingError>) {
        let SessionFiles { containers, tracks } = self;
        let mut first_error = None;

        for mut track in tracks {
            match track.writer.finalize() {
                Ok(()) => debug!(
                    detector = %track.detector,
                    frames = track.writer.len(),
                    "Dataset finalized"
                ),
                Err(e) => {
                    error!(detector = %track.detector, error = %e, "Failed to finalize dataset");
                    first_error.get_or_insert(RecordingError::Storage(e));
                }
            }
        }

        let mut outputs = Vec::new();
        for container in containers {
            let path = container.path().to_path_buf();
            match container.close() {
                Ok(mut closed) => outputs.append(&mut closed),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to close container");
                    first_error.get_or_insert(RecordingError::Storage(e));
                }
            }
        }
        (outputs, first_error)
    }
}

/// `{detector}_scan{N}` with the smallest N not yet in `container`.
pub(crate) fn next_scan_name(container: &dyn Container, detector: &str) -> String {
    let mut scan = 0u64;
    loop {
        let name = format!("{}_scan{}", detector, scan);
        if !container.has_dataset(&name) {
            return name;
        }
        scan += 1;
    }
}
