//! Container factory seam.
//!
//! The worker and the snapshot path never name a concrete writer. They ask a
//! [`ContainerFactory`] for a container of the session's format, which lets
//! tests substitute writers that only record what they were given.

use crate::error::RecordingResult;
use daq_storage::{
    open_container, Container, ContainerRequest, Destination, SavePathResolver, SaveFormat,
    StorageResult,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Opens containers for a [`SaveFormat`].
pub trait ContainerFactory: Send + Sync {
    /// Open (or, for append requests, reopen) a container at `request.path`.
    fn open(
        &self,
        format: SaveFormat,
        resolver: &SavePathResolver,
        request: ContainerRequest,
    ) -> StorageResult<Box<dyn Container>>;
}

/// The compiled-in storage writers.
#[derive(Debug, Default, Clone, Copy)]
pub struct StorageBackends;

impl ContainerFactory for StorageBackends {
    fn open(
        &self,
        format: SaveFormat,
        resolver: &SavePathResolver,
        request: ContainerRequest,
    ) -> StorageResult<Box<dyn Container>> {
        open_container(format, resolver, request)
    }
}

/// Everything needed to place and open containers for a session.
#[derive(Clone)]
pub(crate) struct StorageContext {
    pub(crate) factory: Arc<dyn ContainerFactory>,
    pub(crate) resolver: SavePathResolver,
    pub(crate) output_dir: PathBuf,
    pub(crate) tiff_size_limit: u64,
}

impl StorageContext {
    /// Save name placed under the output directory. Absolute names are kept.
    pub(crate) fn prefix(&self, save_name: &Path) -> PathBuf {
        self.output_dir.join(save_name)
    }

    /// Resolve a free path for `base` and open a container there.
    ///
    /// With `reopen`, an existing container at `base` is appended to
    /// instead of avoided.
    pub(crate) fn open(
        &self,
        format: SaveFormat,
        base: &Path,
        destination: Destination,
        reopen: bool,
    ) -> RecordingResult<Box<dyn Container>> {
        let path = if reopen {
            self.resolver
                .resolve(base, destination.writes_disk(), destination.keeps_memory())
        } else {
            self.resolver.resolve(base, false, false)
        };
        debug!(
            format = %format,
            path = %path.display(),
            reopen,
            "Opening container"
        );
        let request = ContainerRequest::new(path, destination)
            .with_base(base)
            .with_append(reopen)
            .with_size_limit(Some(self.tiff_size_limit));
        Ok(self.factory.open(format, &self.resolver, request)?)
    }
}

/// `{prefix}.{ext}`
pub(crate) fn combined_path(prefix: &Path, format: SaveFormat) -> PathBuf {
    let name = prefix.file_name().unwrap_or_default().to_string_lossy();
    prefix.with_file_name(format!("{}.{}", name, format.extension()))
}

/// `{prefix}_{detector}.{ext}`
pub(crate) fn detector_path(prefix: &Path, detector: &str, format: SaveFormat) -> PathBuf {
    let name = prefix.file_name().unwrap_or_default().to_string_lossy();
    prefix.with_file_name(format!("{}_{}.{}", name, detector, format.extension()))
}
