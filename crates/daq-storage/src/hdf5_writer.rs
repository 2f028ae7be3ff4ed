//! HDF5 recording.
//!
//! Each detector gets a `uint16` dataset of shape `(frames, rows, cols)`,
//! chunked one frame at a time and unlimited along the leading axis. HDF5
//! needs a non-empty initial extent to size its chunk index sensibly, so
//! datasets start with one placeholder row. Every append resizes the leading
//! axis to `len + n` and writes the new slab; a dataset that never received a
//! frame is resized to zero rows when finalized.
//!
//! Memory recordings use the HDF5 core driver. The file lives entirely in
//! memory while it is written and is backed by a private scratch file that is
//! only touched on flush, after which the image is copied into the
//! [`MemoryBuffer`] registered in the recordings table.
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_storage::{open_container, ContainerRequest, Destination, SaveFormat};
//!
//! let mut container = open_container(
//!     SaveFormat::Hdf5,
//!     &resolver,
//!     ContainerRequest::new("rec.hdf5", Destination::Disk),
//! )?;
//! let mut dataset = container.create_dataset(&spec)?;
//! dataset.append(&frames)?;
//! dataset.finalize()?;
//! drop(dataset);
//! container.close()?;
//! ```

use crate::error::{StorageError, StorageResult};
use crate::memory::{MemoryBuffer, MemoryRecording};
use crate::path_resolver::SavePathResolver;
use crate::writer::{
    check_frames, ensure_parent_dir, Container, ContainerRequest, DatasetSpec, DatasetWriter,
    Destination, RecordingOutput,
};
use daq_core::Frame;
use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File};
use ndarray::{s, ArrayView3};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Core-driver file image for memory recordings.
struct ScratchImage {
    _dir: TempDir,
    path: PathBuf,
    buffer: MemoryBuffer,
}

/// HDF5 file holding one dataset per detector.
pub struct Hdf5Container {
    path: PathBuf,
    file: File,
    destination: Destination,
    scratch: Option<ScratchImage>,
    resolver: SavePathResolver,
}

impl Hdf5Container {
    /// Create (or, in append mode, reopen) the HDF5 file for `request`.
    pub fn open(resolver: &SavePathResolver, request: ContainerRequest) -> StorageResult<Self> {
        let (file, scratch) = match request.destination {
            Destination::Disk | Destination::DiskAndMemory => {
                ensure_parent_dir(&request.path)?;
                let file = if request.append {
                    File::append(&request.path)?
                } else {
                    File::create_excl(&request.path)?
                };
                (file, None)
            }
            Destination::Memory => {
                let previous = if request.append {
                    resolver.memory().get(&request.path)
                } else {
                    None
                };
                let buffer = match previous {
                    Some(MemoryRecording::File(buffer)) => buffer,
                    #[cfg(feature = "storage_zarr")]
                    Some(MemoryRecording::Store(_)) => {
                        return Err(StorageError::MemoryKindMismatch(request.path))
                    }
                    None => MemoryBuffer::new(),
                };

                let dir = tempfile::tempdir()?;
                let scratch_path = dir.path().join("image.hdf5");
                if !buffer.is_empty() {
                    fs::write(&scratch_path, buffer.to_vec())?;
                }
                let file = File::with_options()
                    .with_fapl(|p| p.core_filebacked(true))
                    .append(&scratch_path)?;
                resolver
                    .memory()
                    .insert(&request.path, MemoryRecording::File(buffer.clone()));
                (
                    file,
                    Some(ScratchImage {
                        _dir: dir,
                        path: scratch_path,
                        buffer,
                    }),
                )
            }
        };

        debug!(path = %request.path.display(), append = request.append, "Opened HDF5 file");
        Ok(Self {
            path: request.path,
            file,
            destination: request.destination,
            scratch,
            resolver: resolver.clone(),
        })
    }
}

impl Container for Hdf5Container {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_dataset(&self, name: &str) -> bool {
        self.file.link_exists(name)
    }

    fn create_dataset(&mut self, spec: &DatasetSpec) -> StorageResult<Box<dyn DatasetWriter>> {
        spec.check_shape()?;
        if self.has_dataset(&spec.name) {
            return Err(StorageError::DatasetExists(spec.name.clone()));
        }

        let [rows, cols] = spec.shape;
        let dataset = self
            .file
            .new_dataset::<u16>()
            .chunk((1, rows, cols))
            .shape((1.., rows, cols))
            .create(spec.name.as_str())?;

        for (key, value) in spec.merged_attributes() {
            if let Err(e) = write_attribute(&dataset, &key, &value) {
                warn!(
                    dataset = %spec.name,
                    key = %key,
                    error = %e,
                    "Skipping attribute HDF5 cannot store"
                );
            }
        }

        Ok(Box::new(Hdf5Dataset {
            name: spec.name.clone(),
            shape: spec.shape,
            dataset,
            frames: 0,
        }))
    }

    fn close(self: Box<Self>) -> StorageResult<Vec<RecordingOutput>> {
        let Hdf5Container {
            path,
            file,
            destination,
            scratch,
            resolver,
        } = *self;
        file.flush()?;
        drop(file);

        let output = match (destination, scratch) {
            (Destination::Memory, Some(scratch)) => {
                scratch.buffer.replace(fs::read(&scratch.path)?);
                RecordingOutput {
                    path,
                    memory: Some(MemoryRecording::File(scratch.buffer)),
                    saved_to_disk: false,
                }
            }
            (Destination::DiskAndMemory, _) => {
                let recording = MemoryRecording::File(MemoryBuffer::from_bytes(fs::read(&path)?));
                resolver.memory().insert(&path, recording.clone());
                RecordingOutput {
                    path,
                    memory: Some(recording),
                    saved_to_disk: true,
                }
            }
            _ => RecordingOutput::disk(path),
        };
        Ok(vec![output])
    }
}

/// Resizable frame dataset for one detector.
pub struct Hdf5Dataset {
    name: String,
    shape: [usize; 2],
    dataset: Dataset,
    frames: u64,
}

impl DatasetWriter for Hdf5Dataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&mut self, frames: &[Frame]) -> StorageResult<()> {
        if frames.is_empty() {
            return Ok(());
        }
        check_frames(&self.name, self.shape, frames)?;

        let [rows, cols] = self.shape;
        let start = self.frames as usize;
        let end = start + frames.len();

        let mut slab = Vec::with_capacity(frames.len() * rows * cols);
        for frame in frames {
            slab.extend_from_slice(frame.pixels());
        }
        let view = ArrayView3::from_shape((frames.len(), rows, cols), &slab)
            .map_err(|e| StorageError::Hdf5(e.to_string()))?;

        self.dataset.resize((end, rows, cols))?;
        self.dataset.write_slice(view, s![start..end, .., ..])?;
        self.frames = end as u64;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.frames
    }

    fn finalize(&mut self) -> StorageResult<()> {
        if self.frames == 0 {
            let [rows, cols] = self.shape;
            self.dataset.resize((0, rows, cols))?;
            debug!(dataset = %self.name, "Trimmed placeholder row of empty dataset");
        }
        info!(dataset = %self.name, frames = self.frames, "Finalized HDF5 dataset");
        Ok(())
    }
}

/// Write one JSON attribute value onto `dataset`.
///
/// Booleans, numbers, strings and flat numeric arrays are supported.
fn write_attribute(dataset: &Dataset, key: &str, value: &Value) -> StorageResult<()> {
    match value {
        Value::Bool(b) => {
            dataset.new_attr::<bool>().create(key)?.write_scalar(b)?;
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                dataset.new_attr::<i64>().create(key)?.write_scalar(&i)?;
            } else if let Some(f) = n.as_f64() {
                dataset.new_attr::<f64>().create(key)?.write_scalar(&f)?;
            }
        }
        Value::String(text) => {
            let text: VarLenUnicode = text
                .parse()
                .map_err(|e| StorageError::Hdf5(format!("invalid string attribute: {}", e)))?;
            dataset
                .new_attr::<VarLenUnicode>()
                .create(key)?
                .write_scalar(&text)?;
        }
        Value::Array(items) => {
            let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
            match numbers {
                Some(numbers) if !numbers.is_empty() => {
                    dataset
                        .new_attr::<f64>()
                        .shape([numbers.len()])
                        .create(key)?
                        .write_raw(&numbers)?;
                }
                _ => {
                    return Err(StorageError::Hdf5(
                        "only non-empty numeric arrays are supported".into(),
                    ))
                }
            }
        }
        Value::Null | Value::Object(_) => {
            return Err(StorageError::Hdf5(format!(
                "unsupported attribute type for value {}",
                value
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRecordings;
    use crate::writer::{open_container, Attributes};
    use crate::SaveFormat;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn frame(seed: u16) -> Frame {
        Frame::from_u16(3, 2, (0..6).map(|i| i + seed * 10).collect()).unwrap()
    }

    fn spec(name: &str, attributes: Attributes) -> DatasetSpec {
        DatasetSpec {
            name: name.into(),
            detector: "cam0".into(),
            shape: [2, 3],
            pixel_size_um: [1.0, 0.65, 0.65],
            attributes,
        }
    }

    #[test]
    fn test_resize_and_fill() {
        let dir = TempDir::new().unwrap();
        let resolver = SavePathResolver::new(Arc::new(MemoryRecordings::new()));
        let path = dir.path().join("rec_cam0.hdf5");

        let mut container = open_container(
            SaveFormat::Hdf5,
            &resolver,
            ContainerRequest::new(&path, Destination::Disk),
        )
        .unwrap();
        let mut dataset = container
            .create_dataset(&spec("cam0", Attributes::new()))
            .unwrap();
        dataset.append(&[frame(0), frame(1), frame(2)]).unwrap();
        dataset.append(&[frame(3)]).unwrap();
        dataset.finalize().unwrap();
        drop(dataset);
        container.close().unwrap();

        let file = File::open(&path).unwrap();
        let ds = file.dataset("cam0").unwrap();
        assert_eq!(ds.shape(), vec![4, 2, 3]);
        let data: Vec<u16> = ds.read_raw().unwrap();
        let expected: Vec<u16> = (0..4).flat_map(|i| frame(i).into_pixels()).collect();
        assert_eq!(data, expected);

        let name: VarLenUnicode = ds.attr("detector_name").unwrap().read_scalar().unwrap();
        assert_eq!(name.as_str(), "cam0");
        let pixel: Vec<f64> = ds.attr("element_size_um").unwrap().read_raw().unwrap();
        assert_eq!(pixel, vec![1.0, 0.65, 0.65]);
    }

    #[test]
    fn test_zero_frames_truncates_placeholder() {
        let dir = TempDir::new().unwrap();
        let resolver = SavePathResolver::new(Arc::new(MemoryRecordings::new()));
        let path = dir.path().join("empty.hdf5");

        let mut container = open_container(
            SaveFormat::Hdf5,
            &resolver,
            ContainerRequest::new(&path, Destination::Disk),
        )
        .unwrap();
        let mut dataset = container
            .create_dataset(&spec("cam0", Attributes::new()))
            .unwrap();
        dataset.finalize().unwrap();
        drop(dataset);
        container.close().unwrap();

        let file = File::open(&path).unwrap();
        assert_eq!(file.dataset("cam0").unwrap().shape(), vec![0, 2, 3]);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_unsupported_attribute_is_skipped() {
        let dir = TempDir::new().unwrap();
        let resolver = SavePathResolver::new(Arc::new(MemoryRecordings::new()));
        let path = dir.path().join("attrs.hdf5");

        let mut attributes = Attributes::new();
        attributes.insert("gain".into(), Value::from(2));
        attributes.insert("nested".into(), serde_json::json!({"a": 1}));
        attributes.insert("comment".into(), Value::from("bead sample"));

        let mut container = open_container(
            SaveFormat::Hdf5,
            &resolver,
            ContainerRequest::new(&path, Destination::Disk),
        )
        .unwrap();
        let mut dataset = container.create_dataset(&spec("cam0", attributes)).unwrap();
        dataset.append(&[frame(1)]).unwrap();
        dataset.finalize().unwrap();
        drop(dataset);
        container.close().unwrap();

        let file = File::open(&path).unwrap();
        let ds = file.dataset("cam0").unwrap();
        let gain: i64 = ds.attr("gain").unwrap().read_scalar().unwrap();
        assert_eq!(gain, 2);
        assert!(ds.attr("nested").is_err());
        assert!(ds.attr("comment").is_ok());
        assert!(logs_contain("Skipping attribute"));
    }

    #[test]
    fn test_memory_image_matches_disk_file() {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(MemoryRecordings::new());
        let resolver = SavePathResolver::new(Arc::clone(&table));
        let path = dir.path().join("mem.hdf5");

        let mut container = open_container(
            SaveFormat::Hdf5,
            &resolver,
            ContainerRequest::new(&path, Destination::Memory),
        )
        .unwrap();
        assert!(table.contains(&path));
        let mut dataset = container
            .create_dataset(&spec("cam0", Attributes::new()))
            .unwrap();
        dataset.append(&[frame(5), frame(6)]).unwrap();
        dataset.finalize().unwrap();
        drop(dataset);
        let outputs = container.close().unwrap();
        assert!(!path.exists());

        let image = outputs[0].memory.as_ref().and_then(|m| m.as_buffer()).unwrap().to_vec();
        let copy = dir.path().join("copy.hdf5");
        fs::write(&copy, image).unwrap();
        let data: Vec<u16> = File::open(&copy)
            .unwrap()
            .dataset("cam0")
            .unwrap()
            .read_raw()
            .unwrap();
        let expected: Vec<u16> = [frame(5), frame(6)]
            .into_iter()
            .flat_map(Frame::into_pixels)
            .collect();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_append_mode_reopens_for_next_scan() {
        let dir = TempDir::new().unwrap();
        let resolver = SavePathResolver::new(Arc::new(MemoryRecordings::new()));
        let path = dir.path().join("lapse.hdf5");

        for scan in 0..2 {
            let mut container = open_container(
                SaveFormat::Hdf5,
                &resolver,
                ContainerRequest::new(&path, Destination::Disk).with_append(true),
            )
            .unwrap();
            let name = format!("cam0_scan{}", scan);
            assert!(!container.has_dataset(&name));
            let mut dataset = container
                .create_dataset(&spec(&name, Attributes::new()))
                .unwrap();
            dataset.append(&[frame(scan)]).unwrap();
            dataset.finalize().unwrap();
            drop(dataset);
            container.close().unwrap();
        }

        let file = File::open(&path).unwrap();
        assert!(file.link_exists("cam0_scan0"));
        assert!(file.link_exists("cam0_scan1"));
    }
}
