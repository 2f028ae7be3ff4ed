//! Multi-page TIFF recording.
//!
//! Every detector gets its own file; each frame becomes one 16-bit grayscale
//! page. The file is created by the first append, so a detector that never
//! delivers a frame leaves nothing behind.
//!
//! Classic TIFF addresses at most 4 GiB. Before each page is written the
//! writer checks whether it would push the file past the ceiling; if so the
//! current file is closed as-is, a new collision-free path is resolved from
//! the same base name, and writing continues there. Pages already written
//! are never touched again.
//!
//! Caller attributes are stored as JSON in the `ImageDescription` tag of the
//! first page of each file.

use crate::error::{StorageError, StorageResult};
use crate::format::TIFF_SIZE_CEILING;
use crate::memory::{MemoryBuffer, MemoryCursor, MemoryRecording};
use crate::path_resolver::SavePathResolver;
use crate::writer::{
    check_frames, ensure_parent_dir, Container, ContainerRequest, DatasetSpec, DatasetWriter,
    Destination, RecordingOutput,
};
use daq_core::Frame;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tracing::{debug, info, warn};

/// Bytes of TIFF header.
const HEADER_BYTES: u64 = 8;

/// Fixed per-page directory cost, before strip tables.
const PAGE_DIRECTORY_BYTES: u64 = 512;

/// Upper bound on the on-disk size of one page holding `frame`.
fn page_cost(frame: &Frame) -> u64 {
    let payload = frame.byte_len();
    // Strip offset and byte-count tables cost 8 bytes per strip of at least 1 KiB.
    payload + PAGE_DIRECTORY_BYTES + payload / 1024 + 8
}

enum Sink {
    File(File),
    Memory(MemoryCursor),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::File(file) => file.write(buf),
            Sink::Memory(cursor) => cursor.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(file) => file.flush(),
            Sink::Memory(cursor) => cursor.flush(),
        }
    }
}

impl Seek for Sink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Sink::File(file) => file.seek(pos),
            Sink::Memory(cursor) => cursor.seek(pos),
        }
    }
}

/// One physical TIFF file being written.
struct TiffPart {
    path: PathBuf,
    encoder: TiffEncoder<Sink>,
    memory: Option<MemoryBuffer>,
    estimated_bytes: u64,
    pages: u64,
}

/// Container for one detector's TIFF stack.
pub struct TiffContainer {
    path: PathBuf,
    pending: Option<TiffStackWriter>,
    outputs: Arc<Mutex<Vec<RecordingOutput>>>,
}

impl TiffContainer {
    /// Prepare a TIFF container; the file itself is created lazily.
    pub fn open(resolver: &SavePathResolver, request: ContainerRequest) -> StorageResult<Self> {
        if request.append {
            debug!(path = %request.path.display(), "TIFF recordings cannot be reopened, writing a new file");
        }
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let writer = TiffStackWriter {
            name: String::new(),
            shape: [0, 0],
            description: String::new(),
            next_path: Some(request.path.clone()),
            base: request.base,
            destination: request.destination,
            size_limit: request.size_limit.unwrap_or(TIFF_SIZE_CEILING),
            resolver: resolver.clone(),
            part: None,
            frames: 0,
            outputs: Arc::clone(&outputs),
        };
        Ok(Self {
            path: request.path,
            pending: Some(writer),
            outputs,
        })
    }
}

impl Container for TiffContainer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_dataset(&self, _name: &str) -> bool {
        self.pending.is_none()
    }

    fn create_dataset(&mut self, spec: &DatasetSpec) -> StorageResult<Box<dyn DatasetWriter>> {
        spec.check_shape()?;
        let mut writer = self
            .pending
            .take()
            .ok_or_else(|| StorageError::SingleDataset(self.path.clone()))?;
        writer.name = spec.name.clone();
        writer.shape = spec.shape;
        writer.description = serde_json::Value::Object(spec.merged_attributes().into_iter().collect())
            .to_string();
        Ok(Box::new(writer))
    }

    fn close(self: Box<Self>) -> StorageResult<Vec<RecordingOutput>> {
        let outputs = std::mem::take(&mut *self.outputs.lock());
        if outputs.is_empty() {
            debug!(path = %self.path.display(), "No TIFF pages written");
        }
        Ok(outputs)
    }
}

/// Appends frames as pages, rolling over to new files at the size ceiling.
pub struct TiffStackWriter {
    name: String,
    shape: [usize; 2],
    description: String,
    next_path: Option<PathBuf>,
    base: PathBuf,
    destination: Destination,
    size_limit: u64,
    resolver: SavePathResolver,
    part: Option<TiffPart>,
    frames: u64,
    outputs: Arc<Mutex<Vec<RecordingOutput>>>,
}

impl TiffStackWriter {
    fn start_part(&mut self) -> StorageResult<TiffPart> {
        let path = match self.next_path.take() {
            Some(path) => path,
            None => self.resolver.resolve(&self.base, false, false),
        };

        let (sink, memory) = match self.destination {
            Destination::Memory => {
                let buffer = MemoryBuffer::new();
                self.resolver
                    .memory()
                    .insert(&path, MemoryRecording::File(buffer.clone()));
                (Sink::Memory(buffer.cursor()), Some(buffer))
            }
            Destination::Disk | Destination::DiskAndMemory => {
                ensure_parent_dir(&path)?;
                let file = File::options().write(true).create_new(true).open(&path)?;
                (Sink::File(file), None)
            }
        };

        debug!(dataset = %self.name, path = %path.display(), "Opened TIFF file");
        Ok(TiffPart {
            path,
            encoder: TiffEncoder::new(sink)?,
            memory,
            estimated_bytes: HEADER_BYTES,
            pages: 0,
        })
    }

    fn finish_part(&mut self) -> StorageResult<()> {
        let Some(part) = self.part.take() else {
            return Ok(());
        };
        let TiffPart {
            path,
            encoder,
            memory,
            pages,
            ..
        } = part;
        drop(encoder);

        let output = match self.destination {
            Destination::Disk => RecordingOutput::disk(path),
            Destination::Memory => RecordingOutput {
                path,
                memory: memory.map(MemoryRecording::File),
                saved_to_disk: false,
            },
            Destination::DiskAndMemory => {
                let recording = MemoryRecording::File(MemoryBuffer::from_bytes(fs::read(&path)?));
                self.resolver.memory().insert(&path, recording.clone());
                RecordingOutput {
                    path,
                    memory: Some(recording),
                    saved_to_disk: true,
                }
            }
        };
        debug!(dataset = %self.name, path = %output.path.display(), pages, "Closed TIFF file");
        self.outputs.lock().push(output);
        Ok(())
    }

    fn write_page(&mut self, frame: &Frame) -> StorageResult<()> {
        let cost = page_cost(frame);
        let over_ceiling = self
            .part
            .as_ref()
            .is_some_and(|part| part.pages > 0 && part.estimated_bytes + cost > self.size_limit);
        if over_ceiling {
            let full = self.part.as_ref().map(|p| p.path.clone()).unwrap_or_default();
            self.finish_part()?;
            warn!(
                dataset = %self.name,
                path = %full.display(),
                limit = self.size_limit,
                "TIFF file reached its size ceiling, continuing in a new file"
            );
        }

        let mut part = match self.part.take() {
            Some(part) => part,
            None => self.start_part()?,
        };

        let description = (part.pages == 0 && !self.description.is_empty())
            .then_some(self.description.as_str());
        let written = encode_page(&mut part.encoder, frame, description);

        part.pages += 1;
        part.estimated_bytes += cost;
        self.part = Some(part);
        written
    }
}

fn encode_page(
    encoder: &mut TiffEncoder<Sink>,
    frame: &Frame,
    description: Option<&str>,
) -> StorageResult<()> {
    let mut image = encoder.new_image::<colortype::Gray16>(frame.width, frame.height)?;
    if let Some(description) = description {
        image.encoder().write_tag(Tag::ImageDescription, description)?;
    }
    image.write_data(frame.pixels())?;
    Ok(())
}

impl DatasetWriter for TiffStackWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&mut self, frames: &[Frame]) -> StorageResult<()> {
        check_frames(&self.name, self.shape, frames)?;
        for frame in frames {
            self.write_page(frame)?;
            self.frames += 1;
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        self.frames
    }

    fn finalize(&mut self) -> StorageResult<()> {
        if self.part.is_some() {
            info!(dataset = %self.name, frames = self.frames, "Finalized TIFF stack");
        }
        self.finish_part()
    }
}
