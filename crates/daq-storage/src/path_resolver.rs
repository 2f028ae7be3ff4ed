//! Collision-free save path resolution.
//!
//! Given a candidate path, the resolver appends `_1`, `_2`, ... before the
//! extension until the path is free both on disk and in the in-memory
//! recordings table. Either check can be waived, which is how repeated scans
//! re-open the same lapse file.

use crate::memory::MemoryRecordings;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolves save paths against the filesystem and a [`MemoryRecordings`] table.
#[derive(Debug, Clone)]
pub struct SavePathResolver {
    memory: Arc<MemoryRecordings>,
}

impl SavePathResolver {
    /// Create a resolver consulting `memory`.
    pub fn new(memory: Arc<MemoryRecordings>) -> Self {
        Self { memory }
    }

    /// The table this resolver consults.
    pub fn memory(&self) -> &Arc<MemoryRecordings> {
        &self.memory
    }

    /// First free path derived from `base`.
    ///
    /// `base` is returned untouched when it is free. The resolver only looks;
    /// it never creates the file.
    pub fn resolve(
        &self,
        base: &Path,
        allow_disk_overwrite: bool,
        allow_memory_overwrite: bool,
    ) -> PathBuf {
        let taken = |candidate: &Path| {
            (!allow_disk_overwrite && candidate.exists())
                || (!allow_memory_overwrite && self.memory.contains(candidate))
        };

        let mut candidate = base.to_path_buf();
        let mut suffix: u64 = 0;
        while taken(&candidate) {
            suffix += 1;
            candidate = with_numeric_suffix(base, suffix);
        }
        candidate
    }
}

/// `dir/name.ext` -> `dir/name_{n}.ext`.
fn with_numeric_suffix(base: &Path, n: u64) -> PathBuf {
    let mut name = base.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(format!("_{n}"));
    if let Some(ext) = base.extension() {
        name.push(".");
        name.push(ext);
    }
    base.with_file_name(name)
}
