//! Save formats and their capability profiles.

use std::fmt;
use std::str::FromStr;

/// Size ceiling of a classic (32-bit offset) TIFF file.
pub const TIFF_SIZE_CEILING: u64 = 4 * 1024 * 1024 * 1024;

/// Container format a recording or snapshot is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveFormat {
    /// Resizable multidimensional datasets inside an HDF5 file.
    Hdf5,
    /// Flat multi-page TIFF, one file per detector.
    Tiff,
    /// Chunked Zarr v3 store, one array per detector.
    Zarr,
}

/// Fixed growth capabilities of a [`SaveFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityProfile {
    /// Frames can be appended without resizing a pre-sized dataset.
    pub supports_true_append: bool,
    /// The dataset is created with one frame row before any data arrives.
    pub requires_placeholder_row: bool,
    /// Frames are appended as pages to a flat file.
    pub supports_multipage_append: bool,
    /// Largest file the format can address, if bounded.
    pub size_ceiling: Option<u64>,
}

impl SaveFormat {
    /// All formats, in display order.
    pub const ALL: [SaveFormat; 3] = [SaveFormat::Hdf5, SaveFormat::Tiff, SaveFormat::Zarr];

    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            SaveFormat::Hdf5 => "hdf5",
            SaveFormat::Tiff => "tiff",
            SaveFormat::Zarr => "zarr",
        }
    }

    /// Cargo feature that compiles the writer for this format.
    pub fn feature(self) -> &'static str {
        match self {
            SaveFormat::Hdf5 => "storage_hdf5",
            SaveFormat::Tiff => "storage_tiff",
            SaveFormat::Zarr => "storage_zarr",
        }
    }

    /// Whether the writer for this format was compiled in.
    pub fn is_enabled(self) -> bool {
        match self {
            SaveFormat::Hdf5 => cfg!(feature = "storage_hdf5"),
            SaveFormat::Tiff => cfg!(feature = "storage_tiff"),
            SaveFormat::Zarr => cfg!(feature = "storage_zarr"),
        }
    }

    /// Whether several datasets can share one container.
    pub fn supports_shared_container(self) -> bool {
        !matches!(self, SaveFormat::Tiff)
    }

    /// Capability profile of this format.
    pub fn capabilities(self) -> CapabilityProfile {
        match self {
            SaveFormat::Zarr => CapabilityProfile {
                supports_true_append: true,
                requires_placeholder_row: true,
                supports_multipage_append: false,
                size_ceiling: None,
            },
            SaveFormat::Hdf5 => CapabilityProfile {
                supports_true_append: false,
                requires_placeholder_row: true,
                supports_multipage_append: false,
                size_ceiling: None,
            },
            SaveFormat::Tiff => CapabilityProfile {
                supports_true_append: false,
                requires_placeholder_row: false,
                supports_multipage_append: true,
                size_ceiling: Some(TIFF_SIZE_CEILING),
            },
        }
    }
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for SaveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hdf5" | "h5" => Ok(SaveFormat::Hdf5),
            "tiff" | "tif" => Ok(SaveFormat::Tiff),
            "zarr" => Ok(SaveFormat::Zarr),
            other => Err(format!(
                "Unknown save format '{}'. Must be one of: hdf5, tiff, zarr",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_profile() {
        assert!(SaveFormat::Zarr.capabilities().supports_true_append);
        assert!(!SaveFormat::Hdf5.capabilities().supports_true_append);
        assert!(SaveFormat::Hdf5.capabilities().requires_placeholder_row);
        assert!(SaveFormat::Zarr.capabilities().requires_placeholder_row);
        assert!(!SaveFormat::Tiff.capabilities().requires_placeholder_row);

        let tiff = SaveFormat::Tiff.capabilities();
        assert!(tiff.supports_multipage_append);
        assert_eq!(tiff.size_ceiling, Some(TIFF_SIZE_CEILING));
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("HDF5".parse::<SaveFormat>(), Ok(SaveFormat::Hdf5));
        assert_eq!("tif".parse::<SaveFormat>(), Ok(SaveFormat::Tiff));
        assert_eq!("zarr".parse::<SaveFormat>(), Ok(SaveFormat::Zarr));
        assert!("png".parse::<SaveFormat>().is_err());
    }

    #[test]
    fn test_extension_round_trips_through_display() {
        for format in SaveFormat::ALL {
            assert_eq!(format.to_string().parse::<SaveFormat>(), Ok(format));
        }
    }
}
