//! Frame data shared between detectors, writers and callers.

use crate::error::{AppResult, DaqError};

/// Represents a single 16-bit image frame.
///
/// Pixels are stored row-major, `height` rows of `width` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels (columns)
    pub width: u32,

    /// Height in pixels (rows)
    pub height: u32,

    pixels: Vec<u16>,
}

impl Frame {
    /// Create a frame from row-major 16-bit pixel data.
    ///
    /// Fails when the buffer length does not match `width * height`.
    pub fn from_u16(width: u32, height: u32, pixels: Vec<u16>) -> AppResult<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(DaqError::Configuration(format!(
                "frame buffer holds {} pixels, {}x{} needs {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Create a zero-filled frame.
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Row-major pixel data.
    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    /// Consume the frame, returning its pixel buffer.
    pub fn into_pixels(self) -> Vec<u16> {
        self.pixels
    }

    /// `[rows, cols]` of this frame.
    pub fn shape(&self) -> [usize; 2] {
        [self.height as usize, self.width as usize]
    }

    /// Number of bytes the pixel payload occupies.
    pub fn byte_len(&self) -> u64 {
        self.pixels.len() as u64 * 2
    }

    /// Get pixel value at (x, y).
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Calculate mean pixel value.
    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&v| v as u64).sum();
        sum as f64 / self.pixels.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_u16() {
        let frame = Frame::from_u16(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(frame.shape(), [2, 3]);
        assert_eq!(frame.get(0, 1), Some(4));
        assert_eq!(frame.get(2, 0), Some(3));
        assert_eq!(frame.get(3, 0), None);
        assert_eq!(frame.byte_len(), 12);
        assert!((frame.mean() - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frame_rejects_wrong_length() {
        let err = Frame::from_u16(4, 4, vec![0; 15]).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn test_zeros() {
        let frame = Frame::zeros(8, 4);
        assert_eq!(frame.pixels().len(), 32);
        assert_eq!(frame.mean(), 0.0);
    }
}
