//! Synthetic frame content for simulated detectors.

/// Linear congruential step (glibc constants) for reproducible noise.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Diagonal gradient with per-frame noise.
///
/// The first pixel always holds the low 16 bits of `frame_num` so tests can
/// tell frames apart after they went through a writer.
pub fn generate_test_pattern(width: u32, height: u32, frame_num: u64) -> Vec<u16> {
    let w = width as usize;
    let h = height as usize;
    let mut buffer = vec![0u16; w * h];
    if buffer.is_empty() {
        return buffer;
    }

    let span = (w + h).max(1);
    let frame_seed = frame_num.wrapping_mul(2654435761);
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let gradient = ((x + y) * 60000 / span) as u16;
            let noise = (prng(frame_seed ^ idx as u64) & 0xFF) as u16;
            buffer[idx] = gradient.saturating_add(noise);
        }
    }
    buffer[0] = frame_num as u16;
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_size_and_marker() {
        let pixels = generate_test_pattern(8, 4, 7);
        assert_eq!(pixels.len(), 32);
        assert_eq!(pixels[0], 7);
    }

    #[test]
    fn test_pattern_is_reproducible() {
        assert_eq!(generate_test_pattern(16, 16, 3), generate_test_pattern(16, 16, 3));
        assert_ne!(generate_test_pattern(16, 16, 3), generate_test_pattern(16, 16, 4));
    }

    #[test]
    fn test_empty_pattern() {
        assert!(generate_test_pattern(0, 10, 1).is_empty());
    }
}
