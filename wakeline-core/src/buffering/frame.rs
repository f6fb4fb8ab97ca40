//! Typed audio frame handed from the feed worker to the fetch worker.

/// Samples per frame: 32 ms at 16 kHz.
pub const FRAME_SAMPLES: usize = 512;

/// Front-end sample rate (Hz).
pub const FRONT_END_SAMPLE_RATE: u32 = 16_000;

/// A block of mono signed 16-bit PCM samples at a known sample rate.
///
/// Produced by the feed worker, consumed by exactly one downstream path and
/// dropped after one processing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Pre-allocate a frame, reporting allocation failure instead of aborting.
    pub fn try_with_capacity(
        capacity: usize,
        sample_rate: u32,
    ) -> Result<Self, std::collections::TryReserveError> {
        let mut samples = Vec::new();
        samples.try_reserve_exact(capacity)?;
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Length of the PCM payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }

    /// Little-endian PCM bytes, as streamed to the cloud pipeline.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Absolute peak sample value.
    pub fn peak(&self) -> i32 {
        self.samples
            .iter()
            .map(|s| (*s as i32).abs())
            .max()
            .unwrap_or(0)
    }

    /// Number of non-zero samples (a dead microphone reads all zeros).
    pub fn non_zero(&self) -> usize {
        self.samples.iter().filter(|s| **s != 0).count()
    }
}

fn near_zero(s: i16) -> bool {
    (-1..=1).contains(&s)
}

fn near_equal(a: i16, b: i16) -> bool {
    (a as i32 - b as i32).abs() <= 1
}

/// Compact stereo-interleaved samples to mono in place when the codec
/// delivered two channels for a mono request.
///
/// Detected when ≥ 90 % of pairs have a near-zero right channel (and the left
/// channel is not also near-zero), or ≥ 90 % of pairs are near-duplicates.
/// Returns the number of valid samples left in `buf`.
pub fn compact_interleaved(buf: &mut [i16]) -> usize {
    let n = buf.len();
    if n < 8 || n % 2 != 0 {
        return n;
    }
    let pairs = n / 2;
    let mut right_zero = 0usize;
    let mut left_zero = 0usize;
    let mut dup = 0usize;
    for pair in buf.chunks_exact(2) {
        let (left, right) = (pair[0], pair[1]);
        if near_zero(right) {
            right_zero += 1;
        }
        if near_zero(left) {
            left_zero += 1;
        }
        if near_equal(left, right) {
            dup += 1;
        }
    }

    let zero_right = right_zero * 10 >= pairs * 9 && left_zero * 10 < pairs * 9;
    let dup_stereo = dup * 10 >= pairs * 9;
    if !(zero_right || dup_stereo) {
        return n;
    }
    for i in 0..pairs {
        buf[i] = buf[i * 2];
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_metrics() {
        let frame = AudioFrame::new(vec![0, -300, 200, 0], FRONT_END_SAMPLE_RATE);
        assert_eq!(frame.byte_len(), 8);
        assert_eq!(frame.peak(), 300);
        assert_eq!(frame.non_zero(), 2);
        assert_eq!(frame.to_le_bytes()[2..4], (-300i16).to_le_bytes());
        assert!((frame.duration_ms() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn compacts_zero_right_channel() {
        let mut buf: Vec<i16> = (0..16)
            .map(|i| if i % 2 == 0 { 1000 + i as i16 } else { 0 })
            .collect();
        let n = compact_interleaved(&mut buf);
        assert_eq!(n, 8);
        assert_eq!(&buf[..4], &[1000, 1002, 1004, 1006]);
    }

    #[test]
    fn compacts_duplicated_channels() {
        let mut buf = vec![5, 5, -7, -6, 9, 9, 3, 3, 2, 2, 1, 1, 8, 8, 4, 4];
        assert_eq!(compact_interleaved(&mut buf), 8);
        assert_eq!(&buf[..8], &[5, -7, 9, 3, 2, 1, 8, 4]);
    }

    #[test]
    fn leaves_real_mono_untouched() {
        let mut buf = vec![100, -900, 2500, 40, -3000, 1200, 700, -50];
        let before = buf.clone();
        assert_eq!(compact_interleaved(&mut buf), 8);
        assert_eq!(buf, before);
    }

    #[test]
    fn all_silent_buffer_is_treated_as_duplicate_stereo() {
        // Both channels near zero: the duplicate heuristic matches, which is
        // harmless because the compacted result is still silence.
        let mut buf = vec![0i16; 16];
        assert_eq!(compact_interleaved(&mut buf), 8);
    }
}
