//! Energy-based speech classifier using an RMS threshold.
//!
//! ## Algorithm
//!
//! 1. Compute the RMS of the incoming i16 frame.
//! 2. If RMS > `threshold` → `Speech`, otherwise `Silence`.
//!
//! Timing (minimum speech, silence hangover) is the job of [`super::Vad`].

use super::{FrameClass, SpeechClassifier};

/// A simple energy-based speech classifier.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    /// RMS threshold on the i16 scale. Frames strictly above it are speech.
    /// Typical range: 100–600 for the onboard microphone.
    threshold: u32,
    /// RMS of the most recent frame.
    last_energy: u32,
}

impl EnergyClassifier {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            last_energy: 0,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn last_energy(&self) -> u32 {
        self.last_energy
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(180)
    }
}

/// Root-mean-square of an i16 frame, on the i16 scale.
pub fn rms(samples: &[i16]) -> u32 {
    if samples.is_empty() {
        return 0;
    }
    let sum_sq: u64 = samples
        .iter()
        .map(|s| {
            let v = *s as i64;
            (v * v) as u64
        })
        .sum();
    ((sum_sq / samples.len() as u64) as f64).sqrt() as u32
}

impl SpeechClassifier for EnergyClassifier {
    fn classify(&mut self, samples: &[i16]) -> FrameClass {
        self.last_energy = rms(samples);
        if self.last_energy > self.threshold {
            FrameClass::Speech
        } else {
            FrameClass::Silence
        }
    }

    fn reset(&mut self) {
        self.last_energy = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_below_threshold() {
        let mut c = EnergyClassifier::new(180);
        assert_eq!(c.classify(&[0i16; 512]), FrameClass::Silence);
    }

    #[test]
    fn speech_above_threshold() {
        let mut c = EnergyClassifier::new(180);
        assert_eq!(c.classify(&[2000i16; 512]), FrameClass::Speech);
        assert_eq!(c.last_energy(), 2000);
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut c = EnergyClassifier::new(500);
        assert_eq!(c.classify(&[500i16; 64]), FrameClass::Silence);
        assert_eq!(c.classify(&[501i16; 64]), FrameClass::Speech);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<i16> = (0..256)
            .map(|i| if i % 2 == 0 { 1000 } else { -1000 })
            .collect();
        assert_eq!(rms(&samples), 1000);
    }

    #[test]
    fn rms_does_not_overflow_at_full_scale() {
        let samples = vec![i16::MIN; 4096];
        assert_eq!(rms(&samples), 32768);
    }

    #[test]
    fn empty_frame_is_silence() {
        let mut c = EnergyClassifier::default();
        assert_eq!(c.classify(&[]), FrameClass::Silence);
    }
}
