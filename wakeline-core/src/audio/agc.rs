//! Automatic gain control for the microphone path.
//!
//! Pulls the frame RMS toward `target_level` (i16 scale). The gain moves
//! quickly down (attack, avoids clipping on loud onsets) and slowly up
//! (release, avoids pumping the noise floor between words). Frames below the
//! noise gate are left alone so silence is not amplified into "speech".

use tracing::trace;

use crate::vad::rms;

const MIN_GAIN: f32 = 0.5;
const MAX_GAIN: f32 = 8.0;
const ATTACK: f32 = 0.5;
const RELEASE: f32 = 0.05;
/// Frames quieter than this RMS are not adjusted.
const NOISE_GATE_RMS: u32 = 40;

#[derive(Debug, Clone)]
pub struct Agc {
    target_level: u16,
    gain: f32,
}

impl Agc {
    pub fn new(target_level: u16) -> Self {
        Self {
            target_level: target_level.max(1),
            gain: 1.0,
        }
    }

    pub fn target_level(&self) -> u16 {
        self.target_level
    }

    pub fn set_target_level(&mut self, target_level: u16) {
        self.target_level = target_level.max(1);
    }

    /// Current linear gain.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Apply gain in place, with i16 saturation.
    pub fn process(&mut self, samples: &mut [i16]) {
        if samples.is_empty() {
            return;
        }
        let level = rms(samples);
        if level >= NOISE_GATE_RMS {
            let desired = (self.target_level as f32 / level as f32).clamp(MIN_GAIN, MAX_GAIN);
            let rate = if desired < self.gain { ATTACK } else { RELEASE };
            self.gain += (desired - self.gain) * rate;
            trace!(level, gain = self.gain, "agc update");
        }
        if (self.gain - 1.0).abs() < 0.01 {
            return;
        }
        for s in samples.iter_mut() {
            *s = (*s as f32 * self.gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }

    pub fn reset(&mut self) {
        self.gain = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quiet_speech_is_boosted_toward_target() {
        let mut agc = Agc::new(4000);
        for _ in 0..200 {
            let mut frame = vec![500i16; 512];
            agc.process(&mut frame);
        }
        assert_relative_eq!(agc.gain(), 8.0, epsilon = 0.05);
    }

    #[test]
    fn loud_input_is_attenuated_fast() {
        let mut agc = Agc::new(4000);
        let mut frame = vec![16_000i16; 512];
        agc.process(&mut frame);
        // desired 0.25 clamps to the 0.5 floor; one attack step from 1.0
        assert_relative_eq!(agc.gain(), 0.75, epsilon = 1e-4);
        assert_eq!(frame[0], 12_000);
    }

    #[test]
    fn silence_is_not_amplified() {
        let mut agc = Agc::new(4000);
        let mut frame = vec![3i16; 512];
        agc.process(&mut frame);
        assert_relative_eq!(agc.gain(), 1.0);
        assert_eq!(frame[0], 3);
    }

    #[test]
    fn output_saturates() {
        let mut agc = Agc::new(30_000);
        for _ in 0..100 {
            let mut frame = vec![20_000i16; 16];
            agc.process(&mut frame);
            assert!(frame.iter().all(|s| *s <= i16::MAX));
        }
    }
}
