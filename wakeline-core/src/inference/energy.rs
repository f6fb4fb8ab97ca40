//! Energy-burst wake detector for boards without a neural wake-word model.
//!
//! Fires when the frame RMS stays at or above `threshold × TRIGGER_SCALE` for
//! `window_frames` consecutive frames. After firing it waits for a quiet frame
//! before it can fire again, so one long shout yields one detection.

use tracing::{debug, trace};

use super::{Detection, WakeWordDetector};
use crate::vad::rms;

/// RMS (i16 scale) corresponding to a threshold of 1.0.
const TRIGGER_SCALE: f32 = 8_000.0;

#[derive(Debug, Clone)]
pub struct EnergyWakeDetector {
    threshold: f32,
    window_frames: u32,
    run: u32,
    latched: bool,
}

impl EnergyWakeDetector {
    pub fn new(threshold: f32, window_frames: u32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            window_frames: window_frames.max(1),
            run: 0,
            latched: false,
        }
    }

    fn trigger_level(&self) -> u32 {
        (self.threshold * TRIGGER_SCALE) as u32
    }
}

impl Default for EnergyWakeDetector {
    fn default() -> Self {
        Self::new(0.5, 10)
    }
}

impl WakeWordDetector for EnergyWakeDetector {
    fn detect(&mut self, samples: &[i16]) -> Detection {
        let energy = rms(samples);
        if energy < self.trigger_level() {
            self.run = 0;
            self.latched = false;
            return Detection::Miss;
        }
        if self.latched {
            return Detection::Miss;
        }
        self.run += 1;
        trace!(energy, run = self.run, "energy wake candidate");
        if self.run >= self.window_frames {
            self.run = 0;
            self.latched = true;
            debug!(energy, "energy wake detector fired");
            return Detection::Wake;
        }
        Detection::Miss
    }

    fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
        self.run = 0;
    }

    fn reset(&mut self) {
        self.run = 0;
        self.latched = false;
    }
}
