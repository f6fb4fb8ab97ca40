//! Voice Activity Detection (VAD).
//!
//! Two layers:
//! - [`SpeechClassifier`] answers "is this frame speech?" for one frame. It is
//!   the swap point between the energy classifier and a neural backend.
//! - [`Vad`] turns the per-frame answers into utterance boundaries
//!   (Idle → Listening → Speaking → End) with minimum-speech, silence and
//!   max-recording timing guards.
//!
//! Fused front ends that already annotate each frame with a VAD decision feed
//! that decision through [`Vad::process_classified`] instead.

pub mod energy;
pub mod tracker;

pub use energy::{rms, EnergyClassifier};
pub use tracker::Vad;

use serde::{Deserialize, Serialize};

/// Per-frame classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// The frame contains speech energy above threshold.
    Speech,
    /// The frame is silent (or below threshold).
    Silence,
}

impl FrameClass {
    pub fn is_speech(self) -> bool {
        self == FrameClass::Speech
    }
}

/// Utterance-level VAD state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VadState {
    /// No frame processed since init / reset.
    Idle,
    /// Waiting for enough speech.
    Listening,
    /// Speech confirmed.
    Speaking,
    /// Internal hop between Speaking and End; never returned.
    Silence,
    /// Utterance complete. Sticky until reset.
    End,
}

/// Trait for per-frame speech classifiers.
///
/// Implementors may be stateful (smoothing, RNN hidden states, etc.).
pub trait SpeechClassifier: Send + 'static {
    /// Classify one frame of mono i16 PCM.
    fn classify(&mut self, samples: &[i16]) -> FrameClass;

    /// Reset any internal state.
    fn reset(&mut self);
}

/// Timing and threshold configuration for one [`Vad`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadConfig {
    /// Sample rate of the frames fed to the detector (Hz).
    pub sample_rate: u32,
    /// RMS energy threshold (i16 scale) for the energy classifier.
    pub speech_threshold: u32,
    /// Consecutive silence after speech that ends the utterance.
    pub silence_duration_ms: u32,
    /// Cumulative speech needed before the utterance counts as started.
    pub min_speech_duration_ms: u32,
    /// Hard ceiling on the whole recording attempt.
    pub max_recording_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            speech_threshold: 180,
            silence_duration_ms: 1_800,
            min_speech_duration_ms: 200,
            max_recording_ms: 7_000,
        }
    }
}
