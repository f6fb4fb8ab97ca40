//! Utterance-boundary state machine.
//!
//! ```text
//! Idle ──first frame──► Listening ──speech ≥ min_speech──► Speaking
//!                                                        │
//!                         silence ≥ silence_duration ────┴──► End
//! (any state) ──elapsed ≥ max_recording──► End
//! ```
//!
//! Frame timing is fixed from the first processed frame: its length and the
//! configured sample rate give the per-frame duration used for every later
//! comparison. Frames of a different length after that are rejected.

use tracing::{debug, info, warn};

use super::{EnergyClassifier, FrameClass, SpeechClassifier, VadConfig, VadState};

/// One detector instance per recording attempt.
pub struct Vad {
    config: VadConfig,
    classifier: Box<dyn SpeechClassifier>,
    state: VadState,
    total_frames: u64,
    speech_frames: u64,
    silence_frames: u64,
    /// Frame length (samples) observed on the first frame.
    frame_len: Option<usize>,
    /// Per-frame duration in microseconds, fixed on the first frame.
    frame_us: u64,
    rejected_frames: u64,
}

impl Vad {
    /// Energy-classified detector using `config.speech_threshold`.
    pub fn new(config: VadConfig) -> Self {
        let threshold = config.speech_threshold;
        Self::with_classifier(config, Box::new(EnergyClassifier::new(threshold)))
    }

    pub fn with_classifier(config: VadConfig, classifier: Box<dyn SpeechClassifier>) -> Self {
        info!(
            threshold = config.speech_threshold,
            silence_ms = config.silence_duration_ms,
            min_speech_ms = config.min_speech_duration_ms,
            max_recording_ms = config.max_recording_ms,
            "vad initialised"
        );
        Self {
            config,
            classifier,
            state: VadState::Idle,
            total_frames: 0,
            speech_frames: 0,
            silence_frames: 0,
            frame_len: None,
            frame_us: 0,
            rejected_frames: 0,
        }
    }

    /// Classify a frame with the built-in classifier and advance.
    ///
    /// Empty input is a no-op returning the current state.
    pub fn process(&mut self, samples: &[i16]) -> VadState {
        if !self.accept_frame(samples.len()) {
            return self.state;
        }
        let class = self.classifier.classify(samples);
        self.advance(class)
    }

    /// Advance with a classification supplied by an external (fused) front end.
    pub fn process_classified(&mut self, frame_len: usize, class: FrameClass) -> VadState {
        if !self.accept_frame(frame_len) {
            return self.state;
        }
        self.advance(class)
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn should_stop(&self) -> bool {
        self.state == VadState::End
    }

    /// Elapsed recording time in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.frames_to_ms(self.total_frames)
    }

    /// Frames rejected because their length differed from the first frame.
    pub fn rejected_frames(&self) -> u64 {
        self.rejected_frames
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Back to Idle with zeroed counters. The frame timing basis is kept.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.total_frames = 0;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.classifier.reset();
        debug!("vad reset");
    }

    fn accept_frame(&mut self, len: usize) -> bool {
        if len == 0 {
            return false;
        }
        match self.frame_len {
            None => {
                let rate = self.config.sample_rate.max(1) as u64;
                self.frame_len = Some(len);
                self.frame_us = (len as u64 * 1_000_000 / rate).max(1);
                debug!(frame_len = len, frame_us = self.frame_us, "vad frame timing fixed");
                true
            }
            Some(expected) if expected != len => {
                self.rejected_frames += 1;
                warn!(
                    expected,
                    got = len,
                    "vad frame length changed mid-recording; frame ignored"
                );
                false
            }
            Some(_) => true,
        }
    }

    fn frames_to_ms(&self, frames: u64) -> u64 {
        frames * self.frame_us / 1000
    }

    fn advance(&mut self, class: FrameClass) -> VadState {
        if self.state == VadState::End {
            return self.state;
        }

        let is_speech = class.is_speech();
        self.total_frames += 1;

        if self.total_frames % 20 == 0 {
            debug!(
                frames = self.total_frames,
                is_speech,
                state = ?self.state,
                "vad progress"
            );
        }

        if self.state == VadState::Idle {
            self.state = VadState::Listening;
            self.speech_frames = 0;
            self.silence_frames = 0;
        }

        match self.state {
            VadState::Listening => {
                if is_speech {
                    self.speech_frames += 1;
                    if self.frames_to_ms(self.speech_frames)
                        >= self.config.min_speech_duration_ms as u64
                    {
                        self.state = VadState::Speaking;
                        info!(at_ms = self.duration_ms(), "vad: speaking");
                    }
                }
            }
            VadState::Speaking => {
                if is_speech {
                    self.speech_frames += 1;
                    self.silence_frames = 0;
                } else {
                    self.silence_frames += 1;
                    let silence_ms = self.frames_to_ms(self.silence_frames);
                    if silence_ms >= self.config.silence_duration_ms as u64 {
                        self.state = VadState::End;
                        info!(silence_ms, at_ms = self.duration_ms(), "vad: end of speech");
                    }
                }
            }
            VadState::Idle | VadState::Silence | VadState::End => {}
        }

        let total_ms = self.duration_ms();
        if self.state != VadState::End && total_ms >= self.config.max_recording_ms as u64 {
            self.state = VadState::End;
            info!(total_ms, "vad: max recording time reached");
        }

        self.state
    }
}

impl std::fmt::Debug for Vad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vad")
            .field("state", &self.state)
            .field("total_frames", &self.total_frames)
            .field("frame_us", &self.frame_us)
            .finish_non_exhaustive()
    }
}
