//! Runtime-tunable pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    capture::{RecordingOptions, WakeWordOptions},
    vad::VadConfig,
};

/// Threshold moves at or below this do not rebuild wake-word mode.
pub const WAKE_THRESHOLD_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PipelineConfig {
    /// Wake-word detector threshold in [0, 1].
    pub wake_threshold: f32,
    /// VAD RMS energy threshold (i16 scale).
    pub vad_speech_threshold: u32,
    pub vad_silence_ms: u32,
    pub vad_min_speech_ms: u32,
    /// Ceiling for a wake-triggered recording.
    pub max_recording_ms: u32,
    /// Ceiling for a follow-up recording.
    pub followup_recording_ms: u32,
    pub agc_enabled: bool,
    pub agc_target_level: u16,
    /// Frames held back from the stream after recording starts.
    pub warmup_frames: u32,
    /// Pause between an error and re-arming wake word.
    pub error_cooldown_ms: u32,
    /// Give up waiting for a cloud response after this long.
    pub response_timeout_ms: u32,
    /// Give up waiting for TTS completion after this long.
    pub speaking_timeout_ms: u32,
    pub output_volume: u8,
    pub alarm_volume: u8,
    pub capture_stop_timeout_ms: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wake_threshold: 0.5,
            vad_speech_threshold: 180,
            vad_silence_ms: 1_800,
            vad_min_speech_ms: 200,
            max_recording_ms: 7_000,
            followup_recording_ms: 7_000,
            agc_enabled: true,
            agc_target_level: 4_000,
            warmup_frames: 2,
            error_cooldown_ms: 2_000,
            response_timeout_ms: 15_000,
            speaking_timeout_ms: 60_000,
            output_volume: 40,
            alarm_volume: 70,
            capture_stop_timeout_ms: 500,
        }
    }
}

impl PipelineConfig {
    pub fn normalize(&mut self) {
        if !self.wake_threshold.is_finite() {
            self.wake_threshold = 0.5;
        }
        self.wake_threshold = self.wake_threshold.clamp(0.0, 1.0);
        self.vad_speech_threshold = self.vad_speech_threshold.clamp(1, 20_000);
        self.vad_silence_ms = self.vad_silence_ms.clamp(100, 10_000);
        self.vad_min_speech_ms = self.vad_min_speech_ms.clamp(0, 5_000);
        self.max_recording_ms = self.max_recording_ms.clamp(1_000, 60_000);
        self.followup_recording_ms = self.followup_recording_ms.clamp(1_000, 60_000);
        self.agc_target_level = self.agc_target_level.clamp(500, 20_000);
        self.warmup_frames = self.warmup_frames.min(50);
        self.error_cooldown_ms = self.error_cooldown_ms.min(30_000);
        self.response_timeout_ms = self.response_timeout_ms.clamp(1_000, 120_000);
        self.speaking_timeout_ms = self.speaking_timeout_ms.clamp(1_000, 600_000);
        self.output_volume = self.output_volume.min(100);
        self.alarm_volume = self.alarm_volume.min(100);
        self.capture_stop_timeout_ms = self.capture_stop_timeout_ms.clamp(50, 10_000);
    }

    pub fn vad_config(&self, max_recording_ms: u32) -> VadConfig {
        VadConfig {
            speech_threshold: self.vad_speech_threshold,
            silence_duration_ms: self.vad_silence_ms,
            min_speech_duration_ms: self.vad_min_speech_ms,
            max_recording_ms,
            ..VadConfig::default()
        }
    }

    pub fn recording_options(&self, follow_up: bool) -> RecordingOptions {
        let max = if follow_up {
            self.followup_recording_ms
        } else {
            self.max_recording_ms
        };
        RecordingOptions {
            vad: Some(self.vad_config(max)),
            agc_target: self.agc_enabled.then_some(self.agc_target_level),
            warmup_frames: self.warmup_frames,
        }
    }

    pub fn wake_word_options(&self) -> WakeWordOptions {
        WakeWordOptions {
            agc_target: self.agc_enabled.then_some(self.agc_target_level),
        }
    }

    /// Whether moving from `self` to `next` requires re-arming wake word.
    pub fn wake_threshold_changed(&self, next: &PipelineConfig) -> bool {
        (self.wake_threshold - next.wake_threshold).abs() > WAKE_THRESHOLD_EPSILON
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms as u64)
    }

    pub fn capture_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_stop_timeout_ms as u64)
    }
}
