//! Feedback tones played through the codec arbiter.

use std::{f32::consts::TAU, sync::Arc};

use tracing::debug;

use crate::{
    codec::{CodecArbiter, CodecFormat},
    error::Result,
};

/// Fade in/out applied to each tone to avoid clicks.
const FADE_MS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub freq_hz: u32,
    pub duration_ms: u32,
    /// Amplitude as a percentage of full scale.
    pub level: u8,
}

impl Tone {
    pub const fn new(freq_hz: u32, duration_ms: u32, level: u8) -> Self {
        Self {
            freq_hz,
            duration_ms,
            level,
        }
    }
}

/// Wake acknowledged.
pub const CONFIRM: Tone = Tone::new(800, 120, 40);
/// Offline command acknowledged.
pub const OFFLINE_ACK: Tone = Tone::new(1_000, 100, 80);
/// One half of the timer-set double beep.
pub const DOUBLE_CONFIRM: Tone = Tone::new(1_200, 100, 60);
pub const ERROR: Tone = Tone::new(400, 300, 60);
pub const ALARM: Tone = Tone::new(1_000, 500, 80);

pub const DOUBLE_CONFIRM_GAP_MS: u32 = 80;
pub const ALARM_REPEATS: usize = 5;
pub const ALARM_GAP_MS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToneStep {
    Tone(Tone),
    Gap(u32),
}

pub fn double_confirm() -> Vec<ToneStep> {
    vec![
        ToneStep::Tone(DOUBLE_CONFIRM),
        ToneStep::Gap(DOUBLE_CONFIRM_GAP_MS),
        ToneStep::Tone(DOUBLE_CONFIRM),
    ]
}

pub fn alarm_pattern() -> Vec<ToneStep> {
    let mut steps = Vec::with_capacity(ALARM_REPEATS * 2);
    for i in 0..ALARM_REPEATS {
        steps.push(ToneStep::Tone(ALARM));
        if i + 1 < ALARM_REPEATS {
            steps.push(ToneStep::Gap(ALARM_GAP_MS));
        }
    }
    steps
}

/// Render a sine tone at `sample_rate`.
pub fn synthesize(tone: Tone, sample_rate: u32) -> Vec<i16> {
    let n = (sample_rate as u64 * tone.duration_ms as u64 / 1_000) as usize;
    let fade = ((sample_rate as u64 * FADE_MS as u64 / 1_000) as usize).min(n / 2).max(1);
    let amplitude = i16::MAX as f32 * tone.level.min(100) as f32 / 100.0;
    let step = TAU * tone.freq_hz as f32 / sample_rate as f32;

    (0..n)
        .map(|i| {
            let envelope = (i.min(n - 1 - i) as f32 / fade as f32).min(1.0);
            ((i as f32 * step).sin() * amplitude * envelope) as i16
        })
        .collect()
}

fn render(steps: &[ToneStep], sample_rate: u32) -> Vec<i16> {
    let mut pcm = Vec::new();
    for step in steps {
        match *step {
            ToneStep::Tone(tone) => pcm.extend(synthesize(tone, sample_rate)),
            ToneStep::Gap(ms) => {
                let n = (sample_rate as u64 * ms as u64 / 1_000) as usize;
                pcm.resize(pcm.len() + n, 0);
            }
        }
    }
    pcm
}

/// Plays tone sequences on the output path in the voice format.
#[derive(Debug, Clone)]
pub struct TonePlayer {
    codec: Arc<CodecArbiter>,
}

impl TonePlayer {
    pub fn new(codec: Arc<CodecArbiter>) -> Self {
        Self { codec }
    }

    pub fn play(&self, tone: Tone) -> Result<()> {
        self.play_steps(&[ToneStep::Tone(tone)])
    }

    /// Blocks until the whole sequence has been handed to the codec.
    pub fn play_steps(&self, steps: &[ToneStep]) -> Result<()> {
        let format = CodecFormat::VOICE;
        let pcm = render(steps, format.sample_rate);
        let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        debug!(steps = steps.len(), bytes = bytes.len(), "playing tone");

        self.codec.open_playback_only(format)?;
        let mut offset = 0;
        while offset < bytes.len() {
            let written = self.codec.write(&bytes[offset..])?;
            if written == 0 {
                break;
            }
            offset += written;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecOp, SimCodec};

    #[test]
    fn tone_has_expected_length_and_level() {
        let pcm = synthesize(CONFIRM, 16_000);
        assert_eq!(pcm.len(), 1_920);
        let peak = pcm.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        let expected = (i16::MAX as f32 * 0.4) as u16;
        assert!(peak <= expected && peak > expected - 200, "peak {peak}");
        assert_eq!(pcm[0], 0);
    }

    #[test]
    fn alarm_pattern_is_five_beeps() {
        let steps = alarm_pattern();
        let beeps = steps
            .iter()
            .filter(|s| matches!(s, ToneStep::Tone(t) if *t == ALARM))
            .count();
        assert_eq!(beeps, ALARM_REPEATS);
        // 5 × 500 ms tone + 4 × 500 ms gap, 16 samples per ms.
        assert_eq!(render(&steps, 16_000).len(), 16 * 4_500);
    }

    #[test]
    fn play_opens_output_in_voice_format() {
        let sim = Arc::new(SimCodec::new());
        let player = TonePlayer::new(Arc::new(CodecArbiter::new(sim.clone())));
        player.play(ERROR).unwrap();
        assert!(sim.ops().contains(&CodecOp::OpenPlayback(CodecFormat::VOICE)));
        assert_eq!(sim.bytes_written(), 16 * 300 * 2);
    }
}
