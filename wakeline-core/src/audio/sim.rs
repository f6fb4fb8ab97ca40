//! Scripted microphones: a channel-fed simulator and WAV replay.

use std::{
    collections::VecDeque,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::info;

use super::{resample::PcmResampler, AudioSource};
use crate::{
    buffering::frame::FRONT_END_SAMPLE_RATE,
    error::{Result, WakelineError},
};

/// Sleeps so samples come out no faster than real time.
#[derive(Debug)]
struct Pacer {
    sample_rate: u32,
    next_due: Option<Instant>,
}

impl Pacer {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            next_due: None,
        }
    }

    fn wait(&mut self, samples: usize) {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        let span = Duration::from_micros(samples as u64 * 1_000_000 / self.sample_rate as u64);
        self.next_due = Some(due.max(now) + span);
    }
}

/// Microphone fed from a channel. The matching `SimMic` is the "air".
pub struct SimSource {
    rx: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    sample_rate: u32,
    pacer: Option<Pacer>,
}

/// Sending side of a `SimSource`.
#[derive(Clone)]
pub struct SimMic {
    tx: Sender<Vec<i16>>,
    sample_rate: u32,
}

impl SimSource {
    pub fn new(sample_rate: u32) -> (Self, SimMic) {
        let (tx, rx) = unbounded();
        (
            Self {
                rx,
                pending: VecDeque::new(),
                sample_rate,
                pacer: None,
            },
            SimMic { tx, sample_rate },
        )
    }

    /// Deliver samples no faster than real time.
    pub fn paced(mut self) -> Self {
        self.pacer = Some(Pacer::new(self.sample_rate));
        self
    }
}

impl AudioSource for SimSource {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WakelineError::AudioIo(
                        "simulated microphone disconnected".into(),
                    ))
                }
            }
        }
        while self.pending.len() < buf.len() {
            match self.rx.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => break,
            }
        }

        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait(n);
        }
        Ok(n)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl SimMic {
    /// Queue raw samples. Returns `false` once the source is gone.
    pub fn push(&self, samples: Vec<i16>) -> bool {
        self.tx.send(samples).is_ok()
    }

    /// Queue `duration_ms` of a signal whose RMS is exactly `amplitude`.
    pub fn push_level(&self, amplitude: i16, duration_ms: u32) -> bool {
        let n = (self.sample_rate as u64 * duration_ms as u64 / 1000) as usize;
        let samples = (0..n)
            .map(|i| if i % 2 == 0 { amplitude } else { amplitude.saturating_neg() })
            .collect();
        self.push(samples)
    }

    /// Queue `duration_ms` of digital silence.
    pub fn push_silence(&self, duration_ms: u32) -> bool {
        self.push_level(0, duration_ms)
    }

    /// Queue a sine tone, e.g. something for an energy detector to hear.
    pub fn push_tone(&self, freq_hz: f32, amplitude: i16, duration_ms: u32) -> bool {
        let n = (self.sample_rate as u64 * duration_ms as u64 / 1000) as usize;
        let step = std::f32::consts::TAU * freq_hz / self.sample_rate as f32;
        let samples = (0..n)
            .map(|i| ((i as f32 * step).sin() * amplitude as f32) as i16)
            .collect();
        self.push(samples)
    }
}

/// Replays a WAV file as the microphone, converted to 16 kHz mono, paced
/// at real time. Silence follows the end of the file unless looping.
pub struct WavSource {
    samples: Vec<i16>,
    pos: usize,
    looping: bool,
    pacer: Pacer,
}

impl WavSource {
    /// # Errors
    /// `WakelineError::AudioIo` if the file cannot be opened or decoded.
    pub fn open(path: &Path, looping: bool) -> Result<Self> {
        let io_err = |e: hound::Error| WakelineError::AudioIo(format!("{}: {e}", path.display()));
        let mut reader = hound::WavReader::open(path).map_err(io_err)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(io_err)?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(io_err)?
            }
        };
        let mono: Vec<f32> = interleaved
            .chunks(channels)
            .map(|c| c.iter().sum::<f32>() / c.len() as f32)
            .collect();

        let mut resampler = PcmResampler::new(spec.sample_rate, FRONT_END_SAMPLE_RATE, 1024)?;
        let mut samples = Vec::with_capacity(mono.len());
        resampler.process(&mono, &mut samples);
        if !resampler.is_passthrough() {
            // Push the tail of the file through the last partial block.
            resampler.process(&[0.0; 1024], &mut samples);
        }

        info!(
            path = %path.display(),
            source_rate = spec.sample_rate,
            channels,
            samples = samples.len(),
            "wav source loaded"
        );

        Ok(Self {
            samples,
            pos: 0,
            looping,
            pacer: Pacer::new(FRONT_END_SAMPLE_RATE),
        })
    }

    pub fn is_finished(&self) -> bool {
        !self.looping && self.pos >= self.samples.len()
    }
}

impl AudioSource for WavSource {
    fn read(&mut self, buf: &mut [i16], _timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.looping && self.pos >= self.samples.len() {
            self.pos = 0;
        }
        let remaining = self.samples.len().saturating_sub(self.pos);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        buf[n..].fill(0);
        self.pos += n;
        self.pacer.wait(buf.len());
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::rms;

    #[test]
    fn sim_source_returns_queued_samples() {
        let (mut src, mic) = SimSource::new(16_000);
        assert!(mic.push(vec![1, 2, 3]));
        assert!(mic.push(vec![4, 5]));
        let mut buf = [0i16; 4];
        assert_eq!(src.read(&mut buf, Duration::from_millis(10)).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(src.read(&mut buf, Duration::from_millis(10)).unwrap(), 1);
        assert_eq!(buf[0], 5);
    }

    #[test]
    fn sim_source_times_out_with_zero() {
        let (mut src, _mic) = SimSource::new(16_000);
        let mut buf = [0i16; 8];
        assert_eq!(src.read(&mut buf, Duration::from_millis(5)).unwrap(), 0);
    }

    #[test]
    fn dropped_mic_is_a_transient_error() {
        let (mut src, mic) = SimSource::new(16_000);
        drop(mic);
        let mut buf = [0i16; 8];
        let err = src.read(&mut buf, Duration::from_millis(5)).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn push_level_has_requested_rms() {
        let (mut src, mic) = SimSource::new(16_000);
        mic.push_level(1_000, 32);
        let mut buf = [0i16; 512];
        assert_eq!(src.read(&mut buf, Duration::from_millis(10)).unwrap(), 512);
        assert_eq!(rms(&buf), 1_000);
    }

    #[test]
    fn wav_source_replays_and_pads_with_silence() {
        let path = std::env::temp_dir().join(format!("wakeline-wav-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut w = hound::WavWriter::create(&path, spec).unwrap();
            for s in [100i16, -100, 200, -200] {
                w.write_sample(s).unwrap();
            }
            w.finalize().unwrap();
        }

        let mut src = WavSource::open(&path, false).unwrap();
        let mut buf = [7i16; 6];
        assert_eq!(src.read(&mut buf, Duration::from_millis(10)).unwrap(), 6);
        assert_eq!(buf, [100, -100, 200, -200, 0, 0]);
        assert!(src.is_finished());
        let _ = std::fs::remove_file(&path);
    }
}
