//! Host default microphone via cpal.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on most platforms, but an `AudioSource` is moved
//! into the capture feed worker. The stream therefore lives on its own
//! "cpal-input" thread for the lifetime of the source; the input callback
//! downmixes to mono and pushes f32 into a lock-free SPSC ring. `read` pops
//! from the ring and resamples to 16 kHz i16 on the feed worker.
//!
//! The input callback never allocates after its first invocation and never
//! blocks: overflow is counted and dropped.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, Stream, StreamConfig,
};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use tracing::{debug, error, info, warn};

use super::{resample::PcmResampler, AudioSource};
use crate::{
    buffering::frame::FRONT_END_SAMPLE_RATE,
    error::{Result, WakelineError},
};

/// Two seconds of 48 kHz mono.
const RING_CAPACITY: usize = 96_000;
const RESAMPLE_CHUNK: usize = 960;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct CpalSource {
    cons: HeapCons<f32>,
    resampler: PcmResampler,
    raw: Vec<f32>,
    pending: Vec<i16>,
    running: Arc<AtomicBool>,
    overflow: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
    device_rate: u32,
}

/// Names of the available input devices.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

impl CpalSource {
    /// Open `preferred` by name, falling back to the default input device.
    ///
    /// # Errors
    /// `WakelineError::AudioIo` when no device is available or the stream
    /// cannot be built.
    pub fn open(preferred: Option<String>) -> Result<Self> {
        let (prod, cons) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let running = Arc::new(AtomicBool::new(true));
        let overflow = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        let thread = {
            let running = Arc::clone(&running);
            let overflow = Arc::clone(&overflow);
            thread::Builder::new()
                .name("cpal-input".into())
                .spawn(move || {
                    let stream = match build_stream(prod, preferred.as_deref(), &overflow) {
                        Ok((stream, rate)) => {
                            let _ = ready_tx.send(Ok(rate));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    while running.load(Ordering::Acquire) {
                        thread::park_timeout(Duration::from_millis(200));
                    }
                    drop(stream);
                    debug!("cpal input stream closed");
                })?
        };

        let device_rate = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| WakelineError::AudioIo("cpal input thread did not report".into()))??;

        Ok(Self {
            cons,
            resampler: PcmResampler::new(device_rate, FRONT_END_SAMPLE_RATE, RESAMPLE_CHUNK)?,
            raw: vec![0.0; RESAMPLE_CHUNK],
            pending: Vec::new(),
            running,
            overflow,
            thread: Some(thread),
            device_rate,
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Device samples dropped because the feed worker fell behind.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

impl AudioSource for CpalSource {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        while self.pending.len() < buf.len() {
            let n = self.cons.pop_slice(&mut self.raw);
            if n > 0 {
                self.resampler.process(&self.raw[..n], &mut self.pending);
                continue;
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("cpal input thread panicked");
            }
        }
    }
}

fn build_stream(
    mut prod: HeapProd<f32>,
    preferred: Option<&str>,
    overflow: &Arc<AtomicU64>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let named = preferred.and_then(|name| {
        let found = host
            .input_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        if found.is_none() {
            warn!(name, "preferred input device not found, using default");
        }
        found
    });
    let device = named
        .or_else(|| host.default_input_device())
        .ok_or_else(|| WakelineError::AudioIo("no input device available".into()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| WakelineError::AudioIo(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels().max(1) as usize;
    let config: StreamConfig = supported.config();

    info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate,
        channels,
        "opening input device"
    );

    let overflow = Arc::clone(overflow);
    let mut mono: Vec<f32> = Vec::new();
    let mut push = move |frames: &mut dyn Iterator<Item = f32>| {
        mono.clear();
        mono.extend(frames);
        let written = prod.push_slice(&mono);
        if written < mono.len() {
            overflow.fetch_add((mono.len() - written) as u64, Ordering::Relaxed);
        }
    };
    let on_error = |err: cpal::StreamError| error!("audio stream error: {err}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                push(&mut data.chunks(channels).map(|c| c.iter().sum::<f32>() / c.len() as f32))
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                push(&mut data.chunks(channels).map(|c| {
                    c.iter().map(|s| *s as f32 / 32768.0).sum::<f32>() / c.len() as f32
                }))
            },
            on_error,
            None,
        ),
        SampleFormat::U8 => device.build_input_stream(
            &config,
            move |data: &[u8], _| {
                push(&mut data.chunks(channels).map(|c| {
                    c.iter().map(|s| (*s as f32 - 128.0) / 128.0).sum::<f32>() / c.len() as f32
                }))
            },
            on_error,
            None,
        ),
        fmt => {
            return Err(WakelineError::AudioIo(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| WakelineError::AudioIo(e.to_string()))?;

    stream
        .play()
        .map_err(|e| WakelineError::AudioIo(e.to_string()))?;
    Ok((stream, sample_rate))
}
