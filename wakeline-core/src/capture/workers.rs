//! The feed / fetch worker pair behind every capture mode.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, info_span, trace, warn};

use super::{
    CaptureConfig, CaptureDiagnostics, CaptureMode, CaptureResources, Liveness, RecordingOptions,
    RecordingSink, Shared, VadEvent, WakeSink,
};
use crate::{
    audio::Agc,
    buffering::frame::{compact_interleaved, AudioFrame},
    error::Result,
    inference::{DetectorHandle, Detection},
    vad::{FrameClass, Vad, VadState},
};

const BACKOFF_START: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_millis(80);

pub(super) enum FetchDispatch {
    WakeWord {
        sink: Box<dyn WakeSink>,
        detector: DetectorHandle,
        agc_target: Option<u16>,
    },
    Recording {
        sink: Box<dyn RecordingSink>,
        opts: RecordingOptions,
    },
}

/// One processed frame plus the front end's VAD annotation, if any.
struct FramePacket {
    frame: AudioFrame,
    vad: Option<FrameClass>,
}

pub(super) struct WorkerSet {
    pub(super) config: CaptureConfig,
    pub(super) shared: Arc<Shared>,
    pub(super) stop: Arc<AtomicBool>,
    pub(super) live: Arc<Liveness>,
    pub(super) done_tx: Sender<()>,
}

impl WorkerSet {
    /// Spawn `capture-feed` and `capture-fetch`.
    ///
    /// If a spawn fails, whatever was already moved into the failed closure
    /// is dropped, which runs the exit bookkeeping and returns the resources.
    pub(super) fn spawn(
        self,
        resources: CaptureResources,
        dispatch: FetchDispatch,
    ) -> Result<Vec<JoinHandle<()>>> {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(self.config.handoff_depth.max(1));
        let sample_rate = resources.source.sample_rate();
        let session_no = self
            .shared
            .diagnostics
            .sessions_started
            .load(Ordering::Relaxed);

        let feed = FeedWorker {
            lease: ResourceLease {
                resources: Some(resources),
                shared: Arc::clone(&self.shared),
            },
            tx: frame_tx,
            config: self.config,
            stop: Arc::clone(&self.stop),
            diagnostics: Arc::clone(&self.shared.diagnostics),
            _exit: self.exit_guard("feed"),
        };
        let fetch = FetchWorker {
            rx: frame_rx,
            config: self.config,
            sample_rate,
            session_no,
            stop: Arc::clone(&self.stop),
            diagnostics: Arc::clone(&self.shared.diagnostics),
            _exit: self.exit_guard("fetch"),
        };

        let feed_handle = thread::Builder::new()
            .name("capture-feed".into())
            .spawn(move || feed.run())?;
        let fetch_handle = match thread::Builder::new()
            .name("capture-fetch".into())
            .spawn(move || fetch.run(dispatch))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.stop.store(true, Ordering::Release);
                let _ = feed_handle.join();
                return Err(e.into());
            }
        };
        Ok(vec![feed_handle, fetch_handle])
    }

    fn exit_guard(&self, role: &'static str) -> WorkerExit {
        WorkerExit {
            role,
            shared: Arc::clone(&self.shared),
            stop: Arc::clone(&self.stop),
            live: Arc::clone(&self.live),
            done_tx: self.done_tx.clone(),
        }
    }
}

/// Runs when a worker ends, however it ends.
struct WorkerExit {
    role: &'static str,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    live: Arc<Liveness>,
    done_tx: Sender<()>,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        // One worker leaving takes its partner down with it.
        self.stop.store(true, Ordering::Release);
        if self.live.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.set_mode(CaptureMode::Idle);
        }
        self.live.live.fetch_sub(1, Ordering::AcqRel);
        let _ = self.done_tx.try_send(());
        debug!(worker = self.role, "capture worker exited");
    }
}

/// Hands the hardware resources back to the engine on drop.
struct ResourceLease {
    resources: Option<CaptureResources>,
    shared: Arc<Shared>,
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        if let Some(resources) = self.resources.take() {
            self.shared.return_resources(resources);
        }
    }
}

fn try_buffer(len: usize) -> Option<Vec<i16>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf)
}

// ── Feed worker ──────────────────────────────────────────────────────────────

// Field order matters: the lease is returned before the exit guard runs.
struct FeedWorker {
    lease: ResourceLease,
    tx: Sender<FramePacket>,
    config: CaptureConfig,
    stop: Arc<AtomicBool>,
    diagnostics: Arc<CaptureDiagnostics>,
    _exit: WorkerExit,
}

impl FeedWorker {
    fn run(mut self) {
        let Some(res) = self.lease.resources.as_mut() else {
            return;
        };
        let frame_len = self.config.frame_samples.max(1);
        let sample_rate = res.source.sample_rate();

        let (Some(mut mic), Some(mut reference), Some(mut processed)) = (
            try_buffer(frame_len),
            try_buffer(frame_len),
            try_buffer(frame_len),
        ) else {
            error!(frame_len, "feed worker could not allocate frame buffers");
            CaptureDiagnostics::bump(&self.diagnostics.allocation_failures);
            return;
        };

        let stale = res.reference.clear();
        if stale > 0 {
            trace!(bytes = stale, "discarded stale reference audio");
        }

        let mut filled = 0usize;
        let mut backoff = BACKOFF_START;

        while !self.stop.load(Ordering::Acquire) {
            match res.source.read(&mut mic[filled..], self.config.read_timeout) {
                Ok(0) => continue,
                Ok(n) => {
                    backoff = BACKOFF_START;
                    filled += if self.config.compact_stereo {
                        compact_interleaved(&mut mic[filled..filled + n])
                    } else {
                        n
                    };
                }
                Err(e) => {
                    CaptureDiagnostics::bump(&self.diagnostics.read_errors);
                    if e.is_transient() {
                        debug!(?backoff, "microphone read failed, retrying: {e}");
                    } else {
                        warn!(?backoff, "microphone read failed, retrying: {e}");
                    }
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    continue;
                }
            }
            if filled < frame_len {
                continue;
            }
            filled = 0;
            CaptureDiagnostics::bump(&self.diagnostics.frames_read);

            res.reference.read_samples(&mut reference);
            let annotations = res.front_end.process(&mic, &reference, &mut processed);

            let mut frame = match AudioFrame::try_with_capacity(processed.len(), sample_rate) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("feed worker frame allocation failed: {e}");
                    CaptureDiagnostics::bump(&self.diagnostics.allocation_failures);
                    return;
                }
            };
            frame.samples.extend_from_slice(&processed);

            match self.tx.try_send(FramePacket {
                frame,
                vad: annotations.vad,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    CaptureDiagnostics::bump(&self.diagnostics.frames_dropped);
                    trace!("fetch worker behind, frame dropped");
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
    }
}

// ── Fetch worker ─────────────────────────────────────────────────────────────

struct FetchWorker {
    rx: Receiver<FramePacket>,
    config: CaptureConfig,
    sample_rate: u32,
    session_no: u64,
    stop: Arc<AtomicBool>,
    diagnostics: Arc<CaptureDiagnostics>,
    _exit: WorkerExit,
}

impl FetchWorker {
    fn run(self, dispatch: FetchDispatch) {
        match dispatch {
            FetchDispatch::WakeWord {
                sink,
                detector,
                agc_target,
            } => self.run_wake_word(sink, detector, agc_target),
            FetchDispatch::Recording { sink, opts } => self.run_recording(sink, opts),
        }
    }

    fn next_packet(&self) -> Option<FramePacket> {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return None;
            }
            match self.rx.recv_timeout(self.config.read_timeout) {
                Ok(packet) => return Some(packet),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn telemetry(&self, mode: &'static str, frames: u64, frame: &AudioFrame) {
        let every = self.config.telemetry_every;
        if every > 0 && frames % every == 0 {
            debug!(
                mode,
                frames,
                peak = frame.peak(),
                non_zero = frame.non_zero(),
                len = frame.samples.len(),
                "capture telemetry"
            );
        }
    }

    fn run_wake_word(
        &self,
        mut sink: Box<dyn WakeSink>,
        detector: DetectorHandle,
        agc_target: Option<u16>,
    ) {
        let _span = info_span!("wake_word", session = self.session_no).entered();
        let mut agc = agc_target.map(Agc::new);
        // One report per session; re-arming starts a new session.
        let mut fired = false;
        let mut frames = 0u64;

        while let Some(mut packet) = self.next_packet() {
            frames += 1;
            if let Some(agc) = agc.as_mut() {
                agc.process(&mut packet.frame.samples);
            }
            self.telemetry("wake_word", frames, &packet.frame);

            let detection = detector.0.lock().detect(&packet.frame.samples);
            match detection {
                Detection::Miss => {}
                hit if fired => {
                    CaptureDiagnostics::bump(&self.diagnostics.debounced_hits);
                    trace!(?hit, "detection ignored, already reported");
                }
                Detection::Wake => {
                    fired = true;
                    CaptureDiagnostics::bump(&self.diagnostics.wake_hits);
                    info!(frames, "wake word detected");
                    sink.on_wake();
                }
                Detection::Command(command_id) => {
                    fired = true;
                    CaptureDiagnostics::bump(&self.diagnostics.wake_hits);
                    info!(command_id, "offline command detected");
                    sink.on_command(command_id);
                }
            }
        }
    }

    fn run_recording(&self, mut sink: Box<dyn RecordingSink>, opts: RecordingOptions) {
        let _span = info_span!("recording", session = self.session_no).entered();
        let mut vad = opts.vad.map(|mut cfg| {
            cfg.sample_rate = self.sample_rate;
            Vad::new(cfg)
        });
        let mut agc = opts.agc_target.map(Agc::new);
        let mut warmup = opts.warmup_frames;
        let mut speech_started = false;
        let mut frames = 0u64;

        while let Some(mut packet) = self.next_packet() {
            frames += 1;
            if let Some(agc) = agc.as_mut() {
                agc.process(&mut packet.frame.samples);
            }
            self.telemetry("recording", frames, &packet.frame);

            if let Some(vad) = vad.as_mut() {
                CaptureDiagnostics::bump(&self.diagnostics.vad_frames);
                let state = match packet.vad {
                    Some(class) => vad.process_classified(packet.frame.samples.len(), class),
                    None => vad.process(&packet.frame.samples),
                };
                if state == VadState::Speaking && !speech_started {
                    speech_started = true;
                    sink.on_vad_event(VadEvent::SpeechStart);
                }
                if vad.should_stop() {
                    // Stop first; this frame is not forwarded.
                    self.stop.store(true, Ordering::Release);
                    let duration_ms = vad.duration_ms();
                    info!(
                        speech_detected = speech_started,
                        duration_ms, "utterance ended, capture stopping"
                    );
                    sink.on_vad_event(VadEvent::SpeechEnd {
                        speech_detected: speech_started,
                        duration_ms,
                    });
                    break;
                }
            }

            if warmup > 0 {
                warmup -= 1;
                CaptureDiagnostics::bump(&self.diagnostics.warmup_frames_skipped);
                continue;
            }
            sink.on_frame(&packet.frame);
            CaptureDiagnostics::bump(&self.diagnostics.frames_streamed);
        }
    }
}
