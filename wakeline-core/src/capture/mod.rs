//! Audio capture engine.
//!
//! Owns the microphone path and runs it in one of three mutually exclusive
//! modes. Each active mode is served by exactly two threads:
//!
//! ```text
//!  AudioSource ──► capture-feed ──(bounded hand-off)──► capture-fetch ──► sink
//!  ReferenceReader ─┘  (front end)                     (AGC, VAD / detector)
//! ```
//!
//! The feed worker only reads hardware and runs the front end. It never waits
//! on the fetch worker: when the hand-off queue is full the frame is dropped
//! and counted. Consumer-side work (wake-word inference, VAD, streaming)
//! happens on the fetch worker.
//!
//! Mode switches are strictly sequential. A new mode cannot start until both
//! workers of the previous one have exited, which each worker signals through
//! a done channel when it drops its exit guard.

mod diagnostics;
mod workers;

pub use diagnostics::{CaptureDiagnostics, CaptureDiagnosticsSnapshot};

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    audio::AudioSource,
    buffering::{frame::AudioFrame, frame::FRAME_SAMPLES, ReferenceReader},
    error::{Result, WakelineError},
    inference::{DetectorHandle, FrontEnd},
    vad::VadConfig,
};

use workers::{FetchDispatch, WorkerSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum CaptureMode {
    Idle = 0,
    WakeWord = 1,
    Recording = 2,
}

impl CaptureMode {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CaptureMode::WakeWord,
            2 => CaptureMode::Recording,
            _ => CaptureMode::Idle,
        }
    }
}

/// Utterance boundary events raised in recording mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// The detector confirmed speech for the first time this attempt.
    SpeechStart,
    /// The attempt is over. Capture has already been stopped.
    SpeechEnd {
        speech_detected: bool,
        duration_ms: u64,
    },
}

/// Consumer of recording-mode output. Runs on the fetch worker.
pub trait RecordingSink: Send + 'static {
    /// One frame to stream upstream.
    fn on_frame(&mut self, frame: &AudioFrame);
    fn on_vad_event(&mut self, event: VadEvent);
}

/// Consumer of wake-word-mode output. Runs on the fetch worker.
///
/// At most one call is made per wake-word session.
pub trait WakeSink: Send + 'static {
    fn on_wake(&mut self);
    fn on_command(&mut self, command_id: i32);
}

/// Hardware-side resources, acquired once by `init`.
pub struct CaptureResources {
    pub source: Box<dyn AudioSource>,
    pub reference: ReferenceReader,
    pub front_end: Box<dyn FrontEnd>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    pub frame_samples: usize,
    /// Upper bound on any single blocking read.
    pub read_timeout: Duration,
    /// Frames buffered between feed and fetch.
    pub handoff_depth: usize,
    /// Detect and undo stereo-interleaved reads from a mono request.
    pub compact_stereo: bool,
    /// Log peak / non-zero telemetry every N frames (0 disables).
    pub telemetry_every: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_samples: FRAME_SAMPLES,
            read_timeout: Duration::from_millis(50),
            handoff_depth: 8,
            compact_stereo: false,
            telemetry_every: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingOptions {
    /// Utterance boundary detection; `None` streams until stopped.
    pub vad: Option<VadConfig>,
    /// AGC target level, `None` disables AGC.
    pub agc_target: Option<u16>,
    /// Frames discarded from streaming right after start.
    pub warmup_frames: u32,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            vad: Some(VadConfig::default()),
            agc_target: Some(4_000),
            warmup_frames: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeWordOptions {
    pub agc_target: Option<u16>,
}

/// Worker exit accounting for one session.
///
/// `running` reaches zero first and the worker that takes it there resets
/// the mode; `live` reaches zero only after that, so a new session can never
/// have its mode overwritten by a straggler of the previous one.
#[derive(Debug)]
pub(crate) struct Liveness {
    pub(crate) running: AtomicUsize,
    pub(crate) live: AtomicUsize,
}

impl Liveness {
    fn new(workers: usize) -> Self {
        Self {
            running: AtomicUsize::new(workers),
            live: AtomicUsize::new(workers),
        }
    }

    fn count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Bookkeeping for the currently (or most recently) running worker set.
struct Session {
    mode: CaptureMode,
    stop: Arc<AtomicBool>,
    live: Arc<Liveness>,
    done_rx: Receiver<()>,
    worker_ids: Vec<ThreadId>,
    handles: Vec<JoinHandle<()>>,
}

impl Session {
    fn is_live(&self) -> bool {
        self.live.count() > 0
    }
}

pub(crate) struct Shared {
    mode: AtomicU8,
    resources: Mutex<Option<CaptureResources>>,
    pub(crate) diagnostics: Arc<CaptureDiagnostics>,
}

impl Shared {
    pub(crate) fn set_mode(&self, mode: CaptureMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub(crate) fn return_resources(&self, resources: CaptureResources) {
        *self.resources.lock() = Some(resources);
    }
}

pub struct CaptureEngine {
    config: CaptureConfig,
    detector: DetectorHandle,
    shared: Arc<Shared>,
    initialized: AtomicBool,
    session: Mutex<Option<Session>>,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig, detector: DetectorHandle) -> Self {
        Self {
            config,
            detector,
            shared: Arc::new(Shared {
                mode: AtomicU8::new(CaptureMode::Idle as u8),
                resources: Mutex::new(None),
                diagnostics: Arc::new(CaptureDiagnostics::default()),
            }),
            initialized: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    /// Acquire the audio front end and reference buffer.
    ///
    /// Idempotent: `acquire` only runs on the first successful call.
    pub fn init<F>(&self, acquire: F) -> Result<()>
    where
        F: FnOnce() -> Result<CaptureResources>,
    {
        let mut slot = self.shared.resources.lock();
        if self.initialized.load(Ordering::Acquire) {
            debug!("capture engine already initialised");
            return Ok(());
        }
        let resources = acquire()?;
        info!(
            sample_rate = resources.source.sample_rate(),
            frame_samples = self.config.frame_samples,
            "capture engine initialised"
        );
        *slot = Some(resources);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Lock-free read of the current mode.
    pub fn mode(&self) -> CaptureMode {
        CaptureMode::from_u8(self.shared.mode.load(Ordering::Acquire))
    }

    pub fn detector(&self) -> &DetectorHandle {
        &self.detector
    }

    pub fn diagnostics(&self) -> CaptureDiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    /// Start wake-word listening. Re-arms the detector.
    ///
    /// # Errors
    /// `AlreadyActive` if any mode is running.
    pub fn start_wake_word(&self, sink: Box<dyn WakeSink>, opts: WakeWordOptions) -> Result<()> {
        self.start(
            CaptureMode::WakeWord,
            FetchDispatch::WakeWord {
                sink,
                detector: self.detector.clone(),
                agc_target: opts.agc_target,
            },
        )
    }

    /// Start recording, optionally with utterance detection.
    ///
    /// # Errors
    /// `AlreadyActive` if any mode is running.
    pub fn start_recording(
        &self,
        sink: Box<dyn RecordingSink>,
        opts: RecordingOptions,
    ) -> Result<()> {
        self.start(CaptureMode::Recording, FetchDispatch::Recording { sink, opts })
    }

    fn start(&self, mode: CaptureMode, dispatch: FetchDispatch) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(WakelineError::NotInitialized);
        }
        let mut session = self.session.lock();
        if let Some(current) = session.as_ref() {
            if current.is_live() {
                debug!(requested = ?mode, active = ?current.mode, "capture start rejected");
                return Err(WakelineError::AlreadyActive);
            }
        }
        if let Some(finished) = session.take() {
            reap(finished);
        }

        let resources = self.shared.resources.lock().take().ok_or_else(|| {
            WakelineError::AudioIo("capture resources were lost by a previous session".into())
        })?;

        if let FetchDispatch::WakeWord { detector, .. } = &dispatch {
            detector.0.lock().reset();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let live = Arc::new(Liveness::new(2));
        let (done_tx, done_rx) = crossbeam_channel::bounded(2);
        self.shared.set_mode(mode);
        CaptureDiagnostics::bump(&self.shared.diagnostics.sessions_started);

        let set = WorkerSet {
            config: self.config,
            shared: Arc::clone(&self.shared),
            stop: Arc::clone(&stop),
            live: Arc::clone(&live),
            done_tx,
        };
        let handles = match set.spawn(resources, dispatch) {
            Ok(handles) => handles,
            Err(e) => {
                error!("failed to spawn capture workers: {e}");
                stop.store(true, Ordering::Release);
                return Err(e);
            }
        };
        let worker_ids = handles.iter().map(|h| h.thread().id()).collect();

        info!(?mode, "capture started");
        *session = Some(Session {
            mode,
            stop,
            live,
            done_rx,
            worker_ids,
            handles,
        });
        Ok(())
    }

    /// Request shutdown of the running mode and return immediately.
    pub fn stop(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            if session.is_live() {
                debug!(mode = ?session.mode, "capture stop requested");
            }
            session.stop.store(true, Ordering::Release);
        }
    }

    /// Request shutdown and block until both workers have exited.
    ///
    /// Called from a capture worker this only requests shutdown.
    ///
    /// # Errors
    /// `TimedOut` if the workers are still running after `timeout`.
    pub fn stop_and_wait(&self, timeout: Duration) -> Result<()> {
        let (stop, done_rx, is_worker) = {
            let session = self.session.lock();
            let Some(s) = session.as_ref() else {
                return Ok(());
            };
            let me = thread::current().id();
            (
                Arc::clone(&s.stop),
                s.done_rx.clone(),
                s.worker_ids.contains(&me),
            )
        };
        stop.store(true, Ordering::Release);
        if is_worker {
            warn!("stop_and_wait called from a capture worker, not waiting");
            return Ok(());
        }

        // Each worker sends once and then drops its sender; disconnection
        // means every worker has finished its exit bookkeeping.
        let deadline = Instant::now() + timeout;
        loop {
            match done_rx.recv_deadline(deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(?timeout, "capture workers did not exit in time");
                    return Err(WakelineError::TimedOut);
                }
            }
        }

        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| !s.is_live()) {
            if let Some(finished) = session.take() {
                reap(finished);
            }
        }
        debug!("capture stopped");
        Ok(())
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop_and_wait(Duration::from_secs(2)) {
            error!("capture workers still running on drop: {e}");
        }
    }
}

fn reap(session: Session) {
    for handle in session.handles {
        let name = handle.thread().name().unwrap_or("capture").to_owned();
        if handle.join().is_err() {
            error!(worker = name.as_str(), "capture worker panicked");
        }
    }
}
