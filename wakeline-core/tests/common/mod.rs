#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use wakeline_core::audio::{SimMic, SimSource};
use wakeline_core::buffering::{create_reference_buffer, REFERENCE_CAPACITY};
use wakeline_core::codec::SimCodec;
use wakeline_core::inference::{NeverWake, PassthroughFrontEnd};
use wakeline_core::pipeline::{
    CloudClient, CloudEvents, Collaborators, MusicPlayer, Orchestrator, PipelineConfig,
    SessionHandle, SessionToken,
};
use wakeline_core::tts::{CompletionCallback, PcmTtsPlayer, TtsChunk, TtsPlayer};
use wakeline_core::{
    AssistantState, CaptureConfig, CaptureEngine, CaptureResources, CodecArbiter, CodecFormat,
    DetectorHandle, Result, StatusEvent,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `cond` every 5 ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn drain_status(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => events.push(ev),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
        }
    }
}

// ── Cloud double ─────────────────────────────────────────────────────────────

/// Records every call; `start_conversation` fails while unreachable.
pub struct ScriptedCloud {
    reachable: AtomicBool,
    attempts: AtomicUsize,
    started: AtomicUsize,
    streamed_bytes: AtomicU64,
    /// Frames streamed with a token whose session was already released.
    late_frames: AtomicUsize,
    ended: Mutex<Vec<String>>,
    events: Mutex<Option<CloudEvents>>,
}

impl ScriptedCloud {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            attempts: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            streamed_bytes: AtomicU64::new(0),
            late_frames: AtomicUsize::new(0),
            ended: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn streamed_bytes(&self) -> u64 {
        self.streamed_bytes.load(Ordering::SeqCst)
    }

    pub fn late_frames(&self) -> usize {
        self.late_frames.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> Vec<String> {
        self.ended.lock().clone()
    }

    pub fn events(&self) -> CloudEvents {
        self.events
            .lock()
            .clone()
            .expect("orchestrator registers cloud events on spawn")
    }
}

impl CloudClient for ScriptedCloud {
    fn start_conversation(&self) -> Option<SessionHandle> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return None;
        }
        let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        Some(SessionHandle::new(format!("conv-{n}")))
    }

    fn stream_audio(&self, session: &SessionToken, pcm: &[u8]) -> Result<()> {
        if self.ended.lock().iter().any(|id| id == session.id()) {
            self.late_frames.fetch_add(1, Ordering::SeqCst);
        }
        self.streamed_bytes
            .fetch_add(pcm.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn end_stream(&self, session: SessionHandle) {
        self.ended.lock().push(session.id().to_owned());
    }

    fn register_events(&self, events: CloudEvents) {
        *self.events.lock() = Some(events);
    }
}

// ── Music / TTS doubles ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct ToggleMusic {
    pub playing: AtomicBool,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
}

impl MusicPlayer for ToggleMusic {
    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
    }
}

/// `PcmTtsPlayer` that counts completion callbacks.
pub struct CountingTts {
    inner: PcmTtsPlayer,
    completions: Arc<AtomicUsize>,
}

impl TtsPlayer for CountingTts {
    fn feed(&self, chunk: TtsChunk) -> Result<()> {
        self.inner.feed(chunk)
    }

    fn register_complete_callback(&self, callback: CompletionCallback) {
        let completions = Arc::clone(&self.completions);
        self.inner.register_complete_callback(Box::new(move || {
            completions.fetch_add(1, Ordering::SeqCst);
            callback();
        }));
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub capture: Arc<CaptureEngine>,
    pub codec: Arc<CodecArbiter>,
    pub sim: Arc<SimCodec>,
    pub cloud: Arc<ScriptedCloud>,
    pub music: Arc<ToggleMusic>,
    pub mic: SimMic,
    pub tts_completions: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(cloud: ScriptedCloud, config: PipelineConfig) -> Self {
        Self::with_music(cloud, config, ToggleMusic::default())
    }

    pub fn with_music(cloud: ScriptedCloud, config: PipelineConfig, music: ToggleMusic) -> Self {
        let sim = Arc::new(SimCodec::new());
        let codec = Arc::new(CodecArbiter::new(sim.clone()));
        let (writer, reference) = create_reference_buffer(REFERENCE_CAPACITY);
        codec.attach_reference(writer);

        // Deep hand-off so an unpaced source never drops frames.
        let capture = Arc::new(CaptureEngine::new(
            CaptureConfig {
                handoff_depth: 512,
                ..CaptureConfig::default()
            },
            DetectorHandle::new(NeverWake),
        ));
        let (source, mic) = SimSource::new(16_000);
        capture
            .init(|| {
                Ok(CaptureResources {
                    source: Box::new(source),
                    reference,
                    front_end: Box::new(PassthroughFrontEnd),
                })
            })
            .expect("init capture");

        let completions = Arc::new(AtomicUsize::new(0));
        let tts = CountingTts {
            inner: PcmTtsPlayer::new(Arc::clone(&codec), CodecFormat::VOICE).expect("tts player"),
            completions: Arc::clone(&completions),
        };

        let cloud = Arc::new(cloud);
        let music = Arc::new(music);
        let orchestrator = Orchestrator::spawn(
            config,
            Collaborators {
                capture: Arc::clone(&capture),
                codec: Arc::clone(&codec),
                cloud: cloud.clone(),
                tts: Arc::new(tts),
                music: music.clone(),
            },
        )
        .expect("spawn orchestrator");

        Self {
            orchestrator,
            capture,
            codec,
            sim,
            cloud,
            music,
            mic,
            tts_completions: completions,
        }
    }

    pub fn wait_for_state(&self, state: AssistantState) -> bool {
        wait_until(WAIT, || self.orchestrator.state() == state)
    }
}
