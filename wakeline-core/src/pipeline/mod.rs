//! Pipeline orchestrator.
//!
//! ## Lifecycle
//!
//! ```text
//! Orchestrator::spawn()
//!     └─► resume wake word      → WakeWordArmed, status = Idle
//!         └─► WakeDetected      → confirm tone, session opened, Listening
//!             └─► SpeechEnd     → session released, Processing
//!                 └─► TTS end   → Speaking
//!                     └─► TtsComplete → WakeWordArmed | FollowUpListening
//! ```
//!
//! ## Threading
//!
//! Every component around the core reports through a [`CommandPoster`]; the
//! orchestrator thread is the only caller of capture mode changes, codec
//! reconfiguration, tone playback and session release. Handlers never
//! propagate errors: a failure always ends in an error tone and a timed
//! return to wake word.

mod collaborators;
mod command;
mod config;
mod diagnostics;
mod runner;
mod session;
mod state;
pub mod tone;

pub use collaborators::{CloudClient, CloudEvents, CommandPoster, MusicPlayer, NoMusic};
pub use command::PipelineCommand;
pub use config::{PipelineConfig, WAKE_THRESHOLD_EPSILON};
pub use diagnostics::{OrchestratorDiagnostics, OrchestratorDiagnosticsSnapshot};
pub use session::{SessionHandle, SessionSlot, SessionToken};
pub use state::AssistantState;

use std::{
    sync::{atomic::AtomicU64, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    capture::CaptureEngine,
    codec::CodecArbiter,
    error::{Result, WakelineError},
    ipc::events::{ActuatorEvent, StatusEvent},
    tts::TtsPlayer,
};

use runner::{Runner, SharedView};
use tone::TonePlayer;

/// Commands waiting for the orchestrator.
pub const COMMAND_QUEUE_DEPTH: usize = 16;
/// Broadcast channel capacity for status and actuator events.
const BROADCAST_CAP: usize = 64;

/// The components the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Must already be initialised.
    pub capture: Arc<CaptureEngine>,
    pub codec: Arc<CodecArbiter>,
    pub cloud: Arc<dyn CloudClient>,
    pub tts: Arc<dyn TtsPlayer>,
    pub music: Arc<dyn MusicPlayer>,
}

/// Handle to the running orchestrator thread.
///
/// Dropping it shuts the orchestrator down.
pub struct Orchestrator {
    poster: CommandPoster,
    view: Arc<SharedView>,
    status_tx: broadcast::Sender<StatusEvent>,
    actuator_tx: broadcast::Sender<ActuatorEvent>,
    diagnostics: Arc<OrchestratorDiagnostics>,
    done_rx: crossbeam_channel::Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Wire the collaborators together and start the orchestrator thread.
    ///
    /// Registers the cloud event sink and the TTS completion callback, then
    /// arms wake word.
    pub fn spawn(mut config: PipelineConfig, parts: Collaborators) -> Result<Self> {
        config.normalize();
        let (tx, rx) = bounded(COMMAND_QUEUE_DEPTH);
        let (done_tx, done_rx) = bounded::<()>(1);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (actuator_tx, _) = broadcast::channel(BROADCAST_CAP);
        let diagnostics = Arc::new(OrchestratorDiagnostics::default());
        let poster = CommandPoster::new(tx, Arc::clone(&diagnostics));
        let view = Arc::new(SharedView {
            state: Mutex::new(AssistantState::Suspended),
            config: RwLock::new(config.clone()),
        });

        parts
            .cloud
            .register_events(CloudEvents::new(poster.clone()));
        {
            let poster = poster.clone();
            parts.tts.register_complete_callback(Box::new(move || {
                poster.post(PipelineCommand::TtsComplete);
            }));
        }

        let runner = Runner {
            config,
            tones: TonePlayer::new(Arc::clone(&parts.codec)),
            parts,
            poster: poster.clone(),
            rx,
            view: Arc::clone(&view),
            status_tx: status_tx.clone(),
            actuator_tx: actuator_tx.clone(),
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::clone(&diagnostics),
            _done: done_tx,
            state: AssistantState::Suspended,
            session: SessionSlot::default(),
            follow_up: false,
            music_paused: false,
            alarm_pending: false,
            wake_word_stopped: false,
            deadline: None,
            last_status: None,
        };
        let worker = thread::Builder::new()
            .name("orchestrator".into())
            .spawn(move || runner.run())?;

        Ok(Self {
            poster,
            view,
            status_tx,
            actuator_tx,
            diagnostics,
            done_rx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a command. Returns `false` if the queue stayed full or the
    /// orchestrator has stopped.
    pub fn post(&self, command: PipelineCommand) -> bool {
        self.poster.post(command)
    }

    /// A sender for components wired up after spawn.
    pub fn poster(&self) -> CommandPoster {
        self.poster.clone()
    }

    pub fn state(&self) -> AssistantState {
        *self.view.state.lock()
    }

    /// Configuration currently applied by the orchestrator.
    pub fn config(&self) -> PipelineConfig {
        self.view.config.read().clone()
    }

    /// Replace the configuration. Takes effect on the orchestrator thread;
    /// wake word is re-armed if the detector threshold moved.
    pub fn update_config(&self, mut config: PipelineConfig) -> Result<()> {
        config.normalize();
        if self.post(PipelineCommand::UpdateConfig(Box::new(config))) {
            Ok(())
        } else {
            Err(WakelineError::QueueFull)
        }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_actuator(&self) -> broadcast::Receiver<ActuatorEvent> {
        self.actuator_tx.subscribe()
    }

    pub fn diagnostics(&self) -> OrchestratorDiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Stop the orchestrator and wait for its thread.
    ///
    /// # Errors
    /// `TimedOut` if the thread is still busy after `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        self.post(PipelineCommand::Shutdown);
        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if worker.join().is_err() {
                    error!("orchestrator thread panicked");
                }
                info!("orchestrator shut down");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "orchestrator did not stop in time");
                *self.worker.lock() = Some(worker);
                Err(WakelineError::TimedOut)
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown(Duration::from_secs(3)) {
            error!("orchestrator still running on drop: {e}");
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
