//! Interfaces to the components around the core, and the adapters that turn
//! their callbacks into queued commands.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::{debug, warn};

use super::{
    command::PipelineCommand,
    diagnostics::OrchestratorDiagnostics,
    session::{SessionHandle, SessionToken},
};
use crate::{
    buffering::frame::AudioFrame,
    capture::{RecordingSink, VadEvent, WakeSink},
    error::Result,
    tts::TtsChunk,
};

/// How long a poster waits for room in the command queue.
const POST_TIMEOUT: Duration = Duration::from_millis(100);

/// Cloud speech pipeline client.
pub trait CloudClient: Send + Sync + 'static {
    fn is_connected(&self) -> bool {
        true
    }

    /// Open a conversation. `None` means the cloud is unreachable.
    fn start_conversation(&self) -> Option<SessionHandle>;

    /// Stream one frame of 16 kHz mono little-endian PCM.
    fn stream_audio(&self, session: &SessionToken, pcm: &[u8]) -> Result<()>;

    /// Finish the upload and release the session.
    fn end_stream(&self, session: SessionHandle);

    /// Called once at orchestrator start-up.
    fn register_events(&self, events: CloudEvents);
}

/// Local music playback. Capture and music cannot share the codec.
pub trait MusicPlayer: Send + Sync + 'static {
    fn is_playing(&self) -> bool;
    fn pause(&self);
    fn resume(&self);
}

/// For boards without a music player.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMusic;

impl MusicPlayer for NoMusic {
    fn is_playing(&self) -> bool {
        false
    }
    fn pause(&self) {}
    fn resume(&self) {}
}

/// Cloneable sender into the orchestrator queue.
#[derive(Clone)]
pub struct CommandPoster {
    tx: Sender<PipelineCommand>,
    diagnostics: Arc<OrchestratorDiagnostics>,
}

impl CommandPoster {
    pub(crate) fn new(tx: Sender<PipelineCommand>, diagnostics: Arc<OrchestratorDiagnostics>) -> Self {
        Self { tx, diagnostics }
    }

    /// Queue a command. Returns `false` if it was dropped.
    pub fn post(&self, command: PipelineCommand) -> bool {
        let name = command.name();
        match self.tx.send_timeout(command, POST_TIMEOUT) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                OrchestratorDiagnostics::bump(&self.diagnostics.commands_dropped);
                warn!(command = name, "orchestrator queue full, command dropped");
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                debug!(command = name, "orchestrator gone, command dropped");
                false
            }
        }
    }
}

impl std::fmt::Debug for CommandPoster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPoster")
            .field("queued", &self.tx.len())
            .finish()
    }
}

/// Callbacks the cloud client invokes. Each one only posts a command.
#[derive(Debug, Clone)]
pub struct CloudEvents {
    poster: CommandPoster,
}

impl CloudEvents {
    pub(crate) fn new(poster: CommandPoster) -> Self {
        Self { poster }
    }

    pub fn on_speech_end(&self) {
        self.poster.post(PipelineCommand::CloudSpeechEnd);
    }

    pub fn on_tts_audio(&self, chunk: TtsChunk) {
        self.poster.post(PipelineCommand::TtsAudio(chunk));
    }

    pub fn on_intent(&self, name: impl Into<String>, payload: impl Into<String>) {
        self.poster.post(PipelineCommand::Intent {
            name: name.into(),
            payload: payload.into(),
        });
    }

    pub fn on_conversation_response(&self, text: impl Into<String>) {
        self.poster
            .post(PipelineCommand::ConversationResponse(text.into()));
    }

    pub fn on_error(&self, code: impl Into<String>, message: impl Into<String>) {
        self.poster.post(PipelineCommand::CloudError {
            code: code.into(),
            message: message.into(),
        });
    }
}

// ── Capture sinks ────────────────────────────────────────────────────────────

/// Wake-word output → orchestrator commands.
pub(crate) struct PostingWakeSink {
    pub(crate) poster: CommandPoster,
}

impl WakeSink for PostingWakeSink {
    fn on_wake(&mut self) {
        self.poster.post(PipelineCommand::WakeDetected);
    }

    fn on_command(&mut self, command_id: i32) {
        self.poster
            .post(PipelineCommand::OfflineCommandDetected(command_id));
    }
}

/// Recording output → cloud upload, VAD events → orchestrator commands.
pub(crate) struct StreamingSink {
    pub(crate) cloud: Arc<dyn CloudClient>,
    pub(crate) token: SessionToken,
    pub(crate) poster: CommandPoster,
    pub(crate) diagnostics: Arc<OrchestratorDiagnostics>,
    pub(crate) failed_frames: u64,
}

impl RecordingSink for StreamingSink {
    fn on_frame(&mut self, frame: &AudioFrame) {
        if let Err(e) = self.cloud.stream_audio(&self.token, &frame.to_le_bytes()) {
            self.failed_frames += 1;
            OrchestratorDiagnostics::bump(&self.diagnostics.stream_errors);
            if self.failed_frames == 1 {
                warn!(session = self.token.id(), "audio upload failed: {e}");
            }
        }
    }

    fn on_vad_event(&mut self, event: VadEvent) {
        match event {
            VadEvent::SpeechStart => {
                self.poster.post(PipelineCommand::SpeechStart);
            }
            VadEvent::SpeechEnd {
                speech_detected,
                duration_ms,
            } => {
                debug!(
                    session = self.token.id(),
                    speech_detected,
                    duration_ms,
                    failed_frames = self.failed_frames,
                    "recording finished"
                );
                self.poster
                    .post(PipelineCommand::SpeechEnd { speech_detected });
            }
        }
    }
}
