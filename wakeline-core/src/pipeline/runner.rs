//! The orchestrator loop: one thread, one queue, every transition.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use super::{
    collaborators::{CommandPoster, PostingWakeSink, StreamingSink},
    command::PipelineCommand,
    config::PipelineConfig,
    diagnostics::OrchestratorDiagnostics,
    session::SessionSlot,
    state::AssistantState,
    tone::{self, Tone, TonePlayer, ToneStep},
    Collaborators,
};
use crate::{
    codec::CodecFormat,
    ipc::events::{ActuatorEvent, AssistantStatus, StatusEvent},
    tts::TtsChunk,
};

/// Liveness tick interval while idle.
pub(crate) const HEARTBEAT: Duration = Duration::from_secs(1);
/// Slack past the VAD ceiling before the listening watchdog fires.
const LISTEN_MARGIN: Duration = Duration::from_secs(2);
/// Floor for the wake-word restart retry.
const MIN_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    /// Re-arm wake word (error cooldown, failed start retry).
    Resume,
    Listening,
    Response,
    Speaking,
}

/// State visible through the `Orchestrator` handle.
#[derive(Debug)]
pub(crate) struct SharedView {
    pub(crate) state: Mutex<AssistantState>,
    pub(crate) config: RwLock<PipelineConfig>,
}

pub(crate) struct Runner {
    pub(crate) config: PipelineConfig,
    pub(crate) parts: Collaborators,
    pub(crate) tones: TonePlayer,
    pub(crate) poster: CommandPoster,
    pub(crate) rx: Receiver<PipelineCommand>,
    pub(crate) view: Arc<SharedView>,
    pub(crate) status_tx: broadcast::Sender<StatusEvent>,
    pub(crate) actuator_tx: broadcast::Sender<ActuatorEvent>,
    pub(crate) seq: Arc<AtomicU64>,
    pub(crate) diagnostics: Arc<OrchestratorDiagnostics>,
    /// Dropped when the loop exits.
    pub(crate) _done: Sender<()>,
    pub(crate) state: AssistantState,
    pub(crate) session: SessionSlot,
    pub(crate) follow_up: bool,
    pub(crate) music_paused: bool,
    pub(crate) alarm_pending: bool,
    /// Suspended by `StopWakeWord`; only an explicit resume re-arms.
    pub(crate) wake_word_stopped: bool,
    pub(crate) deadline: Option<(Instant, Deadline)>,
    pub(crate) last_status: Option<AssistantStatus>,
}

impl Runner {
    /// Run until `Shutdown`. Never returns early on a handler failure.
    pub(crate) fn run(mut self) {
        let _span = info_span!("orchestrator").entered();
        info!("orchestrator started");

        self.parts
            .capture
            .detector()
            .0
            .lock()
            .set_threshold(self.config.wake_threshold);
        if let Err(e) = self.parts.codec.set_volume(self.config.output_volume) {
            warn!("failed to set output volume: {e}");
        }
        self.resume_wake_word();

        let mut last_beat = Instant::now();
        loop {
            self.fire_due_deadline();

            let now = Instant::now();
            if now.duration_since(last_beat) >= HEARTBEAT {
                last_beat = now;
                OrchestratorDiagnostics::bump(&self.diagnostics.heartbeats);
                debug!(state = ?self.state, queued = self.rx.len(), "orchestrator heartbeat");
            }

            let mut wait = HEARTBEAT.saturating_sub(now.duration_since(last_beat));
            if let Some((at, _)) = self.deadline {
                wait = wait.min(at.saturating_duration_since(now));
            }

            match self.rx.recv_timeout(wait) {
                Ok(PipelineCommand::Shutdown) => {
                    self.shutdown();
                    break;
                }
                Ok(command) => {
                    OrchestratorDiagnostics::bump(&self.diagnostics.commands_handled);
                    debug!(command = command.name(), state = ?self.state, "command");
                    self.handle(command);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown();
                    break;
                }
            }
        }
        info!("orchestrator stopped");
    }

    fn handle(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::WakeDetected => self.on_wake(),
            PipelineCommand::OfflineCommandDetected(id) => self.on_offline_command(id),
            PipelineCommand::ResumeWakeWord => {
                if self.state.is_busy() {
                    self.ignore("resume_wake_word");
                } else {
                    self.resume_wake_word();
                }
            }
            PipelineCommand::StopWakeWord => self.on_stop_wake_word(),
            PipelineCommand::RestartWakeWord => self.on_restart_wake_word(),
            PipelineCommand::StartFollowUpListening => self.on_start_follow_up(),
            PipelineCommand::TimerOrAlarmBeep => self.on_alarm(),
            PipelineCommand::ConfirmBeep => self.play_steps(&tone::double_confirm()),
            PipelineCommand::ErrorBeep => self.play_error_tone(),
            PipelineCommand::ErrorResume => self.error_resume("error_resume", None),
            PipelineCommand::SpeechStart => {
                if self.state.is_listening() {
                    info!("speech started");
                }
            }
            PipelineCommand::SpeechEnd { speech_detected } => self.on_speech_end(speech_detected),
            PipelineCommand::CloudSpeechEnd => self.on_speech_end(true),
            PipelineCommand::ConversationResponse(text) => self.on_response(&text),
            PipelineCommand::Intent { name, payload } => self.on_intent(&name, &payload),
            PipelineCommand::TtsAudio(chunk) => self.on_tts_audio(chunk),
            PipelineCommand::TtsComplete => self.on_tts_complete(),
            PipelineCommand::CloudError { code, message } => self.on_cloud_error(&code, &message),
            PipelineCommand::MusicStateChanged(playing) => self.on_music_state(playing),
            PipelineCommand::UpdateConfig(config) => self.on_update_config(*config),
            // Handled by the loop.
            PipelineCommand::Shutdown => {}
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    fn on_wake(&mut self) {
        if self.state != AssistantState::WakeWordArmed {
            self.ignore("wake_detected");
            return;
        }
        info!("wake word, opening conversation");
        self.stop_capture();
        self.play_tone(tone::CONFIRM);
        self.start_listening(false);
    }

    fn start_listening(&mut self, follow_up: bool) {
        self.follow_up = false;
        if !self.parts.cloud.is_connected() {
            self.fail("cloud_unreachable", "cloud client is not connected".into());
            return;
        }
        let Some(handle) = self.parts.cloud.start_conversation() else {
            self.fail("cloud_unreachable", "could not start a conversation".into());
            return;
        };
        OrchestratorDiagnostics::bump(&self.diagnostics.sessions_opened);
        let (token, stale) = self.session.install(handle);
        if let Some(stale) = stale {
            warn!(session = stale.id(), "previous session was still open, releasing it");
            OrchestratorDiagnostics::bump(&self.diagnostics.sessions_released);
            self.parts.cloud.end_stream(stale);
        }

        self.stop_capture();
        if let Err(e) = self.parts.codec.reconfigure(CodecFormat::VOICE) {
            self.fail("codec", format!("failed to configure codec for recording: {e}"));
            return;
        }

        let sink = StreamingSink {
            cloud: Arc::clone(&self.parts.cloud),
            token,
            poster: self.poster.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
            failed_frames: 0,
        };
        let opts = self.config.recording_options(follow_up);
        if let Err(e) = self.parts.capture.start_recording(Box::new(sink), opts) {
            self.fail("capture", format!("failed to start recording: {e}"));
            return;
        }

        let ceiling_ms = opts.vad.map_or(self.config.max_recording_ms, |v| v.max_recording_ms);
        self.schedule(
            Deadline::Listening,
            Duration::from_millis(ceiling_ms as u64) + LISTEN_MARGIN,
        );
        self.enter(if follow_up {
            AssistantState::FollowUpListening
        } else {
            AssistantState::Listening
        });
    }

    fn on_speech_end(&mut self, speech_detected: bool) {
        if !self.state.is_listening() {
            self.ignore("speech_end");
            return;
        }
        self.stop_capture();
        self.release_session();
        if speech_detected {
            let timeout = Duration::from_millis(self.config.response_timeout_ms as u64);
            self.schedule(Deadline::Response, timeout);
            self.enter(AssistantState::Processing);
        } else {
            info!("no speech heard, back to wake word");
            self.resume_wake_word();
        }
    }

    fn on_response(&mut self, text: &str) {
        if !matches!(
            self.state,
            AssistantState::Processing | AssistantState::Speaking
        ) {
            self.ignore("conversation_response");
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            if self.state == AssistantState::Processing {
                info!("empty response, back to wake word");
                self.resume_wake_word();
            }
            return;
        }
        self.follow_up = text.ends_with('?');
        info!(follow_up = self.follow_up, "response: {text}");
    }

    fn on_intent(&mut self, name: &str, payload: &str) {
        info!(intent = name, payload, "intent");
        if self.state == AssistantState::Processing && name.to_ascii_lowercase().contains("timer")
        {
            self.play_steps(&tone::double_confirm());
        }
    }

    fn on_tts_audio(&mut self, chunk: TtsChunk) {
        if !matches!(
            self.state,
            AssistantState::Processing | AssistantState::Speaking
        ) {
            self.ignore("tts_audio");
            return;
        }
        if !self.music_paused && self.parts.music.is_playing() {
            info!("pausing music for speech");
            self.parts.music.pause();
            self.music_paused = true;
        }

        let terminator = match &chunk {
            TtsChunk::End => true,
            TtsChunk::Audio(data) => data.is_empty(),
        };
        if let Err(e) = self.parts.tts.feed(chunk) {
            warn!("tts feed failed: {e}");
        }
        if terminator && self.state == AssistantState::Processing {
            let ceiling = Duration::from_millis(self.config.speaking_timeout_ms as u64);
            self.schedule(Deadline::Speaking, ceiling);
            self.enter(AssistantState::Speaking);
        }
    }

    fn on_tts_complete(&mut self) {
        if self.state != AssistantState::Speaking {
            self.ignore("tts_complete");
            return;
        }
        if self.follow_up {
            info!("response was a question, listening again");
            self.start_listening(true);
        } else {
            self.resume_wake_word();
        }
    }

    fn on_offline_command(&mut self, command_id: i32) {
        if !matches!(
            self.state,
            AssistantState::WakeWordArmed
                | AssistantState::Listening
                | AssistantState::FollowUpListening
        ) {
            self.ignore("offline_command");
            return;
        }
        info!(command_id, "offline command");
        self.stop_capture();
        self.release_session();
        self.play_tone(tone::OFFLINE_ACK);
        let event = ActuatorEvent {
            seq: self.next_seq(),
            command_id,
        };
        let _ = self.actuator_tx.send(event);
        self.resume_wake_word();
    }

    fn on_stop_wake_word(&mut self) {
        if !matches!(
            self.state,
            AssistantState::WakeWordArmed | AssistantState::Suspended
        ) {
            self.ignore("stop_wake_word");
            return;
        }
        self.stop_capture();
        self.deadline = None;
        self.wake_word_stopped = true;
        self.enter(AssistantState::Suspended);
    }

    fn on_restart_wake_word(&mut self) {
        self.parts
            .capture
            .detector()
            .0
            .lock()
            .set_threshold(self.config.wake_threshold);
        if matches!(
            self.state,
            AssistantState::WakeWordArmed | AssistantState::Suspended
        ) {
            info!(threshold = self.config.wake_threshold, "restarting wake word");
            self.resume_wake_word();
        }
    }

    fn on_start_follow_up(&mut self) {
        match self.state {
            AssistantState::Speaking => self.follow_up = true,
            AssistantState::WakeWordArmed | AssistantState::Suspended => {
                self.stop_capture();
                self.start_listening(true);
            }
            _ => self.ignore("start_follow_up"),
        }
    }

    fn on_alarm(&mut self) {
        if self.state.is_busy() || self.state == AssistantState::Alerting {
            info!(state = ?self.state, "alarm held until the conversation ends");
            self.alarm_pending = true;
            return;
        }
        self.stop_capture();
        self.play_alarm();
        if self.wake_word_stopped {
            self.enter(AssistantState::Suspended);
        } else {
            self.resume_wake_word();
        }
    }

    fn on_cloud_error(&mut self, code: &str, message: &str) {
        if !self.state.is_busy() {
            warn!(code, "cloud error outside a conversation: {message}");
            return;
        }
        if self.state == AssistantState::Speaking {
            self.parts.tts.cancel();
        }
        self.fail(code, format!("{code}: {message}"));
    }

    fn on_music_state(&mut self, playing: bool) {
        if self.music_paused {
            return;
        }
        match (playing, self.state) {
            (true, AssistantState::WakeWordArmed) => {
                info!("music started, wake word suspended");
                self.stop_capture();
                self.enter(AssistantState::Suspended);
            }
            (false, AssistantState::Suspended)
                if self.deadline.is_none() && !self.wake_word_stopped =>
            {
                info!("music stopped, resuming wake word");
                self.resume_wake_word();
            }
            _ => {}
        }
    }

    fn on_update_config(&mut self, mut next: PipelineConfig) {
        next.normalize();
        let restart = self.config.wake_threshold_changed(&next);
        if next.output_volume != self.config.output_volume {
            if let Err(e) = self.parts.codec.set_volume(next.output_volume) {
                warn!("failed to apply output volume: {e}");
            }
        }
        self.config = next;
        *self.view.config.write() = self.config.clone();
        info!(restart, "pipeline config updated");
        if restart && self.wake_word_stopped {
            // Picked up when wake word is explicitly restarted.
            self.parts
                .capture
                .detector()
                .0
                .lock()
                .set_threshold(self.config.wake_threshold);
        } else if restart {
            self.on_restart_wake_word();
        }
    }

    fn resume_wake_word(&mut self) {
        self.deadline = None;
        self.follow_up = false;
        self.wake_word_stopped = false;
        self.stop_capture();
        if self.music_paused {
            self.music_paused = false;
            self.parts.music.resume();
        }
        if self.parts.music.is_playing() {
            info!("music playing, wake word deferred");
            self.enter(AssistantState::Suspended);
            return;
        }
        if let Err(e) = self.parts.codec.reconfigure(CodecFormat::VOICE) {
            error!("failed to restore voice codec format: {e}");
        }
        if self.alarm_pending {
            self.alarm_pending = false;
            self.play_alarm();
        }

        let sink = PostingWakeSink {
            poster: self.poster.clone(),
        };
        match self
            .parts
            .capture
            .start_wake_word(Box::new(sink), self.config.wake_word_options())
        {
            Ok(()) => self.enter(AssistantState::WakeWordArmed),
            Err(e) => {
                error!("failed to start wake word: {e}");
                self.set_state(AssistantState::Suspended);
                self.emit_status(AssistantStatus::Error, Some(e.to_string()));
                self.schedule(Deadline::Resume, self.config.error_cooldown().max(MIN_RETRY));
            }
        }
    }

    /// Error tone, then recovery after the cooldown.
    fn fail(&mut self, reason: &str, detail: String) {
        error!(reason, "conversation failed: {detail}");
        self.stop_capture();
        self.release_session();
        self.play_error_tone();
        self.error_resume(reason, Some(detail));
    }

    fn error_resume(&mut self, reason: &str, detail: Option<String>) {
        OrchestratorDiagnostics::bump(&self.diagnostics.error_recoveries);
        self.stop_capture();
        self.release_session();
        self.follow_up = false;
        self.set_state(AssistantState::Suspended);
        self.emit_status(
            AssistantStatus::Error,
            Some(detail.unwrap_or_else(|| reason.to_owned())),
        );
        self.schedule(Deadline::Resume, self.config.error_cooldown());
    }

    fn shutdown(&mut self) {
        info!("orchestrator shutting down");
        if self.state == AssistantState::Speaking {
            self.parts.tts.cancel();
        }
        self.stop_capture();
        self.release_session();
        self.deadline = None;
        self.enter(AssistantState::Suspended);
    }

    // ── Deadlines ────────────────────────────────────────────────────────────

    fn schedule(&mut self, kind: Deadline, after: Duration) {
        debug!(?kind, ?after, "deadline scheduled");
        self.deadline = Some((Instant::now() + after, kind));
    }

    fn fire_due_deadline(&mut self) {
        let Some((at, kind)) = self.deadline else {
            return;
        };
        if Instant::now() < at {
            return;
        }
        self.deadline = None;
        match kind {
            Deadline::Resume => {
                if self.state == AssistantState::Suspended {
                    self.resume_wake_word();
                }
            }
            Deadline::Listening => {
                OrchestratorDiagnostics::bump(&self.diagnostics.timeouts);
                self.fail("timeout", "recording did not finish".into());
            }
            Deadline::Response => {
                OrchestratorDiagnostics::bump(&self.diagnostics.timeouts);
                self.fail("timeout", "no response from the cloud".into());
            }
            Deadline::Speaking => {
                OrchestratorDiagnostics::bump(&self.diagnostics.timeouts);
                warn!("speech playback did not complete, giving up");
                self.parts.tts.cancel();
                self.resume_wake_word();
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn stop_capture(&self) {
        if let Err(e) = self
            .parts
            .capture
            .stop_and_wait(self.config.capture_stop_timeout())
        {
            warn!("capture did not stop cleanly: {e}");
        }
    }

    fn release_session(&mut self) {
        if let Some(handle) = self.session.take() {
            OrchestratorDiagnostics::bump(&self.diagnostics.sessions_released);
            self.parts.cloud.end_stream(handle);
        }
    }

    fn play_tone(&self, tone: Tone) {
        self.play_steps(&[ToneStep::Tone(tone)]);
    }

    fn play_steps(&self, steps: &[ToneStep]) {
        OrchestratorDiagnostics::bump(&self.diagnostics.tones_played);
        if let Err(e) = self.tones.play_steps(steps) {
            warn!("tone playback failed: {e}");
        }
    }

    fn play_error_tone(&self) {
        OrchestratorDiagnostics::bump(&self.diagnostics.error_tones);
        self.play_tone(tone::ERROR);
    }

    fn play_alarm(&mut self) {
        self.enter(AssistantState::Alerting);
        let previous = self.parts.codec.volume();
        if let Err(e) = self.parts.codec.set_volume(self.config.alarm_volume) {
            warn!("failed to raise alarm volume: {e}");
        }
        self.play_steps(&tone::alarm_pattern());
        if let Err(e) = self.parts.codec.set_volume(previous) {
            warn!("failed to restore volume after alarm: {e}");
        }
    }

    fn ignore(&self, command: &'static str) {
        OrchestratorDiagnostics::bump(&self.diagnostics.commands_ignored);
        debug!(command, state = ?self.state, "command not valid in this state");
    }

    fn set_state(&mut self, next: AssistantState) {
        let prev = std::mem::replace(&mut self.state, next);
        *self.view.state.lock() = next;
        if prev != next {
            info!(from = ?prev, to = ?next, "state change");
        }
    }

    fn enter(&mut self, next: AssistantState) {
        self.set_state(next);
        self.emit_status(next.status(), None);
    }

    fn emit_status(&mut self, status: AssistantStatus, detail: Option<String>) {
        if detail.is_none() && self.last_status == Some(status) {
            return;
        }
        self.last_status = Some(status);
        let event = StatusEvent {
            seq: self.next_seq(),
            status,
            detail,
        };
        // No subscribers is fine.
        let _ = self.status_tx.send(event);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}
