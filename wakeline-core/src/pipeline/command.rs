use crate::tts::TtsChunk;

use super::config::PipelineConfig;

/// Everything the orchestrator reacts to. Produced by callbacks on other
/// threads, consumed only by the orchestrator loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCommand {
    WakeDetected,
    OfflineCommandDetected(i32),
    ResumeWakeWord,
    StopWakeWord,
    RestartWakeWord,
    StartFollowUpListening,
    TimerOrAlarmBeep,
    ConfirmBeep,
    ErrorBeep,
    ErrorResume,

    /// Local VAD confirmed speech.
    SpeechStart,
    /// Local VAD ended the utterance; capture has stopped.
    SpeechEnd { speech_detected: bool },
    /// The cloud decided the utterance is over.
    CloudSpeechEnd,
    ConversationResponse(String),
    Intent { name: String, payload: String },
    TtsAudio(TtsChunk),
    TtsComplete,
    CloudError { code: String, message: String },
    MusicStateChanged(bool),
    UpdateConfig(Box<PipelineConfig>),
    Shutdown,
}

impl PipelineCommand {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineCommand::WakeDetected => "wake_detected",
            PipelineCommand::OfflineCommandDetected(_) => "offline_command",
            PipelineCommand::ResumeWakeWord => "resume_wake_word",
            PipelineCommand::StopWakeWord => "stop_wake_word",
            PipelineCommand::RestartWakeWord => "restart_wake_word",
            PipelineCommand::StartFollowUpListening => "start_follow_up",
            PipelineCommand::TimerOrAlarmBeep => "alarm",
            PipelineCommand::ConfirmBeep => "confirm_beep",
            PipelineCommand::ErrorBeep => "error_beep",
            PipelineCommand::ErrorResume => "error_resume",
            PipelineCommand::SpeechStart => "speech_start",
            PipelineCommand::SpeechEnd { .. } => "speech_end",
            PipelineCommand::CloudSpeechEnd => "cloud_speech_end",
            PipelineCommand::ConversationResponse(_) => "conversation_response",
            PipelineCommand::Intent { .. } => "intent",
            PipelineCommand::TtsAudio(_) => "tts_audio",
            PipelineCommand::TtsComplete => "tts_complete",
            PipelineCommand::CloudError { .. } => "cloud_error",
            PipelineCommand::MusicStateChanged(_) => "music_state",
            PipelineCommand::UpdateConfig(_) => "update_config",
            PipelineCommand::Shutdown => "shutdown",
        }
    }
}
