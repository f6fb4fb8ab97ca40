use serde::{Deserialize, Serialize};

use crate::ipc::events::AssistantStatus;

/// Where the assistant is in the conversation cycle.
///
/// ```text
///             ┌──────────── TtsComplete (no question) ───────────────┐
///             ▼                                                      │
/// WakeWordArmed ─wake─► Listening ─speech end─► Processing ─tts end─► Speaking
///   ▲    │                  ▲                                        │
///   │    └─music─► Suspended └──────── FollowUpListening ◄─ question ┘
///   └── alarm done ◄── Alerting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssistantState {
    /// Capture idle: before start, deferred for music, or cooling down after
    /// an error.
    Suspended,
    WakeWordArmed,
    Listening,
    FollowUpListening,
    Processing,
    Speaking,
    Alerting,
}

impl AssistantState {
    /// In the middle of a conversation turn.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            AssistantState::Listening
                | AssistantState::FollowUpListening
                | AssistantState::Processing
                | AssistantState::Speaking
        )
    }

    pub fn is_listening(self) -> bool {
        matches!(
            self,
            AssistantState::Listening | AssistantState::FollowUpListening
        )
    }

    /// Status shown for this state.
    pub fn status(self) -> AssistantStatus {
        match self {
            AssistantState::Suspended | AssistantState::WakeWordArmed => AssistantStatus::Idle,
            AssistantState::Listening | AssistantState::FollowUpListening => {
                AssistantStatus::Listening
            }
            AssistantState::Processing => AssistantStatus::Processing,
            AssistantState::Speaking | AssistantState::Alerting => AssistantStatus::Speaking,
        }
    }
}
