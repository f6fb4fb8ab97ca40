//! Broadcast event types.
//!
//! | Event | Subscribe with |
//! |-------|----------------|
//! | `StatusEvent` | `Orchestrator::subscribe_status` |
//! | `ActuatorEvent` | `Orchestrator::subscribe_actuator` |
//!
//! Publishing never blocks: a lagging subscriber loses old events, it does
//! not stall the orchestrator.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status events
// ---------------------------------------------------------------------------

/// Emitted at every assistant state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub status: AssistantStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Coarse assistant status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantStatus {
    /// Waiting for the wake word (or suspended for music).
    Idle,
    /// Microphone open for an utterance.
    Listening,
    /// Utterance sent, waiting for the response.
    Processing,
    /// Playing the response.
    Speaking,
    /// Something failed; recovery is in progress.
    Error,
}

// ---------------------------------------------------------------------------
// Actuator events
// ---------------------------------------------------------------------------

/// An on-device command was recognised. The id → action mapping belongs to
/// the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorEvent {
    pub seq: u64,
    pub command_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = StatusEvent {
            seq: 4,
            status: AssistantStatus::Processing,
            detail: None,
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["status"], "processing");
        assert!(json["detail"].is_null());

        let round_trip: StatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn error_status_carries_detail() {
        let event = StatusEvent {
            seq: 9,
            status: AssistantStatus::Error,
            detail: Some("cloud unreachable".into()),
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"], "cloud unreachable");
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<AssistantStatus>(r#""Speaking""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn actuator_event_uses_camel_case() {
        let event = ActuatorEvent {
            seq: 1,
            command_id: 12,
        };
        let json = serde_json::to_value(event).expect("serialize actuator event");
        assert_eq!(json["commandId"], 12);
        let round_trip: ActuatorEvent =
            serde_json::from_value(json).expect("deserialize actuator event");
        assert_eq!(round_trip, event);
    }
}
