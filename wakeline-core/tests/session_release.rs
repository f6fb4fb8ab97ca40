//! A conversation handle is released exactly once, however the turn ends.

mod common;

use std::thread;
use std::time::Duration;

use common::{wait_until, Harness, ScriptedCloud, WAIT};
use wakeline_core::pipeline::PipelineConfig;
use wakeline_core::{AssistantState, PipelineCommand};

fn listening(config: PipelineConfig) -> Harness {
    let h = Harness::new(ScriptedCloud::new(true), config);
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    h.orchestrator.post(PipelineCommand::WakeDetected);
    assert!(h.wait_for_state(AssistantState::Listening));
    h
}

fn assert_released_once(h: &Harness) {
    thread::sleep(Duration::from_millis(150));
    assert_eq!(h.cloud.ended(), vec!["conv-1".to_string()]);
    let d = h.orchestrator.diagnostics();
    assert_eq!((d.sessions_opened, d.sessions_released), (1, 1));
    assert_eq!(h.cloud.late_frames(), 0);
}

#[test]
fn end_of_stream_then_error() {
    let h = listening(PipelineConfig::default());
    h.orchestrator
        .post(PipelineCommand::SpeechEnd { speech_detected: true });
    assert!(h.wait_for_state(AssistantState::Processing));
    h.cloud.events().on_speech_end();
    h.cloud.events().on_error("transport", "connection reset");

    assert!(wait_until(WAIT, || h.orchestrator.diagnostics().error_recoveries == 1));
    assert_released_once(&h);
}

#[test]
fn error_then_end_of_stream() {
    let h = listening(PipelineConfig {
        error_cooldown_ms: 5_000,
        ..PipelineConfig::default()
    });
    h.cloud.events().on_error("auth", "token expired");
    assert!(h.wait_for_state(AssistantState::Suspended));

    h.cloud.events().on_speech_end();
    h.orchestrator
        .post(PipelineCommand::SpeechEnd { speech_detected: true });
    assert_released_once(&h);
    assert_eq!(h.orchestrator.state(), AssistantState::Suspended);
}

#[test]
fn timeout_then_late_events() {
    // Nothing reaches the microphone, so only the watchdog ends the turn.
    let h = listening(PipelineConfig {
        max_recording_ms: 1_000,
        error_cooldown_ms: 5_000,
        ..PipelineConfig::default()
    });
    // The counter moves before the error tone; the state settles after it.
    assert!(wait_until(Duration::from_secs(6), || h.orchestrator.state()
        == AssistantState::Suspended));
    assert_eq!(h.orchestrator.diagnostics().timeouts, 1);

    h.cloud.events().on_speech_end();
    h.cloud.events().on_error("transport", "late");
    assert_released_once(&h);
}

#[test]
fn shutdown_releases_an_open_session() {
    let h = listening(PipelineConfig::default());
    h.orchestrator.shutdown(WAIT).unwrap();
    assert_eq!(h.cloud.ended(), vec!["conv-1".to_string()]);
}
