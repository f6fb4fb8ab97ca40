mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use common::{drain_status, wait_until, Harness, ScriptedCloud, ToggleMusic, WAIT};
use wakeline_core::codec::CodecOp;
use wakeline_core::pipeline::PipelineConfig;
use wakeline_core::{AssistantState, AssistantStatus, CaptureMode, PipelineCommand, TtsChunk};

fn wake_and_listen(h: &Harness) {
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    assert!(h.orchestrator.post(PipelineCommand::WakeDetected));
    assert!(h.wait_for_state(AssistantState::Listening));
    assert_eq!(h.capture.mode(), CaptureMode::Recording);
}

#[test]
fn speech_then_silence_ends_the_utterance_once() {
    let h = Harness::new(ScriptedCloud::new(true), PipelineConfig::default());
    wake_and_listen(&h);

    h.mic.push_level(3_000, 2_500);
    h.mic.push_silence(2_000);

    assert!(h.wait_for_state(AssistantState::Processing));
    assert_eq!(h.cloud.ended(), vec!["conv-1".to_string()]);
    assert!(wait_until(WAIT, || h.capture.mode() == CaptureMode::Idle));

    // Streamed audio plus the two warm-up frames and the final frame the
    // detector stopped on; 1800 ms of silence lands the end near 4.3 s.
    let heard_ms = h.cloud.streamed_bytes() / 32 + 3 * 32;
    assert!(
        (4_250..=4_450).contains(&heard_ms),
        "utterance ended at {heard_ms} ms"
    );
    assert_eq!(h.capture.diagnostics().frames_dropped, 0);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.cloud.ended().len(), 1);
    assert_eq!(h.cloud.late_frames(), 0);
}

#[test]
fn unreachable_cloud_plays_one_error_tone_and_rearms() {
    let config = PipelineConfig {
        error_cooldown_ms: 300,
        ..PipelineConfig::default()
    };
    let h = Harness::new(ScriptedCloud::new(false), config);
    let mut status = h.orchestrator.subscribe_status();
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));

    let posted = Instant::now();
    assert!(h.orchestrator.post(PipelineCommand::WakeDetected));
    assert!(wait_until(WAIT, || h.cloud.attempts() == 1));
    assert!(wait_until(WAIT, || h.orchestrator.diagnostics().error_recoveries == 1));

    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    let rearmed = posted.elapsed();
    assert!(rearmed >= Duration::from_millis(300), "re-armed after {rearmed:?}");
    assert!(rearmed < Duration::from_secs(2), "re-armed after {rearmed:?}");
    assert!(wait_until(WAIT, || h.capture.mode() == CaptureMode::WakeWord));

    let d = h.orchestrator.diagnostics();
    assert_eq!(d.error_tones, 1);
    assert_eq!(d.sessions_opened, 0);
    assert!(h.cloud.ended().is_empty());

    let statuses: Vec<_> = drain_status(&mut status)
        .into_iter()
        .map(|e| e.status)
        .collect();
    let errors = statuses
        .iter()
        .filter(|s| **s == AssistantStatus::Error)
        .count();
    assert_eq!(errors, 1, "statuses: {statuses:?}");
    assert_eq!(statuses.last(), Some(&AssistantStatus::Idle));
}

#[test]
fn empty_tts_with_question_enters_follow_up() {
    let h = Harness::new(ScriptedCloud::new(true), PipelineConfig::default());
    wake_and_listen(&h);

    h.orchestrator
        .post(PipelineCommand::SpeechEnd { speech_detected: true });
    assert!(h.wait_for_state(AssistantState::Processing));

    let events = h.cloud.events();
    events.on_conversation_response("Which room should I turn on?");
    events.on_tts_audio(TtsChunk::End);

    assert!(h.wait_for_state(AssistantState::FollowUpListening));
    assert!(wait_until(WAIT, || h.capture.mode() == CaptureMode::Recording));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(h.tts_completions.load(Ordering::SeqCst), 1);
    assert_eq!(h.cloud.started(), 2);
    assert_eq!(h.cloud.ended(), vec!["conv-1".to_string()]);
}

#[test]
fn statement_response_returns_to_wake_word() {
    let h = Harness::new(ScriptedCloud::new(true), PipelineConfig::default());
    wake_and_listen(&h);
    h.orchestrator
        .post(PipelineCommand::SpeechEnd { speech_detected: true });
    assert!(h.wait_for_state(AssistantState::Processing));

    let events = h.cloud.events();
    events.on_conversation_response("The lights are on.");
    events.on_tts_audio(TtsChunk::Audio(vec![0u8; 3_200]));
    events.on_tts_audio(TtsChunk::End);

    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    assert!(wait_until(WAIT, || h.capture.mode() == CaptureMode::WakeWord));
    assert_eq!(h.tts_completions.load(Ordering::SeqCst), 1);
    assert!(h.sim.bytes_written() >= 3_200);
}

#[test]
fn empty_response_skips_speaking() {
    let h = Harness::new(ScriptedCloud::new(true), PipelineConfig::default());
    wake_and_listen(&h);
    h.orchestrator
        .post(PipelineCommand::SpeechEnd { speech_detected: true });
    assert!(h.wait_for_state(AssistantState::Processing));

    h.cloud.events().on_conversation_response("   ");
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    assert_eq!(h.tts_completions.load(Ordering::SeqCst), 0);
}

#[test]
fn no_speech_goes_straight_back_to_wake_word() {
    let h = Harness::new(ScriptedCloud::new(true), PipelineConfig::default());
    wake_and_listen(&h);
    h.orchestrator
        .post(PipelineCommand::SpeechEnd { speech_detected: false });
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    assert_eq!(h.cloud.ended().len(), 1);
}

#[test]
fn offline_command_is_published_without_the_cloud() {
    let h = Harness::new(ScriptedCloud::new(true), PipelineConfig::default());
    let mut actuator = h.orchestrator.subscribe_actuator();
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));

    h.orchestrator
        .post(PipelineCommand::OfflineCommandDetected(7));
    let mut got = None;
    assert!(wait_until(WAIT, || {
        if let Ok(ev) = actuator.try_recv() {
            got = Some(ev.command_id);
        }
        got.is_some()
    }));
    assert_eq!(got, Some(7));
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    assert_eq!(h.cloud.attempts(), 0);
}

#[test]
fn alarm_while_listening_is_held_until_the_turn_ends() {
    let config = PipelineConfig {
        alarm_volume: 90,
        ..PipelineConfig::default()
    };
    let h = Harness::new(ScriptedCloud::new(true), config);
    wake_and_listen(&h);

    h.orchestrator.post(PipelineCommand::TimerOrAlarmBeep);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.orchestrator.state(), AssistantState::Listening);
    assert!(!h.sim.ops().contains(&CodecOp::Volume(90)));

    h.orchestrator
        .post(PipelineCommand::SpeechEnd { speech_detected: false });
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));

    let ops = h.sim.ops();
    let boosted = ops.iter().position(|op| *op == CodecOp::Volume(90));
    let restored = ops.iter().rposition(|op| *op == CodecOp::Volume(40));
    assert!(boosted.is_some(), "ops: {ops:?}");
    assert!(restored > boosted, "volume not restored after alarm");
    assert_eq!(h.codec.volume(), 40);
}

#[test]
fn music_defers_wake_word_until_it_stops() {
    let h = Harness::with_music(
        ScriptedCloud::new(true),
        PipelineConfig::default(),
        ToggleMusic::default(),
    );
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));

    h.music.playing.store(true, Ordering::SeqCst);
    h.orchestrator.post(PipelineCommand::MusicStateChanged(true));
    assert!(h.wait_for_state(AssistantState::Suspended));
    assert!(wait_until(WAIT, || h.capture.mode() == CaptureMode::Idle));

    // Still playing: a resume request stays deferred.
    h.orchestrator.post(PipelineCommand::ResumeWakeWord);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.orchestrator.state(), AssistantState::Suspended);

    h.music.playing.store(false, Ordering::SeqCst);
    h.orchestrator.post(PipelineCommand::MusicStateChanged(false));
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    assert!(wait_until(WAIT, || h.capture.mode() == CaptureMode::WakeWord));
}

#[test]
fn stopped_wake_word_stays_stopped_when_music_ends() {
    let h = Harness::with_music(
        ScriptedCloud::new(true),
        PipelineConfig::default(),
        ToggleMusic::default(),
    );
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));

    h.orchestrator.post(PipelineCommand::StopWakeWord);
    assert!(h.wait_for_state(AssistantState::Suspended));
    h.orchestrator.post(PipelineCommand::MusicStateChanged(false));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(h.orchestrator.state(), AssistantState::Suspended);
    assert_eq!(h.capture.mode(), CaptureMode::Idle);

    h.orchestrator.post(PipelineCommand::RestartWakeWord);
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    assert!(wait_until(WAIT, || h.capture.mode() == CaptureMode::WakeWord));
}

#[test]
fn music_is_paused_for_speech_and_resumed_after() {
    let h = Harness::new(ScriptedCloud::new(true), PipelineConfig::default());
    wake_and_listen(&h);
    h.orchestrator
        .post(PipelineCommand::SpeechEnd { speech_detected: true });
    assert!(h.wait_for_state(AssistantState::Processing));

    // Music started from another surface while the request was in flight.
    h.music.playing.store(true, Ordering::SeqCst);
    h.cloud.events().on_tts_audio(TtsChunk::Audio(vec![0u8; 640]));
    h.cloud.events().on_tts_audio(TtsChunk::End);

    // After playback the music comes back, so wake word stays deferred.
    assert!(wait_until(WAIT, || h.music.resumes.load(Ordering::SeqCst) == 1));
    assert_eq!(h.music.pauses.load(Ordering::SeqCst), 1);
    assert!(h.wait_for_state(AssistantState::Suspended));
}

#[test]
fn threshold_update_is_applied() {
    let h = Harness::new(ScriptedCloud::new(true), PipelineConfig::default());
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));

    let config = PipelineConfig {
        wake_threshold: 0.8,
        ..h.orchestrator.config()
    };
    h.orchestrator.update_config(config).unwrap();
    assert!(wait_until(WAIT, || (h.orchestrator.config().wake_threshold - 0.8).abs()
        < f32::EPSILON));
    assert!(h.wait_for_state(AssistantState::WakeWordArmed));
    assert!(wait_until(WAIT, || h.capture.mode() == CaptureMode::WakeWord));
}

#[test]
fn heartbeat_ticks_while_idle() {
    let h = Harness::new(ScriptedCloud::new(true), PipelineConfig::default());
    assert!(wait_until(Duration::from_secs(3), || h
        .orchestrator
        .diagnostics()
        .heartbeats
        >= 1));
}
