//! Offline stand-in for the cloud speech pipeline.
//!
//! Accepts uploads, and when a stream ends answers with a fixed text
//! response plus a short synthetic "voice" (a tone) as TTS audio. Streams
//! that carried no audio get an empty response.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};
use wakeline_core::{
    pipeline::tone::{synthesize, Tone},
    CloudClient, CloudEvents, Result, SessionHandle, SessionToken, TtsChunk, WakelineError,
};

/// Simulated round-trip before the answer starts arriving.
const THINK_TIME: Duration = Duration::from_millis(250);
const TTS_CHUNK_BYTES: usize = 4_096;
const VOICE: Tone = Tone::new(220, 0, 30);

struct Reply {
    session: String,
    heard_bytes: u64,
}

pub struct DemoCloud {
    current: Mutex<Option<(String, u64)>>,
    next_id: AtomicU64,
    replies: Sender<Reply>,
    rx: Mutex<Option<Receiver<Reply>>>,
    response: String,
    speech_ms: u32,
}

impl DemoCloud {
    pub fn new(response: String, speech_ms: u32) -> Self {
        let (replies, rx) = unbounded();
        Self {
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            replies,
            rx: Mutex::new(Some(rx)),
            response,
            speech_ms,
        }
    }
}

impl CloudClient for DemoCloud {
    fn start_conversation(&self) -> Option<SessionHandle> {
        let id = format!("demo-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(session = id.as_str(), "demo conversation opened");
        *self.current.lock() = Some((id.clone(), 0));
        Some(SessionHandle::new(id))
    }

    fn stream_audio(&self, session: &SessionToken, pcm: &[u8]) -> Result<()> {
        match self.current.lock().as_mut() {
            Some((id, bytes)) if id.as_str() == session.id() => {
                *bytes += pcm.len() as u64;
                Ok(())
            }
            _ => Err(WakelineError::Cloud {
                code: "unknown_session".into(),
                message: format!("no open stream for {}", session.id()),
            }),
        }
    }

    fn end_stream(&self, session: SessionHandle) {
        let heard_bytes = match self.current.lock().take() {
            Some((id, bytes)) if id.as_str() == session.id() => bytes,
            _ => 0,
        };
        debug!(session = session.id(), heard_bytes, "demo stream ended");
        let _ = self.replies.send(Reply {
            session: session.id().to_owned(),
            heard_bytes,
        });
    }

    fn register_events(&self, events: CloudEvents) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        let response = self.response.clone();
        let speech_ms = self.speech_ms;
        let spawned = thread::Builder::new()
            .name("demo-cloud".into())
            .spawn(move || respond(rx, events, response, speech_ms));
        if let Err(e) = spawned {
            tracing::error!("failed to start demo cloud responder: {e}");
        }
    }
}

fn respond(rx: Receiver<Reply>, events: CloudEvents, response: String, speech_ms: u32) {
    while let Ok(reply) = rx.recv() {
        thread::sleep(THINK_TIME);
        if reply.heard_bytes == 0 {
            info!(session = reply.session.as_str(), "demo cloud heard nothing");
            events.on_conversation_response("");
            continue;
        }
        info!(
            session = reply.session.as_str(),
            heard_ms = reply.heard_bytes / 32,
            "demo cloud answering: {response}"
        );
        events.on_conversation_response(response.clone());
        if speech_ms > 0 {
            let voice = Tone {
                duration_ms: speech_ms,
                ..VOICE
            };
            let pcm: Vec<u8> = synthesize(voice, 16_000)
                .iter()
                .flat_map(|s| s.to_le_bytes())
                .collect();
            for chunk in pcm.chunks(TTS_CHUNK_BYTES) {
                events.on_tts_audio(TtsChunk::Audio(chunk.to_vec()));
            }
        }
        events.on_tts_audio(TtsChunk::End);
    }
}
