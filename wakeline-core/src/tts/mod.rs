//! Speech-synthesis playback.
//!
//! The cloud client hands TTS audio to a [`TtsPlayer`] chunk by chunk and
//! closes the stream with [`TtsChunk::End`]. The player signals completion
//! exactly once per terminator, whether or not any audio arrived and whether
//! or not playback succeeded, so the orchestrator can always move on.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    codec::{CodecArbiter, CodecFormat},
    error::{Result, WakelineError},
};

/// Accumulated audio per utterance.
pub const TTS_BUFFER_BYTES: usize = 128 * 1024;
/// Chunks waiting for the player worker.
pub const TTS_QUEUE_DEPTH: usize = 10;

const CHUNK_SEND_TIMEOUT: Duration = Duration::from_millis(100);
const END_SEND_TIMEOUT: Duration = Duration::from_millis(500);
const WRITE_BLOCK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtsChunk {
    Audio(Vec<u8>),
    /// End of the utterance's audio stream.
    End,
}

pub type CompletionCallback = Box<dyn Fn() + Send + Sync + 'static>;

pub trait TtsPlayer: Send + Sync + 'static {
    /// Queue a chunk. Empty audio is treated as a terminator.
    fn feed(&self, chunk: TtsChunk) -> Result<()>;

    /// Replace the completion callback.
    fn register_complete_callback(&self, callback: CompletionCallback);

    /// Abort playback in progress. Completion still fires.
    fn cancel(&self) {}
}

enum PlayerMsg {
    Audio(Vec<u8>),
    /// Terminator of utterance number `utterance` (1-based, in feed order).
    End { utterance: u64 },
    Shutdown,
}

/// Which utterances a `cancel` applies to.
///
/// `fed` counts terminators handed to the worker; `cancel` marks every
/// utterance up to that count. An utterance that starts after the cancel
/// has a higher number and plays normally.
#[derive(Debug, Default)]
struct Cancellation {
    fed: AtomicU64,
    cancelled_through: AtomicU64,
}

impl Cancellation {
    fn is_cancelled(&self, utterance: u64) -> bool {
        utterance <= self.cancelled_through.load(Ordering::Acquire)
    }
}

type SharedCallback = Arc<RwLock<Option<CompletionCallback>>>;

fn fire(callback: &SharedCallback) {
    if let Some(cb) = callback.read().as_ref() {
        cb();
    }
}

/// Plays raw little-endian PCM in a fixed format through the codec arbiter.
pub struct PcmTtsPlayer {
    tx: Sender<PlayerMsg>,
    callback: SharedCallback,
    cancel: Arc<Cancellation>,
    worker: Option<JoinHandle<()>>,
}

impl PcmTtsPlayer {
    pub fn new(codec: Arc<CodecArbiter>, format: CodecFormat) -> Result<Self> {
        let (tx, rx) = bounded(TTS_QUEUE_DEPTH);
        let callback: SharedCallback = Arc::new(RwLock::new(None));
        let cancel = Arc::new(Cancellation::default());

        let worker = {
            let callback = Arc::clone(&callback);
            let cancel = Arc::clone(&cancel);
            thread::Builder::new()
                .name("tts-player".into())
                .spawn(move || player_loop(rx, codec, format, callback, cancel))?
        };
        info!(?format, "tts player started");

        Ok(Self {
            tx,
            callback,
            cancel,
            worker: Some(worker),
        })
    }
}

impl TtsPlayer for PcmTtsPlayer {
    fn feed(&self, chunk: TtsChunk) -> Result<()> {
        match chunk {
            TtsChunk::Audio(data) if !data.is_empty() => {
                match self
                    .tx
                    .send_timeout(PlayerMsg::Audio(data), CHUNK_SEND_TIMEOUT)
                {
                    Ok(()) => Ok(()),
                    Err(SendTimeoutError::Timeout(_)) => {
                        warn!("tts queue full, chunk dropped");
                        Err(WakelineError::QueueFull)
                    }
                    Err(SendTimeoutError::Disconnected(_)) => Err(WakelineError::QueueClosed),
                }
            }
            TtsChunk::Audio(_) | TtsChunk::End => {
                let utterance = self.cancel.fed.fetch_add(1, Ordering::AcqRel) + 1;
                if let Err(e) = self
                    .tx
                    .send_timeout(PlayerMsg::End { utterance }, END_SEND_TIMEOUT)
                {
                    // Nobody may be left waiting on a completion that never comes.
                    error!("failed to queue tts terminator: {e}");
                    fire(&self.callback);
                }
                Ok(())
            }
        }
    }

    fn register_complete_callback(&self, callback: CompletionCallback) {
        *self.callback.write() = Some(callback);
    }

    fn cancel(&self) {
        let through = self.cancel.fed.load(Ordering::Acquire);
        self.cancel
            .cancelled_through
            .fetch_max(through, Ordering::AcqRel);
    }
}

impl Drop for PcmTtsPlayer {
    fn drop(&mut self) {
        self.cancel
            .cancelled_through
            .store(u64::MAX, Ordering::Release);
        let _ = self.tx.send_timeout(PlayerMsg::Shutdown, END_SEND_TIMEOUT);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("tts player worker panicked");
            }
        }
    }
}

fn player_loop(
    rx: Receiver<PlayerMsg>,
    codec: Arc<CodecArbiter>,
    format: CodecFormat,
    callback: SharedCallback,
    cancel: Arc<Cancellation>,
) {
    let mut buffer: Vec<u8> = Vec::new();
    if buffer.try_reserve_exact(TTS_BUFFER_BYTES).is_err() {
        error!("failed to allocate tts buffer");
        return;
    }

    while let Ok(msg) = rx.recv() {
        match msg {
            PlayerMsg::Shutdown => break,
            PlayerMsg::Audio(data) => {
                if buffer.len() + data.len() <= TTS_BUFFER_BYTES {
                    buffer.extend_from_slice(&data);
                    debug!(chunk = data.len(), total = buffer.len(), "tts audio buffered");
                } else {
                    warn!(
                        buffered = buffer.len(),
                        dropped = data.len(),
                        "tts buffer full, dropping chunk"
                    );
                }
            }
            PlayerMsg::End { utterance } => {
                if buffer.is_empty() {
                    info!(utterance, "tts stream ended without audio");
                } else if let Err(e) = play(&codec, format, &buffer, || {
                    cancel.is_cancelled(utterance)
                }) {
                    error!(utterance, "tts playback failed: {e}");
                }
                buffer.clear();
                fire(&callback);
            }
        }
    }
    debug!("tts player stopped");
}

fn play(
    codec: &CodecArbiter,
    format: CodecFormat,
    pcm: &[u8],
    cancelled: impl Fn() -> bool,
) -> Result<()> {
    info!(bytes = pcm.len(), "playing tts audio");
    codec.set_mute(false)?;
    codec.open_playback_only(format)?;
    for block in pcm.chunks(WRITE_BLOCK) {
        if cancelled() {
            info!("tts playback cancelled");
            break;
        }
        codec.write(block)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ChannelMode, CodecOp, SimCodec};
    use std::sync::atomic::AtomicUsize;

    const TTS_FORMAT: CodecFormat = CodecFormat::new(24_000, 16, ChannelMode::Mono);

    fn player() -> (PcmTtsPlayer, Arc<SimCodec>, Arc<AtomicUsize>, Receiver<()>) {
        player_on(SimCodec::new())
    }

    fn player_on(sim: SimCodec) -> (PcmTtsPlayer, Arc<SimCodec>, Arc<AtomicUsize>, Receiver<()>) {
        let sim = Arc::new(sim);
        let arbiter = Arc::new(CodecArbiter::new(sim.clone()));
        let player = PcmTtsPlayer::new(arbiter, TTS_FORMAT).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = bounded(4);
        let c = Arc::clone(&count);
        player.register_complete_callback(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        }));
        (player, sim, count, done_rx)
    }

    #[test]
    fn terminator_without_audio_still_completes_once() {
        let (player, sim, count, done) = player();
        player.feed(TtsChunk::End).unwrap();
        done.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(done.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sim.bytes_written(), 0);
    }

    #[test]
    fn buffered_audio_is_played_on_terminator() {
        let (player, sim, count, done) = player();
        player.feed(TtsChunk::Audio(vec![1u8; 6000])).unwrap();
        player.feed(TtsChunk::Audio(vec![2u8; 2000])).unwrap();
        player.feed(TtsChunk::End).unwrap();
        done.recv_timeout(Duration::from_secs(2)).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sim.bytes_written(), 8000);
        let ops = sim.ops();
        assert!(ops.contains(&CodecOp::OpenPlayback(TTS_FORMAT)));
        assert!(ops.contains(&CodecOp::Mute(false)));
    }

    #[test]
    fn empty_audio_chunk_acts_as_terminator() {
        let (player, _sim, count, done) = player();
        player.feed(TtsChunk::Audio(Vec::new())).unwrap();
        done.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_after_completion_does_not_mute_the_next_reply() {
        let (player, sim, count, done) = player();
        player.feed(TtsChunk::End).unwrap();
        done.recv_timeout(Duration::from_secs(2)).unwrap();
        player.cancel();

        player.feed(TtsChunk::Audio(vec![3u8; 8000])).unwrap();
        player.feed(TtsChunk::End).unwrap();
        done.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(sim.bytes_written(), 8000);
    }

    #[test]
    fn cancel_stops_the_reply_in_flight_and_still_completes() {
        // One second of audio; writes block for as long as they play.
        let (player, sim, count, done) = player_on(SimCodec::realtime());
        player.feed(TtsChunk::Audio(vec![4u8; 48_000])).unwrap();
        player.feed(TtsChunk::End).unwrap();
        player.cancel();
        done.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(sim.bytes_written() <= WRITE_BLOCK as u64);
    }

    #[test]
    fn overflow_is_dropped_not_played() {
        let (player, sim, _count, done) = player();
        player.feed(TtsChunk::Audio(vec![0u8; TTS_BUFFER_BYTES])).unwrap();
        player.feed(TtsChunk::Audio(vec![0u8; 10])).unwrap();
        player.feed(TtsChunk::End).unwrap();
        done.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(sim.bytes_written(), TTS_BUFFER_BYTES as u64);
    }
}
