//! # wakeline-core
//!
//! Concurrency core of an on-device voice assistant: capture, voice activity,
//! wake word, shared-codec arbitration and conversation orchestration.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ─► capture-feed ─► capture-fetch ─► WakeSink / RecordingSink
//!      ReferenceReader ─┘  (front end)   (AGC, detector, VAD)       │
//!            ▲                                                      ▼
//!   CodecArbiter::write ◄── tones / TTS ◄──────── Orchestrator (command queue)
//!                                                       │
//!                                     broadcast::Sender<StatusEvent / ActuatorEvent>
//! ```
//!
//! Hardware, cloud, TTS decoding and music are traits; the crate ships
//! simulated implementations for tests and the host binary.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod inference;
pub mod ipc;
pub mod pipeline;
pub mod tts;
pub mod vad;

// Convenience re-exports for downstream crates
pub use capture::{CaptureConfig, CaptureEngine, CaptureMode, CaptureResources};
pub use codec::{CodecArbiter, CodecDriver, CodecFormat};
pub use error::{Result, WakelineError};
pub use inference::{DetectorHandle, FrontEnd, WakeWordDetector};
pub use ipc::events::{ActuatorEvent, AssistantStatus, StatusEvent};
pub use pipeline::{
    AssistantState, CloudClient, CloudEvents, Collaborators, MusicPlayer, Orchestrator,
    PipelineCommand, PipelineConfig, SessionHandle, SessionToken,
};
pub use tts::{PcmTtsPlayer, TtsChunk, TtsPlayer};
pub use vad::{Vad, VadConfig, VadState};
