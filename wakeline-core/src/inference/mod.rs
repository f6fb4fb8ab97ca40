//! Opaque inference backends: echo-cancelling front end and wake-word detector.
//!
//! The capture engine only depends on these traits. Whether the detector is a
//! neural model, an energy heuristic or a scripted test double is invisible to
//! the orchestration around it.
//!
//! Detector mutation (threshold updates from the orchestrator, per-frame
//! detection on the fetch worker) is serialised through `DetectorHandle`'s
//! `parking_lot::Mutex`.

pub mod energy;
pub mod stub;

pub use energy::EnergyWakeDetector;
pub use stub::{NeverWake, PassthroughFrontEnd, ReferenceSubtractFrontEnd};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::vad::FrameClass;

/// Result of running the wake-word / offline-command detector on one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Miss,
    /// The wake phrase was recognised.
    Wake,
    /// An on-device command was recognised; the id is opaque to the core.
    Command(i32),
}

/// Contract for wake-word backends.
pub trait WakeWordDetector: Send + 'static {
    /// Run detection over one processed frame.
    fn detect(&mut self, samples: &[i16]) -> Detection;

    /// Update the detection threshold in [0, 1].
    fn set_threshold(&mut self, threshold: f32);

    /// Drop accumulated state (called when wake-word mode is re-armed).
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `WakeWordDetector`.
#[derive(Clone)]
pub struct DetectorHandle(pub Arc<Mutex<dyn WakeWordDetector>>);

impl DetectorHandle {
    pub fn new<D: WakeWordDetector>(detector: D) -> Self {
        Self(Arc::new(Mutex::new(detector)))
    }
}

impl std::fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorHandle").finish_non_exhaustive()
    }
}

/// Per-frame annotations a fused front end may attach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontEndAnnotations {
    /// Neural VAD decision for this frame, if the front end computes one.
    pub vad: Option<FrameClass>,
}

/// The audio front end: turns raw microphone + speaker reference samples into
/// the processed mono stream the detectors consume.
pub trait FrontEnd: Send + 'static {
    /// Process one frame. `mic` and `reference` have equal length; the
    /// processed samples are written into `out` (cleared first).
    fn process(&mut self, mic: &[i16], reference: &[i16], out: &mut Vec<i16>)
        -> FrontEndAnnotations;

    fn reset(&mut self) {}
}
