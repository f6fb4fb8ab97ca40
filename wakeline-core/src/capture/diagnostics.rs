use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the capture workers.
#[derive(Debug, Default)]
pub struct CaptureDiagnostics {
    pub sessions_started: AtomicU64,
    pub frames_read: AtomicU64,
    /// Frames the feed worker discarded because the fetch worker was behind.
    pub frames_dropped: AtomicU64,
    pub read_errors: AtomicU64,
    pub allocation_failures: AtomicU64,
    pub frames_streamed: AtomicU64,
    pub warmup_frames_skipped: AtomicU64,
    pub vad_frames: AtomicU64,
    pub wake_hits: AtomicU64,
    /// Hits ignored because this session already reported one.
    pub debounced_hits: AtomicU64,
}

impl CaptureDiagnostics {
    pub fn snapshot(&self) -> CaptureDiagnosticsSnapshot {
        CaptureDiagnosticsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            frames_streamed: self.frames_streamed.load(Ordering::Relaxed),
            warmup_frames_skipped: self.warmup_frames_skipped.load(Ordering::Relaxed),
            vad_frames: self.vad_frames.load(Ordering::Relaxed),
            wake_hits: self.wake_hits.load(Ordering::Relaxed),
            debounced_hits: self.debounced_hits.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDiagnosticsSnapshot {
    pub sessions_started: u64,
    pub frames_read: u64,
    pub frames_dropped: u64,
    pub read_errors: u64,
    pub allocation_failures: u64,
    pub frames_streamed: u64,
    pub warmup_frames_skipped: u64,
    pub vad_frames: u64,
    pub wake_hits: u64,
    pub debounced_hits: u64,
}
