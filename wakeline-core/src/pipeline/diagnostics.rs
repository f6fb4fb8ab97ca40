use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the orchestrator loop and its posters.
#[derive(Debug, Default)]
pub struct OrchestratorDiagnostics {
    /// Liveness ticks from the idle queue wait.
    pub heartbeats: AtomicU64,
    pub commands_handled: AtomicU64,
    /// Commands ignored because they are not valid in the current state.
    pub commands_ignored: AtomicU64,
    /// Posts that found the queue full.
    pub commands_dropped: AtomicU64,
    pub sessions_opened: AtomicU64,
    pub sessions_released: AtomicU64,
    pub stream_errors: AtomicU64,
    pub error_recoveries: AtomicU64,
    pub timeouts: AtomicU64,
    pub tones_played: AtomicU64,
    pub error_tones: AtomicU64,
}

impl OrchestratorDiagnostics {
    pub fn snapshot(&self) -> OrchestratorDiagnosticsSnapshot {
        OrchestratorDiagnosticsSnapshot {
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
            commands_ignored: self.commands_ignored.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_released: self.sessions_released.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            error_recoveries: self.error_recoveries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            tones_played: self.tones_played.load(Ordering::Relaxed),
            error_tones: self.error_tones.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorDiagnosticsSnapshot {
    pub heartbeats: u64,
    pub commands_handled: u64,
    pub commands_ignored: u64,
    pub commands_dropped: u64,
    pub sessions_opened: u64,
    pub sessions_released: u64,
    pub stream_errors: u64,
    pub error_recoveries: u64,
    pub timeouts: u64,
    pub tones_played: u64,
    pub error_tones: u64,
}
