use thiserror::Error;

/// All errors produced by wakeline-core.
#[derive(Debug, Error)]
pub enum WakelineError {
    #[error("a capture mode is already active")]
    AlreadyActive,

    #[error("capture is not active")]
    NotActive,

    #[error("capture engine is not initialised")]
    NotInitialized,

    #[error("timed out waiting for capture workers to exit")]
    TimedOut,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("codec path is not open: {0}")]
    CodecClosed(&'static str),

    #[error("audio I/O error: {0}")]
    AudioIo(String),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("cloud pipeline error {code}: {message}")]
    Cloud { code: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("command queue is full")]
    QueueFull,

    #[error("command queue is closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WakelineError {
    /// Transient hardware errors are retried inside the workers and never
    /// surfaced to callers.
    pub fn is_transient(&self) -> bool {
        matches!(self, WakelineError::AudioIo(_))
    }
}

pub type Result<T> = std::result::Result<T, WakelineError>;
