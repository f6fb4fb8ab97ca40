//! Cloud conversation handles.
//!
//! A [`SessionHandle`] is created by `CloudClient::start_conversation` and
//! released by passing it back to `CloudClient::end_stream`, which consumes
//! it. It is neither `Clone` nor `Copy`, so a second release does not
//! compile. Streaming code holds a cheap [`SessionToken`] instead.

use std::sync::Arc;

use tracing::debug;

#[derive(Debug, PartialEq, Eq)]
pub struct SessionHandle {
    id: Arc<str>,
}

impl SessionHandle {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-owning reference for `stream_audio`.
    pub fn token(&self) -> SessionToken {
        SessionToken(Arc::clone(&self.id))
    }
}

/// Identifies a session for streaming. Holding one does not keep the
/// session open.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(Arc<str>);

impl SessionToken {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// The orchestrator's single owner slot for the in-flight session.
#[derive(Debug, Default)]
pub struct SessionSlot {
    current: Option<SessionHandle>,
    opened: u64,
    released: u64,
}

impl SessionSlot {
    /// Store a freshly started session and return its token.
    ///
    /// Returns the previous handle if one was still held; the caller must
    /// release it.
    pub fn install(&mut self, handle: SessionHandle) -> (SessionToken, Option<SessionHandle>) {
        let token = handle.token();
        self.opened += 1;
        debug!(session = handle.id(), "session opened");
        (token, self.current.replace(handle))
    }

    /// Move the handle out for release. Yields it at most once.
    pub fn take(&mut self) -> Option<SessionHandle> {
        let handle = self.current.take();
        if let Some(h) = handle.as_ref() {
            self.released += 1;
            debug!(session = h.id(), "session released");
        }
        handle
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.current.as_ref().map(SessionHandle::token)
    }

    pub fn opened(&self) -> u64 {
        self.opened
    }

    pub fn released(&self) -> u64 {
        self.released
    }
}
