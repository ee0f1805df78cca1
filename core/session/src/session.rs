//! Session trait and transcript plumbing.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cancel::CancelCallback;
use crate::features::Capabilities;
use skiff_common::Result;

/// Connectivity state of a session's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl SessionState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Closing => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closing,
            _ => Self::Disconnected,
        }
    }
}

/// Identity of the remote end a session talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub protocol: String,
    pub hostname: String,
    pub username: Option<String>,
}

impl Host {
    pub fn new(protocol: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            hostname: hostname.into(),
            username: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(user) => write!(f, "{}://{}@{}", self.protocol, user, self.hostname),
            None => write!(f, "{}://{}", self.protocol, self.hostname),
        }
    }
}

/// Receives protocol-level lines a session exchanges with its backend.
pub trait TranscriptListener: Send + Sync {
    /// `request` is true for outgoing lines, false for responses.
    fn log(&self, request: bool, message: &str);
}

/// Forwards transcript lines to `tracing` at TRACE level.
#[derive(Debug, Default)]
pub struct TracingTranscript;

impl TranscriptListener for TracingTranscript {
    fn log(&self, request: bool, message: &str) {
        let direction = if request { ">" } else { "<" };
        trace!(direction, "{}", message);
    }
}

/// Listener list shared by the bundled session implementations.
#[derive(Default)]
pub(crate) struct Listeners {
    inner: Mutex<Vec<Arc<dyn TranscriptListener>>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn TranscriptListener>) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            guard.push(listener);
        }
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn TranscriptListener>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn log(&self, request: bool, message: &str) {
        let listeners = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.log(request, message);
        }
    }
}

/// An opaque handle to a remote backend.
///
/// One session may serve many concurrent operations; callers bound that
/// concurrency externally. Implementations must make `open` and `close`
/// idempotent.
#[async_trait]
pub trait Session: Send + Sync {
    /// Remote identity.
    fn host(&self) -> &Host;

    /// Current transport state.
    fn state(&self) -> SessionState;

    /// Open the transport.
    ///
    /// # Errors
    /// - `Cancelled` if `cancel` fires while connecting
    /// - Network or authorization errors from the backend
    async fn open(&self, cancel: &dyn CancelCallback) -> Result<()>;

    /// Close the transport. The session can be opened again afterwards.
    async fn close(&self) -> Result<()>;

    /// Native storage operations this backend implements.
    fn capabilities(&self) -> Capabilities;

    fn add_listener(&self, listener: Arc<dyn TranscriptListener>);

    fn remove_listener(&self, listener: &Arc<dyn TranscriptListener>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl TranscriptListener for Counting {
        fn log(&self, _request: bool, _message: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_host_display() {
        let host = Host::new("memory", "example").with_username("alice");
        assert_eq!(host.to_string(), "memory://alice@example");
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Closing,
        ] {
            assert_eq!(SessionState::from_u8(state.to_u8()), state);
        }
    }

    #[test]
    fn test_listeners_dedupe_and_remove() {
        let listeners = Listeners::default();
        let counting = Arc::new(Counting::default());
        let listener: Arc<dyn TranscriptListener> = counting.clone();

        listeners.add(listener.clone());
        listeners.add(listener.clone());
        assert_eq!(listeners.len(), 1);

        listeners.log(true, "LIST /");
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);

        listeners.remove(&listener);
        listeners.log(true, "LIST /");
        assert_eq!(listeners.len(), 0);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
