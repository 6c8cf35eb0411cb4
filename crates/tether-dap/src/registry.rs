//! Request sequencing and in-flight request tracking.
//!
//! Every request gets a sequence number from a per-session counter and is
//! registered before its bytes are written. Responses take their entry out
//! of the registry, so a handler can run at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What to do when the response to a request arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHandler {
    /// `initialize`: store capabilities and submit the launch request.
    Initialize,
    /// `launch` / `attach`: mark the debuggee as launched.
    Launch,
    /// `configurationDone`: mark the session as configured.
    ConfigurationDone,
    /// `continue`, `next`, `stepIn`, `stepOut`, `goto`: report continuation.
    Resume,
    /// `disconnect`: report the server as disconnected.
    Disconnect,
    /// `threads`: deliver the thread list.
    Threads,
    /// `stackTrace`: deliver the frames of the requested thread.
    StackTrace,
}

impl ResponseHandler {
    /// Whether the handler has its own branch for `success = false`.
    ///
    /// Handlers without one rely solely on the error fan-out.
    pub fn handles_failure(self) -> bool {
        matches!(
            self,
            Self::Initialize
                | Self::Launch
                | Self::ConfigurationDone
                | Self::Threads
                | Self::StackTrace
        )
    }
}

/// A request awaiting its response.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    /// The command that was sent.
    pub command: String,
    /// The arguments that were sent.
    pub arguments: serde_json::Value,
    /// Handler to run on the response, if any.
    pub handler: Option<ResponseHandler>,
}

impl PendingRequest {
    pub fn new(
        command: impl Into<String>,
        arguments: serde_json::Value,
        handler: Option<ResponseHandler>,
    ) -> Self {
        Self {
            command: command.into(),
            arguments,
            handler,
        }
    }
}

/// Sequence counter plus the map of requests still waiting for a response.
#[derive(Debug, Default)]
pub struct SequenceRegistry {
    next: AtomicI64,
    pending: Mutex<HashMap<i64, PendingRequest>>,
}

impl SequenceRegistry {
    /// Create an empty registry whose first sequence number is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next sequence number.
    pub fn next_sequence(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Record a request under `seq`, replacing any stale entry.
    pub fn register(&self, seq: i64, request: PendingRequest) {
        if self.lock().insert(seq, request).is_some() {
            tracing::warn!("replaced pending request with duplicate seq {}", seq);
        }
    }

    /// Remove and return the request registered under `seq`.
    pub fn take(&self, seq: i64) -> Option<PendingRequest> {
        self.lock().remove(&seq)
    }

    /// Forget the request registered under `seq`. Returns whether it existed.
    pub fn cancel(&self, seq: i64) -> bool {
        self.take(seq).is_some()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    // The map holds plain data, so a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, HashMap<i64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
