//! Notification fan-out to session subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crate::capabilities::Capabilities;
use crate::protocol::{
    BreakpointEvent, ContinuedEvent, ErrorMessage, ModuleEvent, Output, ProcessInfo,
    StackTraceInfo, StoppedEvent, Thread, ThreadEvent,
};
use crate::state::SessionState;

/// A consumer of session notifications.
///
/// Every method has a no-op default; implement the ones you care about.
/// Callbacks run on the transport's read path, so keep them short. They
/// may issue new commands on the session.
#[allow(unused_variables)]
pub trait Subscriber: Send + Sync {
    /// The adapter answered the handshake.
    fn capabilities_received(&self, capabilities: &Arc<Capabilities>) {}
    /// The launch/attach request succeeded.
    fn launched(&self) {}
    fn output_produced(&self, output: &Output) {}
    fn debuggee_exited(&self, exit_code: i64) {}
    fn debugging_process(&self, process: &ProcessInfo) {}
    fn thread_changed(&self, event: &ThreadEvent) {}
    fn debuggee_stopped(&self, event: &StoppedEvent) {}
    fn module_changed(&self, event: &ModuleEvent) {}
    /// Sent for `continued` events and for successful resume/step responses.
    fn debuggee_continued(&self, event: &ContinuedEvent) {}
    fn breakpoint_changed(&self, event: &BreakpointEvent) {}
    /// A request failed. `summary` is the response's short message.
    fn error_response(&self, summary: &str, error: Option<&ErrorMessage>) {}
    /// The adapter acknowledged `disconnect`, or the transport closed.
    fn server_disconnected(&self) {}
    fn threads(&self, threads: &[Thread]) {}
    fn stack_trace(&self, thread_id: i64, info: &StackTraceInfo) {}
    fn state_changed(&self, state: SessionState) {}
}

/// Registered subscribers, notified in registration order.
#[derive(Default)]
pub struct Subscribers {
    list: RwLock<Vec<Arc<dyn Subscriber>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn add(&self, subscriber: Arc<dyn Subscriber>) {
        self.list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.list.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` on every subscriber.
    ///
    /// The list is copied first so no lock is held during delivery. A
    /// panicking subscriber is logged and skipped.
    pub fn notify(&self, name: &'static str, f: impl Fn(&dyn Subscriber)) {
        let snapshot: Vec<Arc<dyn Subscriber>> = self
            .list
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (index, subscriber) in snapshot.iter().enumerate() {
            let result = catch_unwind(AssertUnwindSafe(|| f(subscriber.as_ref())));
            if result.is_err() {
                tracing::error!("subscriber {} panicked in {}", index, name);
            }
        }
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}
