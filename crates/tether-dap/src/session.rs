//! DAP session: the command facade over a transport.
//!
//! A [`DapSession`] owns the sequence registry, the state machine and the
//! subscriber list. Commands return as soon as their bytes are written;
//! results arrive through [`Subscriber`] callbacks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::capabilities::Capabilities;
use crate::codec::{self, FrameBuffer};
use crate::error::DapError;
use crate::protocol::{
    GotoArguments, InitializeRequestArguments, PauseArguments, Request, RestartArguments,
    StackTraceArguments, ThreadArguments,
};
use crate::registry::{PendingRequest, ResponseHandler, SequenceRegistry};
use crate::state::{SessionState, StateMachine};
use crate::subscriber::{Subscriber, Subscribers};
use crate::transport::{ReadEvent, Transport, TransportState};

/// Values sent in the `initialize` request, plus traffic logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolSettings {
    pub client_id: String,
    pub client_name: String,
    pub adapter_id: String,
    pub locale: String,
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
    /// Send paths as URIs instead of plain file system paths.
    pub path_format_uri: bool,
    /// Log every raw message at debug level instead of trace.
    pub debug: bool,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            client_id: "tether".into(),
            client_name: "tether".into(),
            adapter_id: "lldb-dap".into(),
            locale: "en-US".into(),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format_uri: false,
            debug: false,
        }
    }
}

/// The launch or attach request submitted once the handshake succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    /// `"launch"` or `"attach"`.
    pub command: String,
    /// Adapter-specific arguments.
    pub arguments: serde_json::Value,
}

/// Everything a session needs besides its transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub protocol: ProtocolSettings,
    pub launch: Option<LaunchRequest>,
}

/// Which states accept a command.
#[derive(Debug, Clone, Copy)]
enum Gate {
    /// Only `Initialized`.
    Initialized,
    /// `Initializing` or `Initialized`.
    Open,
}

/// Inbound bytes waiting to be framed and routed.
#[derive(Debug, Default)]
struct ReadQueue {
    frames: FrameBuffer,
    ready: VecDeque<Vec<u8>>,
    routing: bool,
}

pub(crate) struct Inner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) options: SessionOptions,
    pub(crate) registry: SequenceRegistry,
    pub(crate) subscribers: Subscribers,
    machine: Mutex<StateMachine>,
    capabilities: Mutex<Option<Arc<Capabilities>>>,
    inbound: Mutex<ReadQueue>,
    started: AtomicBool,
    disconnected: AtomicBool,
}

/// A client-side debug session. Cloning yields another handle to the
/// same session.
#[derive(Clone)]
pub struct DapSession {
    inner: Arc<Inner>,
}

impl DapSession {
    /// Create a session over `transport`. Nothing is sent until
    /// [`start`](Self::start) and [`initialize`](Self::initialize).
    pub fn new(transport: Arc<dyn Transport>, options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                options,
                registry: SequenceRegistry::new(),
                subscribers: Subscribers::new(),
                machine: Mutex::new(StateMachine::new()),
                capabilities: Mutex::new(None),
                inbound: Mutex::new(ReadQueue::default()),
                started: AtomicBool::new(false),
                disconnected: AtomicBool::new(false),
            }),
        }
    }

    /// Register a subscriber for session notifications.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.inner.subscribers.add(subscriber);
    }

    /// Start the transport and its read loop.
    pub fn start(&self) -> Result<(), DapError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("debug session already started");
            return Err(DapError::AlreadyStarted);
        }
        if let Err(e) = self.inner.transport.start() {
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .transport
            .start_async_read(Box::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_read(event);
                }
            }));
        Ok(())
    }

    /// Close the transport. Pending requests are abandoned.
    pub fn close(&self) -> bool {
        self.inner.disconnected.store(true, Ordering::SeqCst);
        self.inner.transport.close()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.inner.machine().state()
    }

    pub fn launched(&self) -> bool {
        self.inner.machine().launched()
    }

    pub fn configured(&self) -> bool {
        self.inner.machine().configured()
    }

    /// Capabilities from the handshake, once received.
    pub fn capabilities(&self) -> Option<Arc<Capabilities>> {
        self.inner.capabilities()
    }

    /// Initialized, launched, and configured if the adapter requires it.
    pub fn is_running(&self) -> bool {
        let required = self
            .capabilities()
            .is_some_and(|caps| caps.supports_configuration_done_request);
        self.inner.machine().is_running(required)
    }

    /// Whether the session is live and the transport is running.
    pub fn is_server_connected(&self) -> bool {
        !matches!(self.state(), SessionState::None | SessionState::Failed)
            && self.inner.transport.state() == TransportState::Running
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.registry.pending_count()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Send the `initialize` handshake request.
    pub fn initialize(&self) -> Result<i64, DapError> {
        let settings = &self.inner.options.protocol;
        let arguments = serde_json::to_value(InitializeRequestArguments {
            client_id: settings.client_id.clone(),
            client_name: settings.client_name.clone(),
            adapter_id: settings.adapter_id.clone(),
            locale: settings.locale.clone(),
            lines_start_at1: settings.lines_start_at1,
            columns_start_at1: settings.columns_start_at1,
            path_format: if settings.path_format_uri { "uri" } else { "path" }.into(),
            supports_variable_type: true,
            supports_variable_paging: false,
            supports_run_in_terminal_request: false,
            supports_memory_references: false,
            supports_progress_reporting: false,
            supports_invalidated_event: false,
            supports_memory_event: false,
        })?;

        self.inner.transition(StateMachine::begin_handshake)?;
        match self
            .inner
            .submit("initialize", arguments, Some(ResponseHandler::Initialize))
        {
            Ok(seq) => Ok(seq),
            Err(e) => {
                self.inner.transition(StateMachine::abort_handshake);
                Err(e)
            }
        }
    }

    /// Resume `thread_id` (or all threads).
    pub fn cont(&self, thread_id: i64, single_thread: bool) -> Result<i64, DapError> {
        let arguments = serde_json::to_value(ThreadArguments::new(thread_id, single_thread))?;
        self.inner.command(
            Gate::Initialized,
            "continue",
            arguments,
            Some(ResponseHandler::Resume),
        )
    }

    pub fn pause(&self, thread_id: i64) -> Result<i64, DapError> {
        let arguments = serde_json::to_value(PauseArguments { thread_id })?;
        self.inner
            .command(Gate::Initialized, "pause", arguments, None)
    }

    /// Step over.
    pub fn next(&self, thread_id: i64, single_thread: bool) -> Result<i64, DapError> {
        let arguments = serde_json::to_value(ThreadArguments::new(thread_id, single_thread))?;
        self.inner.command(
            Gate::Initialized,
            "next",
            arguments,
            Some(ResponseHandler::Resume),
        )
    }

    pub fn step_into(&self, thread_id: i64, single_thread: bool) -> Result<i64, DapError> {
        let arguments = serde_json::to_value(ThreadArguments::new(thread_id, single_thread))?;
        self.inner.command(
            Gate::Initialized,
            "stepIn",
            arguments,
            Some(ResponseHandler::Resume),
        )
    }

    pub fn step_out(&self, thread_id: i64, single_thread: bool) -> Result<i64, DapError> {
        let arguments = serde_json::to_value(ThreadArguments::new(thread_id, single_thread))?;
        self.inner.command(
            Gate::Initialized,
            "stepOut",
            arguments,
            Some(ResponseHandler::Resume),
        )
    }

    /// Jump to a target obtained from `gotoTargets`.
    pub fn goto(&self, thread_id: i64, target_id: i64) -> Result<i64, DapError> {
        let arguments = serde_json::to_value(GotoArguments {
            thread_id,
            target_id,
        })?;
        self.inner.command(
            Gate::Initialized,
            "goto",
            arguments,
            Some(ResponseHandler::Resume),
        )
    }

    /// Ask the adapter to end the debuggee gracefully.
    pub fn terminate(&self, restart: bool) -> Result<i64, DapError> {
        let arguments = serde_json::to_value(RestartArguments {
            restart: restart.then_some(true),
        })?;
        self.inner.command(Gate::Open, "terminate", arguments, None)
    }

    pub fn disconnect(&self, restart: bool) -> Result<i64, DapError> {
        let arguments = serde_json::to_value(RestartArguments {
            restart: restart.then_some(true),
        })?;
        self.inner.command(
            Gate::Open,
            "disconnect",
            arguments,
            Some(ResponseHandler::Disconnect),
        )
    }

    pub fn threads(&self) -> Result<i64, DapError> {
        self.inner.command(
            Gate::Initialized,
            "threads",
            serde_json::Value::Null,
            Some(ResponseHandler::Threads),
        )
    }

    /// Request `levels` frames of `thread_id` starting at `start_frame`.
    pub fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    ) -> Result<i64, DapError> {
        let arguments = serde_json::to_value(StackTraceArguments {
            thread_id,
            start_frame,
            levels,
        })?;
        self.inner.command(
            Gate::Initialized,
            "stackTrace",
            arguments,
            Some(ResponseHandler::StackTrace),
        )
    }
}

impl std::fmt::Debug for DapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DapSession")
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

impl Inner {
    pub(crate) fn capabilities(&self) -> Option<Arc<Capabilities>> {
        lock(&self.capabilities).clone()
    }

    pub(crate) fn set_capabilities(&self, capabilities: Arc<Capabilities>) {
        *lock(&self.capabilities) = Some(capabilities);
    }

    fn machine(&self) -> MutexGuard<'_, StateMachine> {
        lock(&self.machine)
    }

    /// Run `f` on the state machine and report a state change, if any,
    /// after the lock is released.
    pub(crate) fn transition<T>(&self, f: impl FnOnce(&mut StateMachine) -> T) -> T {
        let (result, changed) = {
            let mut machine = self.machine();
            let before = machine.state();
            let result = f(&mut machine);
            let after = machine.state();
            (result, (before != after).then_some(after))
        };
        if let Some(state) = changed {
            tracing::debug!("debug session state: {:?}", state);
            self.subscribers
                .notify("state_changed", |s| s.state_changed(state));
        }
        result
    }

    fn command(
        &self,
        gate: Gate,
        command: &str,
        arguments: serde_json::Value,
        handler: Option<ResponseHandler>,
    ) -> Result<i64, DapError> {
        {
            let machine = self.machine();
            match gate {
                Gate::Initialized => machine.require_initialized()?,
                Gate::Open => machine.require_open()?,
            }
        }
        self.submit(command, arguments, handler)
    }

    /// Allocate a sequence number, register the request and write it.
    pub(crate) fn submit(
        &self,
        command: &str,
        arguments: serde_json::Value,
        handler: Option<ResponseHandler>,
    ) -> Result<i64, DapError> {
        let seq = self.registry.next_sequence();
        let request = Request::new(seq, command, arguments);
        let bytes = codec::encode_message(&request)?;

        self.registry.register(
            seq,
            PendingRequest::new(command, request.arguments, handler),
        );
        self.log_traffic("->", &bytes);

        let error = match self.transport.write(&bytes) {
            Ok(n) if n == bytes.len() => return Ok(seq),
            Ok(n) => DapError::Transport(format!("short write: {} of {} bytes", n, bytes.len())),
            Err(e) => e.into(),
        };
        self.registry.cancel(seq);
        tracing::error!("failed to send {} request: {}", command, error);
        if self.started.load(Ordering::SeqCst) {
            self.handle_disconnect();
        }
        Err(error)
    }

    pub(crate) fn log_traffic(&self, direction: &str, bytes: &[u8]) {
        if self.options.protocol.debug {
            tracing::debug!("{} {}", direction, String::from_utf8_lossy(bytes));
        } else {
            tracing::trace!("{} {}", direction, String::from_utf8_lossy(bytes));
        }
    }

    /// Report the server as gone, at most once per session.
    pub(crate) fn handle_disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            self.subscribers
                .notify("server_disconnected", |s| s.server_disconnected());
        }
    }

    fn on_read(&self, event: ReadEvent<'_>) {
        match event {
            ReadEvent::Data(bytes) => self.on_data(bytes),
            ReadEvent::Closed => {
                tracing::info!("debug adapter closed the connection");
                self.handle_disconnect();
            }
        }
    }

    /// Frame `bytes` and route every complete message in arrival order.
    ///
    /// Framing happens under the queue lock. Routing does not, so
    /// subscribers can issue commands from their callbacks. Bytes that
    /// arrive while another call is routing are queued and routed by
    /// that call.
    fn on_data(&self, bytes: &[u8]) {
        {
            let mut queue = lock(&self.inbound);
            queue.frames.push(bytes);
            while let Some(payload) = queue.frames.next_frame() {
                queue.ready.push_back(payload);
            }
            if queue.routing {
                return;
            }
            queue.routing = true;
        }

        loop {
            let payload = {
                let mut queue = lock(&self.inbound);
                match queue.ready.pop_front() {
                    Some(payload) => payload,
                    None => {
                        queue.routing = false;
                        return;
                    }
                }
            };
            self.route(&payload);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
