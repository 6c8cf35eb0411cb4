//! Inbound message routing.
//!
//! Payloads are classified as responses or events. Responses are matched
//! to their pending request and handed to its [`ResponseHandler`]; events
//! are dispatched by name. Nothing here propagates an error back to the
//! transport: bad input is logged and dropped.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::capabilities::Capabilities;
use crate::error::DapError;
use crate::protocol::{
    BreakpointEvent, ContinuedEvent, Event, ModuleEvent, Output, ProcessInfo, Response,
    StackTraceInfo, StoppedEvent, Thread, ThreadEvent,
};
use crate::registry::{PendingRequest, ResponseHandler};
use crate::session::Inner;
use crate::state::{HandshakeOutcome, StateMachine};

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(Response),
    Event(Event),
}

/// Classify a decoded message by its `type` field.
pub fn classify(value: serde_json::Value) -> Result<Inbound, DapError> {
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| DapError::InvalidMessage("missing type field".into()))?
        .to_owned();
    match kind.as_str() {
        "response" => Ok(Inbound::Response(serde_json::from_value(value)?)),
        "event" => Ok(Inbound::Event(serde_json::from_value(value)?)),
        "request" => Err(DapError::InvalidMessage(format!(
            "reverse request {} is not supported",
            value.get("command").and_then(|c| c.as_str()).unwrap_or("?")
        ))),
        other => Err(DapError::InvalidMessage(format!(
            "unknown message type: {}",
            other
        ))),
    }
}

/// The events this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Initialized,
    Terminated,
    Exited,
    Output,
    Process,
    Thread,
    Stopped,
    Module,
    Continued,
    Breakpoint,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "initialized" => Some(Self::Initialized),
            "terminated" => Some(Self::Terminated),
            "exited" => Some(Self::Exited),
            "output" => Some(Self::Output),
            "process" => Some(Self::Process),
            "thread" => Some(Self::Thread),
            "stopped" => Some(Self::Stopped),
            "module" => Some(Self::Module),
            "continued" => Some(Self::Continued),
            "breakpoint" => Some(Self::Breakpoint),
            _ => None,
        }
    }
}

impl Inner {
    /// Route one complete payload.
    pub(crate) fn route(&self, payload: &[u8]) {
        self.log_traffic("<-", payload);
        let value: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("dropping undecodable message: {}", e);
                return;
            }
        };
        match classify(value) {
            Ok(Inbound::Response(response)) => self.route_response(response),
            Ok(Inbound::Event(event)) => self.route_event(event),
            Err(e) => tracing::warn!("dropping message: {}", e),
        }
    }

    fn route_response(&self, response: Response) {
        if response.request_seq < 0 {
            tracing::warn!(
                "received response with invalid request seq: {}",
                response.request_seq
            );
            return;
        }
        let Some(pending) = self.registry.take(response.request_seq) else {
            tracing::warn!(
                "received response for unknown request seq: {}",
                response.request_seq
            );
            return;
        };

        if !response.command.is_empty() && response.command != pending.command {
            tracing::warn!(
                "response command mismatch for seq {}: sent {}, got {}",
                response.request_seq,
                pending.command,
                response.command
            );
        }
        if response.is_cancelled() {
            tracing::debug!(
                "request {} ({}) was cancelled",
                response.request_seq,
                pending.command
            );
        }

        if !response.success {
            let summary = response.message.clone().unwrap_or_default();
            let error = response.error_body();
            tracing::debug!("{} failed: {}", pending.command, summary);
            self.subscribers.notify("error_response", |s| {
                s.error_response(&summary, error.as_ref())
            });
            if let Some(handler) = pending.handler.filter(|h| h.handles_failure()) {
                self.on_failure(handler, &pending);
            }
            return;
        }

        if let Some(handler) = pending.handler {
            self.on_success(handler, &pending, &response);
        }
    }

    fn on_success(&self, handler: ResponseHandler, pending: &PendingRequest, response: &Response) {
        match handler {
            ResponseHandler::Initialize => {
                let outcome = self.transition(|m| m.on_initialize_response(true));
                if outcome != HandshakeOutcome::Accepted {
                    return;
                }
                let capabilities = Arc::new(Capabilities::from_body(response.body.as_ref()));
                self.set_capabilities(Arc::clone(&capabilities));
                self.subscribers.notify("capabilities_received", |s| {
                    s.capabilities_received(&capabilities)
                });
                self.submit_launch();
                if self.transition(StateMachine::take_deferred_initialized) {
                    self.submit_configuration_done();
                }
            }
            ResponseHandler::Launch => {
                self.transition(|m| m.on_launch_response(true));
                self.subscribers.notify("launched", |s| s.launched());
            }
            ResponseHandler::ConfigurationDone => {
                self.transition(StateMachine::mark_configured);
                tracing::debug!("debug adapter configuration done");
            }
            ResponseHandler::Resume => {
                let event = continued_from(pending, response);
                self.subscribers
                    .notify("debuggee_continued", |s| s.debuggee_continued(&event));
            }
            ResponseHandler::Disconnect => self.handle_disconnect(),
            ResponseHandler::Threads => {
                let threads: Vec<Thread> = response
                    .body
                    .as_ref()
                    .and_then(|b| b.get("threads"))
                    .and_then(|t| parse_lenient("threads", t.clone()))
                    .unwrap_or_default();
                self.subscribers.notify("threads", |s| s.threads(&threads));
            }
            ResponseHandler::StackTrace => {
                let thread_id = requested_thread(pending).unwrap_or(1);
                let info: StackTraceInfo = response
                    .body
                    .clone()
                    .and_then(|b| parse_lenient("stackTrace", b))
                    .unwrap_or_default();
                self.subscribers
                    .notify("stack_trace", |s| s.stack_trace(thread_id, &info));
            }
        }
    }

    fn on_failure(&self, handler: ResponseHandler, pending: &PendingRequest) {
        match handler {
            ResponseHandler::Initialize => {
                self.transition(|m| m.on_initialize_response(false));
            }
            ResponseHandler::Launch => {
                tracing::error!("{} request failed", pending.command);
                self.transition(|m| m.on_launch_response(false));
            }
            ResponseHandler::ConfigurationDone => {
                tracing::warn!("configurationDone failed, debuggee may not start");
            }
            ResponseHandler::Threads => {
                self.subscribers.notify("threads", |s| s.threads(&[]));
            }
            ResponseHandler::StackTrace => {
                let thread_id = requested_thread(pending).unwrap_or(1);
                let info = StackTraceInfo::default();
                self.subscribers
                    .notify("stack_trace", |s| s.stack_trace(thread_id, &info));
            }
            ResponseHandler::Resume | ResponseHandler::Disconnect => {}
        }
    }

    fn submit_launch(&self) {
        let Some(launch) = &self.options.launch else {
            return;
        };
        if let Err(e) = self.submit(
            &launch.command,
            launch.arguments.clone(),
            Some(ResponseHandler::Launch),
        ) {
            tracing::error!("failed to send {} request: {}", launch.command, e);
        }
    }

    fn submit_configuration_done(&self) {
        let required = self
            .capabilities()
            .is_some_and(|caps| caps.supports_configuration_done_request);
        if !required {
            return;
        }
        if let Err(e) = self.submit(
            "configurationDone",
            serde_json::Value::Null,
            Some(ResponseHandler::ConfigurationDone),
        ) {
            tracing::error!("failed to send configurationDone request: {}", e);
        }
    }

    fn route_event(&self, event: Event) {
        let Some(kind) = EventKind::from_name(&event.event) else {
            tracing::info!("unhandled debug adapter event: {}", event.event);
            return;
        };
        match kind {
            EventKind::Initialized => {
                if self.transition(StateMachine::on_initialized_event) {
                    self.submit_configuration_done();
                }
            }
            EventKind::Terminated => self.transition(StateMachine::on_terminated),
            EventKind::Exited => {
                let exit_code = event
                    .body
                    .as_ref()
                    .and_then(|b| b.get("exitCode"))
                    .and_then(|c| c.as_i64())
                    .unwrap_or(-1);
                self.subscribers
                    .notify("debuggee_exited", |s| s.debuggee_exited(exit_code));
            }
            EventKind::Output => {
                if let Some(output) = event_body::<Output>(&event) {
                    self.subscribers
                        .notify("output_produced", |s| s.output_produced(&output));
                }
            }
            EventKind::Process => {
                if let Some(process) = event_body::<ProcessInfo>(&event) {
                    self.subscribers
                        .notify("debugging_process", |s| s.debugging_process(&process));
                }
            }
            EventKind::Thread => {
                if let Some(thread) = event_body::<ThreadEvent>(&event) {
                    self.subscribers
                        .notify("thread_changed", |s| s.thread_changed(&thread));
                }
            }
            EventKind::Stopped => {
                if let Some(stopped) = event_body::<StoppedEvent>(&event) {
                    self.subscribers
                        .notify("debuggee_stopped", |s| s.debuggee_stopped(&stopped));
                }
            }
            EventKind::Module => {
                if let Some(module) = event_body::<ModuleEvent>(&event) {
                    self.subscribers
                        .notify("module_changed", |s| s.module_changed(&module));
                }
            }
            EventKind::Continued => {
                if let Some(continued) = event_body::<ContinuedEvent>(&event) {
                    self.subscribers
                        .notify("debuggee_continued", |s| s.debuggee_continued(&continued));
                }
            }
            EventKind::Breakpoint => {
                if let Some(breakpoint) = event_body::<BreakpointEvent>(&event) {
                    self.subscribers
                        .notify("breakpoint_changed", |s| s.breakpoint_changed(&breakpoint));
                }
            }
        }
    }
}

// ── internal helpers ──────────────────────────────────────────────────

/// Parse an event body; a missing body parses as `{}`.
fn event_body<T: DeserializeOwned>(event: &Event) -> Option<T> {
    let body = event
        .body
        .clone()
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
    parse_lenient(&event.event, body)
}

fn parse_lenient<T: DeserializeOwned>(what: &str, value: serde_json::Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::error!("malformed {} body: {}", what, e);
            None
        }
    }
}

fn requested_thread(pending: &PendingRequest) -> Option<i64> {
    pending.arguments.get("threadId").and_then(|t| t.as_i64())
}

/// Build the `continued` notification for a successful resume or step.
///
/// An `allThreadsContinued` or `singleThread` flag in the response body
/// wins. Otherwise `continue` reports all threads, and steps and `goto`
/// resume everything unless `singleThread` was requested.
fn continued_from(pending: &PendingRequest, response: &Response) -> ContinuedEvent {
    let thread_id = response
        .body_i64("threadId")
        .or_else(|| requested_thread(pending))
        .unwrap_or(1);
    let requested_all = pending.command == "continue"
        || !pending
            .arguments
            .get("singleThread")
            .and_then(|s| s.as_bool())
            .unwrap_or(false);
    let all_threads_continued = response
        .body_bool("allThreadsContinued")
        .or_else(|| response.body_bool("singleThread").map(|single| !single))
        .unwrap_or(requested_all);
    ContinuedEvent {
        thread_id,
        all_threads_continued,
    }
}
