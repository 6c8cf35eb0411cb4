//! DAP protocol message types.
//!
//! Requests are built by this client; responses and events are parsed
//! leniently so that adapters omitting optional fields are still usable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Base protocol messages
// ---------------------------------------------------------------------------

/// A DAP request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Sequence number assigned by the client.
    pub seq: i64,
    /// Always "request".
    #[serde(rename = "type")]
    pub message_type: String,
    /// The command to execute.
    pub command: String,
    /// Command arguments; an empty object when the command takes none.
    pub arguments: serde_json::Value,
}

impl Request {
    /// Build a request, normalising missing arguments to `{}`.
    pub fn new(seq: i64, command: impl Into<String>, arguments: serde_json::Value) -> Self {
        let arguments = if arguments.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            arguments
        };
        Self {
            seq,
            message_type: "request".into(),
            command: command.into(),
            arguments,
        }
    }
}

/// A DAP response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sequence number of the adapter's message, if it sent one.
    #[serde(default)]
    pub seq: i64,
    /// Sequence number of the corresponding request.
    pub request_seq: i64,
    /// Whether the request was successful.
    pub success: bool,
    /// The command this response is for.
    #[serde(default)]
    pub command: String,
    /// Short error reason if `success` is false (e.g. "cancelled").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response body (command-specific).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Response {
    /// Whether the adapter reported the request as cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.message.as_deref() == Some("cancelled")
    }

    /// The structured error detail carried in `body.error`, if any.
    pub fn error_body(&self) -> Option<ErrorMessage> {
        let error = self.body.as_ref()?.get("error")?;
        serde_json::from_value(error.clone()).ok()
    }

    /// Read an integer field from the body.
    pub fn body_i64(&self, key: &str) -> Option<i64> {
        self.body.as_ref()?.get(key)?.as_i64()
    }

    /// Read a boolean field from the body.
    pub fn body_bool(&self, key: &str) -> Option<bool> {
        self.body.as_ref()?.get(key)?.as_bool()
    }
}

/// A DAP event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Sequence number of the adapter's message, if it sent one.
    #[serde(default)]
    pub seq: i64,
    /// The event type.
    pub event: String,
    /// Event body (event-specific).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Structured error detail attached to a failed response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorMessage {
    /// Unique identifier for the message.
    pub id: i64,
    /// Format string; `{name}` placeholders refer to `variables`.
    pub format: String,
    /// Values for the placeholders in `format`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,
    /// Whether the message may be sent as telemetry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_telemetry: Option<bool>,
    /// Whether the message should be shown to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_user: Option<bool>,
    /// A link with more information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Label for `url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_label: Option<String>,
}

impl ErrorMessage {
    /// Substitute `variables` into `format`.
    pub fn render(&self) -> String {
        let mut text = self.format.clone();
        if let Some(vars) = &self.variables {
            for (name, value) in vars {
                text = text.replace(&format!("{{{name}}}"), value);
            }
        }
        text
    }
}

// ---------------------------------------------------------------------------
// Request arguments
// ---------------------------------------------------------------------------

/// Arguments for the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestArguments {
    /// ID of the client.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Human-readable name of the client.
    pub client_name: String,
    /// ID of the debug adapter.
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    /// Client locale (e.g. "en-US").
    pub locale: String,
    /// Whether lines are 1-based.
    pub lines_start_at1: bool,
    /// Whether columns are 1-based.
    pub columns_start_at1: bool,
    /// Path format: "path" or "uri".
    pub path_format: String,
    pub supports_variable_type: bool,
    pub supports_variable_paging: bool,
    pub supports_run_in_terminal_request: bool,
    pub supports_memory_references: bool,
    pub supports_progress_reporting: bool,
    pub supports_invalidated_event: bool,
    pub supports_memory_event: bool,
}

/// Arguments shared by `continue`, `next`, `stepIn` and `stepOut`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArguments {
    /// The thread to resume or step.
    pub thread_id: i64,
    /// Resume only this thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_thread: Option<bool>,
}

impl ThreadArguments {
    /// Arguments for `thread_id`, sending `singleThread` only when set.
    pub fn new(thread_id: i64, single_thread: bool) -> Self {
        Self {
            thread_id,
            single_thread: single_thread.then_some(true),
        }
    }
}

/// Arguments for the `goto` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoArguments {
    /// The thread to move.
    pub thread_id: i64,
    /// Location obtained from a `gotoTargets` request.
    pub target_id: i64,
}

/// Arguments for the `pause` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseArguments {
    /// The thread to pause.
    pub thread_id: i64,
}

/// Arguments for the `terminate` and `disconnect` requests.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartArguments {
    /// Whether the session is being torn down for a restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
}

/// Arguments for the `stackTrace` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    /// Thread whose stack to retrieve.
    pub thread_id: i64,
    /// Index of the first frame to return.
    pub start_frame: i64,
    /// Maximum number of frames; 0 means all.
    pub levels: i64,
}

// ---------------------------------------------------------------------------
// Runtime types
// ---------------------------------------------------------------------------

/// A thread in the debuggee.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thread {
    /// Unique identifier of the thread.
    pub id: i64,
    /// Human-readable name of the thread.
    pub name: String,
}

/// A source location.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Source {
    /// Short name of the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// File system path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Source reference (for sources without a file path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<i64>,
}

/// A stack frame in the call stack.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StackFrame {
    /// Unique identifier for the stack frame.
    pub id: i64,
    /// Name of the frame (function name).
    pub name: String,
    /// Source location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Line within the source.
    pub line: i64,
    /// Column within the source.
    pub column: i64,
    /// Module ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<serde_json::Value>,
}

/// Body of a `stackTrace` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StackTraceInfo {
    /// Frames, innermost first.
    pub stack_frames: Vec<StackFrame>,
    /// Total frames available, if the adapter knows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

/// A module (library or executable) loaded by the debuggee.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Module {
    /// Module identifier, numeric or textual.
    pub id: serde_json::Value,
    /// Module name.
    pub name: String,
    /// Path on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Whether the module is optimized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_optimized: Option<bool>,
    /// Version string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Symbol loading status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_status: Option<String>,
}

/// A breakpoint as reported by the adapter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Breakpoint {
    /// Adapter-assigned identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Whether the breakpoint could be set.
    pub verified: bool,
    /// Explanation when not verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Actual source location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Actual line of the breakpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    /// Actual column of the breakpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

// ---------------------------------------------------------------------------
// Event bodies
// ---------------------------------------------------------------------------

/// Body of the `output` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Output {
    /// Output category: "console", "stdout", "stderr", "telemetry", ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// The output text.
    pub output: String,
    /// Grouping hint ("start", "startCollapsed", "end").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Source location that generated the output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Line in the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    /// Column in the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

/// Body of the `process` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessInfo {
    /// Logical name of the process.
    pub name: String,
    /// OS process id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_process_id: Option<i64>,
    /// Whether the process runs on this machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_local_process: Option<bool>,
    /// "launch", "attach" or "attachForSuspendedLaunch".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_method: Option<String>,
    /// Pointer size in bits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer_size: Option<i64>,
}

/// Body of the `thread` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadEvent {
    /// "started" or "exited".
    pub reason: String,
    /// The affected thread.
    pub thread_id: i64,
}

/// Body of the `stopped` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoppedEvent {
    /// Why the debuggee stopped ("step", "breakpoint", "exception", ...).
    pub reason: String,
    /// Description of the stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Thread that stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    /// Whether focus should stay where it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_focus_hint: Option<bool>,
    /// Additional text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Whether all threads are stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_threads_stopped: Option<bool>,
    /// Breakpoints that were hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_breakpoint_ids: Option<Vec<i64>>,
}

/// Body of the `module` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleEvent {
    /// "new", "changed" or "removed".
    pub reason: String,
    /// The affected module.
    pub module: Module,
}

/// Body of the `continued` event, also synthesized from resume responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContinuedEvent {
    /// The thread that continued.
    pub thread_id: i64,
    /// Whether all threads continued.
    pub all_threads_continued: bool,
}

impl Default for ContinuedEvent {
    fn default() -> Self {
        Self {
            thread_id: 1,
            all_threads_continued: true,
        }
    }
}

/// Body of the `breakpoint` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakpointEvent {
    /// "changed", "new" or "removed".
    pub reason: String,
    /// The affected breakpoint.
    pub breakpoint: Breakpoint,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
