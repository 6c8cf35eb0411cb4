//! DAP capabilities tracking.

use serde::{Deserialize, Serialize};

/// An exception filter the adapter offers for `setExceptionBreakpoints`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExceptionBreakpointsFilter {
    /// Internal filter identifier.
    pub filter: String,
    /// Label shown in the UI.
    pub label: String,
    /// Whether the filter is enabled by default.
    pub default: bool,
}

/// Capabilities advertised by the adapter in its `initialize` response.
///
/// Every flag defaults to `false` so that adapters sending a partial or
/// empty body still produce a usable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub supports_configuration_done_request: bool,
    pub supports_function_breakpoints: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_hit_conditional_breakpoints: bool,
    pub supports_evaluate_for_hovers: bool,
    pub exception_breakpoint_filters: Vec<ExceptionBreakpointsFilter>,
    pub supports_step_back: bool,
    pub supports_set_variable: bool,
    pub supports_restart_frame: bool,
    pub supports_goto_targets_request: bool,
    pub supports_step_in_targets_request: bool,
    pub supports_completions_request: bool,
    pub supports_modules_request: bool,
    pub supports_restart_request: bool,
    pub supports_exception_options: bool,
    pub supports_value_formatting_options: bool,
    pub supports_exception_info_request: bool,
    pub support_terminate_debuggee: bool,
    pub support_suspend_debuggee: bool,
    pub supports_delayed_stack_trace_loading: bool,
    pub supports_loaded_sources_request: bool,
    pub supports_log_points: bool,
    pub supports_terminate_threads_request: bool,
    pub supports_set_expression: bool,
    pub supports_terminate_request: bool,
    pub supports_data_breakpoints: bool,
    pub supports_read_memory_request: bool,
    pub supports_write_memory_request: bool,
    pub supports_disassemble_request: bool,
    pub supports_cancel_request: bool,
    pub supports_breakpoint_locations_request: bool,
    pub supports_clipboard_context: bool,
    pub supports_stepping_granularity: bool,
    pub supports_instruction_breakpoints: bool,
    pub supports_exception_filter_options: bool,
    pub supports_single_thread_execution_requests: bool,
}

impl Capabilities {
    /// Build capabilities from an `initialize` response body.
    ///
    /// A missing body yields all-false capabilities. Fields of the wrong
    /// type are ignored rather than failing the whole handshake.
    pub fn from_body(body: Option<&serde_json::Value>) -> Self {
        let Some(body) = body else {
            return Self::default();
        };
        match serde_json::from_value(body.clone()) {
            Ok(caps) => caps,
            Err(e) => {
                tracing::warn!("capabilities body did not parse cleanly: {}", e);
                Self::from_flags(body)
            }
        }
    }

    /// Fallback used when the body contains fields of unexpected types:
    /// keep every boolean flag that is present and well-typed.
    fn from_flags(body: &serde_json::Value) -> Self {
        let Some(obj) = body.as_object() else {
            return Self::default();
        };
        let mut cleaned = serde_json::Map::new();
        for (key, value) in obj {
            if value.is_boolean() {
                cleaned.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(serde_json::Value::Object(cleaned)).unwrap_or_default()
    }
}
