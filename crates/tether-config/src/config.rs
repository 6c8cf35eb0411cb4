use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tether_dap::{LaunchRequest, ProtocolSettings, SessionOptions};

use crate::error::ConfigError;

/// Launch commands accepted in `[launch] command`. Empty means none.
pub const LAUNCH_COMMANDS: &[&str] = &["", "launch", "attach"];

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose, includes raw protocol traffic.
    Trace,
    /// Debug messages.
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// The `tracing` filter directive for this level.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Where the debug adapter listens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4711
}

impl AdapterConfig {
    /// `host:port`, suitable for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Values sent during the `initialize` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_client_id")]
    pub client_name: String,
    /// Identifier of the adapter type (e.g. `lldb-dap`, `debugpy`).
    #[serde(default = "default_adapter_id")]
    pub adapter_id: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_true")]
    pub lines_start_at1: bool,
    #[serde(default = "default_true")]
    pub columns_start_at1: bool,
    /// Send paths as `file://` URIs.
    #[serde(default)]
    pub path_format_uri: bool,
    /// Log raw protocol traffic at debug level.
    #[serde(default)]
    pub debug: bool,
}

fn default_client_id() -> String {
    "tether".to_string()
}

fn default_adapter_id() -> String {
    "lldb-dap".to_string()
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            client_name: default_client_id(),
            adapter_id: default_adapter_id(),
            locale: default_locale(),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format_uri: false,
            debug: false,
        }
    }
}

/// The request sent once the handshake succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// `launch`, `attach`, or empty to send nothing.
    #[serde(default)]
    pub command: String,
    /// Adapter-specific arguments, forwarded as JSON.
    #[serde(default)]
    pub arguments: toml::Table,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub level: LogLevel,
    /// Optional path to a log file. Logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
        }
    }
}

/// Top-level tether configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Debug adapter address.
    #[serde(default)]
    pub adapter: AdapterConfig,
    /// Handshake settings.
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Launch or attach request.
    #[serde(default)]
    pub launch: LaunchConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Convert into the options a [`tether_dap::DapSession`] is built from.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the launch arguments cannot be
    /// expressed as JSON.
    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        let protocol = ProtocolSettings {
            client_id: self.protocol.client_id.clone(),
            client_name: self.protocol.client_name.clone(),
            adapter_id: self.protocol.adapter_id.clone(),
            locale: self.protocol.locale.clone(),
            lines_start_at1: self.protocol.lines_start_at1,
            columns_start_at1: self.protocol.columns_start_at1,
            path_format_uri: self.protocol.path_format_uri,
            debug: self.protocol.debug,
        };

        let launch = if self.launch.command.is_empty() {
            None
        } else {
            let arguments = serde_json::to_value(&self.launch.arguments).map_err(|e| {
                ConfigError::Validation {
                    field: "launch.arguments".to_string(),
                    message: e.to_string(),
                }
            })?;
            Some(LaunchRequest {
                command: self.launch.command.clone(),
                arguments,
            })
        };

        Ok(SessionOptions { protocol, launch })
    }
}
