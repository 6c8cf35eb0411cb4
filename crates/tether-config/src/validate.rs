use crate::config::{Config, LAUNCH_COMMANDS};
use crate::error::ConfigError;

/// Validate a [`Config`], returning all detected violations.
///
/// Returns `Ok(())` when the config is valid, or `Err` with a
/// vector of every validation error found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.adapter.host.trim().is_empty() {
        errors.push(invalid("adapter.host", "must not be empty"));
    }

    if config.adapter.port == 0 {
        errors.push(invalid("adapter.port", "must be 1\u{2013}65535, got 0"));
    }

    if config.protocol.adapter_id.trim().is_empty() {
        errors.push(invalid("protocol.adapter_id", "must not be empty"));
    }

    if config.protocol.locale.trim().is_empty() {
        errors.push(invalid("protocol.locale", "must not be empty"));
    }

    if !LAUNCH_COMMANDS.contains(&config.launch.command.as_str()) {
        errors.push(invalid(
            "launch.command",
            &format!(
                "must be \"launch\", \"attach\" or empty, got {:?}",
                config.launch.command
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}
