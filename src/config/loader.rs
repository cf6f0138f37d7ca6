//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::ValidationError;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {name}={value:?} is invalid: expected {expected}")]
    Env {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file.
///
/// Only syntax is checked here. Environment and command-line overrides still
/// apply on top, so semantic validation runs once they are in place.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Overlay settings from the process environment.
pub fn apply_process_env(config: &mut ProxyConfig) -> Result<(), ConfigError> {
    apply_env(config, |name| std::env::var(name).ok())
}

/// Overlay settings from an environment lookup.
///
/// Unset variables leave the current value untouched.
pub fn apply_env<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("PORT") {
        config.listener.port = parse_number("PORT", value)?;
    }
    if let Some(value) = lookup("BIND_HOST") {
        config.listener.host = value;
    }
    if let Some(value) = lookup("TARGET_URL") {
        config.upstream.url = value;
    }
    if let Some(value) = lookup("LOG_HEADERS") {
        config.logging.include_headers = parse_flag("LOG_HEADERS", value)?;
    }
    if let Some(value) = lookup("PRETTY_JSON") {
        config.logging.pretty_json = parse_flag("PRETTY_JSON", value)?;
    }
    if let Some(value) = lookup("LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Some(value) = lookup("CONNECT_TIMEOUT_SECS") {
        config.timeouts.connect_secs = parse_number("CONNECT_TIMEOUT_SECS", value)?;
    }
    if let Some(value) = lookup("RESPONSE_TIMEOUT_SECS") {
        config.timeouts.response_secs = parse_number("RESPONSE_TIMEOUT_SECS", value)?;
    }
    if let Some(value) = lookup("IDLE_TIMEOUT_SECS") {
        config.timeouts.idle_secs = parse_number("IDLE_TIMEOUT_SECS", value)?;
    }
    Ok(())
}

fn parse_flag(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            name,
            value,
            expected: "a boolean (true/false, 1/0, yes/no, on/off)",
        }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        name,
        value,
        expected: "a non-negative integer",
    })
}
