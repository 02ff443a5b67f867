use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{Environment, Settings};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/settings-v1.json");

/// Names the settings file to load.
pub const CONFIG_ENV: &str = "SPECDIGEST_CONFIG";

/// Loads settings from the process environment: the file named by
/// `SPECDIGEST_CONFIG` (if set), then `SPECDIGEST_*` overrides.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let path = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty());
    load_settings_with(path.as_deref().map(Path::new), |name| {
        std::env::var(name).ok()
    })
}

/// Defaults, then the optional file, then overrides read through `env`.
pub fn load_settings_with<F>(path: Option<&Path>, env: F) -> Result<Settings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = match path {
        Some(path) => load_settings_file(path)?,
        None => Settings::default(),
    };
    apply_env_overrides(&mut settings, env)?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn load_settings_file<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let settings: Settings = serde_json::from_value(json_value)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if settings.version != "1.0" {
        return invalid(format!("Unsupported config version: {}", settings.version));
    }
    if settings.worker_count == 0 {
        return invalid("worker_count must be at least 1".to_string());
    }
    if settings.state_ttl_secs == 0 {
        return invalid("state_ttl_secs must be at least 1".to_string());
    }
    if !(0.0..=2.0).contains(&settings.llm.temperature) {
        return invalid(format!(
            "llm.temperature must be within [0, 2], got {}",
            settings.llm.temperature
        ));
    }
    if settings.max_retries > 100 {
        return invalid("max_retries must be at most 100".to_string());
    }
    if settings.retry_delay_secs > 3600 {
        return invalid("retry_delay_secs must be at most 3600".to_string());
    }
    if settings.storage_root.trim().is_empty() {
        return invalid("storage_root must not be empty".to_string());
    }

    Ok(())
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

pub fn apply_env_overrides<F>(settings: &mut Settings, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env("SPECDIGEST_STORE_URL") {
        settings.store_url = Some(v);
    }
    if let Some(v) = env("SPECDIGEST_STORAGE_ROOT") {
        settings.storage_root = v;
    }
    if let Some(v) = env("SPECDIGEST_OPENAI_BASE_URL") {
        settings.openai_base_url = v;
    }
    if let Some(v) = env("SPECDIGEST_ENV") {
        settings.environment = parse_env::<Environment>("SPECDIGEST_ENV", &v)?;
    }
    if let Some(v) = env("SPECDIGEST_LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = env("SPECDIGEST_LOG_JSON") {
        settings.log_json = parse_bool("SPECDIGEST_LOG_JSON", &v)?;
    }
    if let Some(v) = env("SPECDIGEST_BIND") {
        settings.bind_address = v;
    }
    if let Some(v) = env("SPECDIGEST_WORKERS") {
        settings.worker_count = parse_env("SPECDIGEST_WORKERS", &v)?;
    }
    if let Some(v) = env("SPECDIGEST_STATE_TTL_SECS") {
        settings.state_ttl_secs = parse_env("SPECDIGEST_STATE_TTL_SECS", &v)?;
    }
    if let Some(v) = env("SPECDIGEST_MAX_RETRIES") {
        settings.max_retries = parse_env("SPECDIGEST_MAX_RETRIES", &v)?;
    }
    if let Some(v) = env("SPECDIGEST_RETRY_DELAY_SECS") {
        settings.retry_delay_secs = parse_env("SPECDIGEST_RETRY_DELAY_SECS", &v)?;
    }
    if let Some(v) = env("SPECDIGEST_LLM_MODEL") {
        settings.llm.model = v;
    }
    Ok(())
}
