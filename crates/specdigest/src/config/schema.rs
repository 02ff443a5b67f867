use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::llm::{LlmConfig, DEFAULT_BASE_URL};
use crate::pipeline::RetryPolicy;
use crate::secrets::{expand_home, resolve_secret_optional, SecretError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Retries disabled.
    Dev,
    #[default]
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!("expected 'dev' or 'prod', got '{other}'")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: String,
    /// SQLite state database path. Defaults to `~/.specdigest/data/state.db`.
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key_file: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub openai_api_key_env: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_storage_root() -> String {
    "job_data".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_state_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            store_url: None,
            storage_root: default_storage_root(),
            openai_api_key: None,
            openai_api_key_file: None,
            openai_api_key_env: default_api_key_env(),
            openai_base_url: default_base_url(),
            environment: Environment::default(),
            log_level: default_log_level(),
            log_json: false,
            bind_address: default_bind_address(),
            worker_count: default_worker_count(),
            state_ttl_secs: default_state_ttl_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            llm: LlmConfig::default(),
        }
    }
}

impl Settings {
    pub fn database_path(&self) -> PathBuf {
        match &self.store_url {
            Some(url) => PathBuf::from(expand_home(url.trim_start_matches("sqlite://"))),
            None => crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("state.db")),
        }
    }

    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.storage_root))
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.environment {
            Environment::Dev => RetryPolicy::disabled(),
            Environment::Prod => {
                RetryPolicy::new(self.max_retries, Duration::from_secs(self.retry_delay_secs))
            }
        }
    }

    /// The provider API key, if any source is configured.
    pub fn api_key(&self) -> Result<Option<SecretString>, SecretError> {
        resolve_secret_optional(
            self.openai_api_key.as_deref(),
            self.openai_api_key_file.as_deref(),
            self.openai_api_key_env.as_deref(),
        )
    }
}
