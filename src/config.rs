use crate::error::RelayError;
use std::fmt;
use std::time::Duration;

pub const API_KEY_ENV: &str = "ZJU_API_KEY";
pub const DEFAULT_MODEL_ENV: &str = "DEFAULT_MODEL";
pub const DEFAULT_BASE_URL: &str = "https://chat.zju.edu.cn/api/ai/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Where the bearer credential comes from. Resolved every time a client is built.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit(String),
    /// Name of the environment variable holding the key.
    Env(String),
}

impl CredentialSource {
    pub fn resolve(&self) -> Result<String, RelayError> {
        let key = match self {
            CredentialSource::Explicit(key) => Some(key.clone()),
            CredentialSource::Env(var) => std::env::var(var).ok(),
        };
        match key.filter(|k| !k.trim().is_empty()) {
            Some(key) => Ok(key),
            None => Err(RelayError::Configuration(match self {
                CredentialSource::Explicit(_) => "API key is empty".to_string(),
                CredentialSource::Env(var) => {
                    format!("API key not provided and {} is not set", var)
                }
            })),
        }
    }
}

impl Default for CredentialSource {
    fn default() -> Self {
        CredentialSource::Env(API_KEY_ENV.to_string())
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Explicit(_) => f.write_str("Explicit(<redacted>)"),
            CredentialSource::Env(var) => f.debug_tuple("Env").field(var).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub credential: CredentialSource,
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credential: CredentialSource::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub max_payload_size: usize,
    pub upstream: UpstreamConfig,
}

/// `DEFAULT_MODEL` as currently set in the process environment.
pub fn configured_default_model() -> Option<String> {
    std::env::var(DEFAULT_MODEL_ENV).ok()
}
