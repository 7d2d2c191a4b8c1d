//! Client configuration.

use serde::{Deserialize, Serialize};

use crate::keystore::DEFAULT_KEY_SIZE_BITS;
use crate::ledger::DEFAULT_MAX_AGE_MS;

/// Default User-Agent for callback requests.
pub const DEFAULT_USER_AGENT: &str = concat!("edumfa-push/", env!("CARGO_PKG_VERSION"));

/// Push client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// RSA modulus size for device keys.
    #[serde(default = "default_key_size")]
    pub key_size_bits: usize,

    /// Age after which pending push requests expire.
    #[serde(default = "default_max_age")]
    pub request_max_age_ms: i64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_key_size() -> usize {
    DEFAULT_KEY_SIZE_BITS
}

fn default_max_age() -> i64 {
    DEFAULT_MAX_AGE_MS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            key_size_bits: default_key_size(),
            request_max_age_ms: default_max_age(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `EDUMFA_PUSH_TIMEOUT` | Request timeout in seconds |
    /// | `EDUMFA_PUSH_KEY_SIZE` | RSA modulus size for new keys |
    /// | `EDUMFA_PUSH_REQUEST_MAX_AGE_MS` | Pending request expiry |
    /// | `EDUMFA_PUSH_USER_AGENT` | User-Agent header |
    pub fn from_env() -> Self {
        Self {
            timeout_secs: env_parse("EDUMFA_PUSH_TIMEOUT").unwrap_or_else(default_timeout),
            key_size_bits: env_parse("EDUMFA_PUSH_KEY_SIZE").unwrap_or_else(default_key_size),
            request_max_age_ms: env_parse("EDUMFA_PUSH_REQUEST_MAX_AGE_MS")
                .unwrap_or_else(default_max_age),
            user_agent: std::env::var("EDUMFA_PUSH_USER_AGENT")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_user_agent),
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_key_size_bits(mut self, bits: usize) -> Self {
        self.key_size_bits = bits;
        self
    }

    pub fn with_request_max_age_ms(mut self, ms: i64) -> Self {
        self.request_max_age_ms = ms;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
