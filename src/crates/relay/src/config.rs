//! Relay configuration
//!
//! Loaded from `relay.toml` (or the path in `RELAY_CONFIG`), overlaid with
//! `RELAY_*` environment variables, then validated. Every section is
//! optional; missing values take the defaults below.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tooling::async_utils::{RetryPolicy, Retryable};
use tooling::config::{build_env_key, get_env, override_from_env, ConfigBuilder};
use tooling::ToolingError;

use crate::cache::CachePolicy;
use crate::client::reconnect::ReconnectPolicy;
use crate::fingerprint::Category;
use crate::session::registry::MIN_TIMEOUT_MULTIPLIER;
use crate::{RelayError, Result};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "RELAY_";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Bearer token required on `/process` and `/stream`; `None` disables auth
    pub auth_token: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            auth_token: None,
        }
    }
}

/// Push-channel session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    pub heartbeat_interval_secs: u64,
    /// Session timeout as a multiple of the heartbeat interval
    pub timeout_multiplier: u32,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            timeout_multiplier: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPolicySection {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl From<CategoryPolicySection> for CachePolicy {
    fn from(section: CategoryPolicySection) -> Self {
        CachePolicy::new(Duration::from_secs(section.ttl_secs), section.max_entries)
    }
}

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub sweep_interval_secs: u64,
    pub version: u32,
    pub general: CategoryPolicySection,
    pub researcher: CategoryPolicySection,
    pub coder: CategoryPolicySection,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            version: 1,
            general: CategoryPolicySection { ttl_secs: 3600, max_entries: 100 },
            researcher: CategoryPolicySection { ttl_secs: 1800, max_entries: 50 },
            coder: CategoryPolicySection { ttl_secs: 7200, max_entries: 200 },
        }
    }
}

impl CacheSection {
    pub fn policy(&self, category: Category) -> CachePolicy {
        match category {
            Category::General => self.general.into(),
            Category::Researcher => self.researcher.into(),
            Category::Coder => self.coder.into(),
        }
    }

    pub fn policies(&self) -> HashMap<Category, CachePolicy> {
        Category::ALL
            .iter()
            .map(|category| (*category, self.policy(*category)))
            .collect()
    }
}

/// Retry settings for the triggering request and upstream calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            attempt_timeout_secs: 60,
        }
    }
}

impl RetrySection {
    /// Build a retry policy that retries only [`Retryable`] failures.
    pub fn policy<E: Retryable + 'static>(&self) -> RetryPolicy<E> {
        RetryPolicy::new(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_attempt_timeout(Duration::from_secs(self.attempt_timeout_secs))
            .with_predicate(|error: &E| error.is_retryable())
    }
}

/// Streaming channel reconnect settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    pub max_reconnects: u32,
    pub base_delay_ms: u64,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            max_reconnects: 3,
            base_delay_ms: 1000,
        }
    }
}

impl ChannelSection {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.max_reconnects, Duration::from_millis(self.base_delay_ms))
    }
}

/// Upstream language model API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub requests_per_minute: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "deepseek/deepseek-r1-distill-llama-70b".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            requests_per_minute: 5,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

impl UpstreamSection {
    /// API key read from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        get_env(&self.api_key_env).ok().flatten().filter(|key| !key.is_empty())
    }
}

/// Local conversation history settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    pub path: Option<PathBuf>,
    pub keep_last: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            path: None,
            keep_last: 10,
        }
    }
}

/// Complete relay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerSection,
    pub sessions: SessionsSection,
    pub cache: CacheSection,
    pub retry: RetrySection,
    pub channel: ChannelSection,
    pub upstream: UpstreamSection,
    pub history: HistorySection,
}

impl RelayConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Load a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load, overlay the environment and validate.
    ///
    /// The file is, in order: `explicit`, `RELAY_CONFIG`, `./relay.toml`.
    /// With none of these present the defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = get_env("RELAY_CONFIG")?.map(PathBuf::from);
        let path = explicit.map(Path::to_path_buf).or(from_env).or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        });

        let mut config = match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env(ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address of the HTTP listener
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid listen address: {}", e)))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.heartbeat_interval_secs)
    }

    /// Heartbeat interval times the timeout multiplier
    pub fn session_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.sessions.timeout_multiplier
    }
}

impl ConfigBuilder for RelayConfig {
    fn validate(&self) -> tooling::Result<()> {
        let invalid = |message: &str| Err(ToolingError::General(message.to_string()));

        if self.sessions.heartbeat_interval_secs == 0 {
            return invalid("sessions.heartbeat_interval_secs must be positive");
        }
        if self.sessions.timeout_multiplier < MIN_TIMEOUT_MULTIPLIER {
            return invalid("sessions.timeout_multiplier must be at least 2");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return invalid("retry.max_delay_ms must not be below retry.base_delay_ms");
        }
        if self.retry.attempt_timeout_secs == 0 {
            return invalid("retry.attempt_timeout_secs must be positive");
        }
        if self.cache.sweep_interval_secs == 0 {
            return invalid("cache.sweep_interval_secs must be positive");
        }
        if Category::ALL
            .iter()
            .any(|category| self.cache.policy(*category).max_entries == 0)
        {
            return invalid("cache max_entries must be at least 1 for every category");
        }
        if self.upstream.requests_per_minute == 0 {
            return invalid("upstream.requests_per_minute must be positive");
        }
        if self.history.keep_last == 0 {
            return invalid("history.keep_last must be at least 1");
        }
        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        let key = |name: &str| build_env_key(prefix, name);

        override_from_env(&mut self.server.host, &key("server_host"))?;
        override_from_env(&mut self.server.port, &key("server_port"))?;
        if let Some(token) = get_env(&key("auth_token"))? {
            self.server.auth_token = Some(token).filter(|t| !t.is_empty());
        }

        override_from_env(&mut self.sessions.heartbeat_interval_secs, &key("heartbeat_interval_secs"))?;
        override_from_env(&mut self.sessions.timeout_multiplier, &key("timeout_multiplier"))?;
        override_from_env(&mut self.cache.sweep_interval_secs, &key("cache_sweep_interval_secs"))?;

        override_from_env(&mut self.retry.max_attempts, &key("retry_max_attempts"))?;
        override_from_env(&mut self.retry.base_delay_ms, &key("retry_base_delay_ms"))?;
        override_from_env(&mut self.retry.max_delay_ms, &key("retry_max_delay_ms"))?;
        override_from_env(&mut self.retry.attempt_timeout_secs, &key("retry_attempt_timeout_secs"))?;

        override_from_env(&mut self.channel.max_reconnects, &key("channel_max_reconnects"))?;
        override_from_env(&mut self.channel.base_delay_ms, &key("channel_base_delay_ms"))?;

        override_from_env(&mut self.upstream.base_url, &key("upstream_base_url"))?;
        override_from_env(&mut self.upstream.model, &key("upstream_model"))?;
        override_from_env(&mut self.upstream.requests_per_minute, &key("upstream_requests_per_minute"))?;

        if let Some(path) = get_env(&key("history_path"))? {
            self.history.path = Some(PathBuf::from(path));
        }
        Ok(())
    }
}
