// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resolver::{ResolverConfig, DEFAULT_EMBED_ENDPOINT, DEFAULT_USER_AGENT};
use crate::retry::RetryPolicy;

pub const ENV_CONFIG_PATH: &str = "LINK_TITLE_CONFIG_PATH";
pub const DEFAULT_CONFIG_TOML: &str = "config/link_title.toml";
pub const DEFAULT_CONFIG_JSON: &str = "config/link_title.json";

fn default_debounce_ms() -> u64 {
    500
}
fn default_drain_pause_ms() -> u64 {
    100
}
fn default_retry_interval_ms() -> u64 {
    5000
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_cap() -> u32 {
    3
}
fn default_resolver_retries() -> u32 {
    3
}
fn default_resolver_base_delay_ms() -> u64 {
    1000
}
fn default_cache_capacity() -> usize {
    crate::cache::DEFAULT_CAPACITY
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_embed_endpoint() -> String {
    DEFAULT_EMBED_ENDPOINT.to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    4
}

/// Engine tuning. Every field falls back to its default when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Pause between two tasks of the drain loop.
    #[serde(default = "default_drain_pause_ms")]
    pub drain_pause_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_cap")]
    pub retry_cap: u32,
    #[serde(default = "default_resolver_retries")]
    pub resolver_retries: u32,
    #[serde(default = "default_resolver_base_delay_ms")]
    pub resolver_base_delay_ms: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Empty string disables the embed lookup.
    #[serde(default = "default_embed_endpoint")]
    pub embed_endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            drain_pause_ms: default_drain_pause_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap: default_retry_cap(),
            resolver_retries: default_resolver_retries(),
            resolver_base_delay_ms: default_resolver_base_delay_ms(),
            cache_capacity: default_cache_capacity(),
            user_agent: default_user_agent(),
            embed_endpoint: default_embed_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl EnrichConfig {
    /// Restore defaults for values that would stall or disable the engine.
    pub fn sanitized(mut self) -> Self {
        if self.retry_interval_ms == 0 {
            self.retry_interval_ms = default_retry_interval_ms();
        }
        if self.retry_base_ms == 0 {
            self.retry_base_ms = default_retry_base_ms();
        }
        if self.resolver_retries == 0 {
            self.resolver_retries = default_resolver_retries();
        }
        if self.cache_capacity == 0 {
            self.cache_capacity = default_cache_capacity();
        }
        if self.user_agent.trim().is_empty() {
            self.user_agent = default_user_agent();
        }
        self.embed_endpoint = self.embed_endpoint.trim().to_string();
        self
    }

    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig {
            embed_endpoint: (!self.embed_endpoint.is_empty()).then(|| self.embed_endpoint.clone()),
            user_agent: self.user_agent.clone(),
            max_retries: self.resolver_retries,
            base_delay: Duration::from_millis(self.resolver_base_delay_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            cap: self.retry_cap,
            base_ms: i64::try_from(self.retry_base_ms).unwrap_or(i64::MAX),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn drain_pause(&self) -> Duration {
        Duration::from_millis(self.drain_pause_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<EnrichConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading link-title config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = if ext == "json" {
        serde_json::from_str::<EnrichConfig>(&content)
            .with_context(|| format!("parsing {}", path.display()))?
    } else {
        toml::from_str::<EnrichConfig>(&content)
            .with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(cfg.sanitized())
}

/// Load config using env var + fallbacks:
/// 1) $LINK_TITLE_CONFIG_PATH
/// 2) config/link_title.toml
/// 3) config/link_title.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<EnrichConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from(DEFAULT_CONFIG_TOML);
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from(DEFAULT_CONFIG_JSON);
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(EnrichConfig::default())
}
