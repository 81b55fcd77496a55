// src/lib.rs
// Public library surface for hosts and integration tests.

pub mod cache;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod document;
pub mod engine;
pub mod http;
pub mod matcher;
pub mod resolver;
pub mod retry;
pub mod task;

// ---- Re-exports for stable public API ----
pub use crate::config::{load_config_default, EnrichConfig};
pub use crate::document::{Cursor, EditTargets, LineBuffer, SingleTarget, TextSource};
pub use crate::engine::{Engine, EngineSnapshot, EnrichError, PasteDisposition, TaskOutcome};
pub use crate::http::{HttpClient, ReqwestClient};
pub use crate::matcher::{find_urls, UrlOccurrence};
pub use crate::resolver::{fallback_title, ResolveError, TitleResolver};

use std::sync::Arc;

/// Build an engine wired to the reqwest client, using the default config
/// lookup (`$LINK_TITLE_CONFIG_PATH`, then `config/link_title.{toml,json}`).
pub fn engine_from_env(targets: Arc<dyn EditTargets>) -> anyhow::Result<Engine> {
    let cfg = load_config_default()?;
    let http = ReqwestClient::new(&cfg.user_agent, cfg.connect_timeout(), cfg.request_timeout())?;
    tracing::info!(
        "link-title cfg loaded: debounce_ms={}, retry_interval_ms={}, cache_capacity={}",
        cfg.debounce_ms,
        cfg.retry_interval_ms,
        cfg.cache_capacity
    );
    Ok(Engine::new(cfg, Arc::new(http), targets))
}
