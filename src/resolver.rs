// src/resolver.rs
//! Title resolution: embed lookup → direct fetch → permissive fetch →
//! URL-derived fallback, with exponential backoff on transport failures.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::http::{FetchError, FetchMode, FetchOptions, FetchResponse, HttpClient};

pub const DEFAULT_EMBED_ENDPOINT: &str = "https://noembed.com/embed";
pub const DEFAULT_USER_AGENT: &str =
    "auto-link-title/0.1 (+https://github.com/auto-link-title/auto-link-title)";

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// `None` disables the embed tier.
    pub embed_endpoint: Option<String>,
    pub user_agent: String,
    /// Direct-fetch attempts before giving up with a transient error.
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubles for each further one.
    pub base_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            embed_endpoint: Some(DEFAULT_EMBED_ENDPOINT.to_string()),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every attempt failed without any response.
    #[error("transient failure resolving {url} after {attempts} attempt(s)")]
    Transient {
        url: String,
        attempts: u32,
        #[source]
        source: FetchError,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ResolveError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::Transient { .. })
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    provider_name: Option<String>,
    title: Option<String>,
}

pub struct TitleResolver {
    http: Arc<dyn HttpClient>,
    cfg: ResolverConfig,
}

impl TitleResolver {
    pub fn new(http: Arc<dyn HttpClient>, cfg: ResolverConfig) -> Self {
        Self { http, cfg }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.cfg
    }

    /// Resolve a display title for `url`.
    ///
    /// Degraded responses end in the URL-derived fallback; only a run of
    /// attempts that all fail without a response yields an error.
    pub async fn resolve(&self, url: &str) -> Result<String, ResolveError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ResolveError::InvalidInput("empty url".to_string()));
        }

        if let Some(title) = self.embed_title(url).await {
            return Ok(title);
        }

        let attempts = self.cfg.max_retries.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match self.fetch_page_title(url).await {
                Ok(Some(title)) => return Ok(title),
                Ok(None) => {
                    counter!("resolver_fallback_total").increment(1);
                    return Ok(fallback_title(url));
                }
                Err(e) => {
                    tracing::warn!(url, attempt = attempt + 1, error = %e, "title fetch failed");
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        let source = last_err.unwrap_or_else(|| FetchError::new(url, "no attempt made"));
        Err(ResolveError::Transient {
            url: url.to_string(),
            attempts,
            source,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.cfg.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    async fn embed_title(&self, url: &str) -> Option<String> {
        let endpoint = self.cfg.embed_endpoint.as_deref()?;
        let lookup = format!("{endpoint}?url={}", urlencoding::encode(url));
        let resp = match self
            .http
            .fetch(&lookup, &FetchOptions::get(FetchMode::Cors))
            .await
        {
            Ok(r) if r.ok && !r.is_opaque() => r,
            Ok(r) => {
                tracing::debug!(url, status = r.status, "embed lookup unusable");
                return None;
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "embed lookup failed");
                return None;
            }
        };
        let parsed: EmbedResponse = resp.json().ok()?;
        let provider = collapse_ws(parsed.provider_name.as_deref()?);
        let title = collapse_ws(parsed.title.as_deref()?);
        if provider.is_empty() || title.is_empty() {
            return None;
        }
        Some(format!("{provider} - {title}"))
    }

    /// `Ok(None)` means a response arrived but carried no usable title.
    async fn fetch_page_title(&self, url: &str) -> Result<Option<String>, FetchError> {
        let direct = FetchOptions::get(FetchMode::Cors).header("User-Agent", &self.cfg.user_agent);
        let resp = match self.http.fetch(url, &direct).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url, error = %e, "direct fetch failed, trying permissive");
                let permissive =
                    FetchOptions::get(FetchMode::NoCors).header("User-Agent", &self.cfg.user_agent);
                self.http.fetch(url, &permissive).await?
            }
        };
        Ok(title_from_response(&resp))
    }
}

fn title_from_response(resp: &FetchResponse) -> Option<String> {
    if !resp.ok || resp.is_opaque() {
        return None;
    }
    extract_html_title(resp.text())
}

/// First `<title>` element of `html`, entity-decoded and whitespace-collapsed.
pub fn extract_html_title(html: &str) -> Option<String> {
    static RE_TITLE: OnceCell<Regex> = OnceCell::new();
    let re = RE_TITLE.get_or_init(|| Regex::new(r"(?is)<title(?:\s[^>]*)?>(.*?)</title\s*>").unwrap());
    let raw = re.captures(html)?.get(1)?.as_str();
    let title = collapse_ws(&html_escape::decode_html_entities(raw));
    (!title.is_empty()).then_some(title)
}

/// Title derived from the URL itself; never fails.
pub fn fallback_title(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw) else {
        return raw.to_string();
    };
    let host = match parsed.host_str() {
        Some(h) if !h.is_empty() => h.strip_prefix("www.").unwrap_or(h).to_string(),
        _ => return raw.to_string(),
    };

    let segment = parsed
        .path_segments()
        .and_then(|mut segs| segs.rfind(|s| !s.is_empty()));
    let Some(segment) = segment else {
        return host;
    };

    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let cleaned = collapse_ws(&strip_page_extension(&decoded).replace(['-', '_'], " "));
    if cleaned.is_empty() {
        host
    } else {
        cleaned
    }
}

fn strip_page_extension(s: &str) -> &str {
    let lower = s.to_ascii_lowercase();
    for ext in [".html", ".htm", ".php", ".aspx"] {
        if lower.ends_with(ext) {
            return &s[..s.len() - ext.len()];
        }
    }
    s
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_title_case_insensitive() {
        let html = "<html><HEAD><Title>\n  Hello &amp; World </Title><title>x</title>";
        assert_eq!(extract_html_title(html).as_deref(), Some("Hello & World"));
    }

    #[test]
    fn empty_title_is_none() {
        assert!(extract_html_title("<title>   </title>").is_none());
        assert!(extract_html_title("<p>no title</p>").is_none());
    }

    #[test]
    fn fallback_uses_cleaned_segment() {
        assert_eq!(fallback_title("https://example.org/My_Report.html"), "My Report");
        assert_eq!(
            fallback_title("https://example.org/docs/cool-page/"),
            "cool page"
        );
        assert_eq!(fallback_title("https://x.io/a%20b-c.PHP"), "a b c");
    }

    #[test]
    fn fallback_uses_host_for_root() {
        assert_eq!(fallback_title("https://example.org/"), "example.org");
        assert_eq!(fallback_title("https://www.example.org"), "example.org");
    }

    #[test]
    fn fallback_uses_host_when_cleaning_empties() {
        assert_eq!(fallback_title("https://www.example.org/-_.html"), "example.org");
    }

    #[test]
    fn fallback_returns_input_when_unparseable() {
        assert_eq!(fallback_title("not a url"), "not a url");
    }
}
