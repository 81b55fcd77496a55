// src/http.rs
//! Fetch abstraction used by the title resolver, plus the reqwest-backed
//! production client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// Request mode. `NoCors` is the permissive variant; browser-like hosts may
/// answer it with an opaque response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    #[default]
    Cors,
    NoCors,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub mode: FetchMode,
}

impl FetchOptions {
    pub fn get(mode: FetchMode) -> Self {
        Self {
            method: "GET".to_string(),
            headers: Vec::new(),
            mode,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Basic,
    Cors,
    /// Body unreadable; only the fact that a response arrived is known.
    Opaque,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub ok: bool,
    pub status: u16,
    pub kind: ResponseKind,
    pub body: String,
}

impl FetchResponse {
    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }

    pub fn is_opaque(&self) -> bool {
        self.kind == ResponseKind::Opaque
    }
}

/// A fetch that produced no response at all.
#[derive(Debug, Error)]
#[error("fetch {url} failed: {reason}")]
pub struct FetchError {
    pub url: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(url: &str, reason: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse, FetchError>;
}

/// Production client. `NoCors` requests go through a lenient client that
/// accepts invalid certificates; native requests never come back opaque.
pub struct ReqwestClient {
    strict: reqwest::Client,
    lenient: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(user_agent: &str, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        let strict = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .context("building http client")?;
        let lenient = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .context("building permissive http client")?;
        Ok(Self { strict, lenient })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse, FetchError> {
        let client = match opts.mode {
            FetchMode::Cors => &self.strict,
            FetchMode::NoCors => &self.lenient,
        };
        let method = reqwest::Method::from_bytes(opts.method.as_bytes())
            .map_err(|e| FetchError::new(url, format!("bad method: {e}")))?;
        let mut req = client.request(method, url);
        for (name, value) in &opts.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| FetchError::new(url, e.to_string()))?;
        let status = resp.status();
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                // Status line arrived; treat an unreadable body as empty.
                tracing::debug!(url, error = ?e, "response body unreadable");
                String::new()
            }
        };

        Ok(FetchResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            kind: ResponseKind::Basic,
            body,
        })
    }
}
