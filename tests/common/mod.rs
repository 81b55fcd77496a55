// tests/common/mod.rs
// Shared fixtures: scripted HttpClient and a settle helper.
#![allow(dead_code)]

use async_trait::async_trait;
use auto_link_title::http::{FetchError, FetchMode, FetchOptions, FetchResponse, HttpClient, ResponseKind};
use auto_link_title::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Route = Box<dyn Fn(&str, &FetchOptions) -> Result<FetchResponse, FetchError> + Send + Sync>;

/// HttpClient answering from a closure and recording every request.
pub struct ScriptedHttp {
    route: Route,
    delay: Duration,
    calls: AtomicUsize,
    log: Mutex<Vec<(String, FetchMode)>>,
}

impl ScriptedHttp {
    pub fn new<F>(route: F) -> Self
    where
        F: Fn(&str, &FetchOptions) -> Result<FetchResponse, FetchError> + Send + Sync + 'static,
    {
        Self {
            route: Box::new(route),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests that went to anything but the embed endpoint.
    pub fn page_calls(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| !is_embed(u))
            .count()
    }

    pub fn log(&self) -> Vec<(String, FetchMode)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push((url.to_string(), opts.mode));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.route)(url, opts)
    }
}

pub fn is_embed(url: &str) -> bool {
    url.starts_with("https://noembed.com/embed")
}

pub fn html(title: &str) -> FetchResponse {
    FetchResponse {
        ok: true,
        status: 200,
        kind: ResponseKind::Basic,
        body: format!("<html><head><title>{title}</title></head><body></body></html>"),
    }
}

pub fn status(code: u16, body: &str) -> FetchResponse {
    FetchResponse {
        ok: (200..300).contains(&code),
        status: code,
        kind: ResponseKind::Basic,
        body: body.to_string(),
    }
}

pub fn opaque() -> FetchResponse {
    FetchResponse {
        ok: false,
        status: 0,
        kind: ResponseKind::Opaque,
        body: String::new(),
    }
}

pub fn refused(url: &str) -> FetchError {
    FetchError::new(url, "connection refused")
}

/// Wait (in virtual time) until the engine has nothing queued or in flight.
pub async fn settle(engine: &Engine) {
    for _ in 0..500 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let snap = engine.snapshot();
        if !snap.draining && snap.queued == 0 && snap.in_flight == 0 {
            return;
        }
    }
    panic!("engine did not settle: {:?}", engine.snapshot());
}
