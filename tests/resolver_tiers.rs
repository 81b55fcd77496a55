// tests/resolver_tiers.rs
mod common;

use auto_link_title::http::FetchMode;
use auto_link_title::resolver::{ResolverConfig, TitleResolver};
use common::{html, is_embed, opaque, refused, status, ScriptedHttp};
use std::sync::Arc;
use std::time::Duration;

fn resolver(http: Arc<ScriptedHttp>) -> TitleResolver {
    TitleResolver::new(http, ResolverConfig::default())
}

#[tokio::test]
async fn embed_provider_and_title_win() {
    let http = Arc::new(ScriptedHttp::new(|url, _| {
        if is_embed(url) {
            Ok(status(200, r#"{"provider_name":"YouTube","title":"Never Gonna"}"#))
        } else {
            Ok(html("page title"))
        }
    }));
    let title = resolver(http.clone())
        .resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        .await
        .unwrap();
    assert_eq!(title, "YouTube - Never Gonna");
    assert_eq!(http.page_calls(), 0);
}

#[tokio::test]
async fn embed_query_is_percent_encoded() {
    let http = Arc::new(ScriptedHttp::new(|_, _| Ok(status(404, ""))));
    let _ = resolver(http.clone()).resolve("https://a.io/x?y=1&z=2").await;
    let (first, _) = http.log()[0].clone();
    assert_eq!(
        first,
        "https://noembed.com/embed?url=https%3A%2F%2Fa.io%2Fx%3Fy%3D1%26z%3D2"
    );
}

#[tokio::test]
async fn embed_missing_fields_falls_through_to_page() {
    let http = Arc::new(ScriptedHttp::new(|url, _| {
        if is_embed(url) {
            Ok(status(200, r#"{"error":"no matching providers found"}"#))
        } else {
            Ok(html("  Rust &amp; Cargo  "))
        }
    }));
    let title = resolver(http).resolve("https://doc.rust-lang.org/cargo").await.unwrap();
    assert_eq!(title, "Rust & Cargo");
}

#[tokio::test]
async fn embed_network_error_is_not_a_retry() {
    let http = Arc::new(ScriptedHttp::new(|url, _| {
        if is_embed(url) {
            Err(refused(url))
        } else {
            Ok(html("Direct"))
        }
    }));
    let title = resolver(http.clone()).resolve("https://a.io/p").await.unwrap();
    assert_eq!(title, "Direct");
    assert_eq!(http.page_calls(), 1);
}

#[tokio::test]
async fn opaque_permissive_response_gives_fallback() {
    // Scenario B: every network tier comes back empty-handed.
    let http = Arc::new(ScriptedHttp::new(|url, opts| match opts.mode {
        FetchMode::Cors => Err(refused(url)),
        FetchMode::NoCors => Ok(opaque()),
    }));
    let title = resolver(http.clone())
        .resolve("https://example.org/My_Report.html")
        .await
        .unwrap();
    assert_eq!(title, "My Report");
    // embed + direct + permissive, no second attempt
    assert_eq!(http.calls(), 3);
}

#[tokio::test]
async fn root_url_without_title_uses_host() {
    // Scenario C
    let http = Arc::new(ScriptedHttp::new(|url, _| {
        if is_embed(url) {
            Ok(status(404, "not found"))
        } else {
            Ok(status(200, "<html><body>no title here</body></html>"))
        }
    }));
    let title = resolver(http).resolve("https://example.org/").await.unwrap();
    assert_eq!(title, "example.org");
}

#[tokio::test]
async fn error_status_gives_fallback_without_retry() {
    let http = Arc::new(ScriptedHttp::new(|url, _| {
        if is_embed(url) {
            Err(refused(url))
        } else {
            Ok(status(503, "<title>Service Unavailable</title>"))
        }
    }));
    let title = resolver(http.clone())
        .resolve("https://www.example.org/blog/hello-world.php")
        .await
        .unwrap();
    assert_eq!(title, "hello world");
    assert_eq!(http.page_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_then_escalate() {
    let http = Arc::new(ScriptedHttp::new(|url, _| Err(refused(url))));
    let t0 = tokio::time::Instant::now();
    let err = resolver(http.clone())
        .resolve("https://down.example/x")
        .await
        .unwrap_err();
    assert!(err.is_transient());
    // 3 attempts × (direct + permissive) after one embed lookup
    assert_eq!(http.calls(), 7);
    // waits of 1000 ms and 2000 ms between attempts, none after the last
    let waited = t0.elapsed();
    assert!(waited >= Duration::from_millis(3000), "waited {waited:?}");
    assert!(waited < Duration::from_millis(7000), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn recovers_on_later_attempt() {
    let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen_c = seen.clone();
    let http = Arc::new(ScriptedHttp::new(move |url, _| {
        if is_embed(url) {
            return Err(refused(url));
        }
        // first attempt: direct + permissive both refused
        if seen_c.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
            Err(refused(url))
        } else {
            Ok(html("Back Up"))
        }
    }));
    let title = resolver(http).resolve("https://flaky.example/").await.unwrap();
    assert_eq!(title, "Back Up");
}

#[tokio::test]
async fn empty_url_is_invalid_input() {
    let http = Arc::new(ScriptedHttp::new(|_, _| Ok(html("x"))));
    let err = resolver(http.clone()).resolve("   ").await.unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(http.calls(), 0);
}
