//! Demo: paste the command-line text into an in-memory document, let the
//! engine enrich it, print the result.
//!
//! `LineBuffer` raises no change events, so after each settled pass the demo
//! rescans on the host's behalf until no written link shifts a later URL.
//!
//! `cargo run --bin enrich_line -- "see https://www.rust-lang.org for info"`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use auto_link_title::{engine_from_env, find_urls, Engine, LineBuffer, PasteDisposition, SingleTarget};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact tracing, only when LINK_TITLE_DEV_LOG=1.
fn enable_dev_tracing() {
    let dev_flag = std::env::var("LINK_TITLE_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");
    if !dev_flag {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("enrich=debug,auto_link_title=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    enable_dev_tracing();

    let text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if text.trim().is_empty() {
        bail!("usage: enrich_line <text containing urls>");
    }

    let doc = Arc::new(LineBuffer::from_text(""));
    let engine = engine_from_env(Arc::new(SingleTarget::new(doc.clone())))?;
    engine.start();

    // Host inserts the paste, then notifies.
    doc.append(&text);
    if engine.on_paste(&text) == PasteDisposition::Ignored {
        println!("{}", doc.text());
        engine.stop();
        return Ok(());
    }

    // Debounce + resolution; give up after 60s.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    let mut seen = doc.text();
    loop {
        if !settle(&engine, deadline).await {
            tracing::warn!("gave up waiting for enrichment");
            break;
        }
        let current = doc.text();
        if current == seen || find_urls(&current).next().is_none() {
            break;
        }
        seen = current;
        // A written link shifts later URLs on its line; rescan like a host would.
        if engine.on_paste(&seen) == PasteDisposition::Ignored {
            break;
        }
    }

    println!("{}", doc.text());
    engine.stop();
    Ok(())
}

/// Wait out the debounce, then until nothing is queued, in flight or held.
async fn settle(engine: &Engine, deadline: tokio::time::Instant) -> bool {
    tokio::time::sleep(engine.config().debounce() + Duration::from_millis(50)).await;
    loop {
        let snap = engine.snapshot();
        if !snap.draining && snap.queued == 0 && snap.in_flight == 0 && snap.retry_held == 0 {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
