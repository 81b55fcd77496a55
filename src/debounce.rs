// src/debounce.rs
//! Cancellable delayed callback: scheduling again replaces the pending one.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct Debouncer {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` after `delay` unless another `schedule` or `cancel` comes first.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
        let mut pending = self.pending.lock().expect("debouncer mutex poisoned");
        if let Some(prev) = pending.replace(handle) {
            prev.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(prev) = self.pending.lock().expect("debouncer mutex poisoned").take() {
            prev.abort();
        }
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .expect("debouncer mutex poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(h) = pending.take() {
                h.abort();
            }
        }
    }
}
