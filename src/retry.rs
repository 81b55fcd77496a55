// src/retry.rs
//! Holding area for tasks whose resolution failed transiently.
//!
//! Pure bookkeeping: the engine's periodic tick asks for due items, runs them
//! through the task pipeline and reports back with `add` or `remove`.

use std::collections::HashMap;

use crate::task::{ProcessingTask, RetryKey};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum scheduled retries per retry key.
    pub cap: u32,
    /// `next_retry = now + 2^retries * base_ms`.
    pub base_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cap: 3,
            base_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryQueueItem {
    pub task: ProcessingTask,
    pub retries: u32,
    /// Milliseconds since the UNIX epoch.
    pub next_retry: i64,
}

/// Result of reporting a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAdmission {
    Scheduled { retries: u32, next_retry: i64 },
    /// The key already used its whole budget; nothing changed.
    Exhausted,
}

#[derive(Debug, Default)]
pub struct RetryScheduler {
    items: HashMap<RetryKey, RetryQueueItem>,
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            items: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Record a transient failure for `task` observed at `now`.
    pub fn add(&mut self, task: ProcessingTask, now: i64) -> RetryAdmission {
        let base = self.policy.base_ms;
        let cap = self.policy.cap;
        let item = self
            .items
            .entry(task.retry_key())
            .or_insert_with(|| RetryQueueItem {
                task,
                retries: 0,
                next_retry: now,
            });
        if item.retries >= cap {
            return RetryAdmission::Exhausted;
        }
        item.next_retry = now.saturating_add(base.saturating_mul(1i64 << item.retries.min(32)));
        item.retries += 1;
        RetryAdmission::Scheduled {
            retries: item.retries,
            next_retry: item.next_retry,
        }
    }

    /// Items whose `next_retry` has elapsed, oldest deadline first.
    pub fn due(&self, now: i64) -> Vec<RetryQueueItem> {
        let mut due: Vec<_> = self
            .items
            .values()
            .filter(|it| it.next_retry <= now)
            .cloned()
            .collect();
        due.sort_by_key(|it| it.next_retry);
        due
    }

    /// True once the key has consumed every scheduled retry.
    pub fn is_exhausted(&self, key: &RetryKey) -> bool {
        self.items
            .get(key)
            .is_some_and(|it| it.retries >= self.policy.cap)
    }

    pub fn contains(&self, key: &RetryKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn get(&self, key: &RetryKey) -> Option<&RetryQueueItem> {
        self.items.get(key)
    }

    pub fn remove(&mut self, key: &RetryKey) -> Option<RetryQueueItem> {
        self.items.remove(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
