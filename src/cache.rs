// src/cache.rs
//! Bounded URL → title cache with insertion-order (FIFO) eviction.

use std::collections::{HashMap, VecDeque};

pub const DEFAULT_CAPACITY: usize = 1000;

/// FIFO-evicting title cache. Updating an existing key keeps its slot.
///
/// Not synchronized; the engine keeps it behind its state mutex.
#[derive(Debug)]
pub struct TitleCache {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
    cap: usize,
}

impl Default for TitleCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl TitleCache {
    /// A capacity of 0 is treated as 1.
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            entries: HashMap::with_capacity(cap.min(DEFAULT_CAPACITY)),
            order: VecDeque::with_capacity(cap.min(DEFAULT_CAPACITY)),
            cap,
        }
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries.get(url).map(String::as_str)
    }

    pub fn put(&mut self, url: impl Into<String>, title: impl Into<String>) {
        let url = url.into();
        if let Some(slot) = self.entries.get_mut(&url) {
            *slot = title.into();
            return;
        }
        while self.order.len() >= self.cap {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(url.clone());
        self.entries.insert(url, title.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_inserted_at_capacity() {
        let mut c = TitleCache::with_capacity(3);
        for i in 0..4 {
            c.put(format!("u{i}"), format!("t{i}"));
        }
        assert_eq!(c.len(), 3);
        assert!(c.get("u0").is_none());
        assert_eq!(c.get("u3"), Some("t3"));
    }

    #[test]
    fn update_does_not_promote() {
        let mut c = TitleCache::with_capacity(2);
        c.put("a", "1");
        c.put("b", "2");
        c.put("a", "1b"); // value replaced, slot unchanged
        c.put("c", "3");
        assert!(c.get("a").is_none());
        assert_eq!(c.get("b"), Some("2"));
        assert_eq!(c.get("c"), Some("3"));
    }

    #[test]
    fn default_capacity_bound_holds() {
        let mut c = TitleCache::default();
        for i in 0..=DEFAULT_CAPACITY {
            c.put(format!("https://e.com/{i}"), "t");
        }
        assert_eq!(c.len(), DEFAULT_CAPACITY);
        assert!(c.get("https://e.com/0").is_none());
        assert!(c.get("https://e.com/1").is_some());
    }
}
