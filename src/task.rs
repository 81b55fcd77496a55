// src/task.rs
//! Enrichment tasks and the identities used to deduplicate them.

use std::collections::HashSet;

use crate::matcher::find_urls;

/// One intent to turn the URL at `(line_number, position)` into a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessingTask {
    pub url: String,
    pub line_number: usize,
    /// Byte offset of the URL within the line.
    pub position: usize,
    /// Creation time, milliseconds since the UNIX epoch.
    pub timestamp: i64,
}

/// Submission-time identity: one task per URL per line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineKey {
    pub url: String,
    pub line_number: usize,
}

/// Identity of one concrete attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InFlightKey {
    pub url: String,
    pub line_number: usize,
    pub position: usize,
    pub timestamp: i64,
}

/// Identity inside the retry scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub url: String,
    pub line_number: usize,
    pub position: usize,
}

impl ProcessingTask {
    pub fn new(url: impl Into<String>, line_number: usize, position: usize, timestamp: i64) -> Self {
        Self {
            url: url.into(),
            line_number,
            position,
            timestamp,
        }
    }

    pub fn line_key(&self) -> LineKey {
        LineKey {
            url: self.url.clone(),
            line_number: self.line_number,
        }
    }

    pub fn in_flight_key(&self) -> InFlightKey {
        InFlightKey {
            url: self.url.clone(),
            line_number: self.line_number,
            position: self.position,
            timestamp: self.timestamp,
        }
    }

    pub fn retry_key(&self) -> RetryKey {
        RetryKey {
            url: self.url.clone(),
            line_number: self.line_number,
            position: self.position,
        }
    }

    /// True when a scan of `line` still finds exactly this URL at this
    /// position. A URL that has since been extended or linked does not match.
    pub fn matches_line(&self, line: &str) -> bool {
        find_urls(line).any(|occ| occ.index == self.position && occ.url == self.url)
    }
}

/// Build one task per bare URL found in `line`.
pub fn tasks_for_line(line: &str, line_number: usize, timestamp: i64) -> Vec<ProcessingTask> {
    find_urls(line)
        .map(|occ| ProcessingTask::new(occ.url, line_number, occ.index, timestamp))
        .collect()
}

/// Keep the earliest-position task per `(url, line)` and order survivors by
/// `(line, position)`. Returns (kept, dropped_count).
pub fn dedup_batch(mut tasks: Vec<ProcessingTask>) -> (Vec<ProcessingTask>, usize) {
    tasks.sort_by_key(|t| (t.line_number, t.position));
    let total = tasks.len();
    let mut seen: HashSet<LineKey> = HashSet::new();
    let kept: Vec<_> = tasks
        .into_iter()
        .filter(|t| seen.insert(t.line_key()))
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_earliest_position_per_line() {
        let batch = vec![
            ProcessingTask::new("https://a.io", 0, 20, 1),
            ProcessingTask::new("https://a.io", 0, 3, 1),
            ProcessingTask::new("https://a.io", 1, 9, 1),
        ];
        let (kept, dropped) = dedup_batch(batch);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!((kept[0].line_number, kept[0].position), (0, 3));
        assert_eq!((kept[1].line_number, kept[1].position), (1, 9));
    }

    #[test]
    fn matches_line_checks_exact_position() {
        let t = ProcessingTask::new("https://a.io", 0, 4, 0);
        assert!(t.matches_line("see https://a.io now"));
        assert!(!t.matches_line("x see https://a.io now"));
        assert!(!t.matches_line("see"));
    }

    #[test]
    fn matches_line_rejects_extended_or_linked_url() {
        let t = ProcessingTask::new("https://a.io", 0, 4, 0);
        assert!(!t.matches_line("see https://a.io/docs"));
        assert!(!t.matches_line("see https://a.iox"));
        assert!(!t.matches_line("see [A](https://a.io)"));
        assert!(t.matches_line("see https://a.io."));
    }

    #[test]
    fn tasks_for_line_skips_linked_urls() {
        let tasks = tasks_for_line("[a](https://a.io) https://b.io", 7, 42);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].url, "https://b.io");
        assert_eq!(tasks[0].line_number, 7);
        assert_eq!(tasks[0].timestamp, 42);
    }
}
