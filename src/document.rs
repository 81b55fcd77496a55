// src/document.rs
//! Host-side collaborators: the editable text surface and how the engine
//! finds the currently active one.

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub line: usize,
    pub ch: usize,
}

/// Line-addressed view of an editable document.
pub trait TextSource: Send + Sync {
    fn line(&self, line_number: usize) -> Option<String>;
    fn set_line(&self, line_number: usize, text: &str);
    fn cursor(&self) -> Cursor;
    fn line_count(&self) -> usize;
}

/// Yields the active editable surface, if any.
pub trait EditTargets: Send + Sync {
    fn current(&self) -> Option<Arc<dyn TextSource>>;
}

/// Markdown link text for `title`: brackets escaped, line breaks collapsed.
pub fn link_markup(title: &str, url: &str) -> String {
    let label = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('[', "\\[")
        .replace(']', "\\]");
    format!("[{label}]({url})")
}

/// Replace `url` at byte offset `position` of `line` with a markdown link.
/// Returns `None` when the URL is no longer there.
pub fn apply_link(line: &str, position: usize, url: &str, title: &str) -> Option<String> {
    let end = position.checked_add(url.len())?;
    if line.get(position..end)? != url {
        return None;
    }
    let mut out = String::with_capacity(line.len() + title.len() + 4);
    out.push_str(&line[..position]);
    out.push_str(&link_markup(title, url));
    out.push_str(&line[end..]);
    Some(out)
}

/// In-memory document, one `String` per line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    lines: Vec<String>,
    cursor: Cursor,
}

impl LineBuffer {
    pub fn from_text(text: &str) -> Self {
        let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let cursor = Cursor {
            line: lines.len().saturating_sub(1),
            ch: lines.last().map(|l| l.len()).unwrap_or(0),
        };
        Self {
            inner: Mutex::new(Inner { lines, cursor }),
        }
    }

    pub fn set_cursor(&self, cursor: Cursor) {
        self.inner.lock().expect("line buffer mutex poisoned").cursor = cursor;
    }

    /// Append `text` at the end of the document, moving the cursor past it.
    pub fn append(&self, text: &str) {
        let mut inner = self.inner.lock().expect("line buffer mutex poisoned");
        let mut parts = text.split('\n');
        if let Some(first) = parts.next() {
            match inner.lines.last_mut() {
                Some(last) => last.push_str(first),
                None => inner.lines.push(first.to_string()),
            }
        }
        for p in parts {
            inner.lines.push(p.to_string());
        }
        let line = inner.lines.len().saturating_sub(1);
        let ch = inner.lines.last().map(|l| l.len()).unwrap_or(0);
        inner.cursor = Cursor { line, ch };
    }

    pub fn text(&self) -> String {
        self.inner
            .lock()
            .expect("line buffer mutex poisoned")
            .lines
            .join("\n")
    }
}

impl TextSource for LineBuffer {
    fn line(&self, line_number: usize) -> Option<String> {
        let inner = self.inner.lock().expect("line buffer mutex poisoned");
        inner.lines.get(line_number).cloned()
    }

    fn set_line(&self, line_number: usize, text: &str) {
        let mut inner = self.inner.lock().expect("line buffer mutex poisoned");
        if let Some(slot) = inner.lines.get_mut(line_number) {
            *slot = text.to_string();
        }
    }

    fn cursor(&self) -> Cursor {
        self.inner.lock().expect("line buffer mutex poisoned").cursor
    }

    fn line_count(&self) -> usize {
        self.inner.lock().expect("line buffer mutex poisoned").lines.len()
    }
}

/// A slot holding at most one active document; hosts swap it as focus moves.
#[derive(Default)]
pub struct SingleTarget {
    slot: Mutex<Option<Arc<dyn TextSource>>>,
}

impl SingleTarget {
    pub fn new(doc: Arc<dyn TextSource>) -> Self {
        Self {
            slot: Mutex::new(Some(doc)),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, doc: Option<Arc<dyn TextSource>>) {
        *self.slot.lock().expect("edit target mutex poisoned") = doc;
    }
}

impl EditTargets for SingleTarget {
    fn current(&self) -> Option<Arc<dyn TextSource>> {
        self.slot.lock().expect("edit target mutex poisoned").clone()
    }
}
