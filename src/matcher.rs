// src/matcher.rs
//! URL detection within a line (or a pasted block) of text.
//!
//! Markdown link spans `[label](url)` are located first; any URL match that
//! starts inside one of those spans is skipped, so an already-linked URL is
//! never reported twice.

use once_cell::sync::OnceCell;
use regex::{Matches, Regex};
use std::ops::Range;

/// A located URL and the byte offset of its first character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlOccurrence {
    pub url: String,
    pub index: usize,
}

impl UrlOccurrence {
    /// Byte range covered by the URL inside the scanned text.
    pub fn span(&self) -> Range<usize> {
        self.index..self.index + self.url.len()
    }
}

fn url_regex() -> &'static Regex {
    static RE_URL: OnceCell<Regex> = OnceCell::new();
    RE_URL.get_or_init(|| Regex::new(r#"https?://[^\s<>"\[\]()]+"#).unwrap())
}

fn markdown_link_regex() -> &'static Regex {
    static RE_MD: OnceCell<Regex> = OnceCell::new();
    RE_MD.get_or_init(|| Regex::new(r"\[[^\]\n]*\]\([^)\s]+\)").unwrap())
}

/// Byte spans of every well-formed markdown link in `text`.
pub fn markdown_link_spans(text: &str) -> Vec<Range<usize>> {
    markdown_link_regex()
        .find_iter(text)
        .map(|m| m.range())
        .collect()
}

/// Scan `text` for bare URLs.
///
/// The returned iterator is lazy and finite; call `find_urls` again to
/// restart the scan.
pub fn find_urls(text: &str) -> Occurrences<'_> {
    Occurrences {
        inner: url_regex().find_iter(text),
        excluded: markdown_link_spans(text),
    }
}

/// Lazy iterator over the bare URLs of one text.
pub struct Occurrences<'t> {
    inner: Matches<'static, 't>,
    excluded: Vec<Range<usize>>,
}

impl Iterator for Occurrences<'_> {
    type Item = UrlOccurrence;

    fn next(&mut self) -> Option<Self::Item> {
        for m in self.inner.by_ref() {
            if self.excluded.iter().any(|span| span.contains(&m.start())) {
                continue;
            }
            let url = trim_trailing_punct(m.as_str());
            if url.ends_with("://") {
                continue;
            }
            return Some(UrlOccurrence {
                url: url.to_string(),
                index: m.start(),
            });
        }
        None
    }
}

fn trim_trailing_punct(s: &str) -> &str {
    s.trim_end_matches(['.', ',', ';', ':', '!', '?', '\''])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_bare_url_with_offset() {
        let text = "see https://example.com/cool-page for info";
        let found: Vec<_> = find_urls(text).collect();
        assert_eq!(
            found,
            vec![UrlOccurrence {
                url: "https://example.com/cool-page".into(),
                index: 4,
            }]
        );
    }

    #[test]
    fn skips_markdown_linked_url() {
        let text = "[Existing](https://example.com/x) and http://other.org/y";
        let found: Vec<_> = find_urls(text).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "http://other.org/y");
        assert_eq!(found[0].index, text.find("http://other").unwrap());
    }

    #[test]
    fn strips_sentence_punctuation() {
        let found: Vec<_> = find_urls("read https://example.com/a.").collect();
        assert_eq!(found[0].url, "https://example.com/a");
    }

    #[test]
    fn bare_scheme_is_not_a_url() {
        assert_eq!(find_urls("type https:// here").count(), 0);
    }

    #[test]
    fn scan_is_restartable() {
        let text = "a https://x.io b https://y.io";
        assert_eq!(find_urls(text).count(), 2);
        assert_eq!(find_urls(text).count(), 2);
    }
}
